//! Ordered start/sleep/wake across every subsystem.
//!
//! A [`Supervisor`] owns the [`TaskHandle`] of every subsystem and a
//! [`Plan`] listing, per phase, which tasks to transition in which order
//! and how long each may take. The plan is chosen once at assembly from
//! the boot straps and never changes afterwards.
//!
//! Any step that fails or times out aborts the whole sequence. The failure
//! is reported to the [`PowerController`] and returned as
//! [`Error::SequenceFailed`]; nothing is retried.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dvlink_task::{BootStraps, HostPowerController, SupervisorBuilder};
//!
//! # async fn example() -> dvlink_core::Result<()> {
//! let power = Arc::new(HostPowerController::new(BootStraps::default()));
//! let supervisor = SupervisorBuilder::new(power)
//!     // .task(TaskHandle::spawn(...)) for every task in the plan
//!     .build()?;
//! supervisor.start().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use dvlink_core::error::{Error, Result};
use dvlink_core::types::LifecyclePhase;

use crate::lifecycle::TaskHandle;
use crate::power::{BootStraps, OperatingMode, PowerController};

/// Timeout for a step that does not specify one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(1);

/// Task names used by the built-in plans.
pub mod names {
    pub const BATTERY: &str = "battery";
    pub const LEDS: &str = "leds";
    pub const CODEC: &str = "codec";
    pub const BUTTONS: &str = "buttons";
    pub const FREEDV: &str = "freedv";
    pub const MIXER: &str = "mixer";
    pub const BEEPER: &str = "beeper";
    pub const VOICE_KEYER: &str = "voice-keyer";
    pub const UI: &str = "ui";
    pub const NETWORK: &str = "network";
    pub const SETTINGS: &str = "settings";
    pub const UPDATE: &str = "update";
    pub const COMPLIANCE: &str = "compliance";
}

/// One transition of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub task: String,
    pub timeout: Duration,
}

impl Step {
    pub fn new(task: &str, timeout: Duration) -> Self {
        Step {
            task: task.to_string(),
            timeout,
        }
    }
}

fn steps(list: &[(&str, u64)]) -> Vec<Step> {
    list.iter()
        .map(|&(task, ms)| Step::new(task, Duration::from_millis(ms)))
        .collect()
}

/// Task orderings for the start, sleep, and wake sequences.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    pub start: Vec<Step>,
    pub sleep: Vec<Step>,
    pub wake: Vec<Step>,
}

impl Plan {
    /// Ordering for normal operation.
    pub fn normal() -> Self {
        use names::*;
        let start = steps(&[
            (BATTERY, 1000),
            (LEDS, 1000),
            (CODEC, 10_000),
            (BUTTONS, 1000),
            (FREEDV, 1000),
            (MIXER, 1000),
            (BEEPER, 1000),
            (VOICE_KEYER, 1000),
            (UI, 1000),
            (NETWORK, 1000),
            (SETTINGS, 1000),
            (UPDATE, 1000),
        ]);
        let sleep = steps(&[
            (BUTTONS, 1000),
            (NETWORK, 5000),
            (UI, 1000),
            (VOICE_KEYER, 1000),
            (SETTINGS, 1000),
            (UPDATE, 1000),
            (BEEPER, 7000),
            (FREEDV, 1000),
            (MIXER, 3000),
            (CODEC, 2000),
            (LEDS, 1000),
            (BATTERY, 1000),
        ]);
        Plan {
            wake: start.clone(),
            start,
            sleep,
        }
    }

    /// Ordering for the RF compliance self-test.
    pub fn compliance() -> Self {
        use names::*;
        let start = steps(&[
            (BATTERY, 1000),
            (LEDS, 1000),
            (CODEC, 10_000),
            (BUTTONS, 1000),
            (COMPLIANCE, 1000),
        ]);
        let sleep = steps(&[
            (BUTTONS, 1000),
            (COMPLIANCE, 1000),
            (CODEC, 2000),
            (LEDS, 1000),
            (BATTERY, 1000),
        ]);
        Plan {
            wake: start.clone(),
            start,
            sleep,
        }
    }

    pub fn for_mode(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Normal => Plan::normal(),
            OperatingMode::ComplianceTest => Plan::compliance(),
        }
    }

    pub fn steps(&self, phase: LifecyclePhase) -> &[Step] {
        match phase {
            LifecyclePhase::Start => &self.start,
            LifecyclePhase::Sleep => &self.sleep,
            LifecyclePhase::Wake => &self.wake,
        }
    }

    /// Every task any phase refers to.
    pub fn task_names(&self) -> BTreeSet<&str> {
        self.start
            .iter()
            .chain(&self.sleep)
            .chain(&self.wake)
            .map(|s| s.task.as_str())
            .collect()
    }
}

/// How a start or wake sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every step completed.
    Completed,
    /// The battery task reported a low charge; the remaining steps were
    /// skipped and the board was handed off to deep sleep.
    LowBattery,
}

/// Fluent builder for [`Supervisor`].
pub struct SupervisorBuilder {
    power: Arc<dyn PowerController>,
    tasks: Vec<TaskHandle>,
    plans: HashMap<OperatingMode, Plan>,
}

impl SupervisorBuilder {
    pub fn new(power: Arc<dyn PowerController>) -> Self {
        SupervisorBuilder {
            power,
            tasks: Vec::new(),
            plans: HashMap::new(),
        }
    }

    /// Register a spawned task under its name.
    pub fn task(mut self, handle: TaskHandle) -> Self {
        self.tasks.push(handle);
        self
    }

    /// Replace the built-in plan for `mode`.
    pub fn plan(mut self, mode: OperatingMode, plan: Plan) -> Self {
        self.plans.insert(mode, plan);
        self
    }

    /// Sample the boot straps, select the plan, and check that every task
    /// the plan names is registered exactly once.
    pub fn build(mut self) -> Result<Supervisor> {
        let straps = self.power.sample_straps();
        let mode = straps.mode();
        let plan = self
            .plans
            .remove(&mode)
            .unwrap_or_else(|| Plan::for_mode(mode));

        let mut tasks = HashMap::new();
        for handle in self.tasks {
            let name = handle.name().to_string();
            if tasks.insert(name.clone(), handle).is_some() {
                return Err(Error::Configuration(format!(
                    "task '{name}' registered twice"
                )));
            }
        }

        let wanted = plan.task_names();
        for name in &wanted {
            if !tasks.contains_key(*name) {
                return Err(Error::Configuration(format!(
                    "{mode:?} plan needs task '{name}' which is not registered"
                )));
            }
        }
        for name in tasks.keys() {
            if !wanted.contains(name.as_str()) {
                debug!(task = %name, ?mode, "registered task is not in the plan");
            }
        }

        info!(?mode, override_network = straps.override_network, tasks = tasks.len(), "Supervisor assembled");
        Ok(Supervisor {
            power: self.power,
            straps,
            mode,
            plan,
            tasks,
        })
    }
}

/// Runs the start, sleep, and wake sequences.
pub struct Supervisor {
    power: Arc<dyn PowerController>,
    straps: BootStraps,
    mode: OperatingMode,
    plan: Plan,
    tasks: HashMap<String, TaskHandle>,
}

impl Supervisor {
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn straps(&self) -> BootStraps {
        self.straps
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn task(&self, name: &str) -> Option<&TaskHandle> {
        self.tasks.get(name)
    }

    /// Power up and start every task in order.
    pub async fn start(&self) -> Result<SequenceOutcome> {
        self.bring_up(LifecyclePhase::Start).await
    }

    /// Power up and wake every task in order.
    pub async fn wake(&self) -> Result<SequenceOutcome> {
        self.bring_up(LifecyclePhase::Wake).await
    }

    /// Put every task to sleep in order, then hand off to deep sleep.
    pub async fn sleep(&self) -> Result<()> {
        self.run(LifecyclePhase::Sleep).await?;
        self.power.enter_deep_sleep();
        Ok(())
    }

    async fn bring_up(&self, phase: LifecyclePhase) -> Result<SequenceOutcome> {
        if let Err(e) = self.power.enable_peripheral_power() {
            let err = Error::SequenceFailed {
                phase,
                task: "power".into(),
                source: Box::new(e),
            };
            self.power.sequence_failed(&err);
            return Err(err);
        }
        self.run(phase).await
    }

    async fn run(&self, phase: LifecyclePhase) -> Result<SequenceOutcome> {
        info!(%phase, mode = ?self.mode, "sequence begin");
        for step in self.plan.steps(phase) {
            let Some(handle) = self.tasks.get(&step.task) else {
                // build() checked the plan against the registry.
                return Err(self.fail(phase, &step.task, Error::Configuration("task missing".into())));
            };

            debug!(%phase, task = %step.task, timeout_ms = step.timeout.as_millis() as u64, "step");
            if let Err(e) = handle.transition(phase, step.timeout).await {
                return Err(self.fail(phase, &step.task, e));
            }

            if phase != LifecyclePhase::Sleep
                && step.task == names::BATTERY
                && self.power.battery_low()
            {
                warn!(%phase, "battery low; skipping remaining steps");
                self.power.enter_deep_sleep();
                return Ok(SequenceOutcome::LowBattery);
            }
        }
        info!(%phase, "sequence complete");
        Ok(SequenceOutcome::Completed)
    }

    fn fail(&self, phase: LifecyclePhase, task: &str, source: Error) -> Error {
        let err = Error::SequenceFailed {
            phase,
            task: task.to_string(),
            source: Box::new(source),
        };
        error!(error = %err, "sequence aborted");
        self.power.sequence_failed(&err);
        err
    }

    /// Stop every task actor without running lifecycle hooks.
    pub async fn shutdown(self) {
        for (_, handle) in self.tasks {
            handle.shutdown().await;
        }
    }
}
