//! The [`Task`] trait and the actor that runs one.
//!
//! Every cooperating subsystem implements [`Task`] and is spawned into its
//! own tokio task with [`TaskHandle::spawn`]. The handle is the only way to
//! reach it: lifecycle transitions travel over an mpsc inbox and each one
//! must be acknowledged within a caller-supplied timeout, or the caller
//! gets [`Error::Timeout`].
//!
//! A task that declares a [`tick_interval`](Task::tick_interval) has
//! [`on_tick`](Task::on_tick) called periodically on its own execution
//! context, but only while it is running.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dvlink_core::error::{Error, Result};
use dvlink_core::types::{LifecyclePhase, TaskState};

/// A subsystem driven through start/sleep/wake by the supervisor.
#[async_trait]
pub trait Task: Send + 'static {
    /// Name the supervisor's plans refer to this task by.
    fn name(&self) -> &str;

    async fn on_start(&mut self) -> Result<()>;

    async fn on_sleep(&mut self) -> Result<()>;

    /// Resume after [`on_sleep`](Task::on_sleep). Defaults to
    /// [`on_start`](Task::on_start).
    async fn on_wake(&mut self) -> Result<()> {
        self.on_start().await
    }

    /// Period of [`on_tick`](Task::on_tick), or `None` for no ticks.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    async fn on_tick(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Check whether `phase` may be applied in `state`.
///
/// Returns `Ok(false)` when the task is already where `phase` would leave
/// it, so the transition is a no-op.
pub fn check_transition(state: TaskState, phase: LifecyclePhase) -> Result<bool> {
    match (state, phase) {
        (TaskState::Stopped, LifecyclePhase::Start)
        | (TaskState::Running, LifecyclePhase::Sleep)
        | (TaskState::Sleeping, LifecyclePhase::Wake) => Ok(true),
        (TaskState::Running, LifecyclePhase::Start | LifecyclePhase::Wake)
        | (TaskState::Sleeping, LifecyclePhase::Sleep) => Ok(false),
        (state, phase) => Err(Error::Unexpected(format!("cannot {phase} a {state} task"))),
    }
}

enum Request {
    Transition {
        phase: LifecyclePhase,
        reply: oneshot::Sender<Result<()>>,
    },
    State {
        reply: oneshot::Sender<TaskState>,
    },
}

/// Handle to a spawned [`Task`].
///
/// Dropping the handle cancels the task.
pub struct TaskHandle {
    name: String,
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `task` onto the runtime in the stopped state.
    pub fn spawn<T: Task>(task: T) -> Self {
        let name = task.name().to_string();
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let actor = TaskActor {
            task,
            state: TaskState::Stopped,
            ticker: None,
            cmd_rx,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(actor.run());

        TaskHandle {
            name,
            cmd_tx,
            cancel,
            task: Some(join),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn start(&self, timeout: Duration) -> Result<()> {
        self.transition(LifecyclePhase::Start, timeout).await
    }

    pub async fn sleep(&self, timeout: Duration) -> Result<()> {
        self.transition(LifecyclePhase::Sleep, timeout).await
    }

    pub async fn wake(&self, timeout: Duration) -> Result<()> {
        self.transition(LifecyclePhase::Wake, timeout).await
    }

    /// Apply `phase` and wait up to `timeout` for the task to acknowledge.
    ///
    /// On timeout the transition may still complete later; the caller must
    /// treat the task as failed.
    pub async fn transition(&self, phase: LifecyclePhase, timeout: Duration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let exchange = async {
            self.cmd_tx
                .send(Request::Transition { phase, reply })
                .await
                .map_err(|_| Error::StreamClosed)?;
            rx.await.map_err(|_| Error::StreamClosed)?
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task = %self.name, %phase, timeout_ms = timeout.as_millis() as u64, "transition timed out");
                Err(Error::Timeout)
            }
        }
    }

    pub async fn state(&self) -> Result<TaskState> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::State { reply })
            .await
            .map_err(|_| Error::StreamClosed)?;
        rx.await.map_err(|_| Error::StreamClosed)
    }

    /// Stop the actor without running any lifecycle hook. A hook that is
    /// still in progress is abandoned.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("name", &self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct TaskActor<T: Task> {
    task: T,
    state: TaskState,
    ticker: Option<Interval>,
    cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: Task> TaskActor<T> {
    async fn run(mut self) {
        debug!(task = self.task.name(), "task actor started");
        loop {
            let running = self.state == TaskState::Running;
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                req = self.cmd_rx.recv() => {
                    match req {
                        Some(Request::Transition { phase, reply }) => {
                            let result = self.apply(phase).await;
                            let _ = reply.send(result);
                        }
                        Some(Request::State { reply }) => {
                            let _ = reply.send(self.state);
                        }
                        None => break,
                    }
                }

                _ = tick(&mut self.ticker), if running => {
                    if let Err(e) = self.task.on_tick().await {
                        warn!(task = self.task.name(), error = %e, "tick failed");
                    }
                }
            }
        }
        debug!(task = self.task.name(), "task actor exiting");
    }

    async fn apply(&mut self, phase: LifecyclePhase) -> Result<()> {
        if !check_transition(self.state, phase)? {
            debug!(task = self.task.name(), %phase, state = %self.state, "transition is a no-op");
            return Ok(());
        }

        let cancel = self.cancel.clone();
        let hook = async {
            match phase {
                LifecyclePhase::Start => self.task.on_start().await,
                LifecyclePhase::Sleep => self.task.on_sleep().await,
                LifecyclePhase::Wake => self.task.on_wake().await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::StreamClosed),
            result = hook => result,
        };
        if let Err(e) = result {
            warn!(task = self.task.name(), %phase, error = %e, "transition failed");
            return Err(e);
        }

        let from = self.state;
        self.state = TaskState::after(phase);
        self.ticker = match (self.state, self.task.tick_interval()) {
            (TaskState::Running, Some(period)) if !period.is_zero() => {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(ticker)
            }
            _ => None,
        };
        info!(task = self.task.name(), %from, to = %self.state, "task transitioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Journal {
        calls: Vec<&'static str>,
        ticks: usize,
    }

    struct FakeTask {
        name: &'static str,
        delay: Duration,
        fail_sleep: bool,
        tick: Option<Duration>,
        journal: Arc<Mutex<Journal>>,
    }

    impl FakeTask {
        fn new(name: &'static str) -> (Self, Arc<Mutex<Journal>>) {
            let journal = Arc::new(Mutex::new(Journal::default()));
            (
                FakeTask {
                    name,
                    delay: Duration::ZERO,
                    fail_sleep: false,
                    tick: None,
                    journal: Arc::clone(&journal),
                },
                journal,
            )
        }
    }

    #[async_trait]
    impl Task for FakeTask {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_start(&mut self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.journal.lock().unwrap().calls.push("start");
            Ok(())
        }

        async fn on_sleep(&mut self) -> Result<()> {
            if self.fail_sleep {
                return Err(Error::Transport("bus fault".into()));
            }
            self.journal.lock().unwrap().calls.push("sleep");
            Ok(())
        }

        async fn on_wake(&mut self) -> Result<()> {
            self.journal.lock().unwrap().calls.push("wake");
            Ok(())
        }

        fn tick_interval(&self) -> Option<Duration> {
            self.tick
        }

        async fn on_tick(&mut self) -> Result<()> {
            self.journal.lock().unwrap().ticks += 1;
            Ok(())
        }
    }

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn transition_table() {
        use LifecyclePhase::*;
        assert!(check_transition(TaskState::Stopped, Start).unwrap());
        assert!(check_transition(TaskState::Running, Sleep).unwrap());
        assert!(check_transition(TaskState::Sleeping, Wake).unwrap());
        assert!(!check_transition(TaskState::Running, Start).unwrap());
        assert!(!check_transition(TaskState::Sleeping, Sleep).unwrap());
        assert!(check_transition(TaskState::Stopped, Wake).is_err());
        assert!(check_transition(TaskState::Stopped, Sleep).is_err());
        assert!(check_transition(TaskState::Sleeping, Start).is_err());
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let (task, journal) = FakeTask::new("leds");
        let handle = TaskHandle::spawn(task);
        assert_eq!(handle.name(), "leds");
        assert_eq!(handle.state().await.unwrap(), TaskState::Stopped);

        handle.start(T).await.unwrap();
        assert_eq!(handle.state().await.unwrap(), TaskState::Running);
        handle.sleep(T).await.unwrap();
        assert_eq!(handle.state().await.unwrap(), TaskState::Sleeping);
        handle.wake(T).await.unwrap();
        assert_eq!(handle.state().await.unwrap(), TaskState::Running);

        // Already running: no hook runs.
        handle.start(T).await.unwrap();
        assert_eq!(journal.lock().unwrap().calls, vec!["start", "sleep", "wake"]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transition_times_out() {
        let (mut task, _) = FakeTask::new("codec");
        task.delay = Duration::from_secs(3);
        let handle = TaskHandle::spawn(task);

        let result = handle.start(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Timeout)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_hook_keeps_state() {
        let (mut task, _) = FakeTask::new("network");
        task.fail_sleep = true;
        let handle = TaskHandle::spawn(task);

        handle.start(T).await.unwrap();
        assert!(matches!(handle.sleep(T).await, Err(Error::Transport(_))));
        assert_eq!(handle.state().await.unwrap(), TaskState::Running);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let (task, journal) = FakeTask::new("ui");
        let handle = TaskHandle::spawn(task);
        assert!(matches!(handle.wake(T).await, Err(Error::Unexpected(_))));
        assert!(journal.lock().unwrap().calls.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_only_while_running() {
        let (mut task, journal) = FakeTask::new("mixer");
        task.tick = Some(Duration::from_millis(10));
        let handle = TaskHandle::spawn(task);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(journal.lock().unwrap().ticks, 0);

        handle.start(T).await.unwrap();
        tokio::time::sleep(Duration::from_millis(105)).await;
        let running_ticks = journal.lock().unwrap().ticks;
        assert!(running_ticks >= 10, "only {running_ticks} ticks");

        handle.sleep(T).await.unwrap();
        let at_sleep = journal.lock().unwrap().ticks;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(journal.lock().unwrap().ticks, at_sleep);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_task_reports_closed() {
        let (task, _) = FakeTask::new("update");
        let handle = TaskHandle::spawn(task);
        handle.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(handle.start(T).await, Err(Error::StreamClosed)));
    }
}
