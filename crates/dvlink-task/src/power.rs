//! Boundary to the board's power and boot-strap hardware.
//!
//! The supervisor never touches GPIOs directly. It samples the boot straps,
//! switches peripheral power, and hands off to deep sleep through a
//! [`PowerController`]. [`HostPowerController`] is an implementation for
//! running on a host without power hardware: straps come from
//! configuration and every request is logged and recorded.

use std::sync::Mutex;

use tracing::{error, info};

use dvlink_core::error::{Error, Result};

/// Which fixed task ordering the supervisor follows for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperatingMode {
    #[default]
    Normal,
    /// RF compliance self-test: tones on both codec outputs, no network.
    ComplianceTest,
}

/// Boot-strap inputs, sampled once when the supervisor is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootStraps {
    /// Force the default network setup.
    pub override_network: bool,
    /// Enter compliance test mode.
    pub compliance_test: bool,
}

impl BootStraps {
    pub fn mode(&self) -> OperatingMode {
        if self.compliance_test {
            OperatingMode::ComplianceTest
        } else {
            OperatingMode::Normal
        }
    }
}

/// Power sequencing services the supervisor depends on.
pub trait PowerController: Send + Sync {
    /// Read the boot straps.
    fn sample_straps(&self) -> BootStraps;

    /// Switch on peripheral power before tasks start or wake.
    fn enable_peripheral_power(&self) -> Result<()>;

    /// Whether the battery is too low to keep running.
    fn battery_low(&self) -> bool {
        false
    }

    /// Hand off to the low-power wake detector. On hardware this does not
    /// return.
    fn enter_deep_sleep(&self);

    /// A start, sleep, or wake sequence aborted.
    fn sequence_failed(&self, error: &Error);
}

#[derive(Debug, Default)]
struct HostRecord {
    power_enables: usize,
    deep_sleeps: usize,
    failures: Vec<String>,
}

/// [`PowerController`] for hosts without power hardware.
#[derive(Debug, Default)]
pub struct HostPowerController {
    straps: BootStraps,
    battery_low: bool,
    record: Mutex<HostRecord>,
}

impl HostPowerController {
    pub fn new(straps: BootStraps) -> Self {
        HostPowerController {
            straps,
            ..HostPowerController::default()
        }
    }

    /// Report a low battery from now on.
    pub fn with_battery_low(mut self, low: bool) -> Self {
        self.battery_low = low;
        self
    }

    pub fn power_enables(&self) -> usize {
        self.lock().power_enables
    }

    pub fn deep_sleeps(&self) -> usize {
        self.lock().deep_sleeps
    }

    /// Messages of every failed sequence reported so far.
    pub fn failures(&self) -> Vec<String> {
        self.lock().failures.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PowerController for HostPowerController {
    fn sample_straps(&self) -> BootStraps {
        self.straps
    }

    fn enable_peripheral_power(&self) -> Result<()> {
        info!("peripheral power on");
        self.lock().power_enables += 1;
        Ok(())
    }

    fn battery_low(&self) -> bool {
        self.battery_low
    }

    fn enter_deep_sleep(&self) {
        info!("entering deep sleep");
        self.lock().deep_sleeps += 1;
    }

    fn sequence_failed(&self, err: &Error) {
        error!(error = %err, "power sequence aborted");
        self.lock().failures.push(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straps_select_mode() {
        assert_eq!(BootStraps::default().mode(), OperatingMode::Normal);
        let straps = BootStraps {
            override_network: true,
            compliance_test: false,
        };
        assert_eq!(straps.mode(), OperatingMode::Normal);
        let straps = BootStraps {
            compliance_test: true,
            ..BootStraps::default()
        };
        assert_eq!(straps.mode(), OperatingMode::ComplianceTest);
    }

    #[test]
    fn host_controller_records_requests() {
        let power = HostPowerController::new(BootStraps::default());
        power.enable_peripheral_power().unwrap();
        power.enter_deep_sleep();
        power.sequence_failed(&Error::Timeout);
        assert_eq!(power.power_enables(), 1);
        assert_eq!(power.deep_sleeps(), 1);
        assert_eq!(power.failures(), vec!["timeout waiting for response"]);
        assert!(!power.battery_low());
    }
}
