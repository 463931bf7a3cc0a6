//! Subsystems with no audio endpoints.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use dvlink::Result;
use dvlink::task::{Task, names};

/// How often the UI refreshes its indicators.
pub const UI_REFRESH: Duration = Duration::from_millis(100);

/// A subsystem whose lifecycle is only power bookkeeping on a host:
/// battery monitor, LEDs, buttons, voice keyer, settings store, and
/// firmware updater.
#[derive(Debug)]
pub struct Peripheral {
    name: &'static str,
    starts: u32,
}

impl Peripheral {
    pub fn new(name: &'static str) -> Self {
        Peripheral { name, starts: 0 }
    }

    /// The plan members that need nothing beyond a [`Peripheral`].
    pub fn all() -> [&'static str; 6] {
        [
            names::BATTERY,
            names::LEDS,
            names::BUTTONS,
            names::VOICE_KEYER,
            names::SETTINGS,
            names::UPDATE,
        ]
    }
}

#[async_trait]
impl Task for Peripheral {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_start(&mut self) -> Result<()> {
        self.starts += 1;
        debug!(task = self.name, starts = self.starts, "peripheral up");
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        debug!(task = self.name, "peripheral down");
        Ok(())
    }
}

/// Front panel. Mirrors the radio link onto the network indicator.
#[derive(Debug)]
pub struct UiTask {
    link: watch::Receiver<bool>,
    network_led: bool,
}

impl UiTask {
    pub fn new(link: watch::Receiver<bool>) -> Self {
        UiTask {
            link,
            network_led: false,
        }
    }

    fn refresh(&mut self) {
        let up = *self.link.borrow_and_update();
        if up != self.network_led {
            self.network_led = up;
            info!(on = up, "network indicator");
        }
    }
}

#[async_trait]
impl Task for UiTask {
    fn name(&self) -> &str {
        names::UI
    }

    async fn on_start(&mut self) -> Result<()> {
        self.refresh();
        Ok(())
    }

    async fn on_sleep(&mut self) -> Result<()> {
        if self.network_led {
            self.network_led = false;
            info!(on = false, "network indicator");
        }
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(UI_REFRESH)
    }

    async fn on_tick(&mut self) -> Result<()> {
        if self.link.has_changed().unwrap_or(false) {
            self.refresh();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peripheral_counts_starts() {
        let mut battery = Peripheral::new(names::BATTERY);
        battery.on_start().await.unwrap();
        battery.on_sleep().await.unwrap();
        battery.on_wake().await.unwrap();
        assert_eq!(battery.starts, 2);
        assert_eq!(battery.name(), "battery");
    }

    #[tokio::test]
    async fn ui_follows_link() {
        let (tx, rx) = watch::channel(false);
        let mut ui = UiTask::new(rx);
        ui.on_start().await.unwrap();
        assert!(!ui.network_led);

        tx.send_replace(true);
        ui.on_tick().await.unwrap();
        assert!(ui.network_led);

        ui.on_sleep().await.unwrap();
        assert!(!ui.network_led);
    }
}
