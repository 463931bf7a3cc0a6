//! Task lifecycle, supervisor, and audio fabric for dvlink.
//!
//! - [`Task`] / [`TaskHandle`] -- a subsystem running as its own actor,
//!   driven through start/sleep/wake with per-call timeouts
//! - [`Supervisor`] / [`SupervisorBuilder`] -- fixed, mode-dependent
//!   ordering of those transitions across every subsystem
//! - [`AudioFabric`] -- one-time wiring of component audio channels
//! - [`PowerController`] -- boundary to boot straps, peripheral power, and
//!   deep sleep

pub mod fabric;
pub mod lifecycle;
pub mod power;
pub mod supervisor;

pub use fabric::{AudioFabric, AudioFabricBuilder, Route};
pub use lifecycle::{Task, TaskHandle};
pub use power::{BootStraps, HostPowerController, OperatingMode, PowerController};
pub use supervisor::{Plan, SequenceOutcome, Step, Supervisor, SupervisorBuilder, names};
