//! dvlink-test-harness: mock radios for deterministic session tests.
//!
//! This crate provides [`MockIcomRadio`], a UDP peer speaking the network
//! control/audio dialect, and [`MockFlexRadio`], a TCP listener speaking
//! the line-oriented command dialect. Both record what the client sent so
//! tests can assert on wire behavior without real hardware.

pub mod mock_flex;
pub mod mock_icom;

pub use mock_flex::MockFlexRadio;
pub use mock_icom::{MockIcomRadio, MockRadioConfig};
