//! Static audio routing between components.
//!
//! An [`AudioFabric`] is a list of [`Route`]s, each connecting one
//! component's named output to another component's named input. The
//! fabric is applied once, before any task starts, by
//! [`assemble`](AudioFabric::assemble). Every route is validated before
//! anything is bound, so a bad route leaves every component untouched.
//!
//! # Example
//!
//! ```
//! use dvlink_core::ChannelLabel::*;
//! use dvlink_task::AudioFabric;
//!
//! let fabric = AudioFabric::builder()
//!     .route("beeper", Left, "mixer", Right)
//!     .route("mixer", Left, "codec", User)
//!     .build();
//! assert_eq!(fabric.routes().len(), 2);
//! ```

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info};

use dvlink_core::audio::{AudioNode, ChannelLabel};
use dvlink_core::error::{Error, Result};

use crate::power::OperatingMode;
use crate::supervisor::names;

/// One producer output bound to one consumer input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub producer: String,
    pub output: ChannelLabel,
    pub consumer: String,
    pub input: ChannelLabel,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.producer, self.output, self.consumer, self.input
        )
    }
}

/// Builder for [`AudioFabric`].
#[derive(Debug, Default)]
pub struct AudioFabricBuilder {
    routes: Vec<Route>,
}

impl AudioFabricBuilder {
    pub fn route(
        mut self,
        producer: &str,
        output: ChannelLabel,
        consumer: &str,
        input: ChannelLabel,
    ) -> Self {
        self.routes.push(Route {
            producer: producer.to_string(),
            output,
            consumer: consumer.to_string(),
            input,
        });
        self
    }

    pub fn build(self) -> AudioFabric {
        AudioFabric {
            routes: self.routes,
        }
    }
}

/// The fixed audio wiring of the handset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFabric {
    routes: Vec<Route>,
}

impl AudioFabric {
    pub fn builder() -> AudioFabricBuilder {
        AudioFabricBuilder::default()
    }

    /// Wiring for normal operation.
    pub fn normal() -> Self {
        use ChannelLabel::*;
        use names::*;
        AudioFabric::builder()
            .route(CODEC, Left, FREEDV, Left)
            .route(CODEC, Right, FREEDV, Right)
            .route(FREEDV, User, MIXER, Left)
            .route(FREEDV, Radio, CODEC, Radio)
            .route(BEEPER, Left, MIXER, Right)
            .route(MIXER, Left, CODEC, User)
            .build()
    }

    /// Wiring for the RF compliance self-test.
    pub fn compliance() -> Self {
        use ChannelLabel::*;
        use names::*;
        AudioFabric::builder()
            .route(COMPLIANCE, Left, CODEC, User)
            .route(COMPLIANCE, Right, CODEC, Radio)
            .build()
    }

    pub fn for_mode(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Normal => AudioFabric::normal(),
            OperatingMode::ComplianceTest => AudioFabric::compliance(),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Check every route against `nodes` without binding anything.
    pub fn validate(&self, nodes: &[&mut dyn AudioNode]) -> Result<()> {
        let mut outputs = HashSet::new();
        let mut inputs = HashSet::new();

        for route in &self.routes {
            let producer = find(nodes, &route.producer)?;
            let consumer = find(nodes, &route.consumer)?;

            if !nodes[producer].ports().has_output(route.output) {
                return Err(Error::Configuration(format!(
                    "{route}: '{}' has no output {}",
                    route.producer, route.output
                )));
            }
            if !nodes[consumer].ports().has_input(route.input) {
                return Err(Error::Configuration(format!(
                    "{route}: '{}' has no input {}",
                    route.consumer, route.input
                )));
            }
            if nodes[producer].ports().is_output_bound(route.output) {
                return Err(Error::Configuration(format!("{route}: output already bound")));
            }
            if nodes[consumer].ports().is_input_claimed(route.input) {
                return Err(Error::Configuration(format!("{route}: input already bound")));
            }
            if !outputs.insert((route.producer.as_str(), route.output)) {
                return Err(Error::Configuration(format!("{route}: output routed twice")));
            }
            if !inputs.insert((route.consumer.as_str(), route.input)) {
                return Err(Error::Configuration(format!("{route}: input routed twice")));
            }
        }
        Ok(())
    }

    /// Bind every route. Fails before binding anything if a component or
    /// channel is missing, or a channel would be bound twice.
    pub fn assemble(&self, nodes: &mut [&mut dyn AudioNode]) -> Result<()> {
        self.validate(nodes)?;

        for route in &self.routes {
            let producer = find(nodes, &route.producer)?;
            let consumer = find(nodes, &route.consumer)?;
            let sender = nodes[consumer].ports_mut().claim_input(route.input)?;
            nodes[producer].ports_mut().bind_output(route.output, sender)?;
            debug!(route = %route, "audio route bound");
        }
        info!(routes = self.routes.len(), "audio fabric assembled");
        Ok(())
    }
}

fn find(nodes: &[&mut dyn AudioNode], name: &str) -> Result<usize> {
    nodes
        .iter()
        .position(|n| n.node_name() == name)
        .ok_or_else(|| Error::Configuration(format!("no audio component named '{name}'")))
}
