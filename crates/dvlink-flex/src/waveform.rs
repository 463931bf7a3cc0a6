//! FreeDV waveform registration.
//!
//! When the radio assigns a connection handle, both sideband variants of
//! the waveform are registered and the client subscribes to slice status.
//! Each successful registration is followed by the transmit enable and
//! filter depth settings for that waveform.

use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::codec::{self, Response};

/// Version string reported to the radio when registering.
pub const WAVEFORM_VERSION: &str = "2.0.0";

/// Filter depth requested for both the receive and transmit paths.
pub const FILTER_DEPTH: u32 = 256;

/// A waveform as the radio knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waveform {
    /// Full name shown in the radio's waveform list.
    pub name: &'static str,
    /// Abbreviated mode name shown in the slice mode selector.
    pub mode: &'static str,
    /// Mode the radio uses underneath.
    pub underlying_mode: &'static str,
}

pub const FREEDV_USB: Waveform = Waveform {
    name: "FreeDV-USB",
    mode: "FDVU",
    underlying_mode: "DIGU",
};

pub const FREEDV_LSB: Waveform = Waveform {
    name: "FreeDV-LSB",
    mode: "FDVL",
    underlying_mode: "DIGL",
};

/// Registered in this order on every new connection.
pub const WAVEFORMS: [Waveform; 2] = [FREEDV_USB, FREEDV_LSB];

/// Queue registration of every waveform, then the slice subscription.
pub fn register_all(channel: &mut CommandChannel) {
    for waveform in WAVEFORMS {
        register(channel, waveform);
    }
    channel.send_command(&codec::cmd_subscribe("slice all"), None);
}

/// Queue registration of one waveform. Its settings are sent only once the
/// radio accepts the registration.
pub fn register(channel: &mut CommandChannel, waveform: Waveform) {
    info!(
        name = waveform.name,
        mode = waveform.mode,
        "registering waveform"
    );
    let create = codec::cmd_waveform_create(
        waveform.name,
        waveform.mode,
        waveform.underlying_mode,
        WAVEFORM_VERSION,
    );
    channel.send_command(
        &create,
        Some(Box::new(move |channel: &mut CommandChannel, response: &Response| {
            if !response.is_ok() {
                warn!(
                    name = waveform.name,
                    status = format_args!("{:08X}", response.status),
                    "waveform registration refused"
                );
                return;
            }
            for setting in settings() {
                channel.send_command(&codec::cmd_waveform_set(waveform.name, &setting), None);
            }
        })),
    );
}

/// Queue removal of every waveform.
pub fn unregister_all(channel: &mut CommandChannel) {
    for waveform in WAVEFORMS {
        channel.send_command(&codec::cmd_waveform_remove(waveform.name), None);
    }
}

fn settings() -> [String; 3] {
    [
        "tx=1".to_string(),
        format!("rx_filter depth={FILTER_DEPTH}"),
        format!("tx_filter depth={FILTER_DEPTH}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(channel: &mut CommandChannel) -> Vec<String> {
        channel
            .take_outbound()
            .into_iter()
            .map(|b| {
                let line = String::from_utf8(b).unwrap();
                let (_, cmd) = line.trim_end().split_once('|').unwrap();
                cmd.to_string()
            })
            .collect()
    }

    #[test]
    fn accepted_registration_sends_settings() {
        let mut ch = CommandChannel::new();
        register(&mut ch, FREEDV_USB);
        commands(&mut ch);

        ch.feed(b"R0|0|\n");
        assert_eq!(
            commands(&mut ch),
            vec![
                "waveform set FreeDV-USB tx=1",
                "waveform set FreeDV-USB rx_filter depth=256",
                "waveform set FreeDV-USB tx_filter depth=256",
            ]
        );
    }

    #[test]
    fn refused_registration_sends_nothing() {
        let mut ch = CommandChannel::new();
        register(&mut ch, FREEDV_LSB);
        commands(&mut ch);

        ch.feed(b"R0|50000015|\n");
        assert!(commands(&mut ch).is_empty());
    }

    #[test]
    fn full_setup_sequence() {
        let mut ch = CommandChannel::new();
        register_all(&mut ch);
        assert_eq!(commands(&mut ch).len(), 3);

        // LSB answered first, USB refused.
        ch.feed(b"R1|0|\nR0|1|\n");
        let sent = commands(&mut ch);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|c| c.starts_with("waveform set FreeDV-LSB ")));
    }

    #[test]
    fn removal_commands() {
        let mut ch = CommandChannel::new();
        unregister_all(&mut ch);
        assert_eq!(
            commands(&mut ch),
            vec!["waveform remove FreeDV-USB", "waveform remove FreeDV-LSB"]
        );
        assert_eq!(ch.pending(), 0);
    }
}
