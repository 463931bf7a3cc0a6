//! Line dialect command encoding and reply parsing.
//!
//! The dialect uses newline-terminated ASCII lines over TCP port 4992.
//! Commands flow from client to radio; responses and handshake lines flow
//! from radio to client.
//!
//! # Line formats
//!
//! ```text
//! Command:   C<seq>|<command_text>\n
//! Response:  R<seq>|<hex_status>|<response_data>\n
//! Version:   V<version>\n
//! Handle:    H<hex_handle>\n
//! ```
//!
//! All encoding/decoding in this module is pure parsing -- no I/O is performed.

use dvlink_core::{Error, Result};

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Encode a command with the given sequence number.
///
/// Format: `C<seq>|<command>\n`
pub fn encode_command(seq: u32, command: &str) -> Vec<u8> {
    format!("C{seq}|{command}\n").into_bytes()
}

// ---------------------------------------------------------------------------
// Command builders
//
// Each builder returns the command string WITHOUT the `C<seq>|` prefix.
// ---------------------------------------------------------------------------

/// Register a waveform with the radio.
///
/// Example output: `"waveform create name=FreeDV-USB mode=FDVU underlying_mode=DIGU version=2.0.0"`
pub fn cmd_waveform_create(name: &str, mode: &str, underlying_mode: &str, version: &str) -> String {
    format!("waveform create name={name} mode={mode} underlying_mode={underlying_mode} version={version}")
}

/// Change a setting on a registered waveform.
///
/// Example output: `"waveform set FreeDV-USB tx=1"`
pub fn cmd_waveform_set(name: &str, setting: &str) -> String {
    format!("waveform set {name} {setting}")
}

/// Unregister a waveform.
///
/// Example output: `"waveform remove FreeDV-USB"`
pub fn cmd_waveform_remove(name: &str) -> String {
    format!("waveform remove {name}")
}

/// Build a subscribe command.
///
/// Example output: `"sub slice all"`
pub fn cmd_subscribe(object: &str) -> String {
    format!("sub {object}")
}

// ---------------------------------------------------------------------------
// Inbound lines
// ---------------------------------------------------------------------------

/// A decoded response to a previously-sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Sequence number correlating this response to the originating command.
    pub sequence: u32,
    /// `0` means success.
    pub status: u32,
    /// Everything after the second `|` (may be empty).
    pub message: String,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Types of lines received from the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlexLine {
    /// Protocol version: `V1.4.0.0`
    Version(String),
    /// Connection handle: `H12345678`
    Handle(u32),
    /// Response to a command: `R<seq>|<status>|<data>`
    Response(Response),
    /// A line with a prefix we do not handle.
    Unknown(String),
}

/// Parse a single line from the radio.
///
/// The line should NOT include the trailing `\n`. Leading/trailing
/// whitespace is stripped. Empty lines, handles that are not hex, and
/// responses whose sequence number is not decimal yield
/// [`Error::Malformed`].
pub fn parse_line(line: &str) -> Result<FlexLine> {
    let line = line.trim();
    let Some(first) = line.chars().next() else {
        return Err(Error::Malformed("empty line".into()));
    };

    match first {
        'V' => Ok(FlexLine::Version(line[1..].to_string())),
        'H' => parse_handle(line),
        'R' => parse_response(line),
        _ => Ok(FlexLine::Unknown(line.to_string())),
    }
}

/// Parse a handle line: `H<hex_digits>`
fn parse_handle(line: &str) -> Result<FlexLine> {
    let body = &line[1..];
    let handle = u32::from_str_radix(body, 16)
        .map_err(|_| Error::Malformed(format!("invalid hex handle: {body}")))?;
    Ok(FlexLine::Handle(handle))
}

/// Parse a response line: `R<seq>|<hex_status>|<response_data>`
fn parse_response(line: &str) -> Result<FlexLine> {
    let body = &line[1..];
    let mut parts = body.splitn(3, '|');
    let seq_str = parts.next().unwrap_or_default();
    let status_str = parts.next().unwrap_or_default();
    let message = parts.next().unwrap_or_default().to_string();

    let sequence = seq_str
        .parse::<u32>()
        .map_err(|_| Error::Malformed(format!("invalid response sequence number: {seq_str:?}")))?;

    Ok(FlexLine::Response(Response {
        sequence,
        status: hex_prefix(status_str),
        message,
    }))
}

/// Value of the leading hex digits of `s`, or 0 if there are none.
///
/// Anything after the first non-hex character is ignored, and values wider
/// than 32 bits keep their low 32 bits.
fn hex_prefix(s: &str) -> u32 {
    s.trim_start()
        .chars()
        .map_while(|c| c.to_digit(16))
        .fold(0u32, |acc, d| acc.wrapping_shl(4) | d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command() {
        assert_eq!(encode_command(0, "sub slice all"), b"C0|sub slice all\n");
        assert_eq!(encode_command(42, "info"), b"C42|info\n");
    }

    #[test]
    fn waveform_commands() {
        assert_eq!(
            cmd_waveform_create("FreeDV-USB", "FDVU", "DIGU", "2.0.0"),
            "waveform create name=FreeDV-USB mode=FDVU underlying_mode=DIGU version=2.0.0"
        );
        assert_eq!(cmd_waveform_set("FreeDV-LSB", "tx=1"), "waveform set FreeDV-LSB tx=1");
        assert_eq!(cmd_waveform_remove("FreeDV-USB"), "waveform remove FreeDV-USB");
        assert_eq!(cmd_subscribe("slice all"), "sub slice all");
    }

    #[test]
    fn parses_version_and_handle() {
        assert_eq!(parse_line("V1.4.0.0").unwrap(), FlexLine::Version("1.4.0.0".into()));
        assert_eq!(parse_line("H2C0F1A3B\r").unwrap(), FlexLine::Handle(0x2C0F_1A3B));
        assert!(matches!(parse_line("Hxyz"), Err(Error::Malformed(_))));
    }

    #[test]
    fn parses_response() {
        assert_eq!(
            parse_line("R0|0|").unwrap(),
            FlexLine::Response(Response {
                sequence: 0,
                status: 0,
                message: String::new(),
            })
        );
        assert_eq!(
            parse_line("R12|5000002D|Unable to create waveform|extra").unwrap(),
            FlexLine::Response(Response {
                sequence: 12,
                status: 0x5000_002D,
                message: "Unable to create waveform|extra".into(),
            })
        );
    }

    #[test]
    fn response_without_fields() {
        assert_eq!(
            parse_line("R3").unwrap(),
            FlexLine::Response(Response {
                sequence: 3,
                status: 0,
                message: String::new(),
            })
        );
    }

    #[test]
    fn lenient_status() {
        let status = |line: &str| match parse_line(line).unwrap() {
            FlexLine::Response(r) => r.status,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(status("R1|zz|"), 0);
        assert_eq!(status("R1|1Fq|"), 0x1F);
        assert_eq!(status("R1||"), 0);
    }

    #[test]
    fn non_numeric_sequence_is_malformed() {
        assert!(matches!(parse_line("Rabc|0|"), Err(Error::Malformed(_))));
        assert!(matches!(parse_line("R|0|"), Err(Error::Malformed(_))));
        assert!(matches!(parse_line("R-1|0|"), Err(Error::Malformed(_))));
    }

    #[test]
    fn empty_and_unknown() {
        assert!(matches!(parse_line(""), Err(Error::Malformed(_))));
        assert!(matches!(parse_line("   "), Err(Error::Malformed(_))));
        assert_eq!(
            parse_line("S1|slice 0 mode=USB").unwrap(),
            FlexLine::Unknown("S1|slice 0 mode=USB".into())
        );
    }
}
