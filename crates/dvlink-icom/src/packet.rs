//! Binary packet encoder/decoder for the network control and audio dialect.
//!
//! Every datagram starts with a 16-byte control header. The packet kind is
//! determined by the header's `len` and `type` fields, and for type-0
//! payload packets by the audio ident word. This module is pure byte
//! transformation: no I/O, no state.
//!
//! # Header layout
//!
//! ```text
//! 0x00  len      u32 LE   total datagram length
//! 0x04  type     u16 LE   packet type
//! 0x06  seq      u16 LE   sequence number
//! 0x08  sent_id  u32 BE   sender's session identifier
//! 0x0C  rcvd_id  u32 BE   receiver's session identifier
//! ```
//!
//! Decoding never panics: short, inconsistent, or unknown buffers yield
//! [`DecodeResult::Malformed`].

use bytes::{Buf, BufMut, BytesMut};

use crate::passcode;

/// Length of the control header and of all bare control packets.
pub const CONTROL_LEN: usize = 0x10;
/// Length of a ping request/reply.
pub const PING_LEN: usize = 0x15;
/// Length of a login request.
pub const LOGIN_LEN: usize = 0x80;
/// Length of a login response.
pub const LOGIN_RESPONSE_LEN: usize = 0x60;
/// Length of the audio header that precedes the samples.
pub const AUDIO_HEADER_LEN: usize = 0x18;
/// Largest audio payload we accept, in samples.
pub const MAX_AUDIO_SAMPLES: usize = 0x2000;

/// Ident word marking a type-0 packet as audio.
pub const AUDIO_IDENT: u16 = 0x9781;

/// Width of credential and name fields in the login packet.
const FIELD_LEN: usize = 16;

/// Packet type codes carried in the header.
pub mod packet_type {
    /// Idle/acknowledgment, and the type of all payload packets.
    pub const IDLE: u16 = 0x00;
    pub const RETRANSMIT: u16 = 0x01;
    pub const ARE_YOU_THERE: u16 = 0x03;
    pub const I_AM_HERE: u16 = 0x04;
    pub const DISCONNECT: u16 = 0x05;
    /// Are-you-ready from us, I-am-ready from the radio.
    pub const ARE_YOU_READY: u16 = 0x06;
    pub const PING: u16 = 0x07;
}

/// The fixed control header present on every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub len: u32,
    pub packet_type: u16,
    pub seq: u16,
    pub sent_id: u32,
    pub rcvd_id: u32,
}

impl Header {
    pub fn new(len: usize, packet_type: u16, seq: u16, sent_id: u32, rcvd_id: u32) -> Self {
        Header {
            len: len as u32,
            packet_type,
            seq,
            sent_id,
            rcvd_id,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len);
        buf.put_u16_le(self.packet_type);
        buf.put_u16_le(self.seq);
        buf.put_u32(self.sent_id);
        buf.put_u32(self.rcvd_id);
    }

    fn read(mut buf: &[u8]) -> Self {
        Header {
            len: buf.get_u32_le(),
            packet_type: buf.get_u16_le(),
            seq: buf.get_u16_le(),
            sent_id: buf.get_u32(),
            rcvd_id: buf.get_u32(),
        }
    }
}

/// Discriminant of a decoded [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Idle,
    RetransmitRequest,
    AreYouThere,
    IAmHere,
    Disconnect,
    AreYouReady,
    Ping,
    PingReply,
    Login,
    LoginResponse,
    Audio,
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Keep-alive filler; its `seq` acknowledges a tracked packet.
    Idle(Header),
    /// The peer asks us to resend the packet with `seq`.
    RetransmitRequest(Header),
    AreYouThere(Header),
    IAmHere(Header),
    Disconnect(Header),
    /// Are-you-ready (outbound) or I-am-ready (inbound).
    AreYouReady(Header),
    Ping {
        header: Header,
        reply: bool,
        time: u32,
    },
    Login {
        header: Header,
        inner_seq: u16,
        token_request: u16,
        /// Passcode-encoded username, zero padded.
        username: [u8; FIELD_LEN],
        /// Passcode-encoded password, zero padded.
        password: [u8; FIELD_LEN],
        client_name: String,
    },
    LoginResponse {
        header: Header,
        inner_seq: u16,
        token: u32,
        /// Zero when the login was accepted.
        error: u32,
        connection: String,
    },
    Audio {
        header: Header,
        send_seq: u16,
        samples: Vec<i16>,
    },
}

impl Packet {
    pub fn header(&self) -> &Header {
        match self {
            Packet::Idle(h)
            | Packet::RetransmitRequest(h)
            | Packet::AreYouThere(h)
            | Packet::IAmHere(h)
            | Packet::Disconnect(h)
            | Packet::AreYouReady(h) => h,
            Packet::Ping { header, .. }
            | Packet::Login { header, .. }
            | Packet::LoginResponse { header, .. }
            | Packet::Audio { header, .. } => header,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Idle(_) => PacketKind::Idle,
            Packet::RetransmitRequest(_) => PacketKind::RetransmitRequest,
            Packet::AreYouThere(_) => PacketKind::AreYouThere,
            Packet::IAmHere(_) => PacketKind::IAmHere,
            Packet::Disconnect(_) => PacketKind::Disconnect,
            Packet::AreYouReady(_) => PacketKind::AreYouReady,
            Packet::Ping { reply: false, .. } => PacketKind::Ping,
            Packet::Ping { reply: true, .. } => PacketKind::PingReply,
            Packet::Login { .. } => PacketKind::Login,
            Packet::LoginResponse { .. } => PacketKind::LoginResponse,
            Packet::Audio { .. } => PacketKind::Audio,
        }
    }
}

/// Result of decoding one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    Packet(Packet),
    /// The datagram is truncated, inconsistent, or of an unknown type.
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one datagram.
pub fn decode(buf: &[u8]) -> DecodeResult {
    if buf.len() < CONTROL_LEN {
        return DecodeResult::Malformed(format!("{} bytes is shorter than a header", buf.len()));
    }
    let header = Header::read(buf);
    if header.len as usize != buf.len() {
        return DecodeResult::Malformed(format!(
            "header length {:#x} does not match datagram length {:#x}",
            header.len,
            buf.len()
        ));
    }

    match (buf.len(), header.packet_type) {
        (CONTROL_LEN, packet_type::IDLE) => DecodeResult::Packet(Packet::Idle(header)),
        (CONTROL_LEN, packet_type::RETRANSMIT) => {
            DecodeResult::Packet(Packet::RetransmitRequest(header))
        }
        (CONTROL_LEN, packet_type::ARE_YOU_THERE) => {
            DecodeResult::Packet(Packet::AreYouThere(header))
        }
        (CONTROL_LEN, packet_type::I_AM_HERE) => DecodeResult::Packet(Packet::IAmHere(header)),
        (CONTROL_LEN, packet_type::DISCONNECT) => DecodeResult::Packet(Packet::Disconnect(header)),
        (CONTROL_LEN, packet_type::ARE_YOU_READY) => {
            DecodeResult::Packet(Packet::AreYouReady(header))
        }
        (CONTROL_LEN, other) => {
            DecodeResult::Malformed(format!("unknown control packet type {other:#04x}"))
        }
        (PING_LEN, packet_type::PING) => {
            let mut body = &buf[CONTROL_LEN..];
            let reply = body.get_u8() != 0;
            let time = body.get_u32_le();
            DecodeResult::Packet(Packet::Ping {
                header,
                reply,
                time,
            })
        }
        (len, packet_type::IDLE) if len >= AUDIO_HEADER_LEN && ident(buf) == AUDIO_IDENT => {
            decode_audio(header, buf)
        }
        (LOGIN_LEN, packet_type::IDLE) => decode_login(header, buf),
        (LOGIN_RESPONSE_LEN, packet_type::IDLE) => decode_login_response(header, buf),
        (len, t) => DecodeResult::Malformed(format!("no packet of length {len:#x} and type {t:#04x}")),
    }
}

fn ident(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0x10], buf[0x11]])
}

fn decode_audio(header: Header, buf: &[u8]) -> DecodeResult {
    let mut body = &buf[0x12..AUDIO_HEADER_LEN];
    let send_seq = body.get_u16();
    let _unused = body.get_u16();
    let data_len = body.get_u16() as usize;

    let data = &buf[AUDIO_HEADER_LEN..];
    if data_len != data.len() || data_len % 2 != 0 {
        return DecodeResult::Malformed(format!(
            "audio data length {data_len} inconsistent with {} payload bytes",
            data.len()
        ));
    }
    if data_len / 2 > MAX_AUDIO_SAMPLES {
        return DecodeResult::Malformed(format!("audio payload of {} samples", data_len / 2));
    }

    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    DecodeResult::Packet(Packet::Audio {
        header,
        send_seq,
        samples,
    })
}

fn decode_login(header: Header, buf: &[u8]) -> DecodeResult {
    let inner_seq = u16::from_be_bytes([buf[0x16], buf[0x17]]);
    let token_request = u16::from_le_bytes([buf[0x1A], buf[0x1B]]);
    let mut username = [0u8; FIELD_LEN];
    let mut password = [0u8; FIELD_LEN];
    username.copy_from_slice(&buf[0x40..0x50]);
    password.copy_from_slice(&buf[0x50..0x60]);
    DecodeResult::Packet(Packet::Login {
        header,
        inner_seq,
        token_request,
        username,
        password,
        client_name: read_str(&buf[0x60..0x70]),
    })
}

fn decode_login_response(header: Header, buf: &[u8]) -> DecodeResult {
    let inner_seq = u16::from_be_bytes([buf[0x16], buf[0x17]]);
    let token = u32::from_le_bytes([buf[0x1C], buf[0x1D], buf[0x1E], buf[0x1F]]);
    let error = u32::from_be_bytes([buf[0x30], buf[0x31], buf[0x32], buf[0x33]]);
    DecodeResult::Packet(Packet::LoginResponse {
        header,
        inner_seq,
        token,
        error,
        connection: read_str(&buf[0x40..0x50]),
    })
}

/// Read a zero-padded ASCII field.
fn read_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Write `s` into a zero-padded field of `FIELD_LEN` bytes, truncating.
fn put_field(buf: &mut BytesMut, s: &[u8]) {
    let n = s.len().min(FIELD_LEN);
    buf.put_slice(&s[..n]);
    buf.put_bytes(0, FIELD_LEN - n);
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn control(packet_type: u16, seq: u16, our_id: u32, their_id: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(CONTROL_LEN);
    Header::new(CONTROL_LEN, packet_type, seq, our_id, their_id).put(&mut buf);
    buf.to_vec()
}

/// Discovery packet. `their_id` is zero until the peer has answered.
pub fn are_you_there(our_id: u32, their_id: u32) -> Vec<u8> {
    control(packet_type::ARE_YOU_THERE, 0, our_id, their_id)
}

/// The radio's answer to discovery, carrying its identifier as `sent_id`.
pub fn i_am_here(radio_id: u32, client_id: u32) -> Vec<u8> {
    control(packet_type::I_AM_HERE, 0, radio_id, client_id)
}

/// Readiness request (from us) or readiness confirmation (from the radio).
pub fn are_you_ready(our_id: u32, their_id: u32) -> Vec<u8> {
    control(packet_type::ARE_YOU_READY, 1, our_id, their_id)
}

pub fn disconnect(our_id: u32, their_id: u32) -> Vec<u8> {
    control(packet_type::DISCONNECT, 0, our_id, their_id)
}

/// Idle packet; the receiver treats `seq` as acknowledged.
pub fn idle(seq: u16, our_id: u32, their_id: u32) -> Vec<u8> {
    control(packet_type::IDLE, seq, our_id, their_id)
}

/// Ask the peer to resend `seq`.
pub fn retransmit_request(seq: u16, our_id: u32, their_id: u32) -> Vec<u8> {
    control(packet_type::RETRANSMIT, seq, our_id, their_id)
}

fn ping_packet(seq: u16, our_id: u32, their_id: u32, reply: bool, time: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(PING_LEN);
    Header::new(PING_LEN, packet_type::PING, seq, our_id, their_id).put(&mut buf);
    buf.put_u8(reply as u8);
    buf.put_u32_le(time);
    buf.to_vec()
}

/// Keep-alive request.
pub fn ping(seq: u16, our_id: u32, their_id: u32, time: u32) -> Vec<u8> {
    ping_packet(seq, our_id, their_id, false, time)
}

/// Answer to a peer's keep-alive, echoing its `seq` and `time`.
pub fn ping_reply(seq: u16, our_id: u32, their_id: u32, time: u32) -> Vec<u8> {
    ping_packet(seq, our_id, their_id, true, time)
}

/// Fields of a login request.
#[derive(Debug, Clone)]
pub struct LoginFields<'a> {
    pub inner_seq: u16,
    pub token_request: u16,
    pub username: &'a str,
    pub password: &'a str,
    pub client_name: &'a str,
}

/// Login request with passcode-encoded credentials.
pub fn login(seq: u16, our_id: u32, their_id: u32, fields: &LoginFields<'_>) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(LOGIN_LEN);
    Header::new(LOGIN_LEN, packet_type::IDLE, seq, our_id, their_id).put(&mut buf);
    buf.put_u16(0); // 0x10
    buf.put_u16((LOGIN_LEN - CONTROL_LEN) as u16); // 0x12 payload size
    buf.put_u8(0x01); // 0x14 request/reply
    buf.put_u8(0x00); // 0x15 request type
    buf.put_u16(fields.inner_seq); // 0x16
    buf.put_u16(0); // 0x18
    buf.put_u16_le(fields.token_request); // 0x1A
    buf.put_u32(0); // 0x1C token
    buf.put_bytes(0, 0x20); // 0x20..0x40
    put_field(&mut buf, &passcode::encode(fields.username));
    put_field(&mut buf, &passcode::encode(fields.password));
    put_field(&mut buf, fields.client_name.as_bytes());
    buf.put_bytes(0, FIELD_LEN); // 0x70..0x80
    buf.to_vec()
}

/// Login response as sent by the radio. `error == 0` accepts the login.
pub fn login_response(
    seq: u16,
    radio_id: u32,
    client_id: u32,
    inner_seq: u16,
    token: u32,
    error: u32,
    connection: &str,
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(LOGIN_RESPONSE_LEN);
    Header::new(LOGIN_RESPONSE_LEN, packet_type::IDLE, seq, radio_id, client_id).put(&mut buf);
    buf.put_u16(0); // 0x10
    buf.put_u16((LOGIN_RESPONSE_LEN - CONTROL_LEN) as u16); // 0x12
    buf.put_u8(0x02); // 0x14 reply
    buf.put_u8(0x00); // 0x15
    buf.put_u16(inner_seq); // 0x16
    buf.put_u16(0); // 0x18
    buf.put_u16(0); // 0x1A
    buf.put_u32_le(token); // 0x1C
    buf.put_bytes(0, 0x10); // 0x20..0x30
    buf.put_u32(error); // 0x30
    buf.put_bytes(0, 0x0C); // 0x34..0x40
    put_field(&mut buf, connection.as_bytes()); // 0x40
    buf.put_bytes(0, FIELD_LEN); // 0x50..0x60
    buf.to_vec()
}

/// Audio packet carrying little-endian 16-bit PCM.
pub fn audio(seq: u16, our_id: u32, their_id: u32, send_seq: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let len = AUDIO_HEADER_LEN + data_len;
    let mut buf = BytesMut::with_capacity(len);
    Header::new(len, packet_type::IDLE, seq, our_id, their_id).put(&mut buf);
    buf.put_u16_le(AUDIO_IDENT);
    buf.put_u16(send_seq);
    buf.put_u16(0);
    buf.put_u16(data_len as u16);
    for s in samples {
        buf.put_i16_le(*s);
    }
    buf.to_vec()
}

/// Derive a session identifier from the local IPv4 address and port.
pub fn identifier_for(addr: std::net::Ipv4Addr, port: u16) -> u32 {
    let octets = addr.octets();
    ((octets[2] as u32) << 24) | ((octets[3] as u32) << 16) | port as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn decoded(buf: &[u8]) -> Packet {
        match decode(buf) {
            DecodeResult::Packet(p) => p,
            DecodeResult::Malformed(why) => panic!("malformed: {why}"),
        }
    }

    #[test]
    fn discovery_keeps_kind_and_identifiers() {
        for (ours, theirs) in [(0u32, 0u32), (0x0102_C351, 0), (0xDEAD_BEEF, 0x1234), (u32::MAX, u32::MAX)] {
            let p = decoded(&are_you_there(ours, theirs));
            assert_eq!(p.kind(), PacketKind::AreYouThere);
            assert_eq!(p.header().sent_id, ours);
            assert_eq!(p.header().rcvd_id, theirs);
        }
    }

    #[test]
    fn header_layout() {
        let bytes = are_you_there(0x0A0B_0C0D, 0x0102_0304);
        assert_eq!(
            bytes,
            vec![
                0x10, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x0A, 0x0B, 0x0C, 0x0D, 0x01,
                0x02, 0x03, 0x04
            ]
        );
    }

    #[test]
    fn control_kinds() {
        assert_eq!(decoded(&i_am_here(1, 2)).kind(), PacketKind::IAmHere);
        assert_eq!(decoded(&are_you_ready(1, 2)).kind(), PacketKind::AreYouReady);
        assert_eq!(decoded(&disconnect(1, 2)).kind(), PacketKind::Disconnect);
        assert_eq!(decoded(&retransmit_request(7, 1, 2)).kind(), PacketKind::RetransmitRequest);

        let ack = decoded(&idle(42, 1, 2));
        assert_eq!(ack.kind(), PacketKind::Idle);
        assert_eq!(ack.header().seq, 42);
    }

    #[test]
    fn ping_and_reply() {
        match decoded(&ping(9, 1, 2, 0xCAFE)) {
            Packet::Ping { header, reply, time } => {
                assert_eq!(header.seq, 9);
                assert!(!reply);
                assert_eq!(time, 0xCAFE);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decoded(&ping_reply(9, 2, 1, 0xCAFE)).kind(), PacketKind::PingReply);
    }

    #[test]
    fn login_fields() {
        let fields = LoginFields {
            inner_seq: 0x30,
            token_request: 0xBEEF,
            username: "user",
            password: "secret",
            client_name: "dvlink",
        };
        let bytes = login(5, 1, 2, &fields);
        assert_eq!(bytes.len(), LOGIN_LEN);
        match decoded(&bytes) {
            Packet::Login {
                header,
                inner_seq,
                token_request,
                username,
                password,
                client_name,
            } => {
                assert_eq!(header.seq, 5);
                assert_eq!(inner_seq, 0x30);
                assert_eq!(token_request, 0xBEEF);
                assert_eq!(&username[..4], passcode::encode("user").as_slice());
                assert_eq!(username[4], 0);
                assert_eq!(&password[..6], passcode::encode("secret").as_slice());
                assert_eq!(client_name, "dvlink");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn login_response_error_field() {
        let bytes = login_response(5, 2, 1, 0x30, 0x1122_3344, 0xFEFF_FFFF, "WFVIEW");
        assert_eq!(bytes.len(), LOGIN_RESPONSE_LEN);
        match decoded(&bytes) {
            Packet::LoginResponse {
                inner_seq,
                token,
                error,
                connection,
                ..
            } => {
                assert_eq!(inner_seq, 0x30);
                assert_eq!(token, 0x1122_3344);
                assert_eq!(error, 0xFEFF_FFFF);
                assert_eq!(connection, "WFVIEW");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn audio_samples() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN];
        match decoded(&audio(3, 1, 2, 0x0102, &samples)) {
            Packet::Audio {
                header,
                send_seq,
                samples: got,
            } => {
                assert_eq!(header.seq, 3);
                assert_eq!(send_seq, 0x0102);
                assert_eq!(got, samples);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn audio_with_login_sized_payload_is_still_audio() {
        // 0x18 + 2 * 52 == LOGIN_LEN
        let samples = vec![7i16; 52];
        assert_eq!(decoded(&audio(1, 1, 2, 1, &samples)).kind(), PacketKind::Audio);
    }

    #[test]
    fn truncated_is_malformed() {
        let bytes = are_you_there(1, 2);
        for n in 0..bytes.len() {
            assert!(matches!(decode(&bytes[..n]), DecodeResult::Malformed(_)), "len {n}");
        }
        let login_bytes = login(
            1,
            1,
            2,
            &LoginFields {
                inner_seq: 0,
                token_request: 0,
                username: "a",
                password: "b",
                client_name: "c",
            },
        );
        assert!(matches!(decode(&login_bytes[..0x40]), DecodeResult::Malformed(_)));
    }

    #[test]
    fn length_mismatch_is_malformed() {
        let mut bytes = are_you_there(1, 2);
        bytes.push(0);
        assert!(matches!(decode(&bytes), DecodeResult::Malformed(_)));
    }

    #[test]
    fn unknown_control_type_is_malformed() {
        let mut bytes = are_you_there(1, 2);
        bytes[4] = 0x42;
        assert!(matches!(decode(&bytes), DecodeResult::Malformed(_)));
    }

    #[test]
    fn audio_with_bad_data_length_is_malformed() {
        let mut bytes = audio(1, 1, 2, 1, &[1, 2, 3]);
        bytes[0x17] = 0x10; // claim more data than present
        assert!(matches!(decode(&bytes), DecodeResult::Malformed(_)));
    }

    #[test]
    fn identifier_from_address() {
        let id = identifier_for(Ipv4Addr::new(192, 168, 1, 42), 50001);
        assert_eq!(id, (1 << 24) | (42 << 16) | 50001);
    }
}
