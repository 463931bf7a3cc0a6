//! Credential obfuscation used by the login packet.
//!
//! Each character is shifted by its position and looked up in a fixed
//! substitution table of printable characters. At most 16 characters are
//! encoded.

/// Maximum encoded credential length.
pub const MAX_LEN: usize = 16;

/// Substitution table indexed by `(byte + position)`, folded into 32..=126.
const SEQUENCE: [u8; 128] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0x47, 0x5d, 0x4c, 0x42, 0x66, 0x20, 0x23, 0x46, 0x4e, 0x57, 0x45, 0x3d, 0x67, 0x76, 0x60, 0x41,
    0x62, 0x39, 0x59, 0x2d, 0x68, 0x7e, 0x7c, 0x65, 0x7d, 0x49, 0x29, 0x72, 0x73, 0x78, 0x21, 0x6e,
    0x5a, 0x5e, 0x4a, 0x3e, 0x71, 0x2c, 0x2a, 0x54, 0x3c, 0x3a, 0x63, 0x4f, 0x43, 0x75, 0x27, 0x79,
    0x5b, 0x35, 0x70, 0x48, 0x6b, 0x56, 0x6f, 0x34, 0x32, 0x6c, 0x30, 0x61, 0x6d, 0x7b, 0x2f, 0x4b,
    0x64, 0x38, 0x2b, 0x2e, 0x50, 0x40, 0x3f, 0x55, 0x33, 0x37, 0x25, 0x77, 0x24, 0x26, 0x74, 0x6a,
    0x28, 0x53, 0x4d, 0x69, 0x22, 0x5c, 0x44, 0x31, 0x36, 0x58, 0x3b, 0x7a, 0x51, 0x5f, 0x52, 0,
];

/// Encode a username or password for the login packet.
pub fn encode(input: &str) -> Vec<u8> {
    input
        .bytes()
        .take(MAX_LEN)
        .enumerate()
        .map(|(i, b)| {
            let mut p = b as usize + i;
            if p > 126 {
                p = 32 + (p - 32) % 95;
            }
            SEQUENCE[p]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        assert!(encode("").is_empty());
    }

    #[test]
    fn position_shifts_lookup() {
        // Same character at different positions encodes differently.
        let out = encode("aa");
        assert_eq!(out, vec![SEQUENCE[b'a' as usize], SEQUENCE[b'a' as usize + 1]]);
        assert_ne!(out[0], out[1]);
    }

    #[test]
    fn truncates_to_sixteen() {
        assert_eq!(encode("abcdefghijklmnopqrstuvwxyz").len(), MAX_LEN);
    }

    #[test]
    fn multibyte_password_stays_in_table() {
        for password in ["p€ss", "пароль", "ÿÿÿÿÿÿÿÿ", "\u{fffd}\u{fffd}\u{fffd}"] {
            let out = encode(password);
            assert_eq!(out.len(), password.len().min(MAX_LEN));
            for b in out {
                assert!((0x20..=0x7e).contains(&b), "{password}: {b:#x}");
            }
        }
    }

    #[test]
    fn printable_output() {
        for b in encode("Z~~~~~~~~~~~~~~~") {
            assert!((0x20..=0x7e).contains(&b), "{b:#x}");
        }
    }
}
