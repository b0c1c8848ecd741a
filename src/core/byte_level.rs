//! GPT-2 ByteLevel alphabet.
//!
//! HuggingFace `tokenizer.json` files (starcoder among them) store every
//! vocabulary piece as a string over a 256-character alphabet in which each
//! character stands for one raw byte. The mapping keeps printable ASCII and
//! Latin-1 characters as themselves and moves every other byte to U+0100
//! onwards:
//!
//! - Bytes 33-126 (`!` to `~`): map to themselves
//! - Bytes 161-172 and 174-255: map to themselves
//! - Other bytes (0-32, 127-160, 173): map to U+0100 onwards, in byte order
//!
//! The codec itself always works on raw bytes; this module is only used to
//! re-key such vocabularies at load time.
//!
//! ```ignore
//! // Space (0x20) is 'Ġ' (U+0120)
//! assert_eq!(byte_level_encode(b" hello"), "Ġhello");
//! assert_eq!(byte_level_decode("Ġhello").unwrap(), b" hello");
//! ```

const fn is_direct_byte(b: u8) -> bool {
    matches!(b, 0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF)
}

/// Highest code point the alphabet uses, plus one.
const ALPHABET_END: usize = 0x144;

const fn build_byte_to_char() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    let mut b = 0usize;
    while b < 256 {
        let code = if is_direct_byte(b as u8) {
            b as u32
        } else {
            shifted += 1;
            0x100 + shifted - 1
        };
        table[b] = match char::from_u32(code) {
            Some(c) => c,
            None => '\0',
        };
        b += 1;
    }
    table
}

const fn build_char_to_byte() -> [Option<u8>; ALPHABET_END] {
    let chars = build_byte_to_char();
    let mut table = [None; ALPHABET_END];
    let mut b = 0usize;
    while b < 256 {
        table[chars[b] as usize] = Some(b as u8);
        b += 1;
    }
    table
}

static BYTE_TO_CHAR: [char; 256] = build_byte_to_char();
static CHAR_TO_BYTE: [Option<u8>; ALPHABET_END] = build_char_to_byte();

/// Encode raw bytes as a ByteLevel string, one character per byte.
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| BYTE_TO_CHAR[b as usize]).collect()
}

/// Decode a ByteLevel string back to raw bytes.
///
/// Returns `None` if `text` contains a character outside the alphabet.
pub fn byte_level_decode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|ch| CHAR_TO_BYTE.get(ch as usize).copied().flatten())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_bijective() {
        let mut seen = std::collections::HashSet::new();
        for b in 0..=255u8 {
            assert!(seen.insert(BYTE_TO_CHAR[b as usize]), "duplicate char for {b}");
        }
        assert_eq!(seen.len(), 256);
        assert!(seen.iter().all(|&c| (c as usize) < ALPHABET_END));
    }

    #[test]
    fn test_known_code_points() {
        assert_eq!(BYTE_TO_CHAR[b' ' as usize], 'Ġ');
        assert_eq!(BYTE_TO_CHAR[b'\n' as usize], 'Ċ');
        assert_eq!(BYTE_TO_CHAR[0], 'Ā');
        assert_eq!(BYTE_TO_CHAR[0xAD], 'Ń');
        for b in 33u8..=126 {
            assert_eq!(BYTE_TO_CHAR[b as usize] as u32, b as u32);
        }
    }

    #[test]
    fn test_roundtrip_every_byte() {
        let all: Vec<u8> = (0..=255u8).collect();
        let encoded = byte_level_encode(&all);
        assert_eq!(encoded.chars().count(), 256);
        assert_eq!(byte_level_decode(&encoded).unwrap(), all);
    }

    #[test]
    fn test_utf8_text_roundtrip() {
        let original = "fn main() { println!(\"你好\"); }\n";
        let encoded = byte_level_encode(original.as_bytes());
        assert!(!encoded.contains(' '));
        assert_eq!(byte_level_decode(&encoded).unwrap(), original.as_bytes());
    }

    #[test]
    fn test_decode_rejects_foreign_chars() {
        assert_eq!(byte_level_decode("a b"), None);
        assert_eq!(byte_level_decode("中"), None);
    }
}
