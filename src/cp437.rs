//! Decoding for names and comments stored in IBM code page 437,
//! the encoding ZIP archives use unless an entry's UTF-8 flag is set.

use std::borrow::Cow;

use codepage_437::CP437_CONTROL;

use crate::result::*;

/// Decodes CP437 bytes into a string.
///
/// The lower half of CP437 is ASCII, so text without any high-bit bytes is
/// borrowed as-is. Every byte in the upper half becomes a UTF-8 sequence of
/// at least two bytes, so the output starts with one extra byte per high-bit byte.
pub fn decode(bytes: &[u8]) -> Cow<str> {
    let high = bytes.iter().filter(|b| **b & 0x80 != 0).count();
    if high == 0 {
        // All ASCII
        return Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default());
    }

    let mut decoded = String::with_capacity(bytes.len() + high);
    decoded.extend(bytes.iter().map(|b| CP437_CONTROL.decode(*b)));
    Cow::Owned(decoded)
}

/// Decodes a ZIP name or comment, which is either UTF-8 or CP437
/// depending on the entry's flags.
pub fn decode_text(bytes: &[u8], is_utf8: bool) -> StreamResult<Cow<str>> {
    if is_utf8 {
        Ok(Cow::Borrowed(std::str::from_utf8(bytes)?))
    } else {
        Ok(decode(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_ascii_is_borrowed() {
        assert_matches!(decode(b"plain/name.txt"), Cow::Borrowed("plain/name.txt"));
        assert_matches!(decode(b""), Cow::Borrowed(""));
    }

    #[test]
    fn test_high_bytes_expand() {
        let decoded = decode(&[0xf6, 0x61, 0xe6, 0x62, 0xad, 0x63]);
        assert_eq!(decoded, "\u{f7}a\u{b5}b\u{a1}c");
        assert_eq!(decoded, "÷aµb¡c");
        // One extra byte per high-bit input byte
        assert_eq!(decoded.len(), 9);
    }

    #[test]
    fn test_box_drawing() {
        // Outside the Latin-1 range, these take three bytes in UTF-8.
        assert_eq!(decode(&[0xc9, 0xcd, 0xbb]), "╔═╗");
    }

    #[test]
    fn test_utf8_flag() {
        assert_eq!(decode_text("naïve".as_bytes(), true).unwrap(), "naïve");
        assert_eq!(decode_text(&[0x8b], false).unwrap(), "ï");
        assert_matches!(decode_text(&[0xff, 0xfe], true), Err(StreamError::Encoding(_)));
    }
}
