// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Errors about invalid UTF-8 strings in packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of string exceeds 64KB.
    TooManyData,

    /// String contains disallowed code points.
    InvalidChar,

    /// Byte sequence is not well-formed UTF-8.
    ///
    /// Server or client shall close the network connection.
    SeriousError,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_e: std::string::FromUtf8Error) -> Self {
        Self::SeriousError
    }
}

/// Generate a random alphanumeric string with `len` characters.
///
/// Used as fallback client identifier.
#[must_use]
pub fn random_string(len: usize) -> String {
    let bytes: Vec<u8> = thread_rng().sample_iter(&Alphanumeric).take(len).collect();
    // Alphanumeric samples are always valid ASCII.
    String::from_utf8(bytes).unwrap_or_default()
}

/// Check data length exceeds 64KB or not.
///
/// # Errors
///
/// Returns error if length of `data` is larger than 64KB.
#[inline]
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

const fn is_unicode_noncharacter(c: char) -> bool {
    let v = c as u32;
    // U+FDD0..=U+FDEF plus the last two code points of every plane.
    (v >= 0xfdd0 && v <= 0xfdef) || (v & 0xffff) >= 0xfffe
}

/// Check string characters and length as required in [MQTT-1.5.4].
///
/// The character data MUST be well-formed UTF-8 and MUST NOT include:
/// - the null character U+0000,
/// - encodings of code points between U+D800 and U+DFFF,
/// - control characters U+0001..U+001F and U+007F..U+009F,
/// - Unicode noncharacters like U+FDD0..U+FDEF and U+FFFE/U+FFFF.
///
/// Code points between U+D800 and U+DFFF cannot occur in a rust `str`,
/// so only the remaining ranges are checked here.
///
/// # Errors
///
/// Returns error if `s` is too long or contains disallowed code points.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }

        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }

        if is_unicode_noncharacter(c) {
            return Err(StringError::InvalidChar);
        }
    }

    // Empty string is valid.
    Ok(())
}

/// Convert byte slice to a valid UTF-8 string.
///
/// # Errors
///
/// Returns error if `buf` contains invalid UTF-8 bytes or disallowed code points.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("hello/world").is_ok());
        // U+2A6D4 as used in the protocol specification examples.
        assert!(validate_utf8_string("A\u{2A6D4}").is_ok());

        assert!(validate_utf8_string("\u{0000}").is_err());
        assert!(validate_utf8_string("a\u{001f}b").is_err());
        assert!(validate_utf8_string("a\u{007f}b").is_err());
        assert!(validate_utf8_string("a\u{009f}b").is_err());
        assert!(validate_utf8_string("\u{fdd0}").is_err());
        assert!(validate_utf8_string("\u{ffff}").is_err());
        assert!(validate_utf8_string("\u{1fffe}").is_err());
    }

    #[test]
    fn test_to_utf8_string() {
        // A single null byte is a malformed string.
        assert!(to_utf8_string(&[0x00]).is_err());

        // Encoded UTF-16 surrogates are not well-formed UTF-8.
        assert!(to_utf8_string(&[0xed, 0xa0, 0x80]).is_err());
        assert!(to_utf8_string(&[0xed, 0xbf, 0xbf]).is_err());

        let s = to_utf8_string(&[0x41, 0xf0, 0xaa, 0x9b, 0x94]).unwrap();
        assert_eq!(s, "A\u{2A6D4}");
    }

    #[test]
    fn test_random_string() {
        let s = random_string(8);
        assert_eq!(s.len(), 8);
    }
}
