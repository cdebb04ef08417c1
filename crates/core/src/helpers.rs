//! Helper functions for text cleanup, timestamps and encoded-body decoding.

use chrono::{DateTime, Utc};

use crate::error::DecodeError;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z, the epoch the
/// message store counts from.
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Stores written before macOS 10.13 count seconds instead of nanoseconds.
/// Nanosecond values pass this threshold a few minutes after the epoch.
pub const LEGACY_SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Object replacement character standing in for inline attachments.
pub const ATTACHMENT_MARKER: char = '\u{FFFC}';

const KEYED_ARCHIVE_MAGIC: &[u8] = b"bplist00";
const NSSTRING_MARKER: &[u8] = b"NSString";
const STRING_TAG: u8 = b'+';
/// How far past the class name the string tag may appear.
const STRING_TAG_WINDOW: usize = 16;

/// Clean text by normalizing line endings, removing attachment markers and
/// trimming surrounding whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(ATTACHMENT_MARKER, "")
        .trim()
        .to_string()
}

/// Convert a store timestamp (nanoseconds, or legacy seconds, since 2001-01-01)
/// to UTC. Returns `None` when the value is out of chrono's range.
pub fn apple_time_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    let (secs, nanos) = if raw.unsigned_abs() < LEGACY_SECONDS_THRESHOLD.unsigned_abs() {
        (raw, 0)
    } else {
        (raw.div_euclid(1_000_000_000), raw.rem_euclid(1_000_000_000) as u32)
    };
    DateTime::from_timestamp(secs.checked_add(APPLE_EPOCH_OFFSET_SECS)?, nanos)
}

/// Convert a UTC instant to store nanoseconds since 2001-01-01.
pub fn utc_to_apple_nanos(instant: DateTime<Utc>) -> i64 {
    let secs = instant.timestamp() - APPLE_EPOCH_OFFSET_SECS;
    secs.saturating_mul(1_000_000_000)
        .saturating_add(i64::from(instant.timestamp_subsec_nanos()))
}

/// Extract the plain string from a `typedstream` attributed body.
///
/// The archive stores the `NSString` class name followed by a short preamble,
/// a `+` tag and a length-prefixed UTF-8 payload. Lengths below `0x80` are a
/// single byte; `0x81` and `0x82` introduce little-endian u16 and u32 lengths.
pub fn decode_attributed_body(data: &[u8]) -> Result<String, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    if data.starts_with(KEYED_ARCHIVE_MAGIC) {
        return Err(DecodeError::KeyedArchive);
    }

    let class_end = find_subslice(data, NSSTRING_MARKER)
        .map(|pos| pos + NSSTRING_MARKER.len())
        .ok_or(DecodeError::MissingString)?;

    let window_end = (class_end + STRING_TAG_WINDOW).min(data.len());
    let tag_pos = data[class_end..window_end]
        .iter()
        .position(|&b| b == STRING_TAG)
        .map(|offset| class_end + offset)
        .ok_or(DecodeError::MissingString)?;

    let (len, payload_start) = read_length(data, tag_pos + 1)?;
    let payload_end = payload_start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or(DecodeError::Truncated(data.len()))?;

    String::from_utf8(data[payload_start..payload_end].to_vec())
        .map_err(|_| DecodeError::InvalidUtf8)
}

/// Read a typedstream length at `pos`; returns the length and the index just
/// past it.
fn read_length(data: &[u8], pos: usize) -> Result<(usize, usize), DecodeError> {
    let tag = *data.get(pos).ok_or(DecodeError::Truncated(pos))?;
    match tag {
        0x81 => {
            let bytes = data.get(pos + 1..pos + 3).ok_or(DecodeError::Truncated(pos + 1))?;
            Ok((u16::from_le_bytes([bytes[0], bytes[1]]) as usize, pos + 3))
        }
        0x82 => {
            let bytes = data.get(pos + 1..pos + 5).ok_or(DecodeError::Truncated(pos + 1))?;
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Ok((len as usize, pos + 5))
        }
        n if n < 0x80 => Ok((n as usize, pos + 1)),
        other => Err(DecodeError::BadLengthTag(other)),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Build a minimal typedstream attributed body around `text`.
#[cfg(test)]
pub(crate) fn typedstream_fixture(text: &str) -> Vec<u8> {
    let mut data = b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01@\x84\x84\x84\x12NSAttributedString\x00\x84\x84\x08NSObject\x00\x85\x92\x84\x84\x84\x08NSString\x01\x94\x84\x01+".to_vec();
    let bytes = text.as_bytes();
    if bytes.len() < 0x80 {
        data.push(bytes.len() as u8);
    } else if bytes.len() <= u16::MAX as usize {
        data.push(0x81);
        data.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    } else {
        data.push(0x82);
        data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    }
    data.extend_from_slice(bytes);
    data.extend_from_slice(b"\x86\x84\x02iI\x01\x05\x92\x84\x84\x84\x0cNSDictionary\x00");
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hello\r\nworld\r "), "hello\nworld");
        assert_eq!(clean_text("\u{FFFC}"), "");
        assert_eq!(clean_text("look \u{FFFC}"), "look");
    }

    #[test]
    fn test_apple_time_nanoseconds() {
        // 2023-01-01T00:00:00Z
        let raw = (1_672_531_200 - APPLE_EPOCH_OFFSET_SECS) * 1_000_000_000 + 5;
        let dt = apple_time_to_utc(raw).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::nanoseconds(5));
        assert_eq!(utc_to_apple_nanos(dt), raw);
    }

    #[test]
    fn test_apple_time_legacy_seconds() {
        let raw = 1_672_531_200 - APPLE_EPOCH_OFFSET_SECS;
        assert_eq!(
            apple_time_to_utc(raw),
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_apple_time_extremes() {
        let earliest = apple_time_to_utc(i64::MIN).unwrap();
        assert_eq!(earliest.year(), 1708);
        let latest = apple_time_to_utc(i64::MAX).unwrap();
        assert_eq!(latest.year(), 2293);
    }

    #[test]
    fn test_decode_short_body() {
        let data = typedstream_fixture("see you at 6");
        assert_eq!(decode_attributed_body(&data).unwrap(), "see you at 6");
    }

    #[test]
    fn test_decode_long_body_uses_u16_length() {
        let text = "a".repeat(300);
        let data = typedstream_fixture(&text);
        assert_eq!(decode_attributed_body(&data).unwrap(), text);
    }

    #[test]
    fn test_decode_multibyte_text() {
        let data = typedstream_fixture("café 🎉");
        assert_eq!(decode_attributed_body(&data).unwrap(), "café 🎉");
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(decode_attributed_body(b""), Err(DecodeError::Empty));
        assert_eq!(
            decode_attributed_body(b"bplist00\x01\x02"),
            Err(DecodeError::KeyedArchive)
        );
        assert_eq!(
            decode_attributed_body(b"\x04\x0bstreamtyped garbage"),
            Err(DecodeError::MissingString)
        );

        let mut truncated = typedstream_fixture("hello there");
        truncated.truncate(truncated.len() - 30);
        assert!(matches!(
            decode_attributed_body(&truncated),
            Err(DecodeError::Truncated(_))
        ));
    }
}
