//! CBOR processing for `WebAuthn`
//!
//! Attestation objects, COSE keys and authenticator extensions arrive as CBOR.
//! Input is first scanned for well-formedness under a [`DecoderConfig`] (minimal
//! length headers, no tags or floats, bounded nesting) and then materialised as
//! a [`ciborium::value::Value`]. The scan also tells the authenticator data
//! parser exactly how many bytes the embedded COSE key occupied.

use std::collections::HashSet;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::error::WebAuthnError;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const INFO_INDEFINITE: u8 = 31;
const BREAK: u8 = 0xff;

/// Decoder behaviour, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Maximum nesting of arrays and maps
    pub max_depth: usize,
    /// Accept indefinite-length strings, arrays and maps
    pub allow_indefinite_length: bool,
    /// Upper bound on the input size in bytes
    pub max_input_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_depth: 16,
            allow_indefinite_length: false,
            max_input_len: 1024 * 1024,
        }
    }
}

/// Strict CBOR decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct CborDecoder {
    config: DecoderConfig,
}

impl CborDecoder {
    /// Create a decoder with the given configuration
    #[must_use]
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// The configuration this decoder was built with
    #[must_use]
    pub fn config(&self) -> DecoderConfig {
        self.config
    }

    /// Decode exactly one CBOR item; trailing bytes are an error
    ///
    /// # Errors
    /// Returns `MalformedEncoding` on truncated, non-canonical, unsupported or
    /// trailing input
    pub fn decode_exact(&self, bytes: &[u8]) -> Result<Value, WebAuthnError> {
        let (value, consumed) = self.decode_first(bytes)?;
        if consumed != bytes.len() {
            return Err(WebAuthnError::malformed(format!(
                "{} trailing bytes after CBOR item",
                bytes.len() - consumed
            )));
        }
        Ok(value)
    }

    /// Decode the first CBOR item and report how many bytes it used
    ///
    /// # Errors
    /// Returns `MalformedEncoding` on truncated, non-canonical or unsupported input
    pub fn decode_first(&self, bytes: &[u8]) -> Result<(Value, usize), WebAuthnError> {
        if bytes.is_empty() {
            return Err(WebAuthnError::malformed("Empty CBOR input"));
        }
        if bytes.len() > self.config.max_input_len {
            return Err(WebAuthnError::malformed(format!(
                "CBOR input of {} bytes exceeds limit of {}",
                bytes.len(),
                self.config.max_input_len
            )));
        }

        let end = self.scan_item(bytes, 0, 0)?;
        let value: Value = ciborium::de::from_reader(&bytes[..end])
            .map_err(|e| WebAuthnError::malformed(format!("Invalid CBOR: {e}")))?;
        Ok((value, end))
    }

    /// Scan one item starting at `pos`, returning the position just past it
    fn scan_item(&self, bytes: &[u8], pos: usize, depth: usize) -> Result<usize, WebAuthnError> {
        if depth > self.config.max_depth {
            return Err(WebAuthnError::malformed(format!(
                "CBOR nesting deeper than {}",
                self.config.max_depth
            )));
        }

        let initial = *bytes
            .get(pos)
            .ok_or_else(|| WebAuthnError::malformed("Truncated CBOR item"))?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        if major == MAJOR_TAG {
            return Err(WebAuthnError::malformed("CBOR tags are not supported"));
        }
        if major == MAJOR_SIMPLE {
            return match info {
                // false, true, null
                20..=22 => Ok(pos + 1),
                INFO_INDEFINITE => Err(WebAuthnError::malformed("Unexpected CBOR break")),
                _ => Err(WebAuthnError::malformed(format!(
                    "Unsupported CBOR simple value or float (info {info})"
                ))),
            };
        }

        if info == INFO_INDEFINITE {
            return self.scan_indefinite(bytes, pos + 1, major, depth);
        }

        let (argument, mut cursor) = read_argument(bytes, pos, info)?;
        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => Ok(cursor),
            MAJOR_BYTES | MAJOR_TEXT => {
                let len = checked_len(argument, bytes.len() - cursor)?;
                let end = cursor + len;
                if major == MAJOR_TEXT && std::str::from_utf8(&bytes[cursor..end]).is_err() {
                    return Err(WebAuthnError::malformed("CBOR text string is not UTF-8"));
                }
                Ok(end)
            }
            MAJOR_ARRAY => {
                // Every item needs at least one byte
                let count = checked_len(argument, bytes.len() - cursor)?;
                for _ in 0..count {
                    cursor = self.scan_item(bytes, cursor, depth + 1)?;
                }
                Ok(cursor)
            }
            MAJOR_MAP => {
                let count = checked_len(argument, bytes.len() - cursor)?;
                let mut keys = HashSet::new();
                for _ in 0..count {
                    cursor = self.scan_map_key(bytes, cursor, depth + 1, &mut keys)?;
                    cursor = self.scan_item(bytes, cursor, depth + 1)?;
                }
                Ok(cursor)
            }
            _ => Err(WebAuthnError::malformed(format!(
                "Unsupported CBOR major type {major}"
            ))),
        }
    }

    fn scan_indefinite(
        &self,
        bytes: &[u8],
        mut cursor: usize,
        major: u8,
        depth: usize,
    ) -> Result<usize, WebAuthnError> {
        if !self.config.allow_indefinite_length {
            return Err(WebAuthnError::malformed(
                "Indefinite-length CBOR items are not allowed",
            ));
        }
        if !matches!(major, MAJOR_BYTES | MAJOR_TEXT | MAJOR_ARRAY | MAJOR_MAP) {
            return Err(WebAuthnError::malformed(format!(
                "Indefinite length on CBOR major type {major}"
            )));
        }

        let mut items = 0usize;
        let mut keys = HashSet::new();
        loop {
            let next = *bytes
                .get(cursor)
                .ok_or_else(|| WebAuthnError::malformed("Truncated indefinite CBOR item"))?;
            if next == BREAK {
                if major == MAJOR_MAP && items % 2 != 0 {
                    return Err(WebAuthnError::malformed("CBOR map missing a value"));
                }
                return Ok(cursor + 1);
            }
            // String chunks must be definite strings of the same major type
            if matches!(major, MAJOR_BYTES | MAJOR_TEXT)
                && (next >> 5 != major || next & 0x1f == INFO_INDEFINITE)
            {
                return Err(WebAuthnError::malformed("Invalid indefinite string chunk"));
            }
            cursor = if major == MAJOR_MAP && items % 2 == 0 {
                self.scan_map_key(bytes, cursor, depth + 1, &mut keys)?
            } else {
                self.scan_item(bytes, cursor, depth + 1)?
            };
            items += 1;
        }
    }

    /// Scan a map key, rejecting one already seen in the same map
    ///
    /// Canonical headers make equal keys byte-identical, so keys are compared
    /// by their encoding. Indefinite-length keys have no single encoding and
    /// are refused.
    fn scan_map_key<'b>(
        &self,
        bytes: &'b [u8],
        pos: usize,
        depth: usize,
        keys: &mut HashSet<&'b [u8]>,
    ) -> Result<usize, WebAuthnError> {
        if bytes.get(pos).is_some_and(|b| b & 0x1f == INFO_INDEFINITE) {
            return Err(WebAuthnError::malformed(
                "Indefinite-length CBOR map keys are not allowed",
            ));
        }
        let end = self.scan_item(bytes, pos, depth)?;
        if !keys.insert(&bytes[pos..end]) {
            return Err(WebAuthnError::malformed("Duplicate CBOR map key"));
        }
        Ok(end)
    }
}

/// Read a header argument, insisting on the shortest encoding
fn read_argument(bytes: &[u8], pos: usize, info: u8) -> Result<(u64, usize), WebAuthnError> {
    let start = pos + 1;
    let (width, minimum) = match info {
        0..=23 => return Ok((u64::from(info), start)),
        24 => (1, 24u64),
        25 => (2, 0x100),
        26 => (4, 0x1_0000),
        27 => (8, 0x1_0000_0000),
        _ => {
            return Err(WebAuthnError::malformed(format!(
                "Reserved CBOR additional info {info}"
            )))
        }
    };

    let raw = bytes
        .get(start..start + width)
        .ok_or_else(|| WebAuthnError::malformed("Truncated CBOR header"))?;
    let value = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    if value < minimum {
        return Err(WebAuthnError::malformed(
            "Non-canonical CBOR length encoding",
        ));
    }
    Ok((value, start + width))
}

fn checked_len(argument: u64, remaining: usize) -> Result<usize, WebAuthnError> {
    usize::try_from(argument)
        .ok()
        .filter(|len| *len <= remaining)
        .ok_or_else(|| WebAuthnError::malformed("CBOR length exceeds remaining input"))
}

/// Serialize a value to CBOR bytes
///
/// # Errors
/// Returns `MalformedEncoding` if serialization fails
pub fn encode(value: &Value) -> Result<Vec<u8>, WebAuthnError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| WebAuthnError::malformed(format!("CBOR encoding failed: {e}")))?;
    Ok(out)
}

/// Interpret a CBOR value as an `i64`
#[must_use]
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Borrow a CBOR map's entries
///
/// # Errors
/// Returns `MalformedEncoding` naming `field` when the value is not a map
pub fn as_map<'a>(value: &'a Value, field: &str) -> Result<&'a [(Value, Value)], WebAuthnError> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| WebAuthnError::malformed(format!("{field} is not a CBOR map")))
}

/// Look up a text key in a CBOR map
#[must_use]
pub fn get_text_key<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Look up an integer key in a CBOR map
#[must_use]
pub fn get_int_key(map: &[(Value, Value)], key: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| as_i64(k) == Some(key))
        .map(|(_, v)| v)
}

/// Required byte string under a text key
///
/// # Errors
/// Returns `MalformedEncoding` when the key is missing or not bytes
pub fn required_bytes<'a>(map: &'a [(Value, Value)], key: &str) -> Result<&'a [u8], WebAuthnError> {
    get_text_key(map, key)
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| WebAuthnError::malformed(format!("Missing or invalid {key}")))
}

/// Required text string under a text key
///
/// # Errors
/// Returns `MalformedEncoding` when the key is missing or not text
pub fn required_text<'a>(map: &'a [(Value, Value)], key: &str) -> Result<&'a str, WebAuthnError> {
    get_text_key(map, key)
        .and_then(Value::as_text)
        .ok_or_else(|| WebAuthnError::malformed(format!("Missing or invalid {key}")))
}

/// Required integer under a text key
///
/// # Errors
/// Returns `MalformedEncoding` when the key is missing or not an integer
pub fn required_int(map: &[(Value, Value)], key: &str) -> Result<i64, WebAuthnError> {
    get_text_key(map, key)
        .and_then(as_i64)
        .ok_or_else(|| WebAuthnError::malformed(format!("Missing or invalid {key}")))
}

/// Optional array of byte strings under a text key (the `x5c` shape)
///
/// # Errors
/// Returns `MalformedEncoding` when present but not an array of byte strings
pub fn optional_bytes_array(
    map: &[(Value, Value)],
    key: &str,
) -> Result<Option<Vec<Vec<u8>>>, WebAuthnError> {
    let Some(value) = get_text_key(map, key) else {
        return Ok(None);
    };
    let items = value
        .as_array()
        .ok_or_else(|| WebAuthnError::malformed(format!("{key} is not an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_bytes()
                .cloned()
                .ok_or_else(|| WebAuthnError::malformed(format!("{key} entry is not bytes")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> CborDecoder {
        CborDecoder::default()
    }

    #[test]
    fn test_decode_simple_map() {
        // {"fmt": "none"}
        let bytes = [0xa1, 0x63, b'f', b'm', b't', 0x64, b'n', b'o', b'n', b'e'];
        let value = decoder().decode_exact(&bytes).expect("valid map");
        let map = as_map(&value, "root").expect("map");
        assert_eq!(required_text(map, "fmt").expect("fmt"), "none");
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let bytes = [0x01, 0x02];
        let err = decoder().decode_exact(&bytes).unwrap_err();
        assert!(matches!(err, WebAuthnError::MalformedEncoding(_)));

        let (value, used) = decoder().decode_first(&bytes).expect("first item");
        assert_eq!(used, 1);
        assert_eq!(as_i64(&value), Some(1));
    }

    #[test]
    fn test_rejects_non_canonical_length() {
        // Unsigned 5 encoded with a one-byte argument
        assert!(decoder().decode_exact(&[0x18, 0x05]).is_err());
        // Byte string of length 2 with a two-byte length header
        assert!(decoder().decode_exact(&[0x59, 0x00, 0x02, 0xaa, 0xbb]).is_err());
        // Minimal one-byte argument is fine
        assert!(decoder().decode_exact(&[0x18, 0x18]).is_ok());
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(decoder().decode_exact(&[0x43, 0x01, 0x02]).is_err());
        assert!(decoder().decode_exact(&[0xa1, 0x01]).is_err());
        assert!(decoder().decode_exact(&[0x19, 0x01]).is_err());
        assert!(decoder().decode_exact(&[]).is_err());
    }

    #[test]
    fn test_rejects_unsupported_types() {
        // Tag 1 (epoch time)
        assert!(decoder().decode_exact(&[0xc1, 0x01]).is_err());
        // Half-precision float
        assert!(decoder().decode_exact(&[0xf9, 0x3c, 0x00]).is_err());
        // undefined
        assert!(decoder().decode_exact(&[0xf7]).is_err());
        // Reserved additional info
        assert!(decoder().decode_exact(&[0x1c]).is_err());
        // true is fine
        assert!(decoder().decode_exact(&[0xf5]).is_ok());
    }

    #[test]
    fn test_indefinite_length_follows_config() {
        // [_ 1, 2]
        let bytes = [0x9f, 0x01, 0x02, 0xff];
        assert!(decoder().decode_exact(&bytes).is_err());

        let lenient = CborDecoder::new(DecoderConfig {
            allow_indefinite_length: true,
            ..DecoderConfig::default()
        });
        let value = lenient.decode_exact(&bytes).expect("indefinite array");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_depth_limit() {
        let shallow = CborDecoder::new(DecoderConfig {
            max_depth: 2,
            ..DecoderConfig::default()
        });
        // [[[1]]] nests three containers below the root
        assert!(shallow.decode_exact(&[0x81, 0x81, 0x81, 0x01]).is_err());
        assert!(shallow.decode_exact(&[0x81, 0x81, 0x01]).is_ok());
    }

    #[test]
    fn test_duplicate_map_keys_rejected() {
        // {"fmt": "none", "fmt": "tpm"}
        let text_keys = [
            0xa2, 0x63, b'f', b'm', b't', 0x64, b'n', b'o', b'n', b'e', 0x63, b'f', b'm', b't',
            0x63, b't', b'p', b'm',
        ];
        let err = decoder().decode_exact(&text_keys).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));

        // {3: -7, 3: -257}
        let int_keys = [0xa2, 0x03, 0x26, 0x03, 0x39, 0x01, 0x00];
        assert!(decoder().decode_exact(&int_keys).is_err());

        // Nested map {1: {2: 0, 2: 1}}
        assert!(decoder()
            .decode_exact(&[0xa1, 0x01, 0xa2, 0x02, 0x00, 0x02, 0x01])
            .is_err());

        // Same key in sibling maps is fine
        assert!(decoder()
            .decode_exact(&[0x82, 0xa1, 0x01, 0x00, 0xa1, 0x01, 0x00])
            .is_ok());
        // Distinct keys 1 and -2
        assert!(decoder().decode_exact(&[0xa2, 0x01, 0x00, 0x21, 0x00]).is_ok());
    }

    #[test]
    fn test_duplicate_keys_in_indefinite_map_rejected() {
        let lenient = CborDecoder::new(DecoderConfig {
            allow_indefinite_length: true,
            ..DecoderConfig::default()
        });
        // {_ 1: 0, 1: 1}
        assert!(lenient
            .decode_exact(&[0xbf, 0x01, 0x00, 0x01, 0x01, 0xff])
            .is_err());
        // {_ 1: 0, 2: 1}
        assert!(lenient
            .decode_exact(&[0xbf, 0x01, 0x00, 0x02, 0x01, 0xff])
            .is_ok());
        // {_ (_ "a"): 0}
        assert!(lenient
            .decode_exact(&[0xbf, 0x7f, 0x61, b'a', 0xff, 0x00, 0xff])
            .is_err());
    }

    #[test]
    fn test_huge_declared_length_rejected() {
        // Array claiming 2^32 entries with no content
        let bytes = [0x9a, 0xff, 0xff, 0xff, 0xff];
        assert!(decoder().decode_exact(&bytes).is_err());
    }

    #[test]
    fn test_optional_bytes_array() {
        let map = vec![(
            Value::Text("x5c".into()),
            Value::Array(vec![Value::Bytes(vec![1, 2]), Value::Bytes(vec![3])]),
        )];
        let certs = optional_bytes_array(&map, "x5c").expect("x5c").expect("present");
        assert_eq!(certs, vec![vec![1, 2], vec![3]]);
        assert!(optional_bytes_array(&map, "missing").expect("ok").is_none());

        let bad = vec![(Value::Text("x5c".into()), Value::Bytes(vec![1]))];
        assert!(optional_bytes_array(&bad, "x5c").is_err());
    }
}
