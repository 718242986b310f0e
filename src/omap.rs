//! An order-preserving JSON object codec.
//!
//! Values are kept as raw JSON substrings (`RawValue`) rather than eagerly
//! decoded, so a caller can defer typed decoding of each value — the Rust
//! analogue of the original Go prototype holding `json.RawMessage` behind
//! each key. This codec stands alone; nothing else in the resolution path
//! depends on it.

use compact_str::{CompactString, ToCompactString};
use indexmap::IndexMap;
use serde_json::value::RawValue;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct OmapError(CompactString);

fn unexpected(found: u8, expected: &str) -> OmapError {
    OmapError(
        format!("Invalid token: expected '{expected}' but found '{}'", found as char)
            .to_compact_string(),
    )
}

fn unexpected_eof(expected: &str) -> OmapError {
    OmapError(format!("Invalid token: expected '{expected}' but found end of input").to_compact_string())
}

#[derive(Debug, Default, Clone)]
pub struct OrderedMap {
    entries: IndexMap<CompactString, Box<RawValue>>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// If `key` is already present it keeps its existing position;
    /// otherwise it is appended.
    pub fn set(&mut self, key: impl Into<CompactString>, value: Box<RawValue>) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries.get(key).map(|v| v.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn decode(input: &str) -> Result<Self, OmapError> {
        let mut map = Self::new();
        let mut pos = 0;
        let mut expect_open = true;
        loop {
            match next_pair(input, pos, expect_open)? {
                NextPair::Pair { key, value, pos: next_pos } => {
                    map.set(key, value);
                    pos = next_pos;
                    expect_open = false;
                }
                NextPair::End { pos: next_pos } => {
                    pos = next_pos;
                    break;
                }
            }
        }
        let _ = pos;
        Ok(map)
    }

    /// Emits `{` then each `"key":raw_value` pair in insertion order,
    /// separated by `,`, then `}`. Keys go through the standard JSON
    /// string encoder; values are copied byte-for-byte.
    pub fn encode(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            // A CompactString key always encodes successfully as a JSON string.
            let key_json = serde_json::to_string(key.as_str()).unwrap();
            out.push_str(&key_json);
            out.push(':');
            out.push_str(value.get());
        }
        out.push('}');
        out
    }
}

enum NextPair {
    Pair {
        key: CompactString,
        value: Box<RawValue>,
        pos: usize,
    },
    End {
        pos: usize,
    },
}

/// Scans forward from `pos` for the next key/value pair, mirroring the
/// original prototype's `nextPair`: skip whitespace, expect a structural
/// token, then read a JSON string key, a `:`, and a JSON value via a
/// general decoder that reports how far it advanced.
fn next_pair(input: &str, pos: usize, expect_open: bool) -> Result<NextPair, OmapError> {
    let bytes = input.as_bytes();
    let mut i = pos;
    loop {
        if i >= bytes.len() {
            let expected = if expect_open { "{" } else { ", or }" };
            return Err(unexpected_eof(expected));
        }
        match bytes[i] {
            b'\t' | b'\n' | b'\r' | b' ' => {
                i += 1;
                continue;
            }
            b'{' if expect_open => {
                i += 1;
                break;
            }
            b',' if !expect_open => {
                i += 1;
                break;
            }
            b'}' if !expect_open => return Ok(NextPair::End { pos: i + 1 }),
            other => {
                let expected = if expect_open { "{" } else { ", or }" };
                return Err(unexpected(other, expected));
            }
        }
    }

    // An empty object may close immediately after the opening '{'.
    if expect_open {
        let mut j = i;
        while j < bytes.len() && matches!(bytes[j], b'\t' | b'\n' | b'\r' | b' ') {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'}' {
            return Ok(NextPair::End { pos: j + 1 });
        }
    }

    let (key, after_key) = read_json_string(input, i)?;

    let mut j = after_key;
    loop {
        if j >= bytes.len() {
            return Err(unexpected_eof(":"));
        }
        match bytes[j] {
            b'\t' | b'\n' | b'\r' | b' ' => {
                j += 1;
                continue;
            }
            b':' => {
                j += 1;
                break;
            }
            other => return Err(unexpected(other, ":")),
        }
    }

    let (value, after_value) = read_json_raw_value(input, j)?;
    Ok(NextPair::Pair {
        key,
        value,
        pos: after_value,
    })
}

/// Decodes a single JSON string starting at `pos`, returning it and the
/// byte offset just past it. Delegates to `serde_json`'s own string
/// grammar rather than reimplementing escape handling.
fn read_json_string(input: &str, pos: usize) -> Result<(CompactString, usize), OmapError> {
    let slice = &input[pos..];
    let mut de = serde_json::Deserializer::from_str(slice);
    let key: String = serde::Deserialize::deserialize(&mut de)
        .map_err(|e| OmapError(e.to_compact_string()))?;
    Ok((key.into(), pos + de.byte_offset()))
}

/// Decodes one JSON value (of any shape) starting at `pos` as a raw,
/// undecoded slice, returning it and the byte offset just past it. This
/// is the Rust analogue of the original `Decoder.Buffered().Len()` trick
/// used to find where a nested value ends.
fn read_json_raw_value(input: &str, pos: usize) -> Result<(Box<RawValue>, usize), OmapError> {
    let slice = &input[pos..];
    let mut de = serde_json::Deserializer::from_str(slice);
    let value: Box<RawValue> = serde::Deserialize::deserialize(&mut de)
        .map_err(|e| OmapError(e.to_compact_string()))?;
    Ok((value, pos + de.byte_offset()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_key_insertion_order_through_round_trip() {
        let map = OrderedMap::decode(r#"{"z":1,"a":2}"#).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(map.encode(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn set_on_existing_key_retains_position() {
        let mut map = OrderedMap::decode(r#"{"a":1,"b":2}"#).unwrap();
        map.set("a", RawValue::from_string("9".to_string()).unwrap());
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(map.encode(), r#"{"a":9,"b":2}"#);
    }

    #[test]
    fn get_returns_raw_value_undecoded() {
        let map = OrderedMap::decode(r#"{"dist":{"tarball":"http://x"}}"#).unwrap();
        assert_eq!(map.get("dist").unwrap().get(), r#"{"tarball":"http://x"}"#);
        assert!(map.get("missing").is_none());
    }

    #[test]
    fn rejects_missing_opening_brace() {
        let err = OrderedMap::decode("nope").unwrap_err();
        assert!(err.to_string().starts_with("Invalid token: expected '{' but found"));
    }

    #[test]
    fn rejects_missing_colon() {
        let err = OrderedMap::decode(r#"{"a" 1}"#).unwrap_err();
        assert!(err.to_string().starts_with("Invalid token: expected ':' but found"));
    }

    #[test]
    fn handles_whitespace_between_tokens() {
        let map = OrderedMap::decode("{ \"a\" : 1 , \"b\" : 2 }").unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn empty_object_round_trips() {
        let map = OrderedMap::decode("{}").unwrap();
        assert!(map.is_empty());
        assert_eq!(map.encode(), "{}");
    }
}
