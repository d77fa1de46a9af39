//! # Bencode Codec
//!
//! This module implements the bencode data format used throughout the
//! BitTorrent protocol: metainfo files, tracker replies and the info-hash
//! all depend on it.
//!
//! ## Value Shapes
//!
//! A bencoded value has exactly four shapes:
//!
//! - **Byte string**: `<decimal length>:<raw bytes>` (e.g. `5:hello`)
//! - **Integer**: `i<digits>e` (e.g. `i42e`, `i-7e`)
//! - **List**: `l<values>e` (e.g. `l5:helloi3ee`)
//! - **Dictionary**: `d<string-value pairs>e` (e.g. `d3:foo3:bare`)
//!
//! Strings are arbitrary bytes, not text: the `pieces` field of a metainfo
//! file is a binary string of concatenated SHA-1 digests.
//!
//! ## Canonical Form
//!
//! The encoder emits canonical bencode: integers without leading zeros or a
//! `+` sign, decimal string lengths, dictionary keys in ascending
//! lexicographic byte order, no whitespace. The decoder is strict and
//! rejects mis-ordered or duplicate dictionary keys, so every accepted
//! input re-encodes to its exact original bytes. The info-hash is the SHA-1
//! of a canonical encoding; a single byte of drift produces a hash no peer
//! or tracker will recognise.
//!
//! ## Self-Delimitation
//!
//! The decoder consumes exactly the prefix of its input that forms one
//! value and reports how many bytes that was, so container decoders (and
//! callers holding concatenated values) can advance without any framing.

use std::fmt;

/// A decoded bencode value.
///
/// Dictionaries are kept as ordered key/value pairs rather than a map: the
/// on-wire key order is part of the canonical form and must survive a
/// decode/encode round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw byte string (not assumed to be UTF-8)
    Bytes(Vec<u8>),
    /// Signed 64-bit integer
    Integer(i64),
    /// Ordered sequence of values
    List(Vec<Value>),
    /// Ordered mapping from byte-string keys to values
    Dictionary(Vec<(Vec<u8>, Value)>),
}

/// Decoding failures, one variant per way the grammar can be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ended in the middle of a value
    UnexpectedEnd,
    /// Malformed integer literal (empty, `-0`, leading zero, stray bytes)
    BadInteger,
    /// Malformed string length (empty, leading zero, non-digit, overflow)
    BadLength,
    /// Missing `:` after a string length or `e` closing a container
    MissingTerminator,
    /// Dictionary keys not strictly ascending in raw byte order
    BadKeyOrdering,
}

impl fmt::Display for BencodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BencodeError::UnexpectedEnd => write!(f, "unexpected end of bencoded data"),
            BencodeError::BadInteger => write!(f, "invalid bencoded integer"),
            BencodeError::BadLength => write!(f, "invalid bencoded string length"),
            BencodeError::MissingTerminator => write!(f, "missing bencode terminator"),
            BencodeError::BadKeyOrdering => {
                write!(f, "bencoded dictionary keys are not in lexicographic order")
            }
        }
    }
}

impl std::error::Error for BencodeError {}

/// Decode a single bencoded value from the front of `bytes`.
///
/// Returns the value and the number of leading bytes it occupied. Trailing
/// bytes are left untouched, which is what makes the decoder usable both on
/// whole files and on concatenated values.
///
/// # Arguments
///
/// * `bytes` - Buffer whose prefix is one bencoded value.
///
pub fn decode(bytes: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut pos = 0;
    let value = parse_value(bytes, &mut pos)?;

    Ok((value, pos))
}

/// Encode a value into its canonical byte form.
///
/// Dictionary keys are sorted at encode time, so values assembled in any
/// order still produce the canonical encoding. For values coming out of the
/// strict decoder the sort is a no-op and the output is byte-identical to
/// the input.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn parse_value(bytes: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    match bytes.get(*pos) {
        None => Err(BencodeError::UnexpectedEnd),
        Some(b'i') => {
            *pos += 1;
            parse_integer(bytes, pos)
        }
        Some(b'l') => {
            *pos += 1;
            parse_list(bytes, pos)
        }
        Some(b'd') => {
            *pos += 1;
            parse_dictionary(bytes, pos)
        }
        Some(_) => parse_string(bytes, pos).map(Value::Bytes),
    }
}

fn parse_integer(bytes: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    // Scan for the closing 'e'
    let end = match bytes[*pos..].iter().position(|&b| b == b'e') {
        Some(offset) => *pos + offset,
        None => return Err(BencodeError::UnexpectedEnd),
    };

    let literal =
        std::str::from_utf8(&bytes[*pos..end]).map_err(|_| BencodeError::BadInteger)?;
    let digits = literal.strip_prefix('-').unwrap_or(literal);

    // The digit run must be non-empty, pure ASCII digits, and carry no
    // leading zero except the literal "0" itself; "-0" is never valid
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::BadInteger);
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(BencodeError::BadInteger);
    }
    if literal == "-0" {
        return Err(BencodeError::BadInteger);
    }

    let value: i64 = literal.parse().map_err(|_| BencodeError::BadInteger)?;
    *pos = end + 1;

    Ok(Value::Integer(value))
}

fn parse_string(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>, BencodeError> {
    // Scan for the ':' separating the length from the payload
    let colon = match bytes[*pos..].iter().position(|&b| b == b':') {
        Some(offset) => *pos + offset,
        None => {
            // A pure digit run missing its ':' is an unterminated length;
            // anything else never was a string length to begin with
            if bytes[*pos..].iter().all(u8::is_ascii_digit) {
                return Err(BencodeError::MissingTerminator);
            }
            return Err(BencodeError::BadLength);
        }
    };

    let digits = &bytes[*pos..colon];
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::BadLength);
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(BencodeError::BadLength);
    }

    let length: usize = std::str::from_utf8(digits)
        .map_err(|_| BencodeError::BadLength)?
        .parse()
        .map_err(|_| BencodeError::BadLength)?;

    let start = colon + 1;
    let end = start.checked_add(length).ok_or(BencodeError::BadLength)?;
    if end > bytes.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    *pos = end;
    Ok(bytes[start..end].to_vec())
}

fn parse_list(bytes: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let mut items = Vec::new();

    loop {
        match bytes.get(*pos) {
            None => return Err(BencodeError::MissingTerminator),
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::List(items));
            }
            Some(_) => items.push(parse_value(bytes, pos)?),
        }
    }
}

fn parse_dictionary(bytes: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let mut entries: Vec<(Vec<u8>, Value)> = Vec::new();

    loop {
        match bytes.get(*pos) {
            None => return Err(BencodeError::MissingTerminator),
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::Dictionary(entries));
            }
            Some(_) => {
                let key = parse_string(bytes, pos)?;

                // Keys must be strictly ascending; equality means a duplicate
                if let Some((previous, _)) = entries.last() {
                    if key <= *previous {
                        return Err(BencodeError::BadKeyOrdering);
                    }
                }

                let value = parse_value(bytes, pos)?;
                entries.push((key, value));
            }
        }
    }
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bytes(bytes) => {
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(bytes);
        }
        Value::Integer(int) => {
            buf.push(b'i');
            buf.extend_from_slice(int.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::List(items) => {
            buf.push(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dictionary(entries) => {
            let mut ordered: Vec<&(Vec<u8>, Value)> = entries.iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(&b.0));

            buf.push(b'd');
            for (key, val) in ordered {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_into(val, buf);
            }
            buf.push(b'e');
        }
    }
}

impl Value {
    /// Get the raw bytes if this value is a string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Get the UTF-8 text if this value is a string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Get the integer if this value is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(int) => Some(*int),
            _ => None,
        }
    }

    /// Get the items if this value is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get the entries if this value is a dictionary.
    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Value::Dictionary(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a dictionary entry by key.
    ///
    /// Returns `None` when the value is not a dictionary or the key is
    /// absent.
    pub fn lookup(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
    }

    /// Render this value as JSON for display purposes.
    ///
    /// Byte strings are converted lossily to UTF-8 text; binary fields such
    /// as `pieces` are not meant to go through this path.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bytes(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            Value::Integer(int) => serde_json::Value::Number((*int).into()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dictionary(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, val)| {
                        (String::from_utf8_lossy(key).into_owned(), val.to_json())
                    })
                    .collect(),
            ),
        }
    }
}
