//! Bencode: the structured dictionary encoding spoken with the supervisor.
//!
//! Four value kinds:
//!
//! | Kind | Encoding |
//! |------|----------|
//! | Integer | `i<decimal>e` |
//! | Byte string | `<len>:<bytes>` |
//! | List | `l<values>e` |
//! | Dictionary | `d<key><value>...e`, keys are byte strings |
//!
//! Dictionaries are stored ordered by key, so encoding is canonical.
//! The decoder distinguishes input that is merely cut short
//! ([`DecodeError::Incomplete`]) from input that can never become valid,
//! which lets stream readers decide whether to keep reading.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Maximum nesting depth accepted by the decoder
pub const MAX_DEPTH: usize = 32;

/// Bencode decode failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete
    #[error("input ended before the value was complete")]
    Incomplete,

    /// Input is not valid bencode
    #[error("invalid bencode at offset {offset}: {reason}")]
    Invalid {
        /// Byte offset of the problem
        offset: usize,
        /// What was wrong
        reason: &'static str,
    },

    /// Bytes remained after a complete value
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// The top-level value was not a dictionary
    #[error("expected a dictionary")]
    NotADictionary,
}

/// A decoded bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// Byte string
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Dictionary
    Dict(Dict),
}

impl Value {
    /// Borrow as a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow as UTF-8 text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Get as integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow as dictionary.
    #[must_use]
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Encode to bencode.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(self, &mut out);
        out
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => write!(f, "0x{}", hex::encode(b)),
            },
            Value::List(l) => f.debug_list().entries(l).finish(),
            Value::Dict(d) => d.fmt(f),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Dict(v)
    }
}

/// A bencode dictionary with byte-string keys in canonical order
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Dict(BTreeMap<Vec<u8>, Value>);

impl Dict {
    /// Create an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, replacing any previous value under `key`.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.as_bytes().to_vec(), value.into())
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key.as_bytes())
    }

    /// Look up a byte string.
    #[must_use]
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    /// Look up UTF-8 text.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Look up an integer.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Look up a nested dictionary.
    #[must_use]
    pub fn get_dict(&self, key: &str) -> Option<&Dict> {
        self.get(key).and_then(Value::as_dict)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key.as_bytes())
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key.as_bytes())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Value)> {
        self.0.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Encode to bencode.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_dict(self, &mut out);
        out
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn encode_dict(dict: &Dict, out: &mut Vec<u8>) {
    out.push(b'd');
    for (key, value) in &dict.0 {
        encode_bytes(key, out);
        encode_into(value, out);
    }
    out.push(b'e');
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(d) => encode_dict(d, out),
    }
}

/// Decode one value from the start of `input`.
///
/// Returns the value and the number of bytes it occupied; anything after
/// that is left for the caller.
///
/// # Errors
///
/// [`DecodeError::Incomplete`] when `input` is a proper prefix of some
/// valid encoding, [`DecodeError::Invalid`] otherwise.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, usize), DecodeError> {
    let mut decoder = Decoder { input, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, decoder.pos))
}

/// Decode a buffer holding exactly one value.
///
/// # Errors
///
/// As [`decode_prefix`], plus [`DecodeError::TrailingBytes`].
pub fn decode(input: &[u8]) -> Result<Value, DecodeError> {
    let (value, used) = decode_prefix(input)?;
    if used != input.len() {
        return Err(DecodeError::TrailingBytes(input.len() - used));
    }
    Ok(value)
}

/// Decode a buffer holding exactly one dictionary.
///
/// # Errors
///
/// As [`decode`], plus [`DecodeError::NotADictionary`].
pub fn decode_dict(input: &[u8]) -> Result<Dict, DecodeError> {
    match decode(input)? {
        Value::Dict(d) => Ok(d),
        _ => Err(DecodeError::NotADictionary),
    }
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn invalid(&self, reason: &'static str) -> DecodeError {
        DecodeError::Invalid {
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::Incomplete)
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(self.invalid("nesting too deep"));
        }
        match self.peek()? {
            b'i' => self.int().map(Value::Int),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(self.invalid("dictionary key is not a byte string"));
                    }
                    let key = self.bytes()?;
                    let key_end = self.pos;
                    let value = self.value(depth + 1)?;
                    if dict.insert(key, value).is_some() {
                        return Err(DecodeError::Invalid {
                            offset: key_end,
                            reason: "duplicate dictionary key",
                        });
                    }
                }
                self.pos += 1;
                Ok(Value::Dict(Dict(dict)))
            }
            _ => Err(self.invalid("unexpected byte")),
        }
    }

    /// Reads ASCII digits up to `terminator`, returning them without it.
    fn digits_until(&mut self, terminator: u8) -> Result<&[u8], DecodeError> {
        let start = self.pos;
        loop {
            let b = self.peek()?;
            if b == terminator {
                let digits = &self.input[start..self.pos];
                self.pos += 1;
                return Ok(digits);
            }
            if !b.is_ascii_digit() && !(b == b'-' && self.pos == start) {
                return Err(self.invalid("expected digit"));
            }
            // i64 has 19 digits; anything longer is garbage, not a short read
            if self.pos - start > 20 {
                return Err(self.invalid("number too long"));
            }
            self.pos += 1;
        }
    }

    fn int(&mut self) -> Result<i64, DecodeError> {
        self.pos += 1;
        let start = self.pos;
        let digits = self.digits_until(b'e')?;
        let canonical = match digits {
            [] | [b'-'] => false,
            [b'-', b'0', ..] => false,
            [b'0', _, ..] => false,
            _ => true,
        };
        if !canonical {
            return Err(DecodeError::Invalid {
                offset: start,
                reason: "non-canonical integer",
            });
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(DecodeError::Invalid {
                offset: start,
                reason: "integer out of range",
            })
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let digits = self.digits_until(b':')?;
        if digits.first() == Some(&b'-') || (digits.len() > 1 && digits[0] == b'0') {
            return Err(DecodeError::Invalid {
                offset: start,
                reason: "non-canonical length",
            });
        }
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(DecodeError::Invalid {
                offset: start,
                reason: "length out of range",
            })?;
        let end = self.pos.checked_add(len).ok_or(DecodeError::Invalid {
            offset: start,
            reason: "length out of range",
        })?;
        if end > self.input.len() {
            return Err(DecodeError::Incomplete);
        }
        let bytes = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }
}
