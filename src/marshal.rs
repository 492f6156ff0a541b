//! Conversion between dynamic values and fixed-width binary buffers.
//!
//! [`encode`] turns a [`Value`] into a [`Buffer`] of a declared
//! [`ElementKind`]; [`decode`] is its inverse. Numeric kinds read the value
//! as a sequence and convert element by element. What happens when a single
//! element does not convert is governed by the [`ConversionPolicy`].
//!
//! Pair kinds additionally require every element to be a two-entry sequence.
//! A malformed pair is always an error, whatever the policy.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::datatype::{strip_prefix, ElementKind};
use crate::error::{Error, Result};
use crate::value::Value;

/// What to do when one element of a numeric sequence does not convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversionPolicy {
    /// Fail the whole operation, naming the element's position
    #[default]
    Fail,
    /// Substitute zero and carry on
    ToZero,
    /// Abort the whole distributed computation
    Abort,
}

impl ConversionPolicy {
    /// Script-level name of the policy.
    pub const fn name(self) -> &'static str {
        match self {
            ConversionPolicy::Fail => "tclmpi::error",
            ConversionPolicy::ToZero => "tclmpi::tozero",
            ConversionPolicy::Abort => "tclmpi::abort",
        }
    }
}

impl fmt::Display for ConversionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConversionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match strip_prefix(s) {
            "error" => Ok(ConversionPolicy::Fail),
            "tozero" => Ok(ConversionPolicy::ToZero),
            "abort" => Ok(ConversionPolicy::Abort),
            _ => Err(Error::UnknownPolicy(s.to_string())),
        }
    }
}

/// Contiguous binary data of a single element kind, in native byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    kind: ElementKind,
    bytes: Vec<u8>,
}

impl Buffer {
    /// A zero-filled buffer of `count` elements.
    pub fn zeroed(kind: ElementKind, count: usize) -> Self {
        Buffer {
            kind,
            bytes: vec![0; count * kind.width()],
        }
    }

    /// Wrap raw bytes; fails if they are not a whole number of elements.
    pub fn from_bytes(kind: ElementKind, bytes: Vec<u8>) -> Result<Self> {
        if kind.elements_in(bytes.len()).is_none() {
            return Err(Error::PartialElement {
                bytes: bytes.len(),
                kind,
            });
        }
        Ok(Buffer { kind, bytes })
    }

    /// A one-element integer buffer.
    pub(crate) fn from_int(value: i32) -> Self {
        Buffer {
            kind: ElementKind::Int,
            bytes: value.to_ne_bytes().to_vec(),
        }
    }

    /// Element kind of this buffer.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.width()
    }

    /// True if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The raw bytes, mutably (for receiving into).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Give up the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Integer elements of an [`ElementKind::Int`] buffer.
    pub(crate) fn ints(&self) -> Vec<i32> {
        self.bytes.chunks_exact(4).map(read_i32).collect()
    }
}

fn read_i32(b: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[..4]);
    i32::from_ne_bytes(raw)
}

fn read_f64(b: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    f64::from_ne_bytes(raw)
}

/// Per-element conversion honoring the policy.
struct Converter {
    kind: ElementKind,
    policy: ConversionPolicy,
}

impl Converter {
    fn int(&self, index: usize, item: &Value) -> Result<i32> {
        match item.to_i32() {
            Some(v) => Ok(v),
            None => self.substitute(index, item).map(|()| 0),
        }
    }

    fn float(&self, index: usize, item: &Value) -> Result<f64> {
        match item.to_f64() {
            Some(v) => Ok(v),
            None => self.substitute(index, item).map(|()| 0.0),
        }
    }

    fn substitute(&self, index: usize, item: &Value) -> Result<()> {
        match self.policy {
            ConversionPolicy::ToZero => {
                trace!(index, kind = %self.kind, "substituting zero for unconvertible element");
                Ok(())
            }
            // The abort itself is carried out by the caller, which knows the group.
            ConversionPolicy::Fail | ConversionPolicy::Abort => Err(Error::Conversion {
                index,
                value: item.to_text().into_owned(),
                expected: self.kind,
            }),
        }
    }
}

fn pair_members(index: usize, item: &Value) -> Result<(Value, Value)> {
    let members = item.as_list();
    match members.as_ref() {
        [first, second] => Ok((first.clone(), second.clone())),
        other => Err(Error::PairArity {
            index,
            len: other.len(),
        }),
    }
}

/// Encode a dynamic value as a buffer of `kind`.
pub fn encode(value: &Value, kind: ElementKind, policy: ConversionPolicy) -> Result<Buffer> {
    if kind == ElementKind::Bytes {
        return Ok(Buffer {
            kind,
            bytes: value.as_bytes().into_owned(),
        });
    }

    let items = value.as_list();
    let conv = Converter { kind, policy };
    let mut bytes = Vec::with_capacity(items.len() * kind.width());

    for (index, item) in items.iter().enumerate() {
        match kind {
            ElementKind::Int => bytes.extend_from_slice(&conv.int(index, item)?.to_ne_bytes()),
            ElementKind::Float => {
                bytes.extend_from_slice(&conv.float(index, item)?.to_ne_bytes());
            }
            ElementKind::IntPair => {
                let (value, loc) = pair_members(index, item)?;
                bytes.extend_from_slice(&conv.int(index, &value)?.to_ne_bytes());
                bytes.extend_from_slice(&conv.int(index, &loc)?.to_ne_bytes());
            }
            ElementKind::FloatInt => {
                let (value, loc) = pair_members(index, item)?;
                bytes.extend_from_slice(&conv.float(index, &value)?.to_ne_bytes());
                bytes.extend_from_slice(&conv.int(index, &loc)?.to_ne_bytes());
                bytes.extend_from_slice(&[0u8; 4]);
            }
            ElementKind::Bytes => unreachable!("handled above"),
        }
    }

    Ok(Buffer { kind, bytes })
}

/// Decode a buffer back into a dynamic value. Never fails.
pub fn decode(buffer: &Buffer) -> Value {
    let chunks = buffer.bytes.chunks_exact(buffer.kind.width());
    match buffer.kind {
        ElementKind::Bytes => Value::Bytes(buffer.bytes.clone()),
        ElementKind::Int => Value::List(chunks.map(|c| Value::from(read_i32(c))).collect()),
        ElementKind::Float => Value::List(chunks.map(|c| Value::Float(read_f64(c))).collect()),
        ElementKind::IntPair => Value::List(
            chunks
                .map(|c| Value::from((read_i32(c), read_i32(&c[4..]))))
                .collect(),
        ),
        ElementKind::FloatInt => Value::List(
            chunks
                .map(|c| Value::from((read_f64(c), read_i32(&c[8..]))))
                .collect(),
        ),
    }
}
