//! Dynamic values exchanged with the scripting host.
//!
//! [`Value`] is a minimal stand-in for a self-describing script value: every
//! value has a textual form, and a value that is not already a list can be
//! read as a whitespace-separated one.

use std::borrow::Cow;
use std::fmt;

/// A dynamically typed script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw bytes, as produced by receiving `tclmpi::auto` data
    Bytes(Vec<u8>),
    /// Text
    Str(String),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Ordered sequence of values
    List(Vec<Value>),
}

impl Value {
    /// Build a list from anything that converts into values.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// The empty list.
    pub fn empty() -> Self {
        Value::List(Vec::new())
    }

    /// Textual form of the value.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Value::Str(s) => Cow::Borrowed(s),
            Value::Bytes(b) => String::from_utf8_lossy(b),
            Value::Int(i) => Cow::Owned(i.to_string()),
            Value::Float(x) => Cow::Owned(format_float(*x)),
            Value::List(items) => Cow::Owned(
                items
                    .iter()
                    .map(|item| quote_element(&item.to_text()).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    /// Byte representation used for opaque transfers.
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Value::Bytes(b) => Cow::Borrowed(b.as_slice()),
            Value::Str(s) => Cow::Borrowed(s.as_bytes()),
            other => match other.to_text() {
                Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
                Cow::Owned(s) => Cow::Owned(s.into_bytes()),
            },
        }
    }

    /// Read the value as a sequence.
    ///
    /// Lists are returned as-is, text is split on whitespace and a scalar is
    /// a one-element sequence.
    pub fn as_list(&self) -> Cow<'_, [Value]> {
        match self {
            Value::List(items) => Cow::Borrowed(items.as_slice()),
            Value::Str(_) | Value::Bytes(_) => Cow::Owned(
                self.to_text()
                    .split_whitespace()
                    .map(|word| Value::Str(word.to_string()))
                    .collect(),
            ),
            scalar => Cow::Owned(vec![scalar.clone()]),
        }
    }

    /// Convert to a 32-bit integer, `None` if not representable.
    pub fn to_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => i32::try_from(*i).ok(),
            Value::Str(_) | Value::Bytes(_) => parse_int(&self.to_text()),
            Value::List(items) if items.len() == 1 => items[0].to_i32(),
            _ => None,
        }
    }

    /// Convert to a double, `None` if not numeric.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            Value::Str(_) | Value::Bytes(_) => {
                let text = self.to_text();
                let text = text.trim();
                parse_int(text)
                    .map(f64::from)
                    .or_else(|| text.parse::<f64>().ok())
            }
            Value::List(items) if items.len() == 1 => items[0].to_f64(),
            Value::List(_) => None,
        }
    }
}

/// Parse a decimal or `0x` hexadecimal 32-bit integer with optional sign.
pub(crate) fn parse_int(text: &str) -> Option<i32> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<i64>().ok()?
    };
    let value = if negative { magnitude.checked_neg()? } else { magnitude };
    i32::try_from(value).ok()
}

fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{x:.1}")
    } else {
        x.to_string()
    }
}

fn quote_element(text: &str) -> Cow<'_, str> {
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        Cow::Owned(format!("{{{text}}}"))
    } else {
        Cow::Borrowed(text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
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

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Value::List(vec![a.into(), b.into()])
    }
}
