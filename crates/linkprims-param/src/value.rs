use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParamError, Result};
use crate::kind::ValueKind;

/// The single active representation of a [`TypedValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Repr {
    /// Integer kinds. Unsigned 64-bit kinds keep their bit pattern.
    Integer(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Empty,
}

/// A scalar tagged with its [`ValueKind`] and declared byte size.
///
/// The representation always matches the kind: integer kinds hold
/// [`Repr::Integer`], `Float` holds [`Repr::Float`], and so on. Byte
/// encoding is little-endian over the declared size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    kind: ValueKind,
    size: usize,
    repr: Repr,
}

impl TypedValue {
    pub fn none() -> Self {
        Self {
            kind: ValueKind::None,
            size: 0,
            repr: Repr::Empty,
        }
    }

    pub fn zero(kind: ValueKind) -> Self {
        Self::from_f64(kind, 0.0)
    }

    /// The smallest value of `kind`.
    pub fn min(kind: ValueKind) -> Self {
        Self::from_f64(kind, kind.min_value())
    }

    /// The largest value of `kind`.
    pub fn max(kind: ValueKind) -> Self {
        Self::from_f64(kind, kind.max_value())
    }

    /// An integer-kind value. Non-integer kinds convert through `f64`.
    pub fn integer(kind: ValueKind, value: i64) -> Self {
        if kind.is_integer() {
            Self {
                kind,
                size: kind.data_size(),
                repr: Repr::Integer(value),
            }
        } else {
            Self::from_f64(kind, value as f64)
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            kind: ValueKind::String,
            size: value.len(),
            repr: Repr::Text(value),
        }
    }

    /// Convert a number into `kind`. Integer kinds saturate at the
    /// bounds of their 64-bit storage.
    pub fn from_f64(kind: ValueKind, value: f64) -> Self {
        let repr = match kind {
            ValueKind::None => Repr::Empty,
            ValueKind::Float => Repr::Float(value as f32),
            ValueKind::Double => Repr::Double(value),
            ValueKind::String => Repr::Text(value.to_string()),
            k if k.is_signed() => Repr::Integer(value as i64),
            _ => Repr::Integer(value as u64 as i64),
        };
        let size = match &repr {
            Repr::Text(text) => text.len(),
            _ => kind.data_size(),
        };
        Self { kind, size, repr }
    }

    /// Decode `bytes` as a little-endian value of `kind`.
    ///
    /// Unsigned kinds zero-extend and signed kinds sign-extend, so a value
    /// may be carried in fewer or more bytes than the kind's default width.
    pub fn from_bytes(kind: ValueKind, bytes: &[u8]) -> Self {
        match kind {
            ValueKind::None => Self::none(),
            ValueKind::String => Self::text(String::from_utf8_lossy(bytes).into_owned()),
            ValueKind::Float => {
                let mut raw = [0u8; 4];
                let n = bytes.len().min(4);
                raw[..n].copy_from_slice(&bytes[..n]);
                Self {
                    kind,
                    size: 4,
                    repr: Repr::Float(f32::from_le_bytes(raw)),
                }
            }
            ValueKind::Double => {
                let mut raw = [0u8; 8];
                let n = bytes.len().min(8);
                raw[..n].copy_from_slice(&bytes[..n]);
                Self {
                    kind,
                    size: 8,
                    repr: Repr::Double(f64::from_le_bytes(raw)),
                }
            }
            _ => {
                let n = bytes.len().min(8);
                let negative = kind.is_signed() && n > 0 && bytes[n - 1] & 0x80 != 0;
                let mut raw = if negative { [0xffu8; 8] } else { [0u8; 8] };
                raw[..n].copy_from_slice(&bytes[..n]);
                Self {
                    kind,
                    size: bytes.len(),
                    repr: Repr::Integer(i64::from_le_bytes(raw)),
                }
            }
        }
    }

    /// Parse text for `kind`.
    ///
    /// Numbers accept decimal, `0x` hex, and bare hex starting with a letter
    /// (`ff`). Strings are taken verbatim after trimming.
    pub fn parse(kind: ValueKind, text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if kind == ValueKind::String {
            return Ok(Self::text(trimmed));
        }
        if trimmed.is_empty() {
            return Ok(Self::zero(kind));
        }
        let invalid = || ParamError::InvalidValue {
            target: kind.to_string(),
            value: text.to_string(),
        };
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .or_else(|| trimmed.starts_with(|c: char| c.is_ascii_alphabetic()).then_some(trimmed));
        if let Some(digits) = hex {
            let bits = u64::from_str_radix(digits, 16).map_err(|_| invalid())?;
            return Ok(if kind.is_integer() {
                Self::integer(kind, bits as i64)
            } else {
                Self::from_f64(kind, bits as f64)
            });
        }
        if kind.is_integer() {
            if let Ok(value) = trimmed.parse::<i64>() {
                return Ok(Self::integer(kind, value));
            }
            if let Ok(value) = trimmed.parse::<u64>() {
                return Ok(Self::integer(kind, value as i64));
            }
        }
        let value = trimmed.parse::<f64>().map_err(|_| invalid())?;
        Ok(Self::from_f64(kind, value))
    }

    /// Override the declared byte size.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn repr(&self) -> &Repr {
        &self.repr
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.repr {
            Repr::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.repr {
            Repr::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value. Text parses as a number or yields zero.
    pub fn as_f64(&self) -> f64 {
        match &self.repr {
            Repr::Integer(v) if self.kind.is_signed() => *v as f64,
            Repr::Integer(v) => *v as u64 as f64,
            Repr::Float(v) => f64::from(*v),
            Repr::Double(v) => *v,
            Repr::Text(s) => s.trim().parse().unwrap_or(0.0),
            Repr::Empty => 0.0,
        }
    }

    /// Text form that [`parse`](Self::parse) reads back: strings unquoted,
    /// everything else as [`Display`](fmt::Display) renders it.
    pub fn to_text(&self) -> String {
        match &self.repr {
            Repr::Text(s) => s.clone(),
            _ => self.to_string(),
        }
    }

    /// Little-endian encoding over the declared size; UTF-8 for strings.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.repr {
            Repr::Empty => Vec::new(),
            Repr::Text(s) => s.as_bytes().to_vec(),
            Repr::Float(v) => v.to_le_bytes().to_vec(),
            Repr::Double(v) => v.to_le_bytes().to_vec(),
            Repr::Integer(v) => {
                let raw = v.to_le_bytes();
                let fill = if self.kind.is_signed() && *v < 0 { 0xff } else { 0 };
                (0..self.size)
                    .map(|i| raw.get(i).copied().unwrap_or(fill))
                    .collect()
            }
        }
    }

    /// Write exactly `width` bytes into `dst`, zero padding or truncating.
    pub fn write_bytes(&self, dst: &mut [u8], width: usize) {
        let bytes = self.to_bytes();
        for (i, slot) in dst.iter_mut().take(width).enumerate() {
            *slot = bytes.get(i).copied().unwrap_or(0);
        }
    }

    /// Clamp in place to `[min, max]`. Returns `true` if the value changed.
    ///
    /// Strings and `None` are never clamped.
    pub fn check_in_range(&mut self, min: &TypedValue, max: &TypedValue) -> bool {
        match &mut self.repr {
            Repr::Integer(v) => {
                let (lo, hi) = (integer_bound(min, self.kind), integer_bound(max, self.kind));
                let clamped = if self.kind.is_signed() {
                    if *v < lo {
                        lo
                    } else if *v > hi {
                        hi
                    } else {
                        return false;
                    }
                } else {
                    let u = *v as u64;
                    if u < lo as u64 {
                        lo
                    } else if u > hi as u64 {
                        hi
                    } else {
                        return false;
                    }
                };
                *v = clamped;
                true
            }
            Repr::Float(v) => {
                let (lo, hi) = (min.as_f64() as f32, max.as_f64() as f32);
                let clamped = if *v < lo {
                    lo
                } else if *v > hi {
                    hi
                } else {
                    return false;
                };
                *v = clamped;
                true
            }
            Repr::Double(v) => {
                let (lo, hi) = (min.as_f64(), max.as_f64());
                let clamped = if *v < lo {
                    lo
                } else if *v > hi {
                    hi
                } else {
                    return false;
                };
                *v = clamped;
                true
            }
            Repr::Text(_) | Repr::Empty => false,
        }
    }

    /// Order two values: strings lexically, everything else numerically.
    pub fn compare(&self, other: &TypedValue) -> Option<Ordering> {
        match (&self.repr, &other.repr) {
            (Repr::Text(a), Repr::Text(b)) => Some(a.cmp(b)),
            (Repr::Text(_), _) => Some(Ordering::Greater),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

/// Bound `value` into the 64-bit storage of `kind`.
fn integer_bound(value: &TypedValue, kind: ValueKind) -> i64 {
    match value.repr {
        Repr::Integer(v) => v,
        _ if kind.is_signed() => value.as_f64() as i64,
        _ => value.as_f64() as u64 as i64,
    }
}

impl Default for TypedValue {
    fn default() -> Self {
        Self::none()
    }
}

/// Equal when the kinds match and the active representations are equal.
/// The declared size is not compared.
impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.repr == other.repr
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.repr, self.kind) {
            (Repr::Empty, _) => f.write_str("0"),
            (Repr::Text(s), _) => write!(f, "\"{s}\""),
            (Repr::Float(v), _) => write!(f, "{v}"),
            (Repr::Double(v), _) => write!(f, "{v}"),
            (Repr::Integer(v), kind) if kind.is_signed() => write!(f, "{v}"),
            (Repr::Integer(v), ValueKind::Bits) => match self.size {
                4 => write!(f, "{:#010x}", *v as u32),
                2 => write!(f, "{:#06x}", *v as u16),
                _ => write!(f, "{:#04x}", *v as u8),
            },
            (Repr::Integer(v), ValueKind::UShort) => write!(f, "{:#06x}", *v as u16),
            (Repr::Integer(v), ValueKind::UInt | ValueKind::Id) => write!(f, "{:#010x}", *v as u32),
            (Repr::Integer(v), ValueKind::ULong | ValueKind::Lid) => {
                write!(f, "{:#018x}", *v as u64)
            }
            (Repr::Integer(v), _) => write!(f, "{:#04x}", *v as u8),
        }
    }
}
