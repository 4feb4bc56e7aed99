use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParamError;

/// Scalar kinds a parameter can hold. The discriminant is the wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ValueKind {
    #[default]
    None = 0,
    OnOff = 1,
    Enum = 2,
    Bits = 3,
    Byte = 4,
    SByte = 5,
    Short = 6,
    UShort = 7,
    Int = 8,
    UInt = 9,
    Id = 10,
    Long = 11,
    ULong = 12,
    Lid = 13,
    Float = 14,
    Double = 15,
    String = 16,
}

impl ValueKind {
    pub const ALL: [ValueKind; 17] = [
        ValueKind::None,
        ValueKind::OnOff,
        ValueKind::Enum,
        ValueKind::Bits,
        ValueKind::Byte,
        ValueKind::SByte,
        ValueKind::Short,
        ValueKind::UShort,
        ValueKind::Int,
        ValueKind::UInt,
        ValueKind::Id,
        ValueKind::Long,
        ValueKind::ULong,
        ValueKind::Lid,
        ValueKind::Float,
        ValueKind::Double,
        ValueKind::String,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(usize::from(byte)).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Default byte width of a value of this kind.
    pub fn data_size(self) -> usize {
        match self {
            ValueKind::None => 0,
            ValueKind::OnOff
            | ValueKind::Enum
            | ValueKind::Bits
            | ValueKind::Byte
            | ValueKind::SByte
            | ValueKind::String => 1,
            ValueKind::Short | ValueKind::UShort => 2,
            ValueKind::Int | ValueKind::UInt | ValueKind::Id | ValueKind::Float => 4,
            ValueKind::Long | ValueKind::ULong | ValueKind::Lid | ValueKind::Double => 8,
        }
    }

    /// Kinds stored in the 64-bit integer representation.
    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            ValueKind::None | ValueKind::Float | ValueKind::Double | ValueKind::String
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ValueKind::SByte | ValueKind::Short | ValueKind::Int | ValueKind::Long
        )
    }

    pub fn min_value(self) -> f64 {
        match self {
            ValueKind::SByte => f64::from(i8::MIN),
            ValueKind::Short => f64::from(i16::MIN),
            ValueKind::Int => f64::from(i32::MIN),
            ValueKind::Long => i64::MIN as f64,
            ValueKind::Float => f64::from(f32::MIN),
            ValueKind::Double => f64::MIN,
            ValueKind::String => 1.0,
            _ => 0.0,
        }
    }

    pub fn max_value(self) -> f64 {
        match self {
            ValueKind::None => 0.0,
            ValueKind::OnOff | ValueKind::String => 1.0,
            ValueKind::Enum | ValueKind::Byte => f64::from(u8::MAX),
            ValueKind::SByte => f64::from(i8::MAX),
            ValueKind::Short => f64::from(i16::MAX),
            ValueKind::UShort => f64::from(u16::MAX),
            ValueKind::Int => f64::from(i32::MAX),
            ValueKind::Bits | ValueKind::UInt | ValueKind::Id => f64::from(u32::MAX),
            ValueKind::Long => i64::MAX as f64,
            ValueKind::ULong | ValueKind::Lid => u64::MAX as f64,
            ValueKind::Float => f64::from(f32::MAX),
            ValueKind::Double => f64::MAX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::None => "none",
            ValueKind::OnOff => "onoff",
            ValueKind::Enum => "enum",
            ValueKind::Bits => "bits",
            ValueKind::Byte => "byte",
            ValueKind::SByte => "sbyte",
            ValueKind::Short => "short",
            ValueKind::UShort => "ushort",
            ValueKind::Int => "int",
            ValueKind::UInt => "uint",
            ValueKind::Id => "id",
            ValueKind::Long => "long",
            ValueKind::ULong => "ulong",
            ValueKind::Lid => "lid",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts a kind name (case-insensitive) or its wire number.
impl FromStr for ValueKind {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u8>() {
            return Self::from_u8(number).ok_or_else(|| ParamError::UnknownKind(s.to_string()));
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| ParamError::UnknownKind(s.to_string()))
    }
}
