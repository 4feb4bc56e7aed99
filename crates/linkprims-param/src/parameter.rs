use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParamError, Result};
use crate::kind::ValueKind;
use crate::value::TypedValue;

/// Longest parameter name carried on the wire.
pub const MAX_NAME_LEN: usize = 8;

/// Where a parameter's value lives and how it may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageFlags(u8);

impl StorageFlags {
    pub const NONE: StorageFlags = StorageFlags(0);
    pub const RAM: StorageFlags = StorageFlags(0x01);
    pub const EEPROM: StorageFlags = StorageFlags(0x02);
    pub const READ_ONLY: StorageFlags = StorageFlags(0x04);
    pub const DYNAMIC: StorageFlags = StorageFlags(0x08);

    const NAMES: [(StorageFlags, &'static str); 4] = [
        (StorageFlags::RAM, "ram"),
        (StorageFlags::EEPROM, "eeprom"),
        (StorageFlags::READ_ONLY, "ro"),
        (StorageFlags::DYNAMIC, "dynamic"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: StorageFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: StorageFlags) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for StorageFlags {
    type Output = StorageFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Display for StorageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Accepts a number or names joined by `|`, `,` or `+` (`"ram|ro"`).
impl FromStr for StorageFlags {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(bits) = trimmed.parse::<u8>() {
            return Ok(Self::from_bits(bits));
        }
        let mut flags = StorageFlags::NONE;
        for part in trimmed.split(['|', ',', '+']).map(str::trim).filter(|p| !p.is_empty()) {
            let flag = match part.to_ascii_lowercase().as_str() {
                "none" => StorageFlags::NONE,
                "ram" => StorageFlags::RAM,
                "eeprom" | "rom" => StorageFlags::EEPROM,
                "ro" | "readonly" | "read_only" => StorageFlags::READ_ONLY,
                "dynamic" | "dyn" => StorageFlags::DYNAMIC,
                _ => {
                    return Err(ParamError::InvalidValue {
                        target: "storage flags".to_string(),
                        value: s.to_string(),
                    })
                }
            };
            flags = flags | flag;
        }
        Ok(flags)
    }
}

/// Addressable fields of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    Index,
    Category,
    Kind,
    Size,
    Flags,
    Min,
    Max,
    Default,
    Ram,
    Rom,
    Name,
}

impl FieldId {
    pub const ALL: [FieldId; 11] = [
        FieldId::Index,
        FieldId::Category,
        FieldId::Kind,
        FieldId::Size,
        FieldId::Flags,
        FieldId::Min,
        FieldId::Max,
        FieldId::Default,
        FieldId::Ram,
        FieldId::Rom,
        FieldId::Name,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldId::Index => "index",
            FieldId::Category => "category",
            FieldId::Kind => "kind",
            FieldId::Size => "size",
            FieldId::Flags => "flags",
            FieldId::Min => "min",
            FieldId::Max => "max",
            FieldId::Default => "default",
            FieldId::Ram => "ram",
            FieldId::Rom => "rom",
            FieldId::Name => "name",
        }
    }
}

/// Accepts a field number or any prefix of a field name; the first field in
/// declaration order wins (`"r"` is `ram`).
impl FromStr for FieldId {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let unknown = || ParamError::UnknownField(s.to_string());
        if trimmed.is_empty() {
            return Err(unknown());
        }
        if let Ok(number) = trimmed.parse::<usize>() {
            return Self::ALL.get(number).copied().ok_or_else(unknown);
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name().starts_with(&lower))
            .ok_or_else(unknown)
    }
}

/// One field read back from the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Index(Option<u8>),
    Category(u8),
    Kind(ValueKind),
    Size(usize),
    Flags(StorageFlags),
    Value(Option<TypedValue>),
    Name(Option<String>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Index(Some(index)) => write!(f, "{index}"),
            FieldValue::Category(category) => write!(f, "{category}"),
            FieldValue::Kind(kind) => write!(f, "{kind}"),
            FieldValue::Size(size) => write!(f, "{size}"),
            FieldValue::Flags(flags) => write!(f, "{flags}"),
            FieldValue::Value(Some(value)) => write!(f, "{value}"),
            FieldValue::Name(Some(name)) => f.write_str(name),
            FieldValue::Index(None) | FieldValue::Value(None) | FieldValue::Name(None) => {
                f.write_str("-")
            }
        }
    }
}

/// One entry of a device's parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub index: Option<u8>,
    /// Lower-case lookup name.
    pub name: Option<String>,
    pub category: u8,
    pub kind: ValueKind,
    /// Wire width of one value. For strings, the maximum length.
    pub size: usize,
    pub flags: StorageFlags,
    pub min: TypedValue,
    pub max: TypedValue,
    pub default: TypedValue,
    pub ram: Option<TypedValue>,
    pub eeprom: Option<TypedValue>,
    pub has_range: bool,
    pub has_changed: bool,
    pub requires_refresh: bool,
}

impl Parameter {
    /// The "none" parameter used in place of a missing entry.
    pub fn none() -> Self {
        Self::new(None, ValueKind::None)
    }

    /// A parameter with the kind's natural range, a zero default and no
    /// stored values.
    pub fn new(index: Option<u8>, kind: ValueKind) -> Self {
        let range_kind = Self::range_kind_of(kind);
        let mut parameter = Self {
            index,
            name: None,
            category: 0,
            kind,
            size: kind.data_size(),
            flags: StorageFlags::NONE,
            min: TypedValue::zero(range_kind),
            max: TypedValue::zero(range_kind),
            default: TypedValue::zero(range_kind),
            ram: None,
            eeprom: None,
            has_range: false,
            has_changed: true,
            requires_refresh: true,
        };
        parameter.update_range(None);
        parameter
    }

    /// Build a parameter from text fields, as loaded from a table file.
    pub fn from_def(def: &ParameterDef) -> Result<Self> {
        let mut parameter = Parameter::new(Some(def.index), def.kind)
            .with_category(def.category)
            .with_flags(def.flags.parse()?);
        if let Some(size) = def.size {
            parameter.size = size;
        }
        if let Some(name) = &def.name {
            parameter = parameter.with_name(name)?;
        }
        let range_kind = parameter.range_kind();
        if def.min.is_some() || def.max.is_some() {
            let min = match &def.min {
                Some(text) => TypedValue::parse(range_kind, text)?,
                None => parameter.min.clone(),
            };
            let max = match &def.max {
                Some(text) => TypedValue::parse(range_kind, text)?,
                None => parameter.max.clone(),
            };
            parameter.update_range(Some((min, max)));
        }
        if let Some(default) = &def.default {
            parameter.default = TypedValue::parse(range_kind, default)?;
        }
        if let Some(ram) = &def.ram {
            parameter.ram = Some(parameter.parse_value(ram)?);
        }
        if let Some(rom) = &def.rom {
            parameter.eeprom = Some(parameter.parse_value(rom)?);
        }
        Ok(parameter)
    }

    pub fn with_name(mut self, name: &str) -> Result<Self> {
        self.name = Some(normalize_name(name)?);
        Ok(self)
    }

    pub fn with_category(mut self, category: u8) -> Self {
        self.category = category;
        self
    }

    pub fn with_flags(mut self, flags: StorageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_range(mut self, min: TypedValue, max: TypedValue) -> Self {
        self.update_range(Some((min, max)));
        self
    }

    pub fn with_default(mut self, value: TypedValue) -> Self {
        self.default = value;
        self
    }

    pub fn with_ram(mut self, value: TypedValue) -> Self {
        self.ram = Some(value);
        self
    }

    pub fn with_eeprom(mut self, value: TypedValue) -> Self {
        self.eeprom = Some(value);
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == ValueKind::None
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(StorageFlags::READ_ONLY)
    }

    /// Kind used for min, max and default. String parameters bound their
    /// length, so these are bytes.
    pub fn range_kind(&self) -> ValueKind {
        Self::range_kind_of(self.kind)
    }

    fn range_kind_of(kind: ValueKind) -> ValueKind {
        if kind == ValueKind::String {
            ValueKind::Byte
        } else {
            kind
        }
    }

    /// Parse text as a stored value of this parameter's kind.
    pub fn parse_value(&self, text: &str) -> Result<TypedValue> {
        Ok(TypedValue::parse(self.kind, text)?.with_size(self.value_width(text.trim().len())))
    }

    fn value_width(&self, text_len: usize) -> usize {
        if self.kind == ValueKind::String {
            text_len
        } else {
            self.size
        }
    }

    /// Install an explicit range (swapped if reversed) or fall back to the
    /// range kind's natural bounds.
    pub fn update_range(&mut self, range: Option<(TypedValue, TypedValue)>) {
        match range {
            Some((min, max)) => {
                let reversed = min.compare(&max) == Some(std::cmp::Ordering::Greater);
                let (min, max) = if reversed { (max, min) } else { (min, max) };
                self.min = min;
                self.max = max;
                self.has_range = true;
            }
            None => {
                let kind = self.range_kind();
                self.min = TypedValue::min(kind);
                self.max = TypedValue::max(kind);
                self.has_range = false;
            }
        }
    }

    /// Longest string this parameter stores.
    pub fn max_string_len(&self) -> usize {
        self.max.as_f64().clamp(0.0, 255.0) as usize
    }

    pub fn get_field(&self, field: FieldId) -> FieldValue {
        match field {
            FieldId::Index => FieldValue::Index(self.index),
            FieldId::Category => FieldValue::Category(self.category),
            FieldId::Kind => FieldValue::Kind(self.kind),
            FieldId::Size => FieldValue::Size(self.size),
            FieldId::Flags => FieldValue::Flags(self.flags),
            FieldId::Min => FieldValue::Value(Some(self.min.clone())),
            FieldId::Max => FieldValue::Value(Some(self.max.clone())),
            FieldId::Default => FieldValue::Value(Some(self.default.clone())),
            FieldId::Ram => FieldValue::Value(self.ram.clone()),
            FieldId::Rom => FieldValue::Value(self.eeprom.clone()),
            FieldId::Name => FieldValue::Name(self.name.clone()),
        }
    }

    /// Text-to-definition view, the inverse of [`from_def`](Self::from_def).
    pub fn to_def(&self) -> ParameterDef {
        ParameterDef {
            index: self.index.unwrap_or(0),
            category: self.category,
            kind: self.kind,
            size: Some(self.size),
            flags: self.flags.to_string(),
            min: self.has_range.then(|| self.min.to_text()),
            max: self.has_range.then(|| self.max.to_text()),
            default: Some(self.default.to_text()),
            ram: self.ram.as_ref().map(TypedValue::to_text),
            rom: self.eeprom.as_ref().map(TypedValue::to_text),
            name: self.name.clone(),
        }
    }
}

impl Default for Parameter {
    fn default() -> Self {
        Self::none()
    }
}

/// Trim, lower-case and validate a parameter name.
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.parse::<i64>().is_ok() {
        return Err(ParamError::InvalidName(name.to_string()));
    }
    Ok(name.to_lowercase())
}

/// Text form of a parameter, as stored in a JSON table file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub index: u8,
    #[serde(default)]
    pub category: u8,
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default)]
    pub flags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
