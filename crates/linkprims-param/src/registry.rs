use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use linkprims_sync::lock_unpoisoned;
use tracing::debug;

use crate::error::{ParamError, Result};
use crate::kind::ValueKind;
use crate::parameter::{normalize_name, FieldId, FieldValue, Parameter, ParameterDef, StorageFlags};
use crate::value::TypedValue;

/// Lookup key for a parameter: its table index or its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Index(u8),
    Name(String),
}

impl ParamKey {
    /// Numbers in `0..=255` select by index, anything else by name.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<u8>() {
            Ok(index) => ParamKey::Index(index),
            Err(_) => ParamKey::Name(trimmed.to_lowercase()),
        }
    }
}

impl From<u8> for ParamKey {
    fn from(index: u8) -> Self {
        ParamKey::Index(index)
    }
}

impl From<&str> for ParamKey {
    fn from(text: &str) -> Self {
        ParamKey::parse(text)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Index(index) => write!(f, "{index}"),
            ParamKey::Name(name) => f.write_str(name),
        }
    }
}

/// Arena of parameters reachable by index and by name.
///
/// Both maps hold arena slots, so a parameter reached either way is the same
/// object. Linking a parameter evicts any other parameter that held one of
/// its keys.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    arena: Vec<Option<Parameter>>,
    free: Vec<usize>,
    by_index: HashMap<u8, usize>,
    by_name: HashMap<String, usize>,
    highest_index: Option<u8>,
}

impl Tables {
    fn slot_of(&self, key: &ParamKey) -> Option<usize> {
        match key {
            ParamKey::Index(index) => self.by_index.get(index).copied(),
            ParamKey::Name(name) => self.by_name.get(&name.to_lowercase()).copied(),
        }
    }

    pub(crate) fn find(&self, key: &ParamKey) -> Option<&Parameter> {
        self.slot_of(key).and_then(|slot| self.arena[slot].as_ref())
    }

    pub(crate) fn find_mut(&mut self, key: &ParamKey) -> Option<&mut Parameter> {
        let slot = self.slot_of(key)?;
        self.arena[slot].as_mut()
    }

    pub(crate) fn highest_index(&self) -> Option<u8> {
        self.highest_index
    }

    /// Upsert `parameter`, replacing whichever entry already holds its index
    /// (or failing that, its name).
    pub(crate) fn put(&mut self, parameter: Parameter) -> Result<()> {
        if parameter.index.is_none() && parameter.name.is_none() {
            return Err(ParamError::InvalidValue {
                target: "parameter key".to_string(),
                value: "neither index nor name".to_string(),
            });
        }
        let existing = parameter
            .index
            .and_then(|index| self.by_index.get(&index).copied())
            .or_else(|| parameter.name.as_ref().and_then(|name| self.by_name.get(name).copied()));
        let slot = match existing {
            Some(slot) => {
                self.unlink(slot);
                self.arena[slot] = Some(parameter);
                slot
            }
            None => self.allocate(parameter),
        };
        self.link(slot);
        Ok(())
    }

    fn allocate(&mut self, parameter: Parameter) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.arena[slot] = Some(parameter);
                slot
            }
            None => {
                self.arena.push(Some(parameter));
                self.arena.len() - 1
            }
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Some(parameter) = self.arena[slot].as_ref() else {
            return;
        };
        if let Some(index) = parameter.index {
            if self.by_index.get(&index) == Some(&slot) {
                self.by_index.remove(&index);
            }
        }
        if let Some(name) = &parameter.name {
            if self.by_name.get(name) == Some(&slot) {
                self.by_name.remove(name);
            }
        }
    }

    fn link(&mut self, slot: usize) {
        let Some(parameter) = self.arena[slot].as_ref() else {
            return;
        };
        let (index, name) = (parameter.index, parameter.name.clone());
        if let Some(index) = index {
            if let Some(other) = self.by_index.insert(index, slot).filter(|&other| other != slot) {
                self.evict(other);
                self.by_index.insert(index, slot);
            }
            self.highest_index = self.highest_index.max(Some(index));
        }
        if let Some(name) = name {
            if let Some(other) = self.by_name.insert(name.clone(), slot).filter(|&other| other != slot) {
                self.evict(other);
                self.by_name.insert(name, slot);
            }
        }
    }

    fn evict(&mut self, slot: usize) {
        self.unlink(slot);
        if let Some(parameter) = self.arena[slot].take() {
            debug!(index = ?parameter.index, name = ?parameter.name, "evicted replaced parameter");
            self.free.push(slot);
        }
    }

    /// Change one field, re-keying the maps when the index or name changes.
    fn put_field(&mut self, key: &ParamKey, field: FieldId, text: &str) -> Result<()> {
        let slot = match self.slot_of(key) {
            Some(slot) => slot,
            None => {
                let parameter = match key {
                    ParamKey::Index(index) => Parameter::new(Some(*index), ValueKind::None),
                    ParamKey::Name(name) => Parameter::new(None, ValueKind::None).with_name(name)?,
                };
                let slot = self.allocate(parameter);
                self.link(slot);
                slot
            }
        };
        let Some(mut parameter) = self.arena[slot].clone() else {
            return Err(ParamError::UnknownField(field.name().to_string()));
        };
        apply_field(&mut parameter, field, text)?;
        self.unlink(slot);
        self.arena[slot] = Some(parameter);
        self.link(slot);
        Ok(())
    }

    fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.arena.iter().flatten()
    }
}

fn apply_field(parameter: &mut Parameter, field: FieldId, text: &str) -> Result<()> {
    let invalid = || ParamError::InvalidValue {
        target: field.name().to_string(),
        value: text.to_string(),
    };
    match field {
        FieldId::Index => {
            parameter.index = Some(text.trim().parse::<u8>().map_err(|_| invalid())?);
        }
        FieldId::Category => {
            parameter.category = text.trim().parse::<u8>().map_err(|_| invalid())?;
        }
        FieldId::Kind => {
            let kind: ValueKind = text.parse()?;
            if kind == ValueKind::None {
                return Err(invalid());
            }
            parameter.kind = kind;
        }
        FieldId::Size => {
            let size = text.trim().parse::<i64>().map_err(|_| invalid())?;
            parameter.size = usize::try_from(size).unwrap_or_else(|_| parameter.kind.data_size());
        }
        FieldId::Flags => {
            let flags: StorageFlags = text.parse()?;
            if flags.is_empty() {
                return Err(invalid());
            }
            parameter.flags = flags;
        }
        FieldId::Min => {
            let min = TypedValue::parse(parameter.range_kind(), text)?;
            let max = parameter.max.clone();
            parameter.update_range(Some((min, max)));
        }
        FieldId::Max => {
            let max = TypedValue::parse(parameter.range_kind(), text)?;
            let min = parameter.min.clone();
            parameter.update_range(Some((min, max)));
        }
        FieldId::Default => {
            parameter.default = TypedValue::parse(parameter.range_kind(), text)?;
        }
        FieldId::Ram => parameter.ram = Some(parameter.parse_value(text)?),
        FieldId::Rom => parameter.eeprom = Some(parameter.parse_value(text)?),
        FieldId::Name => parameter.name = Some(normalize_name(text)?),
    }
    parameter.has_changed = true;
    Ok(())
}

/// A device's parameter table, shared between the codecs and callers.
///
/// One lock covers both lookup maps, since a single update touches both.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    tables: Mutex<Tables>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from parameter definitions.
    pub fn from_defs<'a>(defs: impl IntoIterator<Item = &'a ParameterDef>) -> Result<Self> {
        let registry = Self::new();
        for def in defs {
            registry.put(Parameter::from_def(def)?)?;
        }
        Ok(registry)
    }

    /// Load a JSON array of [`ParameterDef`] rows.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let defs: Vec<ParameterDef> = serde_json::from_str(json)?;
        Self::from_defs(&defs)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn find(&self, key: impl Into<ParamKey>) -> Option<Parameter> {
        lock_unpoisoned(&self.tables).find(&key.into()).cloned()
    }

    /// Like [`find`](Self::find), but a missing entry comes back as the
    /// "none" parameter.
    pub fn find_or_none(&self, key: impl Into<ParamKey>) -> Parameter {
        self.find(key).unwrap_or_else(Parameter::none)
    }

    pub fn put(&self, parameter: Parameter) -> Result<()> {
        debug!(index = ?parameter.index, name = ?parameter.name, kind = %parameter.kind, "put parameter");
        lock_unpoisoned(&self.tables).put(parameter)
    }

    /// Set one field from text, creating the parameter if the key is absent.
    pub fn put_field(&self, key: impl Into<ParamKey>, field: FieldId, text: &str) -> Result<()> {
        lock_unpoisoned(&self.tables).put_field(&key.into(), field, text)
    }

    pub fn get_field(&self, key: impl Into<ParamKey>, field: FieldId) -> Option<FieldValue> {
        lock_unpoisoned(&self.tables)
            .find(&key.into())
            .map(|parameter| parameter.get_field(field))
    }

    /// Apply `f` to a stored parameter. Returns `None` when the key is absent.
    pub fn update<R>(&self, key: impl Into<ParamKey>, f: impl FnOnce(&mut Parameter) -> R) -> Option<R> {
        lock_unpoisoned(&self.tables).find_mut(&key.into()).map(f)
    }

    /// All parameters ordered by index, unindexed ones last by name.
    pub fn entries(&self) -> Vec<Parameter> {
        let mut entries: Vec<_> = lock_unpoisoned(&self.tables).iter().cloned().collect();
        entries.sort_by(|a, b| match (a.index, b.index) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });
        entries
    }

    pub fn to_defs(&self) -> Vec<ParameterDef> {
        self.entries().iter().map(Parameter::to_def).collect()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.tables).iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest index ever stored.
    pub fn highest_index(&self) -> Option<u8> {
        lock_unpoisoned(&self.tables).highest_index()
    }

    pub(crate) fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        f(&mut lock_unpoisoned(&self.tables))
    }
}
