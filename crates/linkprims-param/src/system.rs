//! The default system page every device exposes at indices 0..=9.

use crate::error::Result;
use crate::kind::ValueKind;
use crate::parameter::{Parameter, StorageFlags};
use crate::registry::ParameterRegistry;
use crate::value::TypedValue;

pub const INDEX_PARAMS: u8 = 0;
pub const INDEX_PAGES: u8 = 1;
pub const INDEX_TICKER: u8 = 2;
pub const INDEX_HARD_TYPE: u8 = 3;
pub const INDEX_HARD_VERSION: u8 = 4;
pub const INDEX_SOFT_TYPE: u8 = 5;
pub const INDEX_SOFT_VERSION: u8 = 6;
pub const INDEX_SYS_KEY: u8 = 7;
pub const INDEX_SERIAL_NO: u8 = 8;
pub const INDEX_PRO_NAME: u8 = 9;

/// Longest serial number or product name stored on the page.
pub const SYSTEM_STRING_LEN: usize = 30;

const SYSTEM_PARAMETER_COUNT: i64 = 10;

fn byte(index: u8, name: &str, flags: StorageFlags, value: i64) -> Result<Parameter> {
    let value = TypedValue::integer(ValueKind::Byte, value);
    Ok(Parameter::new(Some(index), ValueKind::Byte)
        .with_name(name)?
        .with_flags(flags)
        .with_range(TypedValue::min(ValueKind::Byte), TypedValue::max(ValueKind::Byte))
        .with_default(value.clone())
        .with_ram(value.clone())
        .with_eeprom(value))
}

fn counter(index: u8, name: &str) -> Result<Parameter> {
    let zero = TypedValue::zero(ValueKind::UInt);
    Ok(Parameter::new(Some(index), ValueKind::UInt)
        .with_name(name)?
        .with_flags(StorageFlags::RAM | StorageFlags::DYNAMIC)
        .with_range(TypedValue::min(ValueKind::UInt), TypedValue::max(ValueKind::UInt))
        .with_default(zero.clone())
        .with_ram(zero))
}

fn text(index: u8, name: &str, stored: &str) -> Result<Parameter> {
    let stored: String = stored.chars().take(SYSTEM_STRING_LEN).collect();
    Ok(Parameter::new(Some(index), ValueKind::String)
        .with_name(name)?
        .with_size(SYSTEM_STRING_LEN)
        .with_flags(StorageFlags::EEPROM | StorageFlags::READ_ONLY)
        .with_range(
            TypedValue::integer(ValueKind::Byte, 0),
            TypedValue::integer(ValueKind::Byte, SYSTEM_STRING_LEN as i64),
        )
        .with_default(TypedValue::integer(ValueKind::Byte, 0))
        .with_ram(TypedValue::text("0"))
        .with_eeprom(TypedValue::text(stored)))
}

/// The ten system parameters. `serial` becomes the stored serial number.
pub fn system_page(serial: &str) -> Result<Vec<Parameter>> {
    let ram_ro = StorageFlags::RAM | StorageFlags::READ_ONLY;
    let rom_ro = StorageFlags::EEPROM | StorageFlags::READ_ONLY;
    Ok(vec![
        byte(INDEX_PARAMS, "Params", ram_ro, SYSTEM_PARAMETER_COUNT)?,
        byte(INDEX_PAGES, "Pages", ram_ro, 1)?,
        counter(INDEX_TICKER, "Ticker")?,
        byte(INDEX_HARD_TYPE, "HardTyp", rom_ro, 1)?,
        byte(INDEX_HARD_VERSION, "HardVer", rom_ro, 1)?,
        byte(INDEX_SOFT_TYPE, "SoftTyp", rom_ro, 1)?,
        byte(INDEX_SOFT_VERSION, "SoftVer", rom_ro, 1)?,
        counter(INDEX_SYS_KEY, "SysKey")?,
        text(INDEX_SERIAL_NO, "SerialNo", serial)?,
        text(INDEX_PRO_NAME, "ProName", "None")?,
    ])
}

impl ParameterRegistry {
    /// A registry holding only the system page.
    pub fn with_system_page(serial: &str) -> Result<Self> {
        let registry = Self::new();
        for parameter in system_page(serial)? {
            registry.put(parameter)?;
        }
        Ok(registry)
    }
}
