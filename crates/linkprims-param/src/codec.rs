//! Packed read/write variable codec.
//!
//! Requests and replies share one layout so a reply is built in place over
//! the request:
//!
//! ```text
//! read:  [id][flags][page][done:4|count:4][index; count] ([meta] [values])*
//! write: [id][flags][page][count][index; count] [values]*
//! ```
//!
//! With the `BY_NAME` flag a read request carries a name string instead of
//! the count and index list; the reply comes back in index form with the
//! `NAME` flag set.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::Result;
use crate::kind::ValueKind;
use crate::parameter::{Parameter, StorageFlags, MAX_NAME_LEN};
use crate::registry::{ParamKey, ParameterRegistry, Tables};
use crate::system::INDEX_TICKER;
use crate::value::TypedValue;

pub const RWV_RAM: u8 = 0x01;
pub const RWV_EEPROM: u8 = 0x02;
pub const RWV_DEFAULT: u8 = 0x04;
pub const RWV_RANGE: u8 = 0x08;
pub const RWV_NAME: u8 = 0x10;
pub const RWV_BY_NAME: u8 = 0x20;
pub const RWV_PACK: u8 = 0x40;
pub const RWV_PACK_KIND: u8 = 0x80;

/// Most parameters one request may address.
pub const MAX_REQUEST_INDICES: usize = 8;

const HEADER_LEN: usize = 3;
const COUNT_AT: usize = 3;
const INDICES_AT: usize = 4;

/// Per-parameter metadata emitted ahead of the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Emit the kind byte.
    pub meta: bool,
    /// Emit only the kind byte, no storage or argument flags.
    pub kind_only: bool,
}

impl EncodeOptions {
    pub fn from_flags(flags: u8) -> Self {
        let kind_only = flags & RWV_PACK_KIND != 0;
        Self {
            meta: kind_only || flags & RWV_PACK == 0,
            kind_only,
        }
    }

    fn full(self) -> bool {
        self.meta && !self.kind_only
    }
}

/// How the read encoder treats the values already in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Read,
    /// Compare each RAM value against the previous reply held in the buffer
    /// and report whether anything other than the ticker moved.
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// New data length of the reply.
    pub len: usize,
    /// Parameters actually encoded.
    pub written: usize,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub len: usize,
    /// Parameters consumed from the request, including read-only ones.
    pub written: usize,
}

/// Where one value sits in a decoded reply, for re-reading later replies of
/// the same shape without a full decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueOffset {
    pub index: u8,
    pub kind: ValueKind,
    pub size: usize,
    pub offset: usize,
}

/// Map a field name to the flag that selects it on the wire.
pub fn rwv_flag_for_field(field: &str) -> u8 {
    let field = field.trim().to_ascii_lowercase();
    if field.is_empty() {
        RWV_RAM
    } else if "range".starts_with(&field) && field.len() > 1 {
        RWV_RANGE
    } else if ("rom".starts_with(&field) && field.len() > 1) || field == "eeprom" {
        RWV_EEPROM
    } else if "default".starts_with(&field) {
        RWV_DEFAULT
    } else {
        RWV_RAM
    }
}

/// Read request for up to eight indices.
pub fn read_request(read_id: u8, flags: u8, page: u8, indices: &[u8]) -> Vec<u8> {
    let indices = &indices[..indices.len().min(MAX_REQUEST_INDICES)];
    let mut data = vec![read_id, flags & !RWV_BY_NAME, page, indices.len() as u8];
    data.extend_from_slice(indices);
    data
}

pub fn read_by_name_request(read_id: u8, flags: u8, page: u8, name: &str) -> Vec<u8> {
    let mut data = vec![read_id, flags | RWV_BY_NAME, page];
    data.extend(name.trim().bytes().take(MAX_NAME_LEN));
    data
}

/// Write request; strings travel length-prefixed, everything else at its
/// declared size.
pub fn write_request(write_id: u8, flags: u8, page: u8, values: &[(u8, TypedValue)]) -> Vec<u8> {
    let values = &values[..values.len().min(MAX_REQUEST_INDICES)];
    let mut data = vec![write_id, flags, page, values.len() as u8];
    data.extend(values.iter().map(|(index, _)| *index));
    for (_, value) in values {
        let bytes = value.to_bytes();
        if value.kind() == ValueKind::String {
            let len = bytes.len().min(usize::from(u8::MAX));
            data.push(len as u8);
            data.extend_from_slice(&bytes[..len]);
        } else {
            data.extend_from_slice(&bytes);
        }
    }
    data
}

/// Isochronous request: an interval in milliseconds (0 cancels) and a
/// repeat count (0 repeats forever) ahead of a read request.
pub fn iso_request(iso_id: u8, interval_ms: u16, repeat: u16, read: &[u8]) -> Vec<u8> {
    let mut data = vec![iso_id];
    data.extend_from_slice(&interval_ms.to_le_bytes());
    data.extend_from_slice(&repeat.to_le_bytes());
    data.extend_from_slice(read);
    data
}

fn fixed_bytes(value: &TypedValue, width: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; width];
    value.write_bytes(&mut bytes, width);
    bytes
}

fn string_bytes(parameter: &Parameter, value: &TypedValue) -> Vec<u8> {
    let mut bytes = value.to_bytes();
    bytes.truncate(parameter.max_string_len().min(usize::from(u8::MAX)));
    bytes
}

/// Turn the read request in `area[..len]` into its reply, in place.
///
/// `area` is the whole data area of the buffer; its length is the payload
/// budget. Parameters are appended while they fit; each optional block is
/// dropped on its own when it does not. Returns `None` for a malformed
/// request.
pub fn encode_read_reply(
    registry: &ParameterRegistry,
    area: &mut [u8],
    len: usize,
    mode: ReadMode,
) -> Option<ReadOutcome> {
    if len < 5 || len > area.len() {
        return None;
    }
    registry.with_tables(|tables| encode_read(tables, area, len, mode))
}

fn encode_read(tables: &Tables, area: &mut [u8], len: usize, mode: ReadMode) -> Option<ReadOutcome> {
    let max = area.len();
    let (read_id, mut flags, page) = (area[0], area[1], area[2]);
    let options = EncodeOptions::from_flags(flags);
    let mut indices = [0u8; MAX_REQUEST_INDICES];
    let count;

    if flags & RWV_BY_NAME != 0 {
        let raw = &area[HEADER_LEN..len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = String::from_utf8_lossy(&raw[..end]).trim().to_lowercase();
        match tables.find(&ParamKey::Name(name.clone())).and_then(|p| p.index) {
            Some(index) => {
                flags = (flags & !RWV_BY_NAME) | RWV_NAME;
                indices[0] = index;
                count = 1;
            }
            None => {
                debug!(%name, "read by name: no such parameter");
                return Some(ReadOutcome {
                    len,
                    written: 0,
                    changed: false,
                });
            }
        }
    } else {
        let available = len - INDICES_AT;
        count = usize::from(area[COUNT_AT] & 0x0f).min(available).min(MAX_REQUEST_INDICES);
        indices[..count].copy_from_slice(&area[INDICES_AT..INDICES_AT + count]);
    }

    area[0] = read_id;
    area[1] = flags;
    area[2] = page;
    area[COUNT_AT] = 0;
    area[INDICES_AT..INDICES_AT + count].copy_from_slice(&indices[..count]);
    let mut pos = INDICES_AT + count;

    let Some(highest) = tables.highest_index() else {
        return Some(ReadOutcome {
            len: pos,
            written: 0,
            changed: false,
        });
    };

    let none = Parameter::none();
    let mut changed = false;
    let mut written = 0usize;
    for &index in &indices[..count] {
        if index > highest {
            break;
        }
        let parameter = tables.find(&ParamKey::Index(index)).unwrap_or(&none);
        // `used` counts bytes appended for this parameter so far; every
        // append keeps `pos + used` strictly under the budget.
        let mut used = 0usize;
        if options.meta {
            if pos + 1 >= max {
                break;
            }
            area[pos] = parameter.kind.as_u8();
            used = 1;
        }
        if !parameter.is_none() {
            let mut args_at = None;
            if options.full() {
                if pos + used + 2 >= max {
                    break;
                }
                area[pos + used] = parameter.flags.bits();
                args_at = Some(pos + used + 1);
                used += 2;
            }
            let before = changed;
            let args = encode_values(parameter, index, flags, mode, &mut changed, area, pos, &mut used);
            match args_at {
                Some(at) => area[at] = args,
                // Without an args byte an entry is either whole or absent.
                None if args != requested_blocks(parameter, flags) => {
                    changed = before;
                    break;
                }
                None => {}
            }
        }
        pos += used;
        written += 1;
    }
    area[COUNT_AT] = ((written as u8) << 4) | count as u8;
    trace!(read_id, written, count, len = pos, "encoded read reply");
    Some(ReadOutcome {
        len: pos,
        written,
        changed,
    })
}

/// Value blocks `flags` selects for `parameter` when nothing is short of room.
fn requested_blocks(parameter: &Parameter, flags: u8) -> u8 {
    let mut blocks = 0u8;
    if flags & RWV_RAM != 0 && parameter.ram.is_some() && parameter.flags.contains(StorageFlags::RAM) {
        blocks |= RWV_RAM;
    }
    if flags & RWV_EEPROM != 0 && parameter.eeprom.is_some() && parameter.flags.contains(StorageFlags::EEPROM) {
        blocks |= RWV_EEPROM;
    }
    if flags & RWV_DEFAULT != 0 && parameter.kind != ValueKind::String {
        blocks |= RWV_DEFAULT;
    }
    blocks | (flags & (RWV_RANGE | RWV_NAME))
}

/// Append the value blocks `flags` asks for; returns the blocks written.
#[allow(clippy::too_many_arguments)]
fn encode_values(
    parameter: &Parameter,
    index: u8,
    flags: u8,
    mode: ReadMode,
    changed: &mut bool,
    area: &mut [u8],
    pos: usize,
    used: &mut usize,
) -> u8 {
    let max = area.len();
    let is_string = parameter.kind == ValueKind::String;
    let mut args = 0u8;

    let stored = [
        (RWV_RAM, StorageFlags::RAM, parameter.ram.as_ref()),
        (RWV_EEPROM, StorageFlags::EEPROM, parameter.eeprom.as_ref()),
    ];
    for (flag, storage, value) in stored {
        let Some(value) = value else { continue };
        if flags & flag == 0 || !parameter.flags.contains(storage) {
            continue;
        }
        let at = pos + *used;
        if is_string {
            let bytes = string_bytes(parameter, value);
            if at + 1 + bytes.len() >= max {
                continue;
            }
            area[at] = bytes.len() as u8;
            area[at + 1..at + 1 + bytes.len()].copy_from_slice(&bytes);
            *used += 1 + bytes.len();
        } else {
            let size = parameter.size;
            if at + size >= max {
                continue;
            }
            let bytes = fixed_bytes(value, size);
            let slot = &mut area[at..at + size];
            if flag == RWV_RAM && mode == ReadMode::Monitor && !*changed && index != INDEX_TICKER {
                *changed = slot != bytes.as_slice();
            }
            slot.copy_from_slice(&bytes);
            *used += size;
        }
        args |= flag;
    }

    let range_size = if is_string { 1 } else { parameter.size };
    if !is_string && flags & RWV_DEFAULT != 0 {
        let at = pos + *used;
        if at + range_size < max {
            parameter.default.write_bytes(&mut area[at..at + range_size], range_size);
            *used += range_size;
            args |= RWV_DEFAULT;
        }
    }

    if flags & RWV_RANGE != 0 {
        let at = pos + *used;
        let block = 2 + 2 * range_size;
        if at + block < max {
            area[at] = range_size as u8;
            area[at + 1] = parameter.category;
            let min_at = at + 2;
            let max_at = min_at + range_size;
            parameter.min.write_bytes(&mut area[min_at..max_at], range_size);
            parameter.max.write_bytes(&mut area[max_at..max_at + range_size], range_size);
            *used += block;
            args |= RWV_RANGE;
        }
    }

    if flags & RWV_NAME != 0 {
        let at = pos + *used;
        let name = parameter.name.as_deref().unwrap_or_default().as_bytes();
        let name = &name[..name.len().min(MAX_NAME_LEN)];
        if at + 1 + name.len() < max {
            area[at] = name.len() as u8;
            area[at + 1..at + 1 + name.len()].copy_from_slice(name);
            *used += 1 + name.len();
            args |= RWV_NAME;
        }
    }
    args
}

/// Apply the write request in `area[..len]` to the registry and shrink it to
/// its reply: the header and index list, with the count replaced by the
/// number of parameters consumed.
///
/// Values for read-only parameters are parsed and dropped so the following
/// values stay aligned. Numeric values are clamped to the parameter's range.
pub fn apply_write_request(registry: &ParameterRegistry, area: &mut [u8], len: usize) -> Option<WriteOutcome> {
    if len < 5 || len > area.len() {
        return None;
    }
    registry.with_tables(|tables| apply_write(tables, area, len))
}

fn apply_write(tables: &mut Tables, area: &mut [u8], len: usize) -> Option<WriteOutcome> {
    let flags = area[1];
    let listed = usize::from(area[COUNT_AT] & 0x0f).min(len - INDICES_AT);
    let count = listed.min(MAX_REQUEST_INDICES);
    let mut pos = INDICES_AT + listed;
    let mut remaining = len - pos;
    let highest = tables.highest_index();

    let mut written = 0u8;
    for k in 0..count {
        let index = area[INDICES_AT + k];
        if highest.map_or(true, |highest| index > highest) {
            break;
        }
        let Some(parameter) = tables.find_mut(&ParamKey::Index(index)) else {
            continue;
        };
        if parameter.size == 0 || parameter.is_none() {
            continue;
        }
        let value = if parameter.kind == ValueKind::String {
            if remaining == 0 {
                written += 1;
                continue;
            }
            let declared = usize::from(area[pos]);
            pos += 1;
            remaining -= 1;
            let consumed = declared.min(remaining);
            let size = consumed.min(parameter.max_string_len());
            let value = TypedValue::from_bytes(ValueKind::String, &area[pos..pos + size]);
            pos += consumed;
            remaining -= consumed;
            value
        } else {
            let size = parameter.size;
            let mut value = if remaining >= size {
                let value = TypedValue::from_bytes(parameter.kind, &area[pos..pos + size]);
                pos += size;
                remaining -= size;
                value
            } else {
                TypedValue::from_f64(parameter.kind, parameter.default.as_f64()).with_size(size)
            };
            value.check_in_range(&parameter.min, &parameter.max);
            value
        };
        if !parameter.is_read_only() {
            if flags & RWV_EEPROM != 0 && parameter.flags.contains(StorageFlags::EEPROM) {
                parameter.eeprom = Some(value.clone());
                parameter.has_changed = true;
            }
            if flags & RWV_RAM != 0 {
                parameter.ram = Some(value);
                parameter.has_changed = true;
            }
        } else {
            debug!(index, "dropped write to read-only parameter");
        }
        written += 1;
    }
    area[COUNT_AT] = written;
    Some(WriteOutcome {
        len: INDICES_AT + count,
        written: usize::from(written),
    })
}

/// Rebuild parameters from a read reply into `registry`.
///
/// Entries are matched by name first, then by index, and created when
/// missing. `names` supplies names for replies that carry none. When
/// `offsets` is given, the position of each entry's first value is recorded.
/// Returns the number of entries processed.
pub fn decode_read_reply(
    registry: &ParameterRegistry,
    data: &[u8],
    names: Option<&HashMap<u8, String>>,
    offsets: Option<&mut Vec<ValueOffset>>,
) -> Result<usize> {
    registry.with_tables(|tables| decode_read(tables, data, names, offsets))
}

#[derive(Default)]
struct DecodedEntry {
    kind: ValueKind,
    size: usize,
    flags: Option<StorageFlags>,
    ram: Option<TypedValue>,
    eeprom: Option<TypedValue>,
    default: Option<TypedValue>,
    range: Option<(u8, TypedValue, TypedValue)>,
    name: Option<String>,
}

fn decode_read(
    tables: &mut Tables,
    data: &[u8],
    names: Option<&HashMap<u8, String>>,
    mut offsets: Option<&mut Vec<ValueOffset>>,
) -> Result<usize> {
    let n = data.len();
    if n <= INDICES_AT + 1 {
        return Ok(0);
    }
    let flags = data[1];
    let options = EncodeOptions::from_flags(flags);
    let count = usize::from(data[COUNT_AT] & 0x0f);
    let done = usize::from(data[COUNT_AT] >> 4);
    let mut idx = INDICES_AT + count;
    let mut processed = 0usize;

    while processed < done && idx < n {
        let Some(&index) = data.get(INDICES_AT + processed) else {
            break;
        };
        let mut entry = DecodedEntry::default();
        let mut value_at = None;

        if options.meta {
            entry.kind = ValueKind::from_u8(data[idx]).unwrap_or_default();
            idx += 1;
            entry.size = entry.kind.data_size();
        } else {
            let Some(known) = tables.find(&ParamKey::Index(index)) else {
                return Ok(processed);
            };
            entry.kind = known.kind;
            entry.size = known.size;
        }

        if entry.kind != ValueKind::None {
            if entry.size == 0 {
                return Ok(processed);
            }
            let args = if options.full() {
                if idx + 2 > n {
                    return Ok(processed);
                }
                entry.flags = Some(StorageFlags::from_bits(data[idx]));
                let args = data[idx + 1];
                idx += 2;
                value_at = Some(idx);
                args
            } else {
                if options.kind_only {
                    value_at = Some(idx);
                }
                RWV_RAM
            };
            let is_string = entry.kind == ValueKind::String;
            for (flag, slot) in [(RWV_RAM, &mut entry.ram), (RWV_EEPROM, &mut entry.eeprom)] {
                if args & flag == 0 {
                    continue;
                }
                let mut size = entry.size;
                if is_string && idx < n {
                    size = usize::from(data[idx]);
                    idx += 1;
                }
                if idx + size > n {
                    return Ok(processed);
                }
                *slot = Some(TypedValue::from_bytes(entry.kind, &data[idx..idx + size]));
                idx += size;
            }
            if !is_string && args & RWV_DEFAULT != 0 {
                if idx + entry.size > n {
                    return Ok(processed);
                }
                entry.default = Some(TypedValue::from_bytes(entry.kind, &data[idx..idx + entry.size]));
                idx += entry.size;
            }
            if args & RWV_RANGE != 0 {
                if idx + 2 > n {
                    return Ok(processed);
                }
                let size = usize::from(data[idx]);
                let category = data[idx + 1];
                if idx + 2 + 2 * size > n {
                    return Ok(processed);
                }
                let range_kind = if is_string { ValueKind::Byte } else { entry.kind };
                let min_at = idx + 2;
                let min = TypedValue::from_bytes(range_kind, &data[min_at..min_at + size]);
                let max = TypedValue::from_bytes(range_kind, &data[min_at + size..min_at + 2 * size]);
                entry.range = Some((category, min, max));
                idx = min_at + 2 * size;
            }
            if args & RWV_NAME != 0 && idx < n {
                let len = usize::from(data[idx]);
                idx += 1;
                let raw = &data[idx..(idx + len).min(n)];
                idx += raw.len();
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let name = String::from_utf8_lossy(&raw[..end]).trim().to_lowercase();
                if (2..=MAX_NAME_LEN).contains(&name.chars().count()) {
                    entry.name = Some(name);
                }
            }
        }

        if let (Some(offsets), Some(offset)) = (offsets.as_mut(), value_at) {
            if offset < idx {
                offsets.push(ValueOffset {
                    index,
                    kind: entry.kind,
                    size: entry.size,
                    offset,
                });
            }
        }
        if entry.name.is_none() {
            entry.name = names.and_then(|names| names.get(&index).cloned());
            if entry.name.is_none() && names.is_some() {
                debug!(index, "no name known for parameter");
            }
        }
        if entry.kind != ValueKind::None {
            store_entry(tables, index, entry)?;
        }
        processed += 1;
    }
    Ok(processed)
}

fn store_entry(tables: &mut Tables, index: u8, entry: DecodedEntry) -> Result<()> {
    let existing = entry
        .name
        .as_ref()
        .and_then(|name| tables.find(&ParamKey::Name(name.clone())))
        .or_else(|| tables.find(&ParamKey::Index(index)))
        .cloned();
    let is_new = existing.is_none();
    let mut parameter = existing.unwrap_or_else(|| {
        let mut parameter = Parameter::new(Some(index), entry.kind);
        parameter.size = entry.size;
        parameter
    });
    parameter.index = Some(index);
    parameter.kind = entry.kind;
    if entry.name.is_some() {
        parameter.name = entry.name;
    }
    let mut eeprom = entry.eeprom;
    if let Some(flags) = entry.flags {
        parameter.flags = flags;
        if !flags.contains(StorageFlags::EEPROM) {
            eeprom = None;
        }
    }
    let slots = [
        (&mut parameter.ram, entry.ram),
        (&mut parameter.eeprom, eeprom),
    ];
    let mut changed = is_new;
    for (slot, value) in slots {
        if let Some(value) = value {
            changed |= slot.as_ref() != Some(&value);
            *slot = Some(value);
        }
    }
    if let Some(default) = entry.default {
        changed |= parameter.default != default;
        parameter.default = default;
    }
    if let Some((category, min, max)) = entry.range {
        changed |= parameter.min != min || parameter.max != max;
        parameter.category = category;
        parameter.update_range(Some((min, max)));
    }
    if changed {
        parameter.has_changed = true;
    }
    parameter.requires_refresh = false;
    tables.put(parameter)
}

/// Re-read numeric values from a reply using offsets captured by
/// [`decode_read_reply`]. `None` if any offset falls outside `data`.
pub fn values_at_offsets(data: &[u8], offsets: &[ValueOffset]) -> Option<Vec<f64>> {
    offsets
        .iter()
        .map(|at| {
            data.get(at.offset..at.offset + at.size)
                .map(|bytes| TypedValue::from_bytes(at.kind, bytes).as_f64())
        })
        .collect()
}
