use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use linkprims_param::codec::{RWV_DEFAULT, RWV_EEPROM, RWV_RAM, RWV_RANGE};
use linkprims_param::FieldId;

use crate::device::DeviceArgs;
use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod params;
pub mod poll;
pub mod read;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the device's parameter table.
    Params(ParamsArgs),
    /// Read parameters through a read-variable request.
    Read(ReadArgs),
    /// Write parameters, then read them back.
    Write(WriteArgs),
    /// Poll parameters with an isochronous read task.
    Poll(PollArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Params(args) => params::run(args, device, format),
        Command::Read(args) => read::run(args, device, format),
        Command::Write(args) => write::run(args, device, format),
        Command::Poll(args) => poll::run(args, device, format),
        Command::Version(args) => version::run(args),
    }
}

/// Which stored value a read asks for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReadField {
    #[default]
    Ram,
    Rom,
    Default,
    Range,
}

impl ReadField {
    pub fn flag(self) -> u8 {
        match self {
            ReadField::Ram => RWV_RAM,
            ReadField::Rom => RWV_EEPROM,
            ReadField::Default => RWV_DEFAULT,
            ReadField::Range => RWV_RANGE,
        }
    }

    /// Parameter fields a reply of this kind fills in.
    pub fn fields(self) -> &'static [FieldId] {
        match self {
            ReadField::Ram => &[FieldId::Ram],
            ReadField::Rom => &[FieldId::Rom],
            ReadField::Default => &[FieldId::Default],
            ReadField::Range => &[FieldId::Min, FieldId::Max],
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct ParamsArgs {
    /// Only list these parameters (index or name).
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Parameters to read (index or name), at most eight.
    #[arg(required = true)]
    pub keys: Vec<String>,
    /// Stored value to read.
    #[arg(long, value_enum, default_value = "ram")]
    pub field: ReadField,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Assignments of the form KEY=VALUE, at most eight.
    #[arg(required = true, value_name = "KEY=VALUE")]
    pub assignments: Vec<String>,
    /// Write the RAM value (the default when neither target is given).
    #[arg(long)]
    pub ram: bool,
    /// Write the stored EEPROM value.
    #[arg(long)]
    pub rom: bool,
    /// Maximum time to wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Parameters to poll (index or name), at most eight.
    #[arg(required = true)]
    pub keys: Vec<String>,
    /// Stored value to poll.
    #[arg(long, value_enum, default_value = "ram")]
    pub field: ReadField,
    /// Time between polls (e.g. 100ms, 1s).
    #[arg(long, default_value = "500ms")]
    pub interval: String,
    /// Only report replies whose values changed.
    #[arg(long)]
    pub monitor: bool,
    /// Exit after receiving N replies.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let trimmed = input.trim();
    let invalid = || CliError::usage(format!("invalid duration {input:?}; expected e.g. 500ms or 5s"));
    let (digits, scale) = if let Some(ms) = trimmed.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(s) = trimmed.strip_suffix('s') {
        (s, 1000)
    } else {
        (trimmed, 1)
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }
    value
        .checked_mul(scale)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

pub fn check_key_count(keys: usize) -> CliResult<()> {
    let max = linkprims_param::codec::MAX_REQUEST_INDICES;
    if keys > max {
        return Err(CliError::usage(format!("at most {max} parameters per request, got {keys}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms").expect("ms should parse"), Duration::from_millis(500));
        assert_eq!(parse_duration("5s").expect("s should parse"), Duration::from_secs(5));
        assert_eq!(parse_duration("250").expect("bare millis should parse"), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("0ms").is_err());
    }

    #[test]
    fn read_fields_select_wire_flags() {
        assert_eq!(ReadField::default().flag(), RWV_RAM);
        assert_eq!(ReadField::Range.fields(), &[FieldId::Min, FieldId::Max]);
    }

    #[test]
    fn too_many_keys_is_usage() {
        assert!(check_key_count(8).is_ok());
        assert_eq!(check_key_count(9).map_err(|err| err.code).err(), Some(crate::exit::USAGE));
    }
}
