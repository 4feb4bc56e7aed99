use linkprims_param::codec::{read_request, write_request, RWV_EEPROM, RWV_NAME, RWV_RAM};
use linkprims_wire::protocol::{CMD_READ_VAR, CMD_WRITE_VAR, IDENT_READ, IDENT_WRITE};
use tracing::{debug, warn};

use crate::cmd::{check_key_count, parse_duration, read, WriteArgs};
use crate::device::{Device, DeviceArgs};
use crate::exit::{param_error, CliError, CliResult, SUCCESS};
use crate::output::{print_parameters, OutputFormat};

pub fn run(args: WriteArgs, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    check_key_count(args.assignments.len())?;
    let timeout = parse_duration(&args.timeout)?;
    let device = Device::open(device)?;

    let mut values = Vec::with_capacity(args.assignments.len());
    for assignment in &args.assignments {
        let (key, text) = assignment
            .split_once('=')
            .ok_or_else(|| CliError::usage(format!("expected KEY=VALUE, got {assignment:?}")))?;
        let parameter = device.resolve(key)?;
        if parameter.is_read_only() {
            warn!(parameter = key, "parameter is read-only; the device will ignore the write");
        }
        let value = parameter
            .parse_value(text)
            .map_err(|err| param_error(&format!("bad value for {key}"), err))?;
        let index = parameter
            .index
            .ok_or_else(|| CliError::usage(format!("parameter {key:?} has no index")))?;
        values.push((index, value));
    }

    let mut flags = 0;
    if args.ram || !args.rom {
        flags |= RWV_RAM;
    }
    if args.rom {
        flags |= RWV_EEPROM;
    }
    let reply = device.request(CMD_WRITE_VAR, write_request(IDENT_WRITE, flags, 0, &values), timeout)?;
    debug!(written = reply.data().get(3).copied().unwrap_or(0), "write acknowledged");

    let indices: Vec<u8> = values.iter().map(|(index, _)| *index).collect();
    let read_back = read_request(IDENT_READ, RWV_RAM | RWV_EEPROM | RWV_NAME, 0, &indices);
    let reply = device.request(CMD_READ_VAR, read_back, timeout)?;
    let parameters = read::decode(&reply, indices.len())?;
    print_parameters(&parameters, "device", reply.data(), format);
    Ok(SUCCESS)
}
