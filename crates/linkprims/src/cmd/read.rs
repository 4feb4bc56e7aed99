use linkprims_param::codec::{read_by_name_request, read_request, RWV_BY_NAME, RWV_NAME};
use linkprims_param::{decode_read_reply, ParamKey, Parameter, ParameterRegistry};
use linkprims_wire::protocol::{CMD_READ_VAR, IDENT_READ};
use linkprims_wire::Message;
use tracing::warn;

use crate::cmd::{check_key_count, parse_duration, ReadArgs};
use crate::device::{Device, DeviceArgs};
use crate::exit::{param_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_parameters, OutputFormat};

pub fn run(args: ReadArgs, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    check_key_count(args.keys.len())?;
    let timeout = parse_duration(&args.timeout)?;
    let device = Device::open(device)?;
    let flags = args.field.flag() | RWV_NAME;

    // A single name goes out as a by-name read and is resolved by the device.
    let request = match args.keys.as_slice() {
        [key] if matches!(ParamKey::parse(key), ParamKey::Name(_)) => {
            read_by_name_request(IDENT_READ, flags, 0, key)
        }
        keys => read_request(IDENT_READ, flags, 0, &device.indices(keys)?),
    };
    let reply = device.request(CMD_READ_VAR, request, timeout)?;
    if reply.data().get(1).is_some_and(|flags| flags & RWV_BY_NAME != 0) {
        return Err(CliError::new(DATA_INVALID, format!("device has no parameter {:?}", args.keys[0])));
    }

    let parameters = decode(&reply, args.keys.len())?;
    print_parameters(&parameters, "device", reply.data(), format);
    Ok(SUCCESS)
}

/// Rebuild the parameters a read reply carries, ordered by index.
pub fn decode(reply: &Message, requested: usize) -> CliResult<Vec<Parameter>> {
    let client = ParameterRegistry::new();
    let decoded = decode_read_reply(&client, reply.data(), None, None)
        .map_err(|err| param_error("failed to decode reply", err))?;
    if decoded == 0 {
        return Err(CliError::new(DATA_INVALID, "reply carried no parameters"));
    }
    if decoded < requested {
        warn!(decoded, requested, "reply truncated to fit the packet");
    }
    Ok(client.entries())
}
