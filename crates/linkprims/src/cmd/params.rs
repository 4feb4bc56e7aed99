use linkprims_param::ParamKey;

use crate::cmd::ParamsArgs;
use crate::device::DeviceArgs;
use crate::exit::{CliError, CliResult, SUCCESS};
use crate::output::{print_parameters, OutputFormat};

pub fn run(args: ParamsArgs, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = device.registry()?;
    let parameters = if args.keys.is_empty() {
        registry.entries()
    } else {
        args.keys
            .iter()
            .map(|key| {
                registry
                    .find(ParamKey::parse(key))
                    .ok_or_else(|| CliError::usage(format!("no parameter {key:?}")))
            })
            .collect::<CliResult<Vec<_>>>()?
    };

    // Raw output is a table file that `--table` loads back.
    let defs: Vec<_> = parameters.iter().map(|parameter| parameter.to_def()).collect();
    let raw = serde_json::to_vec_pretty(&defs).unwrap_or_default();
    print_parameters(&parameters, "table", &raw, format);
    Ok(SUCCESS)
}
