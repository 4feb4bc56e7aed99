use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use linkprims_exchange::{Exchange, ExchangeConfig};
use linkprims_param::{ParamKey, Parameter, ParameterRegistry};
use linkprims_wire::protocol::ADDRESS_LOCAL;
use linkprims_wire::{Message, Route};
use tracing::debug;

use crate::exit::{exchange_error, param_error, wire_error, CliError, CliResult};

/// The device the CLI talks to: an in-process registry served by the local
/// mediator.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Parameter table (JSON list of parameter definitions) added to the
    /// system page.
    #[arg(long, value_name = "FILE", global = true, env = "LINKPRIMS_TABLE")]
    pub table: Option<PathBuf>,

    /// Serial number stored on the system page.
    #[arg(long, value_name = "SERIAL", default_value = "0", global = true, env = "LINKPRIMS_SERIAL")]
    pub serial: String,
}

impl DeviceArgs {
    pub fn registry(&self) -> CliResult<ParameterRegistry> {
        let registry = ParameterRegistry::with_system_page(&self.serial)
            .map_err(|err| param_error("failed to build system page", err))?;
        if let Some(path) = &self.table {
            let context = format!("failed to load {}", path.display());
            let table = ParameterRegistry::load_json(path).map_err(|err| param_error(&context, err))?;
            for parameter in table.entries() {
                registry.put(parameter).map_err(|err| param_error(&context, err))?;
            }
            debug!(path = %path.display(), parameters = registry.len(), "parameter table loaded");
        }
        Ok(registry)
    }
}

pub struct Device {
    pub exchange: Exchange,
}

impl Device {
    pub fn open(args: &DeviceArgs) -> CliResult<Self> {
        let registry = Arc::new(args.registry()?);
        let exchange = Exchange::new(ExchangeConfig::default(), registry)
            .map_err(|err| exchange_error("failed to start exchange", err))?;
        Ok(Self { exchange })
    }

    /// Look up a parameter by index or name.
    pub fn resolve(&self, key: &str) -> CliResult<Parameter> {
        self.exchange
            .registry()
            .find(ParamKey::parse(key))
            .ok_or_else(|| CliError::usage(format!("no parameter {key:?}")))
    }

    /// Indices of `keys`, in order.
    pub fn indices(&self, keys: &[String]) -> CliResult<Vec<u8>> {
        keys.iter()
            .map(|key| {
                self.resolve(key)?
                    .index
                    .ok_or_else(|| CliError::usage(format!("parameter {key:?} has no index")))
            })
            .collect()
    }

    /// A command addressed to the local device.
    pub fn message(&self, command: u8, sender_id: u8, data: Vec<u8>) -> CliResult<Message> {
        Message::command(command)
            .route(Route::Address)
            .receiver(ADDRESS_LOCAL)
            .sender_id(sender_id)
            .data(data)
            .build()
            .map_err(|err| wire_error("failed to build message", err))
    }

    pub fn request(&self, command: u8, data: Vec<u8>, timeout: Duration) -> CliResult<Message> {
        let message = self.message(command, 0, data)?;
        self.exchange
            .request(message, timeout)
            .map_err(|err| exchange_error("request failed", err))
    }
}
