use std::fmt;
use std::io;

use linkprims_exchange::ExchangeError;
use linkprims_param::ParamError;
use linkprims_wire::WireError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn param_error(context: &str, err: ParamError) -> CliError {
    match err {
        ParamError::Io(source) => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::PayloadTooLarge { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn exchange_error(context: &str, err: ExchangeError) -> CliError {
    match err {
        ExchangeError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ExchangeError::Dispatch(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        ExchangeError::QueueFull | ExchangeError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        ExchangeError::Wire(err) => wire_error(context, err),
        ExchangeError::Param(err) => param_error(context, err),
        ExchangeError::Spawn { source, .. } => io_error(context, source),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn maps_exchange_errors_to_exit_codes() {
        assert_eq!(exchange_error("read", ExchangeError::Timeout(Duration::from_secs(1))).code, TIMEOUT);
        assert_eq!(exchange_error("read", ExchangeError::QueueFull).code, FAILURE);
        assert_eq!(exchange_error("read", ExchangeError::ReservedNetIf(0)).code, INTERNAL);
        let bad = ParamError::InvalidName(String::new());
        assert_eq!(exchange_error("read", ExchangeError::Param(bad)).code, DATA_INVALID);
    }

    #[test]
    fn missing_table_file_is_a_usage_error() {
        let err = param_error("table", ParamError::Io(io::Error::from(io::ErrorKind::NotFound)));
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("table: "));
    }
}
