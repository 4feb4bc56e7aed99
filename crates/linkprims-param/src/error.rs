/// Errors raised by the parameter registry and value conversions.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    /// A value kind name or number was not recognised.
    #[error("unknown value kind: {0}")]
    UnknownKind(String),

    /// A field name or id was not recognised.
    #[error("unknown parameter field: {0}")]
    UnknownField(String),

    /// A text value could not be converted for the named kind or field.
    #[error("invalid value {value:?} for {target}")]
    InvalidValue { target: String, value: String },

    /// A parameter name is empty or longer than the wire allows.
    #[error("invalid parameter name {0:?}")]
    InvalidName(String),

    /// A parameter table definition could not be parsed.
    #[error("parameter table error: {0}")]
    Table(#[from] serde_json::Error),

    /// A parameter table file could not be read.
    #[error("parameter table I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ParamError>;
