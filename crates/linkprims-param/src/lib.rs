//! Device parameter tables and the packed read/write variable codec.
//!
//! A device exposes its state as a table of typed [`Parameter`]s addressed
//! by index or name. Peers read and write them with compact binary requests
//! whose replies are built in place over the request buffer.
//!
//! # Modules
//!
//! - [`kind`] and [`value`]: the scalar kinds and the tagged [`TypedValue`]
//! - [`parameter`]: one table entry, its storage flags and field ids
//! - [`registry`]: the shared table, reachable by index and by name
//! - [`system`]: the system page every device carries
//! - [`codec`]: read reply encoding and decoding, write application

pub mod codec;
pub mod error;
pub mod kind;
pub mod parameter;
pub mod registry;
pub mod system;
pub mod value;

pub use codec::{
    apply_write_request, decode_read_reply, encode_read_reply, EncodeOptions, ReadMode, ReadOutcome,
    ValueOffset, WriteOutcome,
};
pub use error::{ParamError, Result};
pub use kind::ValueKind;
pub use parameter::{FieldId, FieldValue, Parameter, ParameterDef, StorageFlags};
pub use registry::{ParamKey, ParameterRegistry};
pub use value::{Repr, TypedValue};
