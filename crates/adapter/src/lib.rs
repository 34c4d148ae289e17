pub mod capability;
mod config;
mod connection;
mod error;
mod ops;
mod registry;
mod value;

pub use capability::{Capability, CdcMechanism, IdentifierCase, NullOrdering};
pub use config::{ConnectionConfig, Decrypter, InstanceConfig, NoopDecrypter, PoolSettings};
pub use connection::{ConnState, Connection, DatabaseAdapter, InstanceConnection};
pub use error::{Error, Result};
pub use ops::{
    ChangeBatch, ChangeStream, CommandEnvelope, DataOps, InstanceOps, Lifecycle, MetadataOps,
    ReplicationOps, SchemaOps, StreamPage, StreamParams,
};
pub use registry::{lookup, register, registered_types};
pub use value::{normalize_uuid_bytes, sanitize_binary, sanitize_for_bind, Row};
