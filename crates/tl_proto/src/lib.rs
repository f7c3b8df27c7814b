//! tl_proto - portable formats for the Terminal List vault
//!
//! - `models` - records and the full application state carried by the vault
//! - `share`  - passphrase-sealed single-record envelopes
//! - `bus`    - in-process broadcast bus (one topic per channel name)
//! - `collab` - handshake-gated encrypted replication over the bus

pub mod bus;
pub mod collab;
pub mod error;
pub mod models;
pub mod share;

pub use bus::LocalBus;
pub use collab::{CollabCloser, CollabConfig, CollabHandle, CollabPhase, Replica};
pub use error::ProtoError;
pub use models::{AppState, Collections, Record, RecordKind};
pub use share::ShareEnvelope;
