//! # courier-shared
//!
//! Types shared by every Courier crate: identifiers, the persisted
//! records, the websocket wire protocol and protocol-level constants.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::*;
pub use types::*;
