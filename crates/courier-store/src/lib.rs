//! # courier-store
//!
//! Durable storage for the Courier server. Conversations and the presence
//! snapshot are kept as flat JSON documents on the local filesystem, keyed
//! by identifier and rewritten wholesale on every change.

pub mod documents;

mod error;

pub use documents::DocumentStore;
pub use error::{Result, StoreError};
