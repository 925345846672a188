//! Shared types for hop: the transfer data model, the contracts the engine
//! consumes from its collaborators, and the error taxonomy.

pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod store;

pub use config::EngineConfig;
pub use error::{PersistenceError, ProviderError, TransferError, TransitionError};
