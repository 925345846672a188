mod accounts;
mod memory;
mod surreal;

pub use accounts::StaticAccounts;
pub use memory::MemorySink;
pub use surreal::SurrealSink;
