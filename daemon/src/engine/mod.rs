//! The transfer engine: job state, the bounded dispatcher and the
//! per-job download/upload pipeline.

mod dispatcher;
mod job;
mod pipeline;

#[cfg(test)]
mod testing;

pub use dispatcher::Dispatcher;
pub use job::{Phase, TransferJob};
