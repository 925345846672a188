//! Transfer engine and its default collaborators.
//!
//! [`engine::Dispatcher`] is the entry point; [`store`] and [`providers`]
//! hold the stock account store, persistence sinks and storage backends.

pub mod db;
pub mod engine;
pub mod providers;
pub mod store;

pub use engine::Dispatcher;
