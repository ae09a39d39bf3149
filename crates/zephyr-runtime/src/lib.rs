//! The `Gateway`/`Service`/`Client` roles that give the `zephyr-kernel`
//! `Transport` contract its meaning, plus the HTTP adapter that drives a
//! `Gateway` from any `http`-compatible server framework.

pub mod client;
pub mod error;
pub mod gateway;
pub mod http_adapter;
pub mod indexer;
pub mod service;

pub use client::{Client, ServiceClient};
pub use error::RuntimeError;
pub use gateway::Gateway;
pub use indexer::ServiceIndexer;
pub use service::Service;
