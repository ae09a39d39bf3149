//! Framework-level contract shared by every Zephyr role and transport
//! backend: subject naming, wire frames, descriptors, route patterns, and
//! the `Transport` trait itself.
//!
//! Nothing in this crate talks to a real bus — that is `zephyr-nats`'s job
//! (or `zephyr-memory`'s, for tests). This crate only defines what "talking
//! to a bus" means.

pub mod descriptor;
pub mod error;
pub mod namer;
pub mod pattern;
pub mod transport;
pub mod wire;

pub use descriptor::{GatewayDescriptor, RouteDescriptor, ServiceDescriptor};
pub use error::{BodyError, ConfigError, PatternError, TransportError, WireError};
pub use namer::Namer;
pub use pattern::{PatternCompiler, RoutePattern, TemplatePatternCompiler};
pub use transport::{
    BodyStream, Handler, ResponseSink, RpcRequest, TlsInfo, Transport, TransportOptions,
};
