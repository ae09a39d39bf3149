//! Error taxonomy for the Zephyr kernel contract.
//!
//! Each enum below covers exactly one of the failure kinds described by the
//! specification's error-handling design: configuration faults, wire-codec
//! faults, transport faults, and pattern-compilation faults. Handler faults
//! (recovered panics) are not modeled as a `Result` variant at all — they
//! travel as the `error` field of a terminal `BodyChunk` (see
//! [`crate::wire::BodyChunkFrame`]) and are surfaced to callers as part of
//! the response body, per the spec's kind-5 handling.

use thiserror::Error;

/// Lifecycle / configuration faults — detected without touching the bus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A role (`Gateway`/`Service`) was started without a `Transport`.
    #[error("{0} has no transport configured")]
    MissingTransport(&'static str),

    /// `Start` was called on a role that is already running.
    #[error("{0} is already started")]
    AlreadyStarted(&'static str),
}

/// Wire encoding/decoding faults.
///
/// The spec treats a malformed incoming frame as a programming bug: the
/// peer violated the protocol, so the subscription callback that detects it
/// escalates rather than returning a `Result` the caller could swallow.
/// This type exists so that escalation point can still produce a readable
/// panic message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireError {
    #[error("failed to encode wire frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode wire frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Faults raised by a [`crate::pattern::PatternCompiler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    #[error("invalid route pattern '{0}': {1}")]
    Invalid(String, String),
}

/// Faults from the pub/sub bus itself: publish/subscribe failures,
/// disconnects, and receive timeouts.
///
/// Propagated to the caller of `Dispatch`. The `Gateway` turns this into a
/// request-level failure (the external HTTP framework is expected to
/// produce a 5xx response); the `Service`'s handler side turns it into a
/// handler error recorded on the response stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("failed to publish to subject '{subject}': {source}")]
    Publish {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to subscribe to subject '{subject}': {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("timed out waiting for a message on subject '{subject}'")]
    Timeout { subject: String },

    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("no dispatch binding is active for service '{0}'")]
    NotBound(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A body-stream item error: either the handler panicked after emitting some
/// bytes, or the transport itself failed mid-stream (timeout, disconnect).
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum BodyError {
    /// The server-side handler panicked; the string is the recovered
    /// panic payload, stringified.
    #[error("handler error: {0}")]
    Handler(String),

    /// The underlying transport failed while streaming chunks.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stringify a panic payload recovered from an awaited `JoinHandle`.
///
/// Mirrors Go's `recover()` returning whatever value was passed to `panic`:
/// a `&'static str` or `String` payload (by far the common case, covering
/// both `panic!("literal")` and `panic!("{}", formatted)`) is used verbatim;
/// anything else falls back to a fixed message since the payload's type is
/// otherwise unknown without a bespoke downcast per case.
pub fn panic_payload_to_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&str>() {
            Ok(message) => message.to_string(),
            Err(_) => "handler panicked with a non-string payload".to_string(),
        },
    }
}
