//! The `Transport` contract: the one seam every pub/sub backend implements.
//!
//! A `Transport` knows nothing about HTTP semantics beyond the types it
//! moves (`Method`, `Uri`, `HeaderMap`, `StatusCode`) — it is purely
//! responsible for getting announcements and dispatched requests across the
//! bus. `zephyr-runtime`'s `Gateway`/`Service`/`Client` are the layer that
//! gives those operations meaning.

use crate::error::{BodyError, TransportError};
use crate::wire::TlsInfoFrame;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use http::{HeaderMap, Method, StatusCode, Uri};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// A streamed body: a fallible sequence of byte chunks.
///
/// Produced from the `mpsc` channel fed by a bus subscription, or from
/// whatever upstream body the caller supplied to `Dispatch`.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// TLS metadata passed through from whatever terminated the client's TLS
/// connection before the request reached the gateway. Peer certificates
/// are intentionally not carried across the bus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsInfo {
    pub version: String,
    pub handshake_complete: bool,
    pub did_resume: bool,
    pub cipher_suite: String,
    pub negotiated_protocol: String,
    pub server_name: String,
    pub signed_certificate_timestamps: Vec<Vec<u8>>,
    pub ocsp_response: Vec<u8>,
    pub tls_unique: Vec<u8>,
}

impl From<&TlsInfo> for TlsInfoFrame {
    fn from(info: &TlsInfo) -> Self {
        TlsInfoFrame {
            version: info.version.clone(),
            handshake_complete: info.handshake_complete,
            did_resume: info.did_resume,
            cipher_suite: info.cipher_suite.clone(),
            negotiated_protocol: info.negotiated_protocol.clone(),
            server_name: info.server_name.clone(),
            signed_certificate_timestamps: info.signed_certificate_timestamps.clone(),
            ocsp_response: info.ocsp_response.clone(),
            tls_unique: info.tls_unique.clone(),
        }
    }
}

impl From<&TlsInfoFrame> for TlsInfo {
    fn from(frame: &TlsInfoFrame) -> Self {
        TlsInfo {
            version: frame.version.clone(),
            handshake_complete: frame.handshake_complete,
            did_resume: frame.did_resume,
            cipher_suite: frame.cipher_suite.clone(),
            negotiated_protocol: frame.negotiated_protocol.clone(),
            server_name: frame.server_name.clone(),
            signed_certificate_timestamps: frame.signed_certificate_timestamps.clone(),
            ocsp_response: frame.ocsp_response.clone(),
            tls_unique: frame.tls_unique.clone(),
        }
    }
}

/// A request as delivered to a service handler (or assembled by a client
/// from an outbound call).
pub struct RpcRequest {
    pub method: Method,
    pub uri: Uri,
    /// `"HTTP/1.1"`-style protocol string, kept alongside `proto_major`/
    /// `proto_minor` rather than derived from them, matching the fields an
    /// incoming request actually carries.
    pub proto: String,
    pub proto_major: u16,
    pub proto_minor: u16,
    pub headers: HeaderMap,
    /// `-1` means unknown, matching `net/http`'s convention for a request
    /// whose length isn't declared up front.
    pub content_length: i64,
    pub transfer_encoding: Vec<String>,
    pub host: String,
    /// Trailer field names the sender declared in advance (e.g. via a
    /// `Trailer` header), captured at dispatch time rather than filled in
    /// once the body finishes streaming.
    pub trailers: HeaderMap,
    /// The request-target exactly as it appeared on the request line,
    /// distinct from `uri` once a router has rewritten or resolved it.
    pub request_uri: String,
    /// Path bindings captured by the route pattern that matched this
    /// request, e.g. `{id}` -> `"42"`.
    pub params: HashMap<String, String>,
    pub remote_addr: String,
    pub tls: Option<TlsInfo>,
    pub body: BodyStream,
}

/// The server side of a dispatched request: where a handler writes its
/// response. Exactly one call to `finish` or `fail` must happen per
/// request; neither may be called more than once, and at most one of
/// `send_chunk`'s error path or an explicit `fail` call terminates the
/// stream with an error.
#[async_trait]
pub trait ResponseSink: Send {
    /// Send the response status and headers. Must be the first call made
    /// on this sink.
    async fn send_header(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), TransportError>;

    /// Stream one chunk of the response body.
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// Mark the response complete with no error.
    async fn finish(self: Box<Self>) -> Result<(), TransportError>;

    /// Mark the response complete with a handler-side error. Any bytes
    /// already sent via `send_chunk` are preserved; the error is attached
    /// to the stream's terminal chunk.
    async fn fail(self: Box<Self>, message: String) -> Result<(), TransportError>;
}

/// A service's dispatch handler: invoked once per inbound request bound via
/// [`Transport::bind_dispatch`].
///
/// A handler is allowed to panic. Transport implementations run each call
/// inside its own `tokio::spawn`'d task and `.await` the returned
/// `JoinHandle`; on `JoinError::is_panic()` the payload is downcast and
/// stringified (see [`crate::error::panic_payload_to_message`]) and threaded
/// into the response's terminal error exactly as an explicit `fail` call
/// would. A `ResponseSink`'s `Drop` glue still exists as a last-resort
/// fallback for the case where the task is torn down before that `.await`
/// ever resolves (e.g. the handler is cancelled before it runs at all), but
/// it is not the primary recovery path — it deliberately does not also
/// publish the terminal frame for an ordinary panic, since it always runs
/// before the `JoinHandle` is observed and would otherwise win the race
/// with a generic message instead of the real one.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: RpcRequest, sink: Box<dyn ResponseSink>);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RpcRequest, Box<dyn ResponseSink>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn call(&self, request: RpcRequest, sink: Box<dyn ResponseSink>) {
        (self)(request, sink).await
    }
}

/// Instance-scoped transport configuration.
///
/// Unlike the original implementation's package-level variables, every
/// value here is plumbed through a `Transport` constructor so that a single
/// process can run multiple differently-configured transports side by side
/// (e.g. in-process tests alongside a real bus connection).
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// How long `Dispatch` waits for a response header before failing with
    /// [`TransportError::Timeout`].
    pub dispatch_timeout: Duration,
    /// Maximum number of bytes carried by one `BodyChunkFrame`.
    pub dispatch_body_chunk_size: usize,
    /// Subject namespace prefix; see [`crate::namer::Namer`].
    pub namespace: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(30),
            dispatch_body_chunk_size: 16_384,
            namespace: crate::namer::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// The pub/sub bus contract. Every operation is a thin wrapper over publish
/// or subscribe; the semantics of *what* gets announced or dispatched live
/// in `zephyr-runtime`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a gateway self-announcement, including a snapshot of the
    /// services this gateway currently has indexed (so a Service can tell
    /// whether the Gateway still knows about it).
    async fn announce_gateway(
        &self,
        descriptor: &crate::descriptor::GatewayDescriptor,
    ) -> Result<(), TransportError>;

    /// Publish a service (re-)announcement. `service.gateway_names` scopes
    /// which gateways should index it (empty means "every gateway").
    async fn announce_service(
        &self,
        service: &crate::descriptor::ServiceDescriptor,
    ) -> Result<(), TransportError>;

    /// Subscribe to gateway announcements. Used by a `Service`'s
    /// self-healing reconciliation loop.
    async fn bind_gateway_announce(
        &self,
        on_announce: Box<dyn Fn(crate::descriptor::GatewayDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError>;

    async fn unbind_gateway_announce(&self) -> Result<(), TransportError>;

    /// Subscribe to service announcements. Used by a `Gateway` to populate
    /// its service indexer.
    async fn bind_service_announce(
        &self,
        on_announce: Box<dyn Fn(crate::descriptor::ServiceDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError>;

    async fn unbind_service_announce(&self) -> Result<(), TransportError>;

    /// Dispatch a request to `service_name` and drive `request` through to
    /// completion, returning the response header and a streamed body.
    async fn dispatch(
        &self,
        service_name: &str,
        request: RpcRequest,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError>;

    /// Bind `handler` as the dispatch target for `service_name`, sharing a
    /// queue group with any other process bound to the same name so that
    /// exactly one binder receives each request.
    async fn bind_dispatch(
        &self,
        service_name: &str,
        handler: std::sync::Arc<dyn Handler>,
    ) -> Result<(), TransportError>;

    async fn unbind_dispatch(&self, service_name: &str) -> Result<(), TransportError>;
}
