//! Wire frames: the self-describing msgpack payloads actually published to
//! the bus.
//!
//! Every frame is encoded with [`encode`], which uses `rmp_serde`'s *named*
//! (map) mode rather than its default positional-array mode. Map mode is
//! what makes the wire format schema-less across versions: a field added to
//! a newer binary is simply absent from an older decoder's map lookup
//! instead of shifting every subsequent field's position.

use crate::error::WireError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Encode `value` as a self-describing msgpack map.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a self-describing msgpack map back into `T`.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// TLS metadata attached to a dispatched request, passed through from
/// whatever terminated the external TLS connection. Peer certificates are
/// intentionally not carried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TlsInfoFrame {
    pub version: String,
    pub handshake_complete: bool,
    pub did_resume: bool,
    pub cipher_suite: String,
    pub negotiated_protocol: String,
    pub server_name: String,
    pub signed_certificate_timestamps: Vec<Vec<u8>>,
    #[serde(with = "serde_bytes")]
    pub ocsp_response: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub tls_unique: Vec<u8>,
}

/// Wire form of a [`crate::descriptor::RouteDescriptor`]: one HTTP verb and
/// one path pattern. A service that wants one path to answer several
/// methods registers one `RouteDescriptorFrame` per method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDescriptorFrame {
    pub method: String,
    pub pattern: String,
}

/// Wire form of a [`crate::descriptor::ServiceDescriptor`].
///
/// Fields that are local-only to a process (the handler closure, and the
/// indexer's own `last_seen_at`/`unreachable_at`/`unreachable_count`
/// bookkeeping) are never part of this frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptorFrame {
    pub name: String,
    /// Empty means "every gateway that sees this announcement should index
    /// it"; non-empty scopes the announcement to named gateways only.
    pub gateway_names: Vec<String>,
    pub routes: Vec<RouteDescriptorFrame>,
}

/// `<ns>.gateway.announce` payload: a Gateway announcing its own presence,
/// together with a snapshot of the services it currently has indexed.
///
/// Carrying the snapshot (rather than just the gateway's name) is what lets
/// a `Service` self-heal: on receipt, a service checks whether its own name
/// is present among `known_services` and re-announces itself if not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayAnnouncementFrame {
    pub gateway_name: String,
    pub known_services: Vec<ServiceDescriptorFrame>,
    pub timestamp: DateTime<Utc>,
}

/// `<ns>.service.announce` payload: a Service announcing (or re-announcing)
/// its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAnnouncementFrame {
    pub service: ServiceDescriptorFrame,
    pub timestamp: DateTime<Utc>,
}

/// Request header published to a service's dispatch subject.
///
/// `response_subject` and `response_body_subject` are the client-allocated
/// reply subjects (`RES`/`RESB` in the spec's dispatch sequence); the
/// service's own body-chunk subject (`REQB`) is handed back separately via
/// [`RequestAckFrame`] rather than carried here, since the client controls
/// the former pair but the service controls the latter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestHeaderFrame {
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub proto_major: u16,
    pub proto_minor: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub content_length: i64,
    pub transfer_encoding: Vec<String>,
    pub host: String,
    pub trailers: HashMap<String, Vec<String>>,
    pub request_uri: String,
    pub response_subject: String,
    pub response_body_subject: String,
    pub remote_addr: String,
    pub tls: Option<TlsInfoFrame>,
}

/// Published by the service, in reply to a `RequestHeaderFrame`, to hand the
/// client the subject it should stream the request body to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestAckFrame {
    pub body_subject: String,
}

/// Response header published to the client's `response_subject`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseHeaderFrame {
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
}

/// One chunk of a streamed body (request or response), published to a
/// `*B` body subject.
///
/// `index` is contiguous from `0` within one stream (per the spec's
/// resolved open question: contiguous rather than merely monotonic).
/// `done` marks the final chunk; a final chunk may still carry `data`.
/// `error` is set only on the terminal chunk and only when the producer
/// failed partway through — it is not a transport-level concept, it is how
/// a recovered handler panic or an upstream read failure surfaces to the
/// reader of the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BodyChunkFrame {
    pub index: u64,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub done: bool,
    pub error: Option<String>,
}
