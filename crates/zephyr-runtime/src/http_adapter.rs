//! Bridges the generic [`http`]/[`http_body`] crates to the kernel's
//! [`RpcRequest`]/[`BodyStream`] types.
//!
//! The HTTP server itself (binding a listener, terminating TLS, deciding
//! when to call `Gateway::serve_http`) is an external collaborator — this
//! module only does the conversion in both directions so that any
//! `http`-compatible server framework can drive a [`crate::gateway::Gateway`]
//! without Zephyr depending on that framework.

use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, Request, Response, StatusCode, Version};
use http_body::Frame;
use http_body_util::{BodyDataStream, StreamBody};
use zephyr_kernel::error::BodyError;
use zephyr_kernel::transport::{BodyStream, RpcRequest, TlsInfo};

/// `"HTTP/1.1"`-style string plus its major/minor components, matching
/// `net/http`'s `Request.Proto`/`ProtoMajor`/`ProtoMinor` trio.
fn proto_from_version(version: Version) -> (String, u16, u16) {
    match version {
        Version::HTTP_09 => ("HTTP/0.9".to_string(), 0, 9),
        Version::HTTP_10 => ("HTTP/1.0".to_string(), 1, 0),
        Version::HTTP_11 => ("HTTP/1.1".to_string(), 1, 1),
        Version::HTTP_2 => ("HTTP/2.0".to_string(), 2, 0),
        Version::HTTP_3 => ("HTTP/3.0".to_string(), 3, 0),
        other => (format!("{other:?}"), 1, 1),
    }
}

/// `-1` means unknown, matching `net/http`'s convention for a request whose
/// length isn't declared via `Content-Length`.
fn content_length_from_headers(headers: &HeaderMap) -> i64 {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(-1)
}

fn transfer_encoding_from_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn host_from_headers(headers: &HeaderMap, uri: &http::Uri) -> String {
    headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default()
}

/// Trailer field names declared via the `Trailer` header, captured at
/// dispatch time rather than filled in once the body finishes streaming —
/// the values themselves aren't known yet, so every entry maps to an empty
/// value list.
fn trailers_from_headers(headers: &HeaderMap) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    for value in headers.get_all(http::header::TRAILER).iter() {
        let Ok(value) = value.to_str() else { continue };
        for name in value.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Ok(name) = http::HeaderName::from_bytes(name.as_bytes()) {
                trailers.entry(name).or_insert(http::HeaderValue::from_static(""));
            }
        }
    }
    trailers
}

/// Turn any `http_body::Body` into the kernel's streamed-body type.
pub fn body_stream<B>(body: B) -> BodyStream
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let stream = BodyDataStream::new(body)
        .map(|chunk| chunk.map_err(|err| BodyError::Transport(err.to_string())));
    Box::pin(stream)
}

/// Assemble an [`RpcRequest`] from an inbound `http::Request`.
///
/// `remote_addr` and `tls` come from whatever terminated the connection
/// (the server framework, or its TLS layer) since neither is observable
/// from an `http::Request` alone.
pub fn rpc_request<B>(request: Request<B>, remote_addr: String, tls: Option<TlsInfo>) -> RpcRequest
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let (parts, body) = request.into_parts();
    let (proto, proto_major, proto_minor) = proto_from_version(parts.version);
    let content_length = content_length_from_headers(&parts.headers);
    let transfer_encoding = transfer_encoding_from_headers(&parts.headers);
    let host = host_from_headers(&parts.headers, &parts.uri);
    let trailers = trailers_from_headers(&parts.headers);
    let request_uri = parts
        .uri
        .path_and_query()
        .map(|path_and_query| path_and_query.to_string())
        .unwrap_or_else(|| parts.uri.to_string());

    RpcRequest {
        method: parts.method,
        uri: parts.uri,
        proto,
        proto_major,
        proto_minor,
        headers: parts.headers,
        content_length,
        transfer_encoding,
        host,
        trailers,
        request_uri,
        params: std::collections::HashMap::new(),
        remote_addr,
        tls,
        body: body_stream(body),
    }
}

/// A body type suitable for returning from an `http`-framework handler,
/// wrapping a kernel [`BodyStream`].
pub type ResponseBody =
    StreamBody<futures::stream::Map<BodyStream, fn(Result<Bytes, BodyError>) -> Result<Frame<Bytes>, BodyError>>>;

/// Assemble an `http::Response` from a dispatched status/headers/body triple.
pub fn http_response(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Response<ResponseBody> {
    let stream: futures::stream::Map<BodyStream, fn(Result<Bytes, BodyError>) -> Result<Frame<Bytes>, BodyError>> =
        body.map(|chunk| chunk.map(Frame::data));

    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        *response_headers = headers;
    }
    builder
        .body(StreamBody::new(stream))
        .expect("status and headers were already validated by the caller")
}

/// An empty body stream, for responses the Gateway manufactures itself
/// (503 not-started, 404 no-match) rather than ones dispatched through a
/// Service.
pub fn empty_body() -> BodyStream {
    Box::pin(futures::stream::empty())
}
