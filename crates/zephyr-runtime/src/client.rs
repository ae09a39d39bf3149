//! `Client`/`ServiceClient`: lets one Service (or any in-process caller)
//! invoke another Service by logical name.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use zephyr_kernel::error::{BodyError, TransportError};
use zephyr_kernel::transport::{BodyStream, Handler, ResponseSink, RpcRequest, Transport};

/// A thin capability holding a [`Transport`]. [`Client::service`] scopes it
/// to one named Service.
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn service(&self, name: impl Into<String>) -> ServiceClient {
        ServiceClient {
            transport: self.transport.clone(),
            name: name.into(),
        }
    }
}

/// A [`Client`] bound to one Service name.
///
/// Also usable as a sub-handler: `ServiceClient` implements [`Handler`]
/// itself (see below), forwarding a dispatched request to this client's
/// Service and piping its response back onto the caller's sink. That makes
/// a `ServiceClient` mountable wherever a `Gateway` or any other
/// proxy-pattern router expects a local handler, the same way
/// `http_adapter` bridges the other direction.
pub struct ServiceClient {
    transport: Arc<dyn Transport>,
    name: String,
}

impl ServiceClient {
    /// Run one full dispatch and return the response triple.
    pub async fn do_request(
        &self,
        request: RpcRequest,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        self.transport.dispatch(&self.name, request).await
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        self.do_request(empty_request(Method::GET, path)).await
    }

    pub async fn head(&self, path: &str) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        self.do_request(empty_request(Method::HEAD, path)).await
    }

    pub async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: BodyStream,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = http::HeaderValue::from_str(content_type) {
            headers.insert(http::header::CONTENT_TYPE, value);
        }
        self.do_request(RpcRequest {
            method: Method::POST,
            uri: path.parse().unwrap_or_else(|_| "/".parse().unwrap()),
            proto: "HTTP/1.1".to_string(),
            proto_major: 1,
            proto_minor: 1,
            headers,
            content_length: -1,
            transfer_encoding: Vec::new(),
            host: String::new(),
            trailers: HeaderMap::new(),
            request_uri: path.to_string(),
            params: HashMap::new(),
            remote_addr: String::new(),
            tls: None,
            body,
        })
        .await
    }

    pub async fn post_form(
        &self,
        path: &str,
        form: &HashMap<String, String>,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        let encoded: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();
        let body: BodyStream =
            Box::pin(stream::once(
                async move { Ok::<Bytes, BodyError>(Bytes::from(encoded)) },
            ));
        self.post(path, "application/x-www-form-urlencoded", body).await
    }
}

fn empty_request(method: Method, path: &str) -> RpcRequest {
    RpcRequest {
        method,
        uri: path.parse().unwrap_or_else(|_| "/".parse().unwrap()),
        proto: "HTTP/1.1".to_string(),
        proto_major: 1,
        proto_minor: 1,
        headers: HeaderMap::new(),
        content_length: 0,
        transfer_encoding: Vec::new(),
        host: String::new(),
        trailers: HeaderMap::new(),
        request_uri: path.to_string(),
        params: HashMap::new(),
        remote_addr: String::new(),
        tls: None,
        body: Box::pin(stream::empty()),
    }
}

/// Lets a `ServiceClient` stand in as a local handler: forwards the request
/// to this client's Service and relays the response back onto `sink`
/// chunk-for-chunk, so a proxying caller doesn't need to buffer the body.
#[async_trait]
impl Handler for ServiceClient {
    async fn call(&self, request: RpcRequest, mut sink: Box<dyn ResponseSink>) {
        let (status, headers, mut body) = match self.do_request(request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = sink.send_header(StatusCode::BAD_GATEWAY, HeaderMap::new()).await;
                let _ = sink.fail(err.to_string()).await;
                return;
            }
        };

        if let Err(err) = sink.send_header(status, headers).await {
            tracing::warn!(error = %err, "failed to forward response header from sub-dispatch");
            return;
        }

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(err) = sink.send_chunk(bytes).await {
                        tracing::warn!(error = %err, "failed to forward response chunk from sub-dispatch");
                        return;
                    }
                }
                Err(err) => {
                    let _ = sink.fail(err.to_string()).await;
                    return;
                }
            }
        }

        let _ = sink.finish().await;
    }
}
