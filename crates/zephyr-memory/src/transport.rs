//! In-process [`Transport`]: every operation is a direct function call
//! rather than a trip across a real bus. No serialization happens at all —
//! descriptors and requests are handed to subscribers by reference/move.
//!
//! This exists for deterministic tests (see the `zephyr-runtime` test
//! suite) and for single-binary demos where a Gateway and Service or two
//! share a process and a real broker would be pure overhead.

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use zephyr_kernel::descriptor::{GatewayDescriptor, ServiceDescriptor};
use zephyr_kernel::error::{panic_payload_to_message, BodyError, TransportError};
use zephyr_kernel::transport::{BodyStream, Handler, ResponseSink, RpcRequest, Transport};

type GatewayAnnounceHandler = Box<dyn Fn(GatewayDescriptor) + Send + Sync>;
type ServiceAnnounceHandler = Box<dyn Fn(ServiceDescriptor) + Send + Sync>;

/// In-memory [`Transport`]. Cheap to construct and clone (it's an `Arc`
/// wrapper internally via its fields' own `Mutex`es), so the same instance
/// can be shared between a `Gateway` and any number of `Service`s in one
/// process.
#[derive(Default)]
pub struct MemoryTransport {
    gateway_announce_handlers: Mutex<Vec<GatewayAnnounceHandler>>,
    service_announce_handlers: Mutex<Vec<ServiceAnnounceHandler>>,
    dispatch_handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn announce_gateway(&self, descriptor: &GatewayDescriptor) -> Result<(), TransportError> {
        for handler in self.gateway_announce_handlers.lock().unwrap().iter() {
            handler(descriptor.clone());
        }
        Ok(())
    }

    async fn announce_service(&self, service: &ServiceDescriptor) -> Result<(), TransportError> {
        for handler in self.service_announce_handlers.lock().unwrap().iter() {
            handler(service.clone());
        }
        Ok(())
    }

    async fn bind_gateway_announce(
        &self,
        on_announce: Box<dyn Fn(GatewayDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError> {
        self.gateway_announce_handlers.lock().unwrap().push(on_announce);
        Ok(())
    }

    async fn unbind_gateway_announce(&self) -> Result<(), TransportError> {
        self.gateway_announce_handlers.lock().unwrap().clear();
        Ok(())
    }

    async fn bind_service_announce(
        &self,
        on_announce: Box<dyn Fn(ServiceDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError> {
        self.service_announce_handlers.lock().unwrap().push(on_announce);
        Ok(())
    }

    async fn unbind_service_announce(&self) -> Result<(), TransportError> {
        self.service_announce_handlers.lock().unwrap().clear();
        Ok(())
    }

    async fn dispatch(
        &self,
        service_name: &str,
        request: RpcRequest,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        let handler = self
            .dispatch_handlers
            .lock()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| TransportError::NotBound(service_name.to_string()))?;

        let (header_tx, header_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(8);
        let finished = Arc::new(AtomicBool::new(false));
        let fallback_tx = body_tx.clone();
        let fallback_finished = finished.clone();
        let sink: Box<dyn ResponseSink> = Box::new(MemoryResponseSink {
            header_tx: Some(header_tx),
            body_tx,
            header_sent: false,
            finished,
        });

        tokio::spawn(async move {
            let join_result = tokio::spawn(async move {
                handler.call(request, sink).await;
            })
            .await;

            if fallback_finished.load(Ordering::SeqCst) {
                // The handler called `finish`/`fail` itself; nothing left to report.
                return;
            }

            let message = match join_result {
                Ok(()) => "handler returned without completing the response".to_string(),
                Err(join_err) if join_err.is_panic() => {
                    panic_payload_to_message(join_err.into_panic())
                }
                Err(join_err) => {
                    format!("dispatch task ended before completing the response: {join_err}")
                }
            };
            let _ = fallback_tx.send(Err(BodyError::Handler(message))).await;
        });

        let (status, headers) = header_rx.await.map_err(|_| {
            TransportError::Connection(
                "service dropped without sending a response header".to_string(),
            )
        })?;

        let body: BodyStream = Box::pin(ReceiverStream::new(body_rx));
        Ok((status, headers, body))
    }

    async fn bind_dispatch(
        &self,
        service_name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), TransportError> {
        self.dispatch_handlers
            .lock()
            .unwrap()
            .insert(service_name.to_string(), handler);
        Ok(())
    }

    async fn unbind_dispatch(&self, service_name: &str) -> Result<(), TransportError> {
        self.dispatch_handlers.lock().unwrap().remove(service_name);
        Ok(())
    }
}

/// Server-side [`ResponseSink`] backed by a oneshot (header) and an mpsc
/// channel (body). Closing the body channel ends the stream; no explicit
/// "done" marker is needed the way the wire format requires one, since
/// there's no codec here to make `None` ambiguous.
///
/// `finished` is shared with the task that drives this sink's handler (see
/// `MemoryTransport::dispatch`): that task is the one that reports a
/// handler panic's *real* message, since it alone has access to the
/// `JoinHandle` that carries the recovered payload. `Drop` only ever
/// synthesizes a response here when nothing was ever sent at all, so a
/// caller blocked on the header never hangs; it deliberately leaves the
/// *body*'s terminal error to that task rather than guessing at one, since
/// whichever of the two reports first wins and a guess would only ever be
/// wrong.
struct MemoryResponseSink {
    header_tx: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    body_tx: mpsc::Sender<Result<bytes::Bytes, BodyError>>,
    header_sent: bool,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl ResponseSink for MemoryResponseSink {
    async fn send_header(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), TransportError> {
        if self.header_sent {
            return Err(TransportError::Connection(
                "response header already sent".to_string(),
            ));
        }
        self.header_sent = true;
        if let Some(tx) = self.header_tx.take() {
            let _ = tx.send((status, headers));
        }
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: bytes::Bytes) -> Result<(), TransportError> {
        if !self.header_sent {
            return Err(TransportError::Connection(
                "send_chunk called before send_header".to_string(),
            ));
        }
        let _ = self.body_tx.send(Ok(chunk)).await;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), TransportError> {
        if !self.header_sent {
            self.send_header(StatusCode::OK, HeaderMap::new()).await?;
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fail(mut self: Box<Self>, message: String) -> Result<(), TransportError> {
        if !self.header_sent {
            self.send_header(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new())
                .await?;
        }
        let _ = self.body_tx.send(Err(BodyError::Handler(message))).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryResponseSink {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.header_tx.take() {
            let _ = tx.send((StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use zephyr_kernel::transport::RpcRequest;

    fn empty_request() -> RpcRequest {
        RpcRequest {
            method: http::Method::GET,
            uri: "/hello".parse().unwrap(),
            proto: "HTTP/1.1".to_string(),
            proto_major: 1,
            proto_minor: 1,
            headers: HeaderMap::new(),
            content_length: 0,
            transfer_encoding: vec![],
            host: "test".to_string(),
            trailers: HeaderMap::new(),
            request_uri: "/hello".to_string(),
            params: HashMap::new(),
            remote_addr: "test".to_string(),
            tls: None,
            body: Box::pin(futures::stream::empty()),
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn call(&self, _request: RpcRequest, mut sink: Box<dyn ResponseSink>) {
            sink.send_header(StatusCode::OK, HeaderMap::new()).await.unwrap();
            sink.send_chunk(Bytes::from_static(b"hello")).await.unwrap();
            sink.finish().await.unwrap();
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        async fn call(&self, _request: RpcRequest, _sink: Box<dyn ResponseSink>) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn dispatch_without_a_bound_handler_fails() {
        let transport = MemoryTransport::new();
        let err = transport.dispatch("missing", empty_request()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotBound(_)));
    }

    #[tokio::test]
    async fn dispatch_round_trips_header_and_body() {
        let transport = MemoryTransport::new();
        transport
            .bind_dispatch("echo", Arc::new(EchoHandler))
            .await
            .unwrap();

        let (status, _headers, mut body) = transport.dispatch("echo", empty_request()).await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn panicking_handler_surfaces_as_body_error() {
        let transport = MemoryTransport::new();
        transport
            .bind_dispatch("boom", Arc::new(PanickingHandler))
            .await
            .unwrap();

        let (status, _headers, mut body) = transport.dispatch("boom", empty_request()).await.unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err = body.next().await.unwrap().unwrap_err();
        match err {
            BodyError::Handler(message) => assert!(message.contains("boom")),
            other => panic!("expected a handler error, got {other:?}"),
        }
    }
}
