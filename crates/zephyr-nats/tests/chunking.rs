//! Wire-level invariants that only show up against a real NATS connection:
//! fixed-size re-chunking independent of the handler's write pattern, and
//! full request/response round-trip fidelity over actual subjects.
//!
//! Ignored by default since they need a `nats-server` reachable at
//! `localhost:4222`. Run with `cargo test -- --ignored` against one, e.g.
//! `docker run -p 4222:4222 nats:latest`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use zephyr_kernel::descriptor::RouteDescriptor;
use zephyr_kernel::pattern::{PatternCompiler, TemplatePatternCompiler};
use zephyr_kernel::transport::{BodyStream, Handler, ResponseSink, RpcRequest, Transport, TransportOptions};
use zephyr_kernel::wire::BodyChunkFrame;
use zephyr_nats::NatsTransport;

async fn connect() -> async_nats::Client {
    async_nats::connect("localhost:4222")
        .await
        .expect("a nats-server must be reachable at localhost:4222 for this test")
}

fn route(method: Method, pattern: &str) -> RouteDescriptor {
    let compiled = TemplatePatternCompiler.compile(pattern).unwrap();
    RouteDescriptor::new(method, compiled)
}

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn call(&self, mut request: RpcRequest, mut sink: Box<dyn ResponseSink>) {
        sink.send_header(StatusCode::OK, HeaderMap::new()).await.unwrap();
        while let Some(chunk) = request.body.next().await {
            sink.send_chunk(chunk.unwrap()).await.unwrap();
        }
        sink.finish().await.unwrap();
    }
}

fn request_with_body(body: BodyStream) -> RpcRequest {
    RpcRequest {
        method: Method::POST,
        uri: "/echo".parse().unwrap(),
        proto: "HTTP/1.1".to_string(),
        proto_major: 1,
        proto_minor: 1,
        headers: HeaderMap::new(),
        content_length: -1,
        transfer_encoding: Vec::new(),
        host: "test".to_string(),
        trailers: HeaderMap::new(),
        request_uri: "/echo".to_string(),
        params: HashMap::new(),
        remote_addr: "test".to_string(),
        tls: None,
        body,
    }
}

#[tokio::test]
#[ignore]
async fn large_body_round_trips_byte_for_byte() {
    let client = connect().await;
    let options = TransportOptions {
        dispatch_body_chunk_size: 16_384,
        ..TransportOptions::default()
    };
    let transport: Arc<dyn Transport> = Arc::new(NatsTransport::new(client, options));

    transport
        .bind_dispatch("echo", Arc::new(EchoHandler))
        .await
        .unwrap();

    let payload = vec![0x5Au8; 50_000];
    let chunk = Bytes::from(payload.clone());
    let body: BodyStream = Box::pin(futures::stream::once(async move { Ok(chunk) }));

    let (status, _headers, mut response_body) = transport
        .dispatch("echo", request_with_body(body))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let mut received = Vec::new();
    while let Some(chunk) = response_body.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, payload);
}

/// A 50,000-byte body chunked at 16,384 bytes must produce exactly
/// `ceil(50000 / 16384) == 4` non-terminal chunk frames, regardless of how
/// the upstream stream happened to split its writes (one 50,000-byte write
/// here; the chunker must re-cut it).
#[tokio::test]
#[ignore]
async fn chunk_count_is_independent_of_caller_write_boundaries() {
    let publisher = connect().await;
    let subscriber_client = connect().await;

    let subject = format!("zephyr.test.chunking.{}", uuid::Uuid::new_v4());
    let mut subscriber = subscriber_client.subscribe(subject.clone()).await.unwrap();

    let payload = vec![0x42u8; 50_000];
    let chunk = Bytes::from(payload);
    let body: BodyStream = Box::pin(futures::stream::once(async move { Ok(chunk) }));

    zephyr_nats::body::publish_body_stream(&publisher, &subject, 16_384, body)
        .await
        .unwrap();

    let mut non_terminal_count = 0;
    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(5), subscriber.next())
            .await
            .expect("timed out waiting for a chunk frame")
            .expect("subscription closed before the terminal chunk arrived");
        let frame: BodyChunkFrame = zephyr_kernel::wire::decode(&message.payload).unwrap();
        if frame.done {
            break;
        }
        non_terminal_count += 1;
    }

    assert_eq!(non_terminal_count, 4);
}
