//! End-to-end scenarios against an in-process [`MemoryTransport`]: discovery,
//! dispatch, self-healing, and handler-panic recovery, all without a broker.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use zephyr_kernel::descriptor::{GatewayDescriptor, RouteDescriptor, ServiceDescriptor};
use zephyr_kernel::pattern::{PatternCompiler, TemplatePatternCompiler};
use zephyr_kernel::transport::{Handler, ResponseSink, RpcRequest, Transport};
use zephyr_memory::MemoryTransport;
use zephyr_runtime::{Client, Gateway, Service};

fn route(method: Method, pattern: &str) -> RouteDescriptor {
    let compiled = TemplatePatternCompiler.compile(pattern).unwrap();
    RouteDescriptor::new(method, compiled)
}

fn request(method: Method, path: &str) -> RpcRequest {
    RpcRequest {
        method,
        uri: path.parse().unwrap(),
        proto: "HTTP/1.1".to_string(),
        proto_major: 1,
        proto_minor: 1,
        headers: HeaderMap::new(),
        content_length: 0,
        transfer_encoding: Vec::new(),
        host: "test".to_string(),
        trailers: HeaderMap::new(),
        request_uri: path.to_string(),
        params: HashMap::new(),
        remote_addr: "test".to_string(),
        tls: None,
        body: Box::pin(futures::stream::empty()),
    }
}

async fn collect_body(mut body: zephyr_kernel::transport::BodyStream) -> (Vec<u8>, Option<String>) {
    let mut bytes = Vec::new();
    let mut error = None;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(data) => bytes.extend_from_slice(&data),
            Err(err) => error = Some(err.to_string()),
        }
    }
    (bytes, error)
}

struct HelloHandler;

#[async_trait]
impl Handler for HelloHandler {
    async fn call(&self, _request: RpcRequest, mut sink: Box<dyn ResponseSink>) {
        sink.send_header(StatusCode::OK, HeaderMap::new()).await.unwrap();
        sink.send_chunk(Bytes::from_static(b"hi")).await.unwrap();
        sink.finish().await.unwrap();
    }
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

struct PartialThenPanicHandler;

#[async_trait]
impl Handler for PartialThenPanicHandler {
    async fn call(&self, _request: RpcRequest, mut sink: Box<dyn ResponseSink>) {
        sink.send_header(StatusCode::OK, HeaderMap::new()).await.unwrap();
        sink.send_chunk(Bytes::from_static(b"partial")).await.unwrap();
        panic!("boom");
    }
}

#[tokio::test]
async fn scenario_1_get_hello_world() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    let service = Service::new(
        "hello-world",
        vec![],
        vec![route(Method::GET, "/hello")],
        Arc::new(HelloHandler),
        transport.clone(),
    );

    service.start().await.unwrap();
    gateway.start().await.unwrap();

    let (status, _headers, body) = gateway.serve_http(request(Method::GET, "/hello")).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (bytes, error) = collect_body(body).await;
    assert_eq!(&bytes[..], b"hi");
    assert!(error.is_none());
}

#[tokio::test]
async fn scenario_2_post_echo_round_trips_large_body() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    let service = Service::new(
        "echo",
        vec![],
        vec![route(Method::POST, "/echo")],
        Arc::new(EchoHandler),
        transport.clone(),
    );
    service.start().await.unwrap();
    gateway.start().await.unwrap();

    let payload = vec![0xABu8; 50_000];
    let mut req = request(Method::POST, "/echo");
    let chunk = Bytes::from(payload.clone());
    req.body = Box::pin(futures::stream::once(async move { Ok(chunk) }));

    let (status, _headers, body) = gateway.serve_http(req).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (bytes, error) = collect_body(body).await;
    assert_eq!(bytes, payload);
    assert!(error.is_none());
}

#[tokio::test]
async fn scenario_3_first_registered_service_wins_overlapping_routes() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    gateway.start().await.unwrap();

    let a = Service::new(
        "a",
        vec![],
        vec![route(Method::GET, "/x")],
        Arc::new(HelloHandler),
        transport.clone(),
    );
    let b = Service::new(
        "b",
        vec![],
        vec![route(Method::GET, "/x")],
        Arc::new(HelloHandler),
        transport.clone(),
    );
    a.start().await.unwrap();
    b.start().await.unwrap();

    assert!(gateway.can_serve_http(&Method::GET, "/x"));
    // Both services resolve through the same gateway; "a" announced first
    // so the gateway's indexer keeps it as the first match.
    let (status, _, _) = gateway.serve_http(request(Method::GET, "/x")).await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn scenario_4_service_self_heals_when_gateway_forgets_it() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());

    let service = Service::new(
        "hello-world",
        vec![],
        vec![route(Method::GET, "/hello")],
        Arc::new(HelloHandler),
        transport.clone(),
    );
    service.start().await.unwrap();

    // Give the announcement a moment to land before the gateway emits one
    // that doesn't mention the service.
    tokio::task::yield_now().await;

    let forgetful = GatewayDescriptor {
        gateway_name: "edge-1".to_string(),
        known_services: vec![],
        last_seen: chrono::Utc::now(),
    };
    transport.announce_gateway(&forgetful).await.unwrap();

    // The self-healing handler re-announces from a spawned task; give it a
    // turn to run.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let gateway = Gateway::new("edge-1", transport.clone());
    gateway.start().await.unwrap();
    // A second gateway announcement that *does* list the service should
    // not trigger a further re-announce (no observable effect here beyond
    // "no panic"); the absence-of-reannounce behavior is covered by the
    // gateway-filter and self-healing unit tests in `service.rs`'s sibling
    // transports. Here we just confirm the service is indexed after having
    // self-healed once.
    assert!(gateway.can_serve_http(&Method::GET, "/hello"));
}

#[tokio::test]
async fn scenario_5_handler_panic_surfaces_partial_body_and_trailing_error() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    let service = Service::new(
        "flaky",
        vec![],
        vec![route(Method::GET, "/flaky")],
        Arc::new(PartialThenPanicHandler),
        transport.clone(),
    );
    service.start().await.unwrap();
    gateway.start().await.unwrap();

    let (status, _headers, body) = gateway.serve_http(request(Method::GET, "/flaky")).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (bytes, error) = collect_body(body).await;
    assert_eq!(&bytes[..], b"partial");
    assert!(error.unwrap().contains("boom"));
}

#[tokio::test]
async fn scenario_6_unknown_path_returns_404_without_dispatch() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    gateway.start().await.unwrap();

    let (status, _headers, body) = gateway.serve_http(request(Method::GET, "/missing")).await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (bytes, _) = collect_body(body).await;
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn gateway_not_started_returns_503() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport);
    let (status, _, _) = gateway.serve_http(request(Method::GET, "/hello")).await.unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn service_with_scoped_gateway_names_ignores_other_gateways() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let service = Service::new(
        "scoped",
        vec!["edge-1".to_string()],
        vec![route(Method::GET, "/scoped")],
        Arc::new(HelloHandler),
        transport.clone(),
    );
    service.start().await.unwrap();

    let other_gateway = GatewayDescriptor {
        gateway_name: "edge-2".to_string(),
        known_services: vec![],
        last_seen: chrono::Utc::now(),
    };
    transport.announce_gateway(&other_gateway).await.unwrap();
    tokio::task::yield_now().await;

    let gateway_2: Arc<dyn Transport> = transport.clone();
    let _ = gateway_2; // `edge-2` never re-hears from the service; nothing to assert
                        // directly through MemoryTransport besides "no panic", since
                        // there is no separate per-gateway indexer to query here.

    // The gateway it *does* care about still gets an initial announcement.
    let matching_gateway = Gateway::new("edge-1", transport.clone());
    matching_gateway.start().await.unwrap();
    assert!(matching_gateway.can_serve_http(&Method::GET, "/scoped"));
}

#[tokio::test]
async fn client_service_client_dispatches_by_name() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let service = Service::new(
        "hello-world",
        vec![],
        vec![route(Method::GET, "/hello")],
        Arc::new(HelloHandler),
        transport.clone(),
    );
    service.start().await.unwrap();

    let client = Client::new(transport);
    let service_client = client.service("hello-world");
    let (status, _headers, body) = service_client.get("/hello").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (bytes, _) = collect_body(body).await;
    assert_eq!(&bytes[..], b"hi");
}

#[tokio::test]
async fn indexer_idempotence_via_service_descriptor() {
    // Exercises the idempotence invariant through the public surface:
    // announcing the same service twice (e.g. a restart) must not produce
    // duplicate routing entries.
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let gateway = Gateway::new("edge-1", transport.clone());
    gateway.start().await.unwrap();

    let descriptor = ServiceDescriptor::new("dup", vec![], vec![route(Method::GET, "/dup")]);
    transport.announce_service(&descriptor).await.unwrap();
    transport.announce_service(&descriptor).await.unwrap();
    tokio::task::yield_now().await;

    assert!(gateway.can_serve_http(&Method::GET, "/dup"));
}
