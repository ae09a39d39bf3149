//! [`Transport`] implementation backed by a real NATS connection.
//!
//! This is a close port of the reference NATS transport: four subjects per
//! in-flight request (a client-allocated response header/body pair, a
//! server-allocated request-body subject handed back via a `RequestAck`),
//! queue-group dispatch binding so exactly one bound process answers each
//! request, and fixed-size body re-chunking independent of whatever sizes
//! the caller's stream actually produces.

use crate::body::{body_stream_from_subject, publish_body_stream};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zephyr_kernel::descriptor::{GatewayDescriptor, ServiceDescriptor};
use zephyr_kernel::error::{panic_payload_to_message, TransportError};
use zephyr_kernel::namer::Namer;
use zephyr_kernel::pattern::{PatternCompiler, TemplatePatternCompiler};
use zephyr_kernel::transport::{
    BodyStream, Handler, ResponseSink, RpcRequest, TlsInfo, Transport, TransportOptions,
};
use zephyr_kernel::wire::{
    self, BodyChunkFrame, GatewayAnnouncementFrame, RequestAckFrame, RequestHeaderFrame,
    ResponseHeaderFrame, ServiceAnnouncementFrame, TlsInfoFrame,
};

/// A [`Transport`] backed by [`async_nats::Client`].
pub struct NatsTransport {
    client: async_nats::Client,
    namer: Namer,
    options: TransportOptions,
    pattern_compiler: Arc<dyn PatternCompiler>,
    gateway_announce_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    service_announce_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dispatch_tasks: Mutex<HashMap<String, Vec<tokio::task::JoinHandle<()>>>>,
}

impl NatsTransport {
    pub fn new(client: async_nats::Client, options: TransportOptions) -> Self {
        let namer = Namer::with_namespace(options.namespace.clone());
        Self {
            client,
            namer,
            options,
            pattern_compiler: Arc::new(TemplatePatternCompiler),
            gateway_announce_task: Mutex::new(None),
            service_announce_task: Mutex::new(None),
            dispatch_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Swap in a pattern compiler other than the built-in `{param}`
    /// template syntax, e.g. one backed by an external router's pattern
    /// language.
    pub fn with_pattern_compiler(mut self, compiler: Arc<dyn PatternCompiler>) -> Self {
        self.pattern_compiler = compiler;
        self
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn announce_gateway(
        &self,
        descriptor: &GatewayDescriptor,
    ) -> Result<(), TransportError> {
        let frame = descriptor.to_frame();
        let subject = self.namer.gateway_announce();
        publish_frame(&self.client, &subject, &frame).await
    }

    async fn announce_service(&self, service: &ServiceDescriptor) -> Result<(), TransportError> {
        let frame = service.to_announcement_frame();
        let subject = self.namer.service_announce();
        publish_frame(&self.client, &subject, &frame).await
    }

    async fn bind_gateway_announce(
        &self,
        on_announce: Box<dyn Fn(GatewayDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError> {
        let subject = self.namer.gateway_announce();
        let mut subscriber = subscribe(&self.client, &subject).await?;
        let compiler = self.pattern_compiler.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match wire::decode::<GatewayAnnouncementFrame>(&message.payload) {
                    Ok(frame) => match GatewayDescriptor::from_frame(&frame, compiler.as_ref()) {
                        Ok(descriptor) => on_announce(descriptor),
                        Err(err) => {
                            panic!("gateway announcement carried an invalid route pattern: {err}")
                        }
                    },
                    Err(err) => panic!("malformed gateway announcement frame: {err}"),
                }
            }
        });
        *self.gateway_announce_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn unbind_gateway_announce(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.gateway_announce_task.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn bind_service_announce(
        &self,
        on_announce: Box<dyn Fn(ServiceDescriptor) + Send + Sync>,
    ) -> Result<(), TransportError> {
        let subject = self.namer.service_announce();
        let mut subscriber = subscribe(&self.client, &subject).await?;
        let compiler = self.pattern_compiler.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let frame: ServiceAnnouncementFrame = match wire::decode(&message.payload) {
                    Ok(frame) => frame,
                    Err(err) => panic!("malformed service announcement frame: {err}"),
                };
                match ServiceDescriptor::from_frame(&frame.service, compiler.as_ref()) {
                    Ok(descriptor) => on_announce(descriptor),
                    Err(err) => panic!("service announcement carried an invalid route pattern: {err}"),
                }
            }
        });
        *self.service_announce_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn unbind_service_announce(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.service_announce_task.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        service_name: &str,
        request: RpcRequest,
    ) -> Result<(StatusCode, HeaderMap, BodyStream), TransportError> {
        let dispatch_subject = self.namer.service_dispatch(service_name);
        let response_subject = self.client.new_inbox();
        let response_body_subject = self.client.new_inbox();

        let mut response_sub = subscribe(&self.client, &response_subject).await?;
        let response_body_sub = subscribe(&self.client, &response_body_subject).await?;

        let header_frame = RequestHeaderFrame {
            method: request.method.to_string(),
            uri: request.uri.to_string(),
            proto: request.proto.clone(),
            proto_major: request.proto_major,
            proto_minor: request.proto_minor,
            headers: header_map_to_wire(&request.headers),
            content_length: request.content_length,
            transfer_encoding: request.transfer_encoding.clone(),
            host: request.host.clone(),
            trailers: header_map_to_wire(&request.trailers),
            request_uri: request.request_uri.clone(),
            response_subject: response_subject.clone(),
            response_body_subject: response_body_subject.clone(),
            remote_addr: request.remote_addr.clone(),
            tls: request.tls.as_ref().map(TlsInfoFrame::from),
        };
        let header_bytes = wire::encode(&header_frame).map_err(TransportError::Wire)?;

        let ack_message = tokio::time::timeout(
            self.options.dispatch_timeout,
            self.client.request(dispatch_subject.clone(), header_bytes.into()),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            subject: dispatch_subject.clone(),
        })?
        .map_err(|source| TransportError::Publish {
            subject: dispatch_subject.clone(),
            source: Box::new(source),
        })?;

        let ack: RequestAckFrame =
            wire::decode(&ack_message.payload).map_err(TransportError::Wire)?;

        publish_body_stream(
            &self.client,
            &ack.body_subject,
            self.options.dispatch_body_chunk_size,
            request.body,
        )
        .await?;

        let response_header_msg = tokio::time::timeout(self.options.dispatch_timeout, response_sub.next())
            .await
            .map_err(|_| TransportError::Timeout {
                subject: response_subject.clone(),
            })?
            .ok_or_else(|| {
                TransportError::Connection(format!(
                    "response subject '{response_subject}' closed before a header arrived"
                ))
            })?;

        let response_frame: ResponseHeaderFrame =
            wire::decode(&response_header_msg.payload).map_err(TransportError::Wire)?;
        let status =
            StatusCode::from_u16(response_frame.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let headers = wire_to_header_map(&response_frame.headers);

        let body = body_stream_from_subject(
            response_body_sub,
            self.options.dispatch_timeout,
            response_body_subject,
        );

        Ok((status, headers, body))
    }

    async fn bind_dispatch(
        &self,
        service_name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), TransportError> {
        let subject = self.namer.service_dispatch(service_name);
        let mut subscriber = self
            .client
            .queue_subscribe(subject.clone(), subject.clone())
            .await
            .map_err(|source| TransportError::Subscribe {
                subject: subject.clone(),
                source: Box::new(source),
            })?;

        let client = self.client.clone();
        let options = self.options.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let client = client.clone();
                let options = options.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_one_dispatch(&client, &options, message, handler).await
                    {
                        tracing::warn!(error = %err, "dispatch handling failed");
                    }
                });
            }
        });

        self.dispatch_tasks
            .lock()
            .unwrap()
            .entry(service_name.to_string())
            .or_default()
            .push(handle);
        Ok(())
    }

    async fn unbind_dispatch(&self, service_name: &str) -> Result<(), TransportError> {
        if let Some(handles) = self.dispatch_tasks.lock().unwrap().remove(service_name) {
            for handle in handles {
                handle.abort();
            }
        }
        Ok(())
    }
}

async fn subscribe(
    client: &async_nats::Client,
    subject: &str,
) -> Result<async_nats::Subscriber, TransportError> {
    client
        .subscribe(subject.to_string())
        .await
        .map_err(|source| TransportError::Subscribe {
            subject: subject.to_string(),
            source: Box::new(source),
        })
}

async fn publish_frame<T: serde::Serialize>(
    client: &async_nats::Client,
    subject: &str,
    frame: &T,
) -> Result<(), TransportError> {
    let bytes = wire::encode(frame).map_err(TransportError::Wire)?;
    client
        .publish(subject.to_string(), bytes.into())
        .await
        .map_err(|source| TransportError::Publish {
            subject: subject.to_string(),
            source: Box::new(source),
        })
}

async fn handle_one_dispatch(
    client: &async_nats::Client,
    options: &TransportOptions,
    message: async_nats::Message,
    handler: Arc<dyn Handler>,
) -> Result<(), TransportError> {
    let header_frame: RequestHeaderFrame =
        wire::decode(&message.payload).map_err(TransportError::Wire)?;
    let reply_subject = message.reply.ok_or_else(|| {
        TransportError::Connection("dispatch request carried no reply subject".to_string())
    })?;

    let body_subject = client.new_inbox();
    let body_subscriber = subscribe(client, &body_subject).await?;

    let ack = RequestAckFrame {
        body_subject: body_subject.clone(),
    };
    publish_frame(client, reply_subject.as_str(), &ack).await?;

    let body = body_stream_from_subject(body_subscriber, options.dispatch_timeout, body_subject);

    let method = Method::from_bytes(header_frame.method.as_bytes()).unwrap_or(Method::GET);
    let uri: Uri = header_frame
        .uri
        .parse()
        .map_err(|err| TransportError::Connection(format!("malformed dispatch uri: {err}")))?;
    let headers = wire_to_header_map(&header_frame.headers);
    let trailers = wire_to_header_map(&header_frame.trailers);
    let tls = header_frame.tls.as_ref().map(TlsInfo::from);

    let request = RpcRequest {
        method,
        uri,
        proto: header_frame.proto,
        proto_major: header_frame.proto_major,
        proto_minor: header_frame.proto_minor,
        headers,
        content_length: header_frame.content_length,
        transfer_encoding: header_frame.transfer_encoding,
        host: header_frame.host,
        trailers,
        request_uri: header_frame.request_uri,
        params: HashMap::new(),
        remote_addr: header_frame.remote_addr,
        tls,
        body,
    };

    let response_subject = header_frame.response_subject;
    let response_body_subject = header_frame.response_body_subject;
    let state = Arc::new(Mutex::new(SinkState {
        header_sent: false,
        write_index: 0,
        buffer: BytesMut::new(),
        finished: false,
    }));

    let sink: Box<dyn ResponseSink> = Box::new(NatsResponseSink::new(
        client.clone(),
        response_subject.clone(),
        response_body_subject.clone(),
        options.dispatch_body_chunk_size,
        state.clone(),
    ));

    // Run the handler in its own task and await its `JoinHandle` rather than
    // just `.await`ing the call inline, so a panic's real payload is
    // recoverable here instead of only as a generic `Drop`-glue message.
    let join_result = tokio::spawn(async move {
        handler.call(request, sink).await;
    })
    .await;

    if state.lock().unwrap().finished {
        return Ok(());
    }

    let error_message = match join_result {
        Ok(()) => "handler returned without completing the response".to_string(),
        Err(join_err) if join_err.is_panic() => panic_payload_to_message(join_err.into_panic()),
        Err(join_err) => format!("dispatch task ended before completing the response: {join_err}"),
    };

    let header_sent = state.lock().unwrap().header_sent;
    if !header_sent {
        let frame = ResponseHeaderFrame {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            headers: HashMap::new(),
        };
        publish_frame(client, &response_subject, &frame).await?;
    }
    let (index, remainder) = {
        let mut state = state.lock().unwrap();
        let remainder = std::mem::take(&mut state.buffer).to_vec();
        let index = state.write_index;
        if !remainder.is_empty() {
            state.write_index += 1;
        }
        (index, remainder)
    };
    if !remainder.is_empty() {
        publish_frame(
            client,
            &response_body_subject,
            &BodyChunkFrame {
                index,
                data: remainder,
                done: false,
                error: None,
            },
        )
        .await?;
    }
    let final_index = state.lock().unwrap().write_index;
    publish_frame(
        client,
        &response_body_subject,
        &BodyChunkFrame {
            index: final_index,
            data: Vec::new(),
            done: true,
            error: Some(error_message),
        },
    )
    .await?;

    Ok(())
}

fn header_map_to_wire(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.entry(name.to_string()).or_default().push(value.to_string());
        }
    }
    out
}

fn wire_to_header_map(wire: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in wire {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "dropping header with invalid name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => tracing::warn!(header = %name, "dropping header with invalid value"),
            }
        }
    }
    headers
}

/// Bookkeeping shared between a [`NatsResponseSink`] and `handle_one_dispatch`.
///
/// Sharing it is what lets the dispatch driver finalize the stream with a
/// handler panic's *real* payload: the driver holds the `JoinHandle` for the
/// task that owns the sink, so whichever of the two ever calls
/// `finish`/`fail` loses access to this state the moment it returns, but the
/// driver can still read back `write_index`/`buffer` to continue the stream
/// exactly where the sink left off.
struct SinkState {
    header_sent: bool,
    write_index: u64,
    buffer: BytesMut,
    finished: bool,
}

/// Server-side [`ResponseSink`]: buffers writes and flushes them as
/// fixed-size `BodyChunkFrame`s, exactly mirroring the client-side
/// re-chunking in [`publish_body_stream`].
///
/// Unlike a self-contained sink, this one's mutable state lives behind
/// `state` rather than as plain fields, precisely so `handle_one_dispatch`
/// can still finalize the response after this sink panics or is otherwise
/// dropped without `finish`/`fail` ever running.
struct NatsResponseSink {
    client: async_nats::Client,
    response_subject: String,
    response_body_subject: String,
    chunk_size: usize,
    state: Arc<Mutex<SinkState>>,
}

impl NatsResponseSink {
    fn new(
        client: async_nats::Client,
        response_subject: String,
        response_body_subject: String,
        chunk_size: usize,
        state: Arc<Mutex<SinkState>>,
    ) -> Self {
        Self {
            client,
            response_subject,
            response_body_subject,
            chunk_size,
            state,
        }
    }

    async fn publish_chunk(
        &self,
        index: u64,
        data: Vec<u8>,
        done: bool,
        error: Option<String>,
    ) -> Result<(), TransportError> {
        let frame = BodyChunkFrame {
            index,
            data,
            done,
            error,
        };
        publish_frame(&self.client, &self.response_body_subject, &frame).await
    }

    async fn ensure_header_sent(&self, status: StatusCode) -> Result<(), TransportError> {
        let already_sent = {
            let mut state = self.state.lock().unwrap();
            if state.header_sent {
                true
            } else {
                state.header_sent = true;
                false
            }
        };
        if already_sent {
            return Ok(());
        }
        let frame = ResponseHeaderFrame {
            status: status.as_u16(),
            headers: HashMap::new(),
        };
        publish_frame(&self.client, &self.response_subject, &frame).await
    }

    async fn finalize(&self, error: Option<String>) -> Result<(), TransportError> {
        let status = if error.is_some() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        self.ensure_header_sent(status).await?;
        let (index, remainder) = {
            let mut state = self.state.lock().unwrap();
            let remainder = std::mem::take(&mut state.buffer).to_vec();
            let index = state.write_index;
            if !remainder.is_empty() {
                state.write_index += 1;
            }
            (index, remainder)
        };
        if !remainder.is_empty() {
            self.publish_chunk(index, remainder, false, None).await?;
        }
        let final_index = self.state.lock().unwrap().write_index;
        self.publish_chunk(final_index, Vec::new(), true, error).await?;
        self.state.lock().unwrap().finished = true;
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for NatsResponseSink {
    async fn send_header(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<(), TransportError> {
        let already_sent = {
            let mut state = self.state.lock().unwrap();
            if state.header_sent {
                true
            } else {
                state.header_sent = true;
                false
            }
        };
        if already_sent {
            return Err(TransportError::Connection(
                "response header already sent".to_string(),
            ));
        }
        let frame = ResponseHeaderFrame {
            status: status.as_u16(),
            headers: header_map_to_wire(&headers),
        };
        publish_frame(&self.client, &self.response_subject, &frame).await
    }

    async fn send_chunk(&mut self, chunk: bytes::Bytes) -> Result<(), TransportError> {
        let header_sent = self.state.lock().unwrap().header_sent;
        if !header_sent {
            return Err(TransportError::Connection(
                "send_chunk called before send_header".to_string(),
            ));
        }
        let pieces: Vec<(u64, Vec<u8>)> = {
            let mut state = self.state.lock().unwrap();
            state.buffer.extend_from_slice(&chunk);
            let mut pieces = Vec::new();
            while state.buffer.len() >= self.chunk_size {
                let piece = state.buffer.split_to(self.chunk_size).to_vec();
                let index = state.write_index;
                state.write_index += 1;
                pieces.push((index, piece));
            }
            pieces
        };
        for (index, piece) in pieces {
            self.publish_chunk(index, piece, false, None).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), TransportError> {
        self.finalize(None).await
    }

    async fn fail(self: Box<Self>, message: String) -> Result<(), TransportError> {
        self.finalize(Some(message)).await
    }
}

impl Drop for NatsResponseSink {
    fn drop(&mut self) {
        // `handle_one_dispatch` always finalizes the stream once the task
        // running this sink's handler resolves, including on panic — it has
        // the real recovered payload this impl doesn't, by way of the
        // `JoinHandle` it holds. This drop glue deliberately stays
        // network-silent: it always runs before that driver observes the
        // panic (dropping a value is part of unwinding, not a consequence
        // of it), so a publish here would win the race with a placeholder
        // message instead of the real one every time.
        if !self.state.lock().unwrap().finished {
            tracing::debug!(
                "response sink dropped before the dispatch driver finalized the stream"
            );
        }
    }
}
