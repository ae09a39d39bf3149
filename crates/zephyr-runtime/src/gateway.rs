//! The Gateway role: terminates external HTTP traffic and forwards each
//! request to whichever Service's advertised routes match it.

use crate::error::RuntimeError;
use crate::http_adapter::empty_body;
use crate::indexer::ServiceIndexer;
use http::{HeaderMap, Method};
use rand::Rng;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zephyr_kernel::descriptor::GatewayDescriptor;
use zephyr_kernel::error::{ConfigError, TransportError};
use zephyr_kernel::transport::{BodyStream, RpcRequest, Transport};

/// Lower/upper bound (inclusive/exclusive) of the periodic re-announcement
/// jitter window: `8 + rand(0..2)` seconds, re-rolled every iteration so
/// announcements from many gateways don't land in lockstep.
const REANNOUNCE_BASE_SECS: u64 = 8;
const REANNOUNCE_JITTER_MILLIS: u64 = 2_000;

struct GatewayState {
    indexer: Arc<ServiceIndexer>,
    announce_task: JoinHandle<()>,
}

/// Terminates external HTTP requests and forwards them into the fabric.
///
/// A `Gateway` is not started until [`Gateway::start`] succeeds; before
/// that, [`Gateway::serve_http`] answers every request with `503`.
pub struct Gateway {
    name: String,
    transport: Arc<dyn Transport>,
    state: Mutex<Option<GatewayState>>,
}

impl Gateway {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            state: Mutex::new(None),
        }
    }

    /// Create the indexer, bind the service-announce handler that populates
    /// it, and publish this gateway's first announcement. Returns
    /// [`ConfigError::AlreadyStarted`] if already running.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        {
            let guard = self.state.lock().unwrap();
            if guard.is_some() {
                return Err(ConfigError::AlreadyStarted("Gateway").into());
            }
        }

        let indexer = Arc::new(ServiceIndexer::new());
        let gateway_name = self.name.clone();
        let indexer_for_handler = indexer.clone();

        self.transport
            .bind_service_announce(Box::new(move |service| {
                let scoped_to_this_gateway =
                    service.gateway_names.is_empty() || service.gateway_names.iter().any(|n| n == &gateway_name);
                if !scoped_to_this_gateway {
                    return;
                }
                debug!(service = %service.name, gateway = %gateway_name, "indexing service announcement");
                indexer_for_handler.set_service_descriptor(service);
            }))
            .await?;

        self.announce(&indexer).await;

        let announce_task = self.spawn_reannounce_loop(indexer.clone());

        *self.state.lock().unwrap() = Some(GatewayState { indexer, announce_task });
        info!(gateway = %self.name, "gateway started");
        Ok(())
    }

    /// Drop the indexer, abort the re-announce loop, and unbind the
    /// service-announce handler. Idempotent.
    pub async fn stop(&self) {
        let state = self.state.lock().unwrap().take();
        let Some(state) = state else { return };
        state.announce_task.abort();
        if let Err(err) = self.transport.unbind_service_announce().await {
            warn!(error = %err, "failed to unbind service announcements cleanly");
        }
        info!(gateway = %self.name, "gateway stopped");
    }

    async fn announce(&self, indexer: &ServiceIndexer) {
        let descriptor = GatewayDescriptor {
            gateway_name: self.name.clone(),
            known_services: indexer.snapshot(),
            last_seen: chrono::Utc::now(),
        };
        if let Err(err) = self.transport.announce_gateway(&descriptor).await {
            warn!(error = %err, "failed to publish gateway announcement");
        }
    }

    fn spawn_reannounce_loop(&self, indexer: Arc<ServiceIndexer>) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let gateway_name = self.name.clone();
        tokio::spawn(async move {
            loop {
                let jitter_millis = rand::thread_rng().gen_range(0..REANNOUNCE_JITTER_MILLIS);
                let interval = std::time::Duration::from_secs(REANNOUNCE_BASE_SECS)
                    + std::time::Duration::from_millis(jitter_millis);
                tokio::time::sleep(interval).await;

                let descriptor = GatewayDescriptor {
                    gateway_name: gateway_name.clone(),
                    known_services: indexer.snapshot(),
                    last_seen: chrono::Utc::now(),
                };
                if let Err(err) = transport.announce_gateway(&descriptor).await {
                    warn!(error = %err, "failed to publish periodic gateway announcement");
                }
            }
        })
    }

    /// Resolve `(method, path)` without dispatching. Used by an external
    /// router to decide whether this gateway should handle a request at all.
    pub fn can_serve_http(&self, method: &Method, path: &str) -> bool {
        let guard = self.state.lock().unwrap();
        let Some(state) = guard.as_ref() else { return false };
        state.indexer.resolve_service(method, path).is_some()
    }

    /// Resolve and dispatch one HTTP request.
    ///
    /// Returns `Ok` with a synthesized `503`/`404` when the gateway isn't
    /// started or no service matches — those are ordinary gateway
    /// responses, not faults. A [`TransportError`] means the dispatch
    /// itself failed once a service was found; the caller's HTTP framework
    /// is expected to turn that into a `5xx` response.
    pub async fn serve_http(
        &self,
        request: RpcRequest,
    ) -> Result<(http::StatusCode, HeaderMap, BodyStream), TransportError> {
        let service_name = {
            let guard = self.state.lock().unwrap();
            let Some(state) = guard.as_ref() else {
                return Ok((http::StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), empty_body()));
            };
            state.indexer.resolve_service(&request.method, request.uri.path())
        };

        let Some(service_name) = service_name else {
            return Ok((http::StatusCode::NOT_FOUND, HeaderMap::new(), empty_body()));
        };

        self.transport.dispatch(&service_name, request).await
    }
}
