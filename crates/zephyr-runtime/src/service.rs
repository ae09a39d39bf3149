//! The Service role: registers routes and a handler, announces itself, and
//! self-heals when a Gateway forgets it.

use crate::error::RuntimeError;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use zephyr_kernel::descriptor::{RouteDescriptor, ServiceDescriptor};
use zephyr_kernel::error::ConfigError;
use zephyr_kernel::transport::{Handler, Transport};

struct ServiceState {
    started: bool,
}

/// A Service's self-description plus the handler that answers its dispatched
/// requests.
///
/// Route descriptors are supplied explicitly at construction. The original
/// design also let a handler double as a router and have its routes
/// introspected; that capability depends on an external router
/// implementation and is left to whatever `Handler` the caller plugs in —
/// this type only carries the descriptors it's given.
pub struct Service {
    name: String,
    gateway_names: Vec<String>,
    routes: Vec<RouteDescriptor>,
    handler: Arc<dyn Handler>,
    transport: Arc<dyn Transport>,
    state: Mutex<ServiceState>,
    stopped: Notify,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        gateway_names: Vec<String>,
        routes: Vec<RouteDescriptor>,
        handler: Arc<dyn Handler>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            gateway_names,
            routes,
            handler,
            transport,
            state: Mutex::new(ServiceState { started: false }),
            stopped: Notify::new(),
        }
    }

    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.name.clone(), self.gateway_names.clone(), self.routes.clone())
    }

    /// Bind the gateway-announce self-healing handler, bind this service's
    /// dispatch handler, and publish an initial announcement.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.started {
                return Err(ConfigError::AlreadyStarted("Service").into());
            }
            state.started = true;
        }

        let name = self.name.clone();
        let gateway_names = self.gateway_names.clone();
        let transport_for_healing = self.transport.clone();
        let routes_for_healing = self.routes.clone();
        let gateway_names_for_healing = self.gateway_names.clone();

        self.transport
            .bind_gateway_announce(Box::new(move |announcement| {
                if !gateway_names.is_empty() && !gateway_names.iter().any(|n| n == &announcement.gateway_name) {
                    return;
                }
                let already_known = announcement.known_services.iter().any(|s| s.name == name);
                if already_known {
                    return;
                }
                debug!(service = %name, gateway = %announcement.gateway_name, "gateway forgot this service, re-announcing");
                let descriptor = ServiceDescriptor::new(
                    name.clone(),
                    gateway_names_for_healing.clone(),
                    routes_for_healing.clone(),
                );
                let transport = transport_for_healing.clone();
                tokio::spawn(async move {
                    if let Err(err) = transport.announce_service(&descriptor).await {
                        warn!(error = %err, "failed to re-announce service");
                    }
                });
            }))
            .await?;

        self.transport.bind_dispatch(&self.name, self.handler.clone()).await?;

        self.transport.announce_service(&self.descriptor()).await?;

        info!(service = %self.name, "service started");
        Ok(())
    }

    /// Unbind both handlers and wake any task blocked in [`Service::run`].
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.started {
                return;
            }
            state.started = false;
        }

        if let Err(err) = self.transport.unbind_gateway_announce().await {
            warn!(error = %err, "failed to unbind gateway announcements cleanly");
        }
        if let Err(err) = self.transport.unbind_dispatch(&self.name).await {
            warn!(error = %err, "failed to unbind dispatch cleanly");
        }
        info!(service = %self.name, "service stopped");
        self.stopped.notify_waiters();
    }

    /// `start`, then block until [`Service::stop`] is called.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start().await?;
        self.stopped.notified().await;
        Ok(())
    }
}
