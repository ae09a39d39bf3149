//! In-process descriptor types.
//!
//! These are the live counterparts of the wire frames in [`crate::wire`]:
//! they hold a compiled [`RoutePattern`] instead of raw pattern source, and
//! (for services) the handler itself. Conversion to/from the wire form goes
//! through a [`PatternCompiler`] so that pattern syntax stays pluggable.

use crate::error::PatternError;
use crate::pattern::{PatternCompiler, RoutePattern};
use crate::wire::{
    GatewayAnnouncementFrame, RouteDescriptorFrame, ServiceAnnouncementFrame, ServiceDescriptorFrame,
};
use chrono::{DateTime, Utc};
use http::Method;
use std::fmt;
use std::sync::Arc;

/// One routable path within a service: a single HTTP verb and a single
/// path pattern. A route that should answer more than one method is
/// registered as more than one `RouteDescriptor`.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: Method,
    pub pattern: Arc<dyn RoutePattern>,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("pattern", &self.pattern.source())
            .finish()
    }
}

impl RouteDescriptor {
    pub fn new(method: Method, pattern: Arc<dyn RoutePattern>) -> Self {
        Self { method, pattern }
    }

    pub fn to_frame(&self) -> RouteDescriptorFrame {
        RouteDescriptorFrame {
            method: self.method.to_string(),
            pattern: self.pattern.source().to_string(),
        }
    }

    pub fn from_frame(
        frame: &RouteDescriptorFrame,
        compiler: &dyn PatternCompiler,
    ) -> Result<Self, PatternError> {
        let pattern = compiler.compile(&frame.pattern)?;
        let method = Method::from_bytes(frame.method.as_bytes())
            .unwrap_or(Method::GET);
        Ok(Self { method, pattern })
    }
}

/// A service's full self-description, as advertised to the bus.
///
/// `name` is the service's logical identity: it is normalized by the
/// [`crate::namer::Namer`] into the service's dispatch subject, so two
/// services whose names normalize to the same subject are, by definition,
/// the same dispatch target (sharing it via a queue group rather than a
/// collision). Two descriptors with equal `name` are the same Service; a
/// newer one replaces the older one's route list wholesale.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Empty means "every gateway that sees this announcement should index
    /// it".
    pub gateway_names: Vec<String>,
    pub routes: Vec<RouteDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, gateway_names: Vec<String>, routes: Vec<RouteDescriptor>) -> Self {
        Self {
            name: name.into(),
            gateway_names,
            routes,
        }
    }

    /// First route (in declared order) that matches `method` and `path`.
    pub fn resolve(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&RouteDescriptor, std::collections::HashMap<String, String>)> {
        for route in &self.routes {
            if route.method != *method {
                continue;
            }
            if let Some(params) = route.pattern.matches(path) {
                return Some((route, params));
            }
        }
        None
    }

    pub fn to_frame(&self) -> ServiceDescriptorFrame {
        ServiceDescriptorFrame {
            name: self.name.clone(),
            gateway_names: self.gateway_names.clone(),
            routes: self.routes.iter().map(RouteDescriptor::to_frame).collect(),
        }
    }

    pub fn from_frame(
        frame: &ServiceDescriptorFrame,
        compiler: &dyn PatternCompiler,
    ) -> Result<Self, PatternError> {
        let routes = frame
            .routes
            .iter()
            .map(|r| RouteDescriptor::from_frame(r, compiler))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: frame.name.clone(),
            gateway_names: frame.gateway_names.clone(),
            routes,
        })
    }

    pub fn to_announcement_frame(&self) -> ServiceAnnouncementFrame {
        ServiceAnnouncementFrame {
            service: self.to_frame(),
            timestamp: Utc::now(),
        }
    }
}

/// A gateway's self-announcement, as tracked by a Service's self-healing
/// reconciliation loop (see `zephyr-runtime`'s `service` module) and by a
/// Gateway's own indexer-population loop.
#[derive(Debug, Clone)]
pub struct GatewayDescriptor {
    pub gateway_name: String,
    pub known_services: Vec<ServiceDescriptor>,
    pub last_seen: DateTime<Utc>,
}

impl GatewayDescriptor {
    pub fn from_frame(
        frame: &GatewayAnnouncementFrame,
        compiler: &dyn PatternCompiler,
    ) -> Result<Self, PatternError> {
        let known_services = frame
            .known_services
            .iter()
            .map(|s| ServiceDescriptor::from_frame(s, compiler))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            gateway_name: frame.gateway_name.clone(),
            known_services,
            last_seen: frame.timestamp,
        })
    }

    pub fn to_frame(&self) -> GatewayAnnouncementFrame {
        GatewayAnnouncementFrame {
            gateway_name: self.gateway_name.clone(),
            known_services: self.known_services.iter().map(ServiceDescriptor::to_frame).collect(),
            timestamp: self.last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::TemplatePatternCompiler;

    fn route(method: Method, pattern: &str) -> RouteDescriptor {
        let compiled = TemplatePatternCompiler.compile(pattern).unwrap();
        RouteDescriptor::new(method, compiled)
    }

    #[test]
    fn resolve_returns_first_matching_route_in_order() {
        let service = ServiceDescriptor::new(
            "demo",
            vec![],
            vec![
                route(Method::GET, "/items/{id}"),
                route(Method::GET, "/items/latest"),
            ],
        );
        let (matched, params) = service.resolve(&Method::GET, "/items/latest").unwrap();
        assert_eq!(matched.pattern.source(), "/items/{id}");
        assert_eq!(params.get("id").unwrap(), "latest");
    }

    #[test]
    fn resolve_respects_method_filter() {
        let service = ServiceDescriptor::new("demo", vec![], vec![route(Method::POST, "/hello")]);
        assert!(service.resolve(&Method::GET, "/hello").is_none());
        assert!(service.resolve(&Method::POST, "/hello").is_some());
    }

    #[test]
    fn frame_round_trip_preserves_pattern_method_and_gateway_names() {
        let service = ServiceDescriptor::new(
            "demo",
            vec!["edge-1".to_string()],
            vec![route(Method::GET, "/hello/{name}")],
        );
        let frame = service.to_frame();
        let restored = ServiceDescriptor::from_frame(&frame, &TemplatePatternCompiler).unwrap();
        assert_eq!(restored.name, "demo");
        assert_eq!(restored.gateway_names, vec!["edge-1".to_string()]);
        assert_eq!(restored.routes[0].pattern.source(), "/hello/{name}");
        assert_eq!(restored.routes[0].method, Method::GET);
    }

    #[test]
    fn gateway_descriptor_frame_round_trip_preserves_known_services() {
        let descriptor = GatewayDescriptor {
            gateway_name: "edge-1".to_string(),
            known_services: vec![ServiceDescriptor::new(
                "demo",
                vec![],
                vec![route(Method::GET, "/hello")],
            )],
            last_seen: Utc::now(),
        };
        let frame = descriptor.to_frame();
        let restored = GatewayDescriptor::from_frame(&frame, &TemplatePatternCompiler).unwrap();
        assert_eq!(restored.gateway_name, "edge-1");
        assert_eq!(restored.known_services.len(), 1);
        assert_eq!(restored.known_services[0].name, "demo");
    }
}
