//! Caller identity resolution.
//!
//! The pipeline never authenticates anyone itself. It reads whatever an
//! upstream layer established: an [`AuthenticatedPrincipal`] extension, or a
//! principal header set by a trusted gateway.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::header::{HeaderMap, HeaderName, ORIGIN};
use axum::http::request::Parts;

use crate::config::SecurityConfig;
use crate::ratelimit::AdmissionKey;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Principal id inserted into request extensions by an authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub String);

/// What the pipeline knows about a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub principal: Option<String>,
    pub client_ip: Option<IpAddr>,
    /// Raw `Origin` header, if any
    pub origin: Option<String>,
}

impl Identity {
    /// The key the limiter partitions this caller under.
    pub fn admission_key(&self) -> AdmissionKey {
        AdmissionKey::resolve(self.principal.as_deref(), self.client_ip)
    }
}

/// Resolves caller identity from request metadata.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Identity;
}

/// Resolver for deployments behind an authenticating gateway.
#[derive(Debug, Clone)]
pub struct GatewayIdentityResolver {
    principal_header: Option<HeaderName>,
    trust_forwarded: bool,
}

impl GatewayIdentityResolver {
    /// Build from configuration.
    ///
    /// Headers that callers could forge (the principal header and
    /// `X-Forwarded-For`) are only read when proxy headers are trusted.
    pub fn from_config(config: &SecurityConfig) -> Self {
        let principal_header = if config.trusted_proxy_headers {
            HeaderName::try_from(config.principal_header.as_str()).ok()
        } else {
            None
        };

        Self {
            principal_header,
            trust_forwarded: config.trusted_proxy_headers,
        }
    }

    fn principal(&self, parts: &Parts) -> Option<String> {
        if let Some(AuthenticatedPrincipal(principal)) =
            parts.extensions.get::<AuthenticatedPrincipal>()
        {
            return Some(principal.clone());
        }

        let name = self.principal_header.as_ref()?;
        header_str(&parts.headers, name).map(str::to_string)
    }

    fn client_ip(&self, parts: &Parts) -> Option<IpAddr> {
        if self.trust_forwarded {
            let forwarded = header_str(&parts.headers, &X_FORWARDED_FOR)
                .and_then(|value| value.split(',').next())
                .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
            if forwarded.is_some() {
                return forwarded;
            }
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

impl IdentityResolver for GatewayIdentityResolver {
    fn resolve(&self, parts: &Parts) -> Identity {
        Identity {
            principal: self.principal(parts),
            client_ip: self.client_ip(parts),
            origin: header_str(&parts.headers, &ORIGIN).map(str::to_string),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
