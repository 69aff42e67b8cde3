//! CAS protocol core: request classification, ticket validation, and the
//! proxy-granting-ticket handshake.

pub mod client;
pub mod error;
pub mod middleware;
pub mod request;
pub mod tickets;
pub mod urls;
pub mod validation;

use std::sync::Arc;

use crate::cas::client::CasServer;
use crate::cas::error::CasError;
use crate::cas::request::PathMatcher;
use crate::cas::tickets::TicketStore;
use crate::session::{SessionStore, SingleSignOut};

pub use crate::cas::middleware::CasLayer;

pub const DEFAULT_LOGOUT_PATH: &str = "/logout";
pub const DEFAULT_PGT_CALLBACK_PATH: &str = "/pgt_callback";

/// Default user-agent substrings that suppress the gateway redirect.
pub const DEFAULT_GATEWAY_SKIP_USER_AGENTS: &[&str] = &[
    "Googlebot",
    "Baiduspider",
    "Bingbot",
    "Yahoo!",
    "iaskspider",
    "facebookexternalhit",
    "Twitterbot",
    "LinkedInBot",
    "Google (+https://developers.google.com/+/web/snippet/)",
    "Pinterest",
];

/// Configuration surface of the middleware.
#[derive(Debug, Clone)]
pub struct CasConfig {
    /// Base URL of the CAS server, e.g. `https://cas.example.com/cas`.
    pub server_url: String,
    pub gateway_mode: bool,
    /// Enables the proxy-ticket exchange; also the `service` presented to
    /// the `proxy` endpoint.
    pub proxy_service_url: Option<String>,
    /// Allow-list of extra attribute names to keep in the session.
    pub extra_attributes_filter: Option<Vec<String>>,
    pub exclude_paths: Vec<PathMatcher>,
    pub logout_path: String,
    pub pgt_callback_path: String,
    pub gateway_skip_user_agents: Vec<String>,
}

impl CasConfig {
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            gateway_mode: false,
            proxy_service_url: None,
            extra_attributes_filter: None,
            exclude_paths: Vec::new(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            pgt_callback_path: DEFAULT_PGT_CALLBACK_PATH.to_string(),
            gateway_skip_user_agents: DEFAULT_GATEWAY_SKIP_USER_AGENTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Shared state of the middleware: configuration plus the injected
/// collaborators. The single-sign-out capability is optional; without it,
/// logout notifications from the CAS server pass through untouched.
pub struct CasGate {
    pub(crate) config: CasConfig,
    pub(crate) server: CasServer,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) tickets: Arc<dyn TicketStore>,
    pub(crate) single_sign_out: Option<Arc<dyn SingleSignOut>>,
}

impl CasGate {
    /// # Errors
    /// Returns an error if `config.server_url` is not a valid absolute URL
    /// or the HTTP client cannot be constructed.
    pub fn new(
        config: CasConfig,
        sessions: Arc<dyn SessionStore>,
        tickets: Arc<dyn TicketStore>,
        single_sign_out: Option<Arc<dyn SingleSignOut>>,
    ) -> Result<Self, CasError> {
        let server = CasServer::new(&config.server_url)?;
        Ok(Self {
            config,
            server,
            sessions,
            tickets,
            single_sign_out,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    #[must_use]
    pub fn server(&self) -> &CasServer {
        &self.server
    }
}
