//! Classification of inbound requests against the CAS protocol's request
//! shapes. Pure predicates over a per-request snapshot, no I/O.

use std::str::FromStr;
use std::sync::LazyLock;

use axum::http::{
    header::{ACCEPT, USER_AGENT},
    HeaderMap, Method,
};
use regex::Regex;
use roxmltree::Document;

use crate::cas::urls::CasUrl;

/// Service tickets are `ST-` plus 1..=253 non-whitespace characters,
/// keeping the total within the protocol's recommended 256-character upper
/// bound.
static TICKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ST-\S{1,253}$").expect("ticket pattern"));

/// A configured path exclusion: a literal prefix or a regex pattern.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Prefix(String),
    Pattern(Regex),
}

impl PathMatcher {
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => !prefix.is_empty() && path.starts_with(prefix.as_str()),
            Self::Pattern(pattern) => pattern.is_match(path),
        }
    }
}

impl FromStr for PathMatcher {
    type Err = regex::Error;

    /// A `regex:` prefix selects pattern matching; anything else is a
    /// literal path prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("regex:") {
            Some(pattern) => Ok(Self::Pattern(Regex::new(pattern)?)),
            None => Ok(Self::Prefix(s.to_string())),
        }
    }
}

/// The session fields the classifier consults.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub has_cas: bool,
    pub anonymous: bool,
    pub client_ip: Option<String>,
}

/// Read-only view over one inbound request, recomputed per request and
/// never persisted.
#[derive(Debug)]
pub struct CasRequest {
    method: Method,
    url: CasUrl,
    params: Vec<(String, String)>,
    user_agent: Option<String>,
    requested_with: Option<String>,
    accept: Option<String>,
    client_ip: Option<String>,
    session: SessionSnapshot,
}

impl CasRequest {
    /// `url` is the full request URL; `form_params` are the decoded body
    /// parameters of a form submission, merged after the query parameters.
    #[must_use]
    pub fn new(
        method: Method,
        url: CasUrl,
        form_params: Vec<(String, String)>,
        headers: &HeaderMap,
        client_ip: Option<String>,
        session: SessionSnapshot,
    ) -> Self {
        let mut params = url.query_pairs();
        params.extend(form_params);

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };

        Self {
            method,
            user_agent: header(USER_AGENT.as_str()),
            requested_with: header("x-requested-with"),
            accept: header(ACCEPT.as_str()),
            url,
            params,
            client_ip,
            session,
        }
    }

    /// The ticket this request carries: the `SessionIndex` of a
    /// single-sign-out notification, or the `ticket` parameter of a ticket
    /// validation request.
    #[must_use]
    pub fn ticket(&self) -> Option<String> {
        if self.single_sign_out() {
            self.sso_ticket()
        } else if self.ticket_validation() {
            self.param("ticket").map(ToOwned::to_owned)
        } else {
            None
        }
    }

    /// The canonical service URL: the current URL with the `ticket`
    /// parameter stripped.
    #[must_use]
    pub fn service_url(&self) -> CasUrl {
        self.url.remove_param("ticket")
    }

    #[must_use]
    pub fn logout(&self, logout_path: &str) -> bool {
        self.url.path() == logout_path
    }

    #[must_use]
    pub fn single_sign_out(&self) -> bool {
        self.param("logoutRequest").is_some()
    }

    #[must_use]
    pub fn ticket_validation(&self) -> bool {
        self.method == Method::GET
            && self
                .param("ticket")
                .is_some_and(|ticket| TICKET_RE.is_match(ticket))
    }

    #[must_use]
    pub fn pgt_callback(&self, callback_path: &str) -> bool {
        self.method == Method::GET && self.url.path().starts_with(callback_path)
    }

    #[must_use]
    pub fn path_matches(&self, matchers: &[PathMatcher]) -> bool {
        matchers
            .iter()
            .any(|matcher| matcher.matches(self.url.path()))
    }

    #[must_use]
    pub fn new_session(&self) -> bool {
        !self.guest_param() && !self.session_exists()
    }

    /// Both PGT callback parameters, or `None` on the parameterless probe
    /// the CAS server sends first.
    #[must_use]
    pub fn pgt_params(&self) -> Option<(String, String)> {
        Some((
            self.param("pgtIou")?.to_string(),
            self.param("pgtId")?.to_string(),
        ))
    }

    /// The gateway guest marker, carried in the query string only.
    #[must_use]
    pub fn guest_param(&self) -> bool {
        self.url.query_param("cas").as_deref() == Some("guest")
    }

    #[must_use]
    pub fn session_exists(&self) -> bool {
        self.session.has_cas || self.session.anonymous
    }

    /// The stored client IP differs from the current one. Exposed as a
    /// signal; the caller decides the policy.
    #[must_use]
    pub fn client_ip_changed(&self) -> bool {
        self.session.has_cas && self.session.client_ip != self.client_ip
    }

    /// A script-style exchange: a 401 from the application must reach such
    /// callers unmodified instead of turning into a login redirect.
    #[must_use]
    pub fn xhr(&self) -> bool {
        self.requested_with.as_deref() == Some("XMLHttpRequest")
            || self
                .accept
                .as_deref()
                .is_some_and(|accept| accept.starts_with("application/json"))
    }

    #[must_use]
    pub fn url(&self) -> &CasUrl {
        &self.url
    }

    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Extract the ticket from the `logoutRequest` XML: the text of the
    /// child element whose name matches `SessionIndex` case-insensitively.
    fn sso_ticket(&self) -> Option<String> {
        let xml = self.param("logoutRequest")?;
        let doc = Document::parse(xml).ok()?;
        doc.root_element()
            .children()
            .find(|child| {
                child.is_element()
                    && child
                        .tag_name()
                        .name()
                        .to_ascii_lowercase()
                        .contains("sessionindex")
            })
            .and_then(|node| node.text())
            .map(ToOwned::to_owned)
    }
}
