//! Flow orchestrator: the tower middleware that sequences classifier,
//! CAS server client, session mutation, and HTTP response for each
//! protocol flow.
//!
//! Protocol failures other than an invalid ticket cross the middleware
//! boundary on the `BoxError` channel; the host decides the terminal
//! response for those (axum hosts wrap the layer with `HandleErrorLayer`).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{
    header::{CONTENT_TYPE, COOKIE, HOST, LOCATION, SET_COOKIE},
    request::Parts,
    HeaderMap, HeaderValue, Request, StatusCode,
};
use axum::response::Response;
use tower::{BoxError, Layer, Service};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::cas::error::CasError;
use crate::cas::request::{CasRequest, SessionSnapshot};
use crate::cas::urls::CasUrl;
use crate::cas::validation::{FailureKind, ProxyValidation, ServiceValidation};
use crate::cas::CasGate;
use crate::session::{CasSession, SessionData};

/// Name of the cookie carrying the middleware's session id.
pub const SESSION_COOKIE: &str = "casgate_session";

/// Upper bound on a buffered form body; `logoutRequest` notifications are
/// a few kilobytes at most.
const FORM_BODY_LIMIT: usize = 1024 * 1024;

/// Tower layer wrapping an application with the CAS flows.
#[derive(Clone)]
pub struct CasLayer {
    gate: Arc<CasGate>,
}

impl CasLayer {
    #[must_use]
    pub fn new(gate: Arc<CasGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for CasLayer {
    type Service = CasService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CasService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CasService<S> {
    inner: S,
    gate: Arc<CasGate>,
}

impl<S> Service<Request<Body>> for CasService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone is polled for readiness again before use; the original,
        // known-ready service is the one driving this request.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let gate = self.gate.clone();

        Box::pin(async move { gate.handle(req, inner).await })
    }
}

impl CasGate {
    pub(crate) async fn handle<S>(
        &self,
        req: Request<Body>,
        inner: S,
    ) -> Result<Response, BoxError>
    where
        S: Service<Request<Body>, Response = Response> + Send,
        S::Future: Send,
        S::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        // Buffer form bodies so their parameters can be classified; the
        // bytes are replayed to the wrapped application untouched.
        let (body, form_params) = if is_form(&parts.headers) {
            let bytes = to_bytes(body, FORM_BODY_LIMIT).await?;
            let form_params = parse_form(&bytes);
            (Body::from(bytes), form_params)
        } else {
            (body, Vec::new())
        };

        let session_id = session_cookie(&parts.headers);
        let session = match session_id.as_deref() {
            Some(id) => self.sessions.load(id).await.unwrap_or_default(),
            None => SessionData::default(),
        };

        let snapshot = SessionSnapshot {
            has_cas: session.cas.is_some(),
            anonymous: session.anonymous,
            client_ip: session.cas.as_ref().and_then(|cas| cas.client_ip.clone()),
        };
        let request = CasRequest::new(
            parts.method.clone(),
            request_url(&parts)?,
            form_params,
            &parts.headers,
            client_ip(&parts),
            snapshot,
        );

        if request.path_matches(&self.config.exclude_paths) {
            return self.passthrough(session, &request, parts, body, inner).await;
        }

        if request.single_sign_out() {
            if let Some(single_sign_out) = &self.single_sign_out {
                info!("Intercepting single-sign-out request");
                match request.ticket() {
                    Some(ticket) => {
                        single_sign_out.destroy_session_by_ticket(&ticket).await;
                    }
                    None => debug!("single-sign-out request without a SessionIndex"),
                }
                return intercepted("CAS single-sign-out request intercepted.");
            }
            debug!("single-sign-out request without a session store, passing through");
            return self.passthrough(session, &request, parts, body, inner).await;
        }

        if request.ticket_validation() {
            info!("Intercepting ticket validation request");
            return self.validate_ticket(&request, &parts, session_id).await;
        }

        if request.pgt_callback(&self.config.pgt_callback_path) {
            info!("PGT callback request");
            if let Some((pgt_iou, pgt_id)) = request.pgt_params() {
                self.tickets.write(&pgt_iou, &pgt_id).await;
            }
            return intercepted("CAS PGT callback request intercepted.");
        }

        if request.logout(&self.config.logout_path) {
            info!("Intercepting logout request");
            if let Some(id) = session_id.as_deref() {
                self.sessions.clear(id).await;
            }
            let params: Vec<(&str, &str)> = request
                .params()
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            return redirect_to(self.server.logout_url(&params).as_str());
        }

        if request.session_exists() {
            if request.guest_param() {
                // The session exists, so the guest marker has served its
                // purpose.
                return redirect_to(request.url().remove_param("cas").as_str());
            }
            if request.client_ip_changed() {
                warn!(
                    "session client IP differs from the current request IP ({:?})",
                    request.client_ip()
                );
            }
        } else if self.config.gateway_mode && !self.skip_gateway(&request) {
            let login = self
                .server
                .login_url(request.url().as_str(), &[("gateway", "true")])?;
            info!("Gateway mode, redirecting to {login}");

            let mut data = session;
            data.anonymous = true;
            let (id, created) = self.store_session(session_id, data).await;

            let mut response = redirect_to(login.as_str())?;
            if created {
                set_session_cookie(&mut response, &id);
            }
            return Ok(response);
        }

        self.passthrough(session, &request, parts, body, inner).await
    }

    async fn validate_ticket(
        &self,
        request: &CasRequest,
        parts: &Parts,
        session_id: Option<String>,
    ) -> Result<Response, BoxError> {
        let service_url = request.service_url().to_string();
        let ticket = request.ticket().unwrap_or_default();
        let pgt_callback = match self.config.proxy_service_url {
            Some(_) => Some(self.pgt_callback_url(parts)),
            None => None,
        };

        match self
            .server
            .validate_service(&service_url, &ticket, pgt_callback.as_deref())
            .await?
        {
            ServiceValidation::Success(identity) => {
                let proxy_ticket = match &self.config.proxy_service_url {
                    Some(proxy_service) => Some(
                        self.resolve_proxy_ticket(proxy_service, identity.pgt_iou.as_deref())
                            .await?,
                    ),
                    None => None,
                };

                let mut attributes = identity.attributes;
                if let Some(filter) = &self.config.extra_attributes_filter {
                    attributes.retain(|name, _| filter.iter().any(|allowed| allowed == name));
                }

                let data = SessionData {
                    cas: Some(CasSession {
                        user: identity.user,
                        ticket,
                        extra_attributes: attributes,
                        proxy_ticket,
                        client_ip: request.client_ip().map(ToOwned::to_owned),
                    }),
                    anonymous: false,
                };
                let (id, created) = self.store_session(session_id, data).await;

                let mut response = redirect_to(&service_url)?;
                if created {
                    set_session_cookie(&mut response, &id);
                }
                Ok(response)
            }
            ServiceValidation::Failure {
                kind: FailureKind::InvalidTicket,
                message,
            } => {
                info!("Invalid ticket, redirecting to CAS login");
                debug!("CAS rejected ticket {ticket}: {message}");
                let login = self.server.login_url(&service_url, &[])?;
                redirect_to(login.as_str())
            }
            ServiceValidation::Failure { kind, message } => {
                Err(CasError::from_failure(kind, message).into())
            }
        }
    }

    async fn resolve_proxy_ticket(
        &self,
        proxy_service: &str,
        pgt_iou: Option<&str>,
    ) -> Result<String, BoxError> {
        let pgt_iou = pgt_iou.ok_or(CasError::MissingPgt)?;
        let pgt = self
            .tickets
            .read(pgt_iou)
            .await
            .ok_or(CasError::MissingPgt)?;

        match self
            .server
            .validate_proxy_granting_ticket(proxy_service, &pgt)
            .await?
        {
            ProxyValidation::Success { proxy_ticket } => Ok(proxy_ticket),
            ProxyValidation::Failure { kind, message } => {
                Err(CasError::from_failure(kind, message).into())
            }
        }
    }

    async fn passthrough<S>(
        &self,
        session: SessionData,
        request: &CasRequest,
        mut parts: Parts,
        body: Body,
        mut inner: S,
    ) -> Result<Response, BoxError>
    where
        S: Service<Request<Body>, Response = Response> + Send,
        S::Future: Send,
        S::Error: Into<BoxError>,
    {
        parts.extensions.insert(session);
        let downstream = Request::from_parts(parts, body);

        std::future::poll_fn(|cx| inner.poll_ready(cx))
            .await
            .map_err(Into::into)?;
        let response = inner.call(downstream).await.map_err(Into::into)?;

        if response.status() == StatusCode::UNAUTHORIZED && !request.xhr() {
            info!("Intercepting 401 response, redirecting to CAS login");
            let login = self.server.login_url(request.url().as_str(), &[])?;
            return redirect_to(login.as_str());
        }
        Ok(response)
    }

    async fn store_session(
        &self,
        session_id: Option<String>,
        data: SessionData,
    ) -> (String, bool) {
        let (id, created) = match session_id {
            Some(id) => (id, false),
            None => (Ulid::new().to_string(), true),
        };
        self.sessions.store(&id, data).await;
        (id, created)
    }

    fn skip_gateway(&self, request: &CasRequest) -> bool {
        if request.guest_param() {
            return true;
        }
        let Some(agent) = request.user_agent() else {
            return false;
        };
        self.config
            .gateway_skip_user_agents
            .iter()
            .any(|needle| agent.contains(needle.as_str()))
    }

    fn pgt_callback_url(&self, parts: &Parts) -> String {
        format!(
            "{}://{}{}",
            scheme(parts),
            host(parts),
            self.config.pgt_callback_path
        )
    }
}

/// The full request URL, reconstructed from the forwarded scheme, the Host
/// header, and the request target.
fn request_url(parts: &Parts) -> Result<CasUrl, CasError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    Ok(CasUrl::parse(&format!(
        "{}://{}{path_and_query}",
        scheme(parts),
        host(parts)
    ))?)
}

fn scheme(parts: &Parts) -> &str {
    parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .unwrap_or("http")
}

fn host(parts: &Parts) -> &str {
    parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
}

fn client_ip(parts: &Parts) -> Option<String> {
    if let Some(forwarded) = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            return Some(first.trim().to_string());
        }
    }
    if let Some(real_ip) = parts
        .headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        return Some(real_ip.trim().to_string());
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("application/x-www-form-urlencoded"))
}

fn parse_form(bytes: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(bytes).into_owned().collect()
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn set_session_cookie(response: &mut Response, id: &str) {
    if let Ok(value) =
        HeaderValue::from_str(&format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"))
    {
        response.headers_mut().insert(SET_COOKIE, value);
    }
}

fn redirect_to(url: &str) -> Result<Response, BoxError> {
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, url)
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(format!("Redirecting you to {url}")))?)
}

fn intercepted(message: &'static str) -> Result<Response, BoxError> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(message))?)
}
