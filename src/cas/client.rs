//! Outbound client for the CAS server's protocol endpoints.

use reqwest::header::ACCEPT;
use tracing::debug;

use crate::cas::error::CasError;
use crate::cas::urls::CasUrl;
use crate::cas::validation::{
    parse_proxy_response, parse_service_response, ProxyValidation, ServiceValidation,
};
use crate::server::APP_USER_AGENT;

/// Client for one CAS server, holding the parsed base URL and a shared
/// HTTP client. Builds the four protocol endpoint URLs and performs the
/// validation calls; classification of inbound requests lives elsewhere.
#[derive(Debug, Clone)]
pub struct CasServer {
    base: CasUrl,
    http: reqwest::Client,
}

impl CasServer {
    /// # Errors
    /// Returns an error if `url` is not an absolute URL or the HTTP client
    /// cannot be constructed.
    pub fn new(url: &str) -> Result<Self, CasError> {
        let base = CasUrl::parse(url)?;
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(Self { base, http })
    }

    /// The `login` URL for `service_url`, with caller-supplied extra
    /// parameters appended. `gateway=true` additionally forces `cas=guest`
    /// onto the service URL so that gateway re-entry is distinguishable
    /// from a first-time attempt.
    ///
    /// # Errors
    /// Returns an error if `service_url` cannot be parsed.
    pub fn login_url(&self, service_url: &str, params: &[(&str, &str)]) -> Result<CasUrl, CasError> {
        let mut service = CasUrl::parse(service_url)?;
        if params
            .iter()
            .any(|(key, value)| *key == "gateway" && *value == "true")
        {
            service = service.add_param("cas", "guest");
        }

        let mut url = self
            .base
            .append_path("login")
            .add_param("service", service.as_str());
        for (key, value) in params {
            url = url.add_param(key, value);
        }
        Ok(url)
    }

    /// The `logout` URL, carrying any caller-supplied parameters.
    #[must_use]
    pub fn logout_url(&self, params: &[(&str, &str)]) -> CasUrl {
        let url = self.base.append_path("logout");
        if params.is_empty() {
            url
        } else {
            url.add_params(params)
        }
    }

    /// Validate a service ticket against `serviceValidate`.
    ///
    /// The ticket parameter is stripped from `service_url` before the call,
    /// since the CAS server compares the presented service URL with the one
    /// used at ticket issuance. `pgt_callback_url` becomes the `pgtUrl`
    /// parameter when present.
    ///
    /// # Errors
    /// Transport failures, a non-success HTTP status, and the missing-PGT
    /// condition surface as errors; protocol rejections are in-band
    /// `Failure` values.
    pub async fn validate_service(
        &self,
        service_url: &str,
        ticket: &str,
        pgt_callback_url: Option<&str>,
    ) -> Result<ServiceValidation, CasError> {
        let url = self.validate_service_url(service_url, ticket, pgt_callback_url)?;
        debug!("validating service ticket {ticket} against {url}");
        let body = self.fetch(&url).await?;
        parse_service_response(&body, pgt_callback_url.is_some())
    }

    /// Exchange a proxy-granting ticket for a proxy ticket via `proxy`.
    ///
    /// # Errors
    /// Empty inputs are a caller-contract violation reported as
    /// `CasError::InvalidCall` before any I/O; transport failures and
    /// non-success HTTP statuses surface as errors.
    pub async fn validate_proxy_granting_ticket(
        &self,
        service_url: &str,
        pgt: &str,
    ) -> Result<ProxyValidation, CasError> {
        if service_url.is_empty() {
            return Err(CasError::InvalidCall("missing service URL"));
        }
        if pgt.is_empty() {
            return Err(CasError::InvalidCall("missing proxy-granting ticket"));
        }

        let url = self
            .base
            .append_path("proxy")
            .add_params(&[("service", service_url), ("pgt", pgt)]);
        debug!("validating proxy-granting ticket against {url}");
        let body = self.fetch(&url).await?;
        Ok(parse_proxy_response(&body))
    }

    fn validate_service_url(
        &self,
        service_url: &str,
        ticket: &str,
        pgt_callback_url: Option<&str>,
    ) -> Result<CasUrl, CasError> {
        let service = CasUrl::parse(service_url)?.remove_param("ticket");
        let mut url = self
            .base
            .append_path("serviceValidate")
            .add_params(&[("service", service.as_str()), ("ticket", ticket)]);
        if let Some(callback) = pgt_callback_url {
            url = url.add_param("pgtUrl", callback);
        }
        Ok(url)
    }

    /// One GET, no retry, platform-default timeout. HTTP status >= 400 is
    /// `ServerUnavailable`, distinct from a well-formed failure response.
    async fn fetch(&self, url: &CasUrl) -> Result<String, CasError> {
        let response = self
            .http
            .get(url.as_str())
            .header(ACCEPT, "*/*")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() >= 400 {
            return Err(CasError::ServerUnavailable {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}
