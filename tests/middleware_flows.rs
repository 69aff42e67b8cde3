//! End-to-end protocol flows through the middleware, driven against an
//! in-process CAS server fixture.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    error_handling::HandleErrorLayer,
    extract::Query,
    http::{header, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::{BoxError, ServiceBuilder, ServiceExt};

use casgate::cas::middleware::SESSION_COOKIE;
use casgate::cas::request::PathMatcher;
use casgate::cas::tickets::{MemoryTicketStore, TicketStore};
use casgate::cas::{CasConfig, CasGate, CasLayer};
use casgate::server;
use casgate::session::{CasSession, MemorySessionStore, SessionData, SessionStore};

const CAS_NS: &str = "http://www.yale.edu/tp/cas";

const LOGOUT_REQUEST: &str = r#"<samlp:LogoutRequest
  xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
  xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
  ID="42" Version="2.0" IssueInstant="2015-01-01T00:00:00Z">
  <saml:NameID>@NOT_USED@</saml:NameID>
  <samlp:SessionIndex>ST-1-slo</samlp:SessionIndex>
</samlp:LogoutRequest>"#;

async fn service_validate(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let ticket = params.get("ticket").map(String::as_str).unwrap_or_default();
    let body = match ticket {
        "ST-valid" => format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:authenticationSuccess>
    <cas:user>alice</cas:user>
    <cas:attributes>
      <cas:role>admin</cas:role>
      <cas:email>alice@example.com</cas:email>
    </cas:attributes>
  </cas:authenticationSuccess>
</cas:serviceResponse>"#
        ),
        "ST-proxy" if params.contains_key("pgtUrl") => format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:authenticationSuccess>
    <cas:user>alice</cas:user>
    <cas:proxyGrantingTicket>PGTIOU-abc</cas:proxyGrantingTicket>
  </cas:authenticationSuccess>
</cas:serviceResponse>"#
        ),
        "ST-error" => format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:authenticationFailure code="INVALID_SERVICE">service not allowed</cas:authenticationFailure>
</cas:serviceResponse>"#
        ),
        "ST-boom" => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "CAS is down".to_string());
        }
        _ => format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:authenticationFailure code="INVALID_TICKET">ticket not recognized</cas:authenticationFailure>
</cas:serviceResponse>"#
        ),
    };
    (StatusCode::OK, body)
}

async fn proxy(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let body = if params.get("pgt").map(String::as_str) == Some("PGT-xyz") {
        format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:proxySuccess>
    <cas:proxyTicket>PT-777</cas:proxyTicket>
  </cas:proxySuccess>
</cas:serviceResponse>"#
        )
    } else {
        format!(
            r#"<cas:serviceResponse xmlns:cas="{CAS_NS}">
  <cas:proxyFailure code="INVALID_TICKET">unknown PGT</cas:proxyFailure>
</cas:serviceResponse>"#
        )
    };
    (StatusCode::OK, body)
}

/// Binds the CAS fixture on an ephemeral port and returns its base URL.
async fn spawn_cas_fixture() -> String {
    let app = Router::new()
        .route("/cas/serviceValidate", get(service_validate))
        .route("/cas/proxy", get(proxy));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    format!("http://{addr}/cas")
}

#[allow(clippy::type_complexity)]
fn build_gate(
    server_url: &str,
    configure: impl FnOnce(&mut CasConfig),
) -> (Arc<CasGate>, Arc<MemorySessionStore>, Arc<MemoryTicketStore>) {
    let mut config = CasConfig::new(server_url);
    configure(&mut config);

    let sessions = Arc::new(MemorySessionStore::new());
    let tickets = Arc::new(MemoryTicketStore::new());
    let gate = CasGate::new(
        config,
        sessions.clone(),
        tickets.clone(),
        Some(sessions.clone()),
    )
    .unwrap();

    (Arc::new(gate), sessions, tickets)
}

fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "app.example.com")
        .body(Body::empty())
        .unwrap()
}

fn session_id_from(response: &axum::response::Response) -> String {
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap();
    let (name_value, _) = cookie.split_once(';').unwrap_or((cookie, ""));
    let (name, value) = name_value.split_once('=').unwrap();
    assert_eq!(name, SESSION_COOKIE);
    value.to_string()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn authenticated_session(ticket: &str) -> SessionData {
    SessionData {
        cas: Some(CasSession {
            user: "alice".to_string(),
            ticket: ticket.to_string(),
            extra_attributes: HashMap::new(),
            proxy_ticket: None,
            client_ip: None,
        }),
        anonymous: false,
    }
}

#[tokio::test]
async fn ticket_validation_success_sets_session_and_redirects() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    let response = app
        .clone()
        .oneshot(request("/?ticket=ST-valid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://app.example.com/"
    );

    let id = session_id_from(&response);
    let session = sessions.load(&id).await.unwrap();
    let cas = session.cas.unwrap();
    assert_eq!(cas.user, "alice");
    assert_eq!(cas.ticket, "ST-valid");
    assert_eq!(
        cas.extra_attributes.get("role"),
        Some(&serde_json::json!("admin"))
    );
    assert!(!session.anonymous);

    // The session cookie now authenticates follow-up requests.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/private")
                .header(header::HOST, "app.example.com")
                .header(header::COOKIE, format!("{SESSION_COOKIE}={id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("alice"));
}

#[tokio::test]
async fn ticket_validation_applies_attribute_filter() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |config| {
        config.extra_attributes_filter = Some(vec!["role".to_string()]);
    });
    let app = server::router(gate);

    let response = app.oneshot(request("/?ticket=ST-valid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let id = session_id_from(&response);
    let cas = sessions.load(&id).await.unwrap().cas.unwrap();
    assert_eq!(
        cas.extra_attributes.get("role"),
        Some(&serde_json::json!("admin"))
    );
    assert!(!cas.extra_attributes.contains_key("email"));
}

#[tokio::test]
async fn invalid_ticket_redirects_to_login_without_session() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    let response = app
        .oneshot(request("/?ticket=ST-unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        format!("{base}/login?service=http%3A%2F%2Fapp.example.com%2F").as_str()
    );
    // No session state is written for a rejected ticket.
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn non_recoverable_validation_failure_is_propagated() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    let response = app
        .clone()
        .oneshot(request("/?ticket=ST-error"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_string(response).await.contains("invalid service"));

    // A non-success HTTP status from the CAS server is propagated too.
    let response = app.oneshot(request("/?ticket=ST-boom")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_string(response).await.contains("unavailable"));
}

#[tokio::test]
async fn pgt_callback_probe_then_write() {
    let base = spawn_cas_fixture().await;
    let (gate, _, tickets) = build_gate(&base, |_| {});
    let app = server::router(gate);

    // First callback carries no parameters and must be a no-op.
    let response = app.clone().oneshot(request("/pgt_callback")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(tickets.read("PGTIOU-abc").await.is_none());

    let response = app
        .oneshot(request("/pgt_callback?pgtIou=PGTIOU-abc&pgtId=PGT-xyz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(tickets.read("PGTIOU-abc").await.as_deref(), Some("PGT-xyz"));
}

#[tokio::test]
async fn proxy_ticket_resolved_through_callback_and_proxy_endpoint() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |config| {
        config.proxy_service_url = Some("https://backend.example.com/".to_string());
    });
    let app = server::router(gate);

    // The CAS server delivers the PGT on the callback before answering the
    // serviceValidate request that carries the matching IOU.
    let response = app
        .clone()
        .oneshot(request("/pgt_callback?pgtIou=PGTIOU-abc&pgtId=PGT-xyz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("/?ticket=ST-proxy")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let id = session_id_from(&response);
    let cas = sessions.load(&id).await.unwrap().cas.unwrap();
    assert_eq!(cas.proxy_ticket.as_deref(), Some("PT-777"));
}

#[tokio::test]
async fn logout_clears_session_and_forwards_params() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    sessions
        .store("sid-logout", authenticated_session("ST-1"))
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/logout?service=http%3A%2F%2Fapp.example.com%2F")
                .header(header::HOST, "app.example.com")
                .header(header::COOKIE, format!("{SESSION_COOKIE}=sid-logout"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        format!("{base}/logout?service=http%3A%2F%2Fapp.example.com%2F").as_str()
    );
    assert!(sessions.load("sid-logout").await.is_none());
}

#[tokio::test]
async fn single_sign_out_destroys_session_by_ticket() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    sessions
        .store("sid-slo", authenticated_session("ST-1-slo"))
        .await;

    let form: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("logoutRequest", LOGOUT_REQUEST)
        .finish();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::HOST, "app.example.com")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response)
        .await
        .contains("single-sign-out request intercepted"));
    assert!(sessions.load("sid-slo").await.is_none());
}

#[tokio::test]
async fn gateway_redirects_browsers_and_marks_session_anonymous() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |config| {
        config.gateway_mode = true;
    });
    let app = server::router(gate);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "app.example.com")
                .header(header::USER_AGENT, "Mozilla/5.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        format!(
            "{base}/login?service=http%3A%2F%2Fapp.example.com%2F%3Fcas%3Dguest&gateway=true"
        )
        .as_str()
    );

    let id = session_id_from(&response);
    assert!(sessions.load(&id).await.unwrap().anonymous);
}

#[tokio::test]
async fn gateway_skips_known_crawlers() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |config| {
        config.gateway_mode = true;
    });
    let app = server::router(gate);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header(header::HOST, "app.example.com")
                .header(header::USER_AGENT, "Googlebot/2.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("stranger"));
}

#[tokio::test]
async fn guest_marker_stripped_once_session_exists() {
    let base = spawn_cas_fixture().await;
    let (gate, sessions, _) = build_gate(&base, |config| {
        config.gateway_mode = true;
    });
    let app = server::router(gate);

    sessions
        .store(
            "sid-guest",
            SessionData {
                cas: None,
                anonymous: true,
            },
        )
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/?cas=guest&page=2")
                .header(header::HOST, "app.example.com")
                .header(header::COOKIE, format!("{SESSION_COOKIE}=sid-guest"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://app.example.com/?page=2"
    );
}

#[tokio::test]
async fn excluded_paths_bypass_every_flow() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |config| {
        config.gateway_mode = true;
        config.exclude_paths = vec!["/health".parse::<PathMatcher>().unwrap()];
    });
    let app = server::router(gate);

    let response = app.oneshot(request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("casgate"));
}

#[tokio::test]
async fn unauthorized_response_redirects_to_login() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    let response = app.oneshot(request("/private")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        format!("{base}/login?service=http%3A%2F%2Fapp.example.com%2Fprivate").as_str()
    );
}

#[tokio::test]
async fn unauthorized_response_reaches_script_clients_unmodified() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |_| {});
    let app = server::router(gate);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/private")
                .header(header::HOST, "app.example.com")
                .header("x-requested-with", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn form_body_is_replayed_to_the_application() {
    let base = spawn_cas_fixture().await;
    let (gate, _, _) = build_gate(&base, |_| {});

    async fn echo(body: String) -> String {
        body
    }
    let app = Router::new().route("/echo", post(echo)).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(|err: BoxError| async move {
                (StatusCode::BAD_GATEWAY, err.to_string())
            }))
            .layer(CasLayer::new(gate)),
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .header(header::HOST, "app.example.com")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("greeting=hello&name=world"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "greeting=hello&name=world");
}
