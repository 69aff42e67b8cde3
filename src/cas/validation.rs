//! Parsers for CAS validation response bodies.
//!
//! Both parsers are pure functions over the raw XML of a `serviceResponse`
//! document. Protocol-level rejections come back as in-band `Failure`
//! values; only the missing-PGT condition uses the error channel, since it
//! signals a callback misconfiguration rather than a credential problem.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use serde_json::Value;

use crate::cas::error::CasError;

/// Outcome of a `serviceValidate` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceValidation {
    Success(CasIdentity),
    Failure { kind: FailureKind, message: String },
}

/// The identity asserted by a successful service-ticket validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CasIdentity {
    pub user: String,
    pub attributes: HashMap<String, Value>,
    pub pgt_iou: Option<String>,
}

/// Outcome of a `proxy` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyValidation {
    Success { proxy_ticket: String },
    Failure { kind: FailureKind, message: String },
}

/// Protocol failure codes, as carried by the `code` attribute of
/// `authenticationFailure` / `proxyFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidRequest,
    InvalidTicket,
    InvalidService,
    Other,
}

impl FailureKind {
    fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("INVALID_REQUEST") => Self::InvalidRequest,
            Some("INVALID_TICKET") => Self::InvalidTicket,
            Some("INVALID_SERVICE") => Self::InvalidService,
            _ => Self::Other,
        }
    }
}

/// Parse a `serviceValidate` response body.
///
/// `expect_pgt` is set when the validation request carried a `pgtUrl`; a
/// success response without a `proxyGrantingTicket` element then means the
/// CAS server could not reach the callback.
///
/// # Errors
/// Returns `CasError::MissingPgt` under the condition above. A body that is
/// not well-formed XML, or carries neither outcome element, is an in-band
/// generic failure with an empty message.
pub fn parse_service_response(
    body: &str,
    expect_pgt: bool,
) -> Result<ServiceValidation, CasError> {
    let Ok(doc) = Document::parse(body) else {
        return Ok(malformed());
    };
    let root = doc.root_element();

    if let Some(success) = element_child(root, "authenticationSuccess") {
        let user = element_child(success, "user")
            .and_then(|node| node.text())
            .unwrap_or_default()
            .to_string();

        let attributes = match element_child(success, "attributes") {
            Some(wrapper) => jasig_attributes(wrapper),
            None => legacy_attributes(success),
        };

        let pgt_iou = root
            .descendants()
            .find(|node| node.is_element() && node.tag_name().name() == "proxyGrantingTicket")
            .and_then(|node| node.text())
            .map(ToOwned::to_owned);

        if expect_pgt && pgt_iou.is_none() {
            return Err(CasError::MissingPgt);
        }

        return Ok(ServiceValidation::Success(CasIdentity {
            user,
            attributes,
            pgt_iou,
        }));
    }

    Ok(match element_child(root, "authenticationFailure") {
        Some(failure) => ServiceValidation::Failure {
            kind: FailureKind::from_code(failure.attribute("code")),
            message: failure.text().unwrap_or_default().trim().to_string(),
        },
        None => malformed(),
    })
}

/// Parse a `proxy` response body, symmetric to the service parser over
/// `proxySuccess` / `proxyFailure` / `proxyTicket`.
#[must_use]
pub fn parse_proxy_response(body: &str) -> ProxyValidation {
    let Ok(doc) = Document::parse(body) else {
        return ProxyValidation::Failure {
            kind: FailureKind::Other,
            message: String::new(),
        };
    };
    let root = doc.root_element();

    if element_child(root, "proxySuccess").is_some() {
        let proxy_ticket = root
            .descendants()
            .find(|node| node.is_element() && node.tag_name().name() == "proxyTicket")
            .and_then(|node| node.text())
            .unwrap_or_default()
            .to_string();
        return ProxyValidation::Success { proxy_ticket };
    }

    match element_child(root, "proxyFailure") {
        Some(failure) => ProxyValidation::Failure {
            kind: FailureKind::from_code(failure.attribute("code")),
            message: failure.text().unwrap_or_default().trim().to_string(),
        },
        None => ProxyValidation::Failure {
            kind: FailureKind::Other,
            message: String::new(),
        },
    }
}

fn malformed() -> ServiceValidation {
    ServiceValidation::Failure {
        kind: FailureKind::Other,
        message: String::new(),
    }
}

fn element_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}

/// Jasig-style attributes: an `attributes` wrapper whose children are
/// `{name: text}` pairs.
fn jasig_attributes(wrapper: Node<'_, '_>) -> HashMap<String, Value> {
    wrapper
        .children()
        .filter(Node::is_element)
        .map(|node| {
            (
                node.tag_name().name().to_string(),
                Value::String(node.text().unwrap_or_default().to_string()),
            )
        })
        .collect()
}

/// Legacy RubyCAS-Server style: every non-namespaced child of
/// `authenticationSuccess` is an attribute whose text is a serialized
/// scalar or sequence.
fn legacy_attributes(success: Node<'_, '_>) -> HashMap<String, Value> {
    success
        .children()
        .filter(|node| node.is_element() && node.tag_name().namespace().is_none())
        .map(|node| {
            (
                node.tag_name().name().to_string(),
                decode_legacy_value(node.text().unwrap_or_default()),
            )
        })
        .collect()
}

/// Decode a legacy attribute value with a restricted grammar: booleans,
/// integers, floats, plain strings, and `- item` sequences (optionally
/// preceded by a `---` document header). Anything else stays a string, so a
/// hostile response cannot smuggle nested structures through this path.
fn decode_legacy_value(raw: &str) -> Value {
    let text = raw.trim();
    let text = match text.split_once('\n') {
        Some((first, rest)) if first.trim() == "---" => rest.trim_start(),
        _ => text,
    };

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if !lines.is_empty() && lines.iter().all(|line| line.starts_with("- ")) {
        return Value::Array(
            lines
                .iter()
                .map(|line| decode_scalar(line[2..].trim()))
                .collect(),
        );
    }

    decode_scalar(text)
}

fn decode_scalar(text: &str) -> Value {
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(number) = text.parse::<i64>() {
                return Value::Number(number.into());
            }
            if let Ok(float) = text.parse::<f64>() {
                if let Some(number) = serde_json::Number::from_f64(float) {
                    return Value::Number(number);
                }
            }
            Value::String(text.to_string())
        }
    }
}
