//! Parsing and rendering of `WWW-Authenticate: Bearer ...` challenges

use crate::error::{ProxyError, Result};
use std::collections::HashMap;
use url::Url;

/// One Bearer challenge as sent by a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: Url,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse a header value such as
    /// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io"`.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme, params_str) = match header.find(char::is_whitespace) {
            Some(pos) => (&header[..pos], &header[pos..]),
            None => (header, ""),
        };

        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(ProxyError::MalformedChallenge(format!(
                "unsupported scheme '{}' in: {}",
                scheme, header
            )));
        }

        let params = parse_params(params_str)
            .map_err(|reason| ProxyError::MalformedChallenge(format!("{} in: {}", reason, header)))?;

        let realm_str = params
            .get("realm")
            .ok_or_else(|| ProxyError::MalformedChallenge(format!("missing realm in: {}", header)))?;
        let realm = Url::parse(realm_str).map_err(|e| {
            ProxyError::MalformedChallenge(format!("realm '{}' is not an absolute URL: {}", realm_str, e))
        })?;
        if realm.cannot_be_a_base() || !matches!(realm.scheme(), "http" | "https") {
            return Err(ProxyError::MalformedChallenge(format!(
                "realm '{}' is not an http(s) URL",
                realm_str
            )));
        }

        let service = params
            .get("service")
            .cloned()
            .ok_or_else(|| ProxyError::MalformedChallenge(format!("missing service in: {}", header)))?;

        Ok(Self {
            realm,
            service,
            scope: params.get("scope").cloned(),
        })
    }

    /// Render a header value with the given realm in place of ours
    pub fn header_value(realm: &str, service: &str, scope: Option<&str>) -> String {
        let mut value = format!(
            "Bearer realm=\"{}\",service=\"{}\"",
            escape(realm),
            escape(service)
        );
        if let Some(scope) = scope {
            value.push_str(&format!(",scope=\"{}\"", escape(scope)));
        }
        value
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split `key=value` pairs on commas outside quotes.
///
/// Keys are lowercased. A repeated key keeps its first value.
fn parse_params(input: &str) -> std::result::Result<HashMap<String, String>, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(format!("parameter '{}' has no value", key));
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(format!("unterminated quoted value for '{}'", key));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim_end().to_string();
        }

        if key.is_empty() {
            return Err("empty parameter name".to_string());
        }
        params.entry(key.to_ascii_lowercase()).or_insert(value);
    }

    Ok(params)
}
