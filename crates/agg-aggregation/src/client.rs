//! Outbound HTTP to plugins
//!
//! [`PluginClient`] is the seam between the contact protocol and the wire.
//! [`ReqwestPluginClient`] is the production implementation; tests script
//! responses behind the same trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub token: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            token: None,
            basic_auth: None,
            body: None,
            timeout: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Sends one request; `Err` means no HTTP response was received
#[async_trait]
pub trait PluginClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestPluginClient {
    http_client: reqwest::Client,
}

impl ReqwestPluginClient {
    /// Plugins present self-signed certificates, so verification is off
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http_client })
    }

    fn build(&self, request: &HttpRequest) -> Result<reqwest::Request> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .http_client
            .request(method, &request.url)
            .header("Accept", "application/json");
        if let Some(token) = &request.token {
            builder = builder.header("X-Auth-Token", token);
        }
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .with_context(|| format!("invalid plugin request {} {}", request.method.as_str(), request.url))
    }
}

#[async_trait]
impl PluginClient for ReqwestPluginClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = request.method.as_str(), url = %request.url, "Plugin request");
        let response = self
            .http_client
            .execute(self.build(&request)?)
            .await
            .with_context(|| format!("{} {} failed", request.method.as_str(), request.url))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.context("Failed to read response body")?;

        Ok(HttpResponse { status, headers, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = HttpResponse::new(200, "").with_header("X-Auth-Token", "abc");
        assert_eq!(resp.header("x-auth-token"), Some("abc"));
        assert_eq!(resp.header("X-AUTH-TOKEN"), Some("abc"));
        assert_eq!(resp.header("Location"), None);
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::new(Method::Post, "https://10.0.0.2:45001/ODIM/v1/Sessions")
            .with_basic_auth("admin", "pw")
            .with_body(serde_json::json!({"a": 1}));
        assert_eq!(req.basic_auth, Some(("admin".into(), "pw".into())));
        assert!(req.token.is_none());
        assert_eq!(req.method.as_str(), "POST");
    }

    #[test]
    fn test_reqwest_request_headers() {
        let client = assert_ok!(ReqwestPluginClient::new(Duration::from_secs(5)));
        let basic = assert_ok!(
            client.build(&HttpRequest::new(Method::Get, "https://10.0.0.2:45001/ODIM/v1/Status").with_basic_auth("admin", "pw"))
        );
        assert_eq!(basic.headers()["authorization"], "Basic YWRtaW46cHc=");
        assert_eq!(basic.headers()["accept"], "application/json");

        let token = client
            .build(&HttpRequest::new(Method::Delete, "https://10.0.0.2:45001/ODIM/v1/Systems/1").with_token("tok"))
            .unwrap();
        assert_eq!(token.method(), &reqwest::Method::DELETE);
        assert_eq!(token.headers()["x-auth-token"], "tok");
        assert!(token.headers().get("authorization").is_none());
    }
}
