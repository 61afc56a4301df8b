use crate::error::AdapterError;
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    None,
}

/// Thin reqwest wrapper shared by every HTTP-backed adapter. Timeouts are
/// per call, not per client, because each attempt carries its own deadline.
#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        base_url: Option<String>,
        default_base: &str,
        auth: AuthStrategy,
        extra_headers: &[(String, String)],
    ) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        let mut default_headers = HeaderMap::new();
        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert("Authorization", value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::None => {}
        }
        for (name, value) in extra_headers {
            if let (Ok(name), Ok(value)) =
                (name.parse::<reqwest::header::HeaderName>(), value.parse())
            {
                default_headers.insert(name, value);
            }
        }

        let base_url = base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            http,
            base_url,
            default_headers,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
        timeout: Duration,
    ) -> Result<TResp, AdapterError> {
        let resp = self.post_raw(path, body, timeout).await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        let bytes = resp.bytes().await.map_err(map_transport_error)?;
        serde_json::from_slice::<TResp>(&bytes).map_err(AdapterError::Decode)
    }

    /// POST returning the raw response, used by streaming callers.
    pub async fn post_raw<TReq: Serialize>(
        &self,
        path: &str,
        body: &TReq,
        timeout: Duration,
    ) -> Result<Response, AdapterError> {
        let url = self.build_url(path);
        self.http
            .request(Method::POST, url)
            .headers(self.default_headers.clone())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)
    }
}

/// Map a reqwest transport error onto the adapter taxonomy.
pub fn map_transport_error(error: reqwest::Error) -> AdapterError {
    if error.is_timeout() {
        AdapterError::Timeout
    } else if error.is_connect() {
        AdapterError::Network {
            message: error.to_string(),
        }
    } else {
        AdapterError::Http(error)
    }
}

/// Map a non-success HTTP response onto the adapter taxonomy, pulling a
/// message out of the common JSON error envelopes when possible.
pub async fn map_error_response(resp: Response) -> AdapterError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();

    match status {
        401 | 403 => AdapterError::Auth,
        429 => AdapterError::RateLimited,
        code => {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .and_then(|e| e.get("message"))
                        .or_else(|| v.get("message"))
                        .and_then(|m| m.as_str())
                        .map(|s| s.to_string())
                })
                .unwrap_or(body);
            AdapterError::Api { code, message }
        }
    }
}
