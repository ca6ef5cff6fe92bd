use crate::core::config::{Config, Language};
use crate::core::errors::OpenApiError;
use crate::core::kernel::signer::{HmacSigner, Signer};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, trace};

/// REST client trait for signed OpenAPI commands
///
/// One call is one HTTP round trip. Failures are never retried here: a
/// trading command that timed out may still have been executed, so retry
/// policy belongs to the caller.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a signed request
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - The API path, e.g. `/v1/whaleapi/trade/order`
    /// * `query` - Query parameters, percent-encoded by the client
    /// * `body` - Optional JSON body
    /// * `headers` - Extra headers; override defaults such as `Accept-Language`
    ///
    /// # Returns
    /// The `data` member of the response envelope
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, OpenApiError>;
}

/// Typed helpers layered over [`RestClient::request`]
#[async_trait]
pub trait RestClientExt: RestClient {
    /// Serialize `body`, make the request and decode the `data` member into `T`
    async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, OpenApiError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized;
}

#[async_trait]
impl<R: RestClient + ?Sized> RestClientExt for R {
    async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, OpenApiError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        let body = body.map(encode_body).transpose()?;
        let data = self.request(method, path, query, body.as_ref(), &[]).await?;
        decode_data(data)
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: Url,
    /// Request timeout, applied to the whole round trip
    pub timeout: Duration,
    /// Default `Accept-Language`
    pub language: Language,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            language: Language::EN,
            user_agent: concat!("openapi-trade/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.http_url().clone())
            .with_timeout(config.request_timeout())
            .with_language(config.language())
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Build the REST client
    ///
    /// Every OpenAPI command is authenticated, so a signer is mandatory.
    pub fn build(self) -> Result<ReqwestRest, OpenApiError> {
        let signer = self.signer.ok_or_else(|| {
            OpenApiError::Protocol("REST client requires a signer".to_string())
        })?;

        let client = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| OpenApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Response envelope shared by every OpenAPI endpoint
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    code: i64,
    #[serde(default, alias = "msg")]
    message: String,
    #[serde(default)]
    data: Value,
}

impl ReqwestRest {
    /// Create a client signing with the credentials in `config`
    pub fn from_config(config: &Config) -> Result<Self, OpenApiError> {
        RestClientBuilder::new(RestClientConfig::from_config(config))
            .with_signer(Arc::new(HmacSigner::from_config(config)))
            .build()
    }

    /// Get the current timestamp in milliseconds
    fn get_timestamp() -> Result<u64, OpenApiError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| OpenApiError::Protocol(format!("Failed to get timestamp: {}", e)))
    }

    /// Build the full URL, with the query already percent-encoded
    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, OpenApiError> {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| OpenApiError::Protocol(format!("Invalid request path '{}': {}", path, e)))?;

        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        Ok(url)
    }

    /// Decode the response envelope
    #[instrument(skip(self, response), fields(status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, OpenApiError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            OpenApiError::Transport(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        let envelope: ResponseEnvelope = serde_json::from_str(&response_text).map_err(|e| {
            OpenApiError::Protocol(format!(
                "Undecodable response (HTTP {}): {}",
                status.as_u16(),
                e
            ))
        })?;

        if !status.is_success() || envelope.code != 0 {
            let code = if envelope.code == 0 {
                i64::from(status.as_u16())
            } else {
                envelope.code
            };
            debug!(code, message = %envelope.message, "Request rejected");
            return Err(OpenApiError::OpenApi {
                code,
                message: envelope.message,
            });
        }

        Ok(envelope.data)
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, query, body, headers), fields(method = %method, path = %path))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, OpenApiError> {
        // The signature covers exactly these bytes and this query string
        let body_bytes = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| {
                OpenApiError::Protocol(format!("Failed to serialize request body: {}", e))
            })?,
            None => Vec::new(),
        };
        let url = self.build_url(path, query)?;
        let query_string = url.query().unwrap_or_default().to_string();

        let timestamp = Self::get_timestamp()?;
        let signed_headers = self.signer.sign_request(
            method.as_str(),
            url.path(),
            &query_string,
            &body_bytes,
            timestamp,
        )?;

        let mut header_map = HeaderMap::new();
        header_map.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(self.config.language.as_str()),
        );
        // Later inserts replace earlier ones, so caller headers win
        let caller_headers = headers.iter().map(|(k, v)| (k, v));
        for (key, value) in signed_headers.iter().chain(caller_headers) {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                OpenApiError::Protocol(format!("Invalid header name '{}': {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                OpenApiError::Protocol(format!("Invalid value for header '{}': {}", key, e))
            })?;
            header_map.insert(name, value);
        }

        let mut request = self.client.request(method, url).headers(header_map);

        if !body_bytes.is_empty() {
            request = request
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(body_bytes);
        }

        let response = request.send().await.map_err(OpenApiError::from)?;

        self.handle_response(response).await
    }
}

/// Flatten a serializable struct into ordered, string-valued query pairs
///
/// `None` fields are skipped; nested values are rejected.
pub fn query_pairs<T: Serialize>(params: &T) -> Result<Vec<(String, String)>, OpenApiError> {
    let value = serde_json::to_value(params)?;
    let Value::Object(map) = value else {
        return Err(OpenApiError::Protocol(
            "Query parameters must serialize to an object".to_string(),
        ));
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(OpenApiError::Protocol(format!(
                    "Query parameter '{}' is not a scalar",
                    key
                )))
            }
        };
        pairs.push((key, value));
    }

    Ok(pairs)
}

/// Serialize a request body record
pub fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, OpenApiError> {
    serde_json::to_value(body)
        .map_err(|e| OpenApiError::Protocol(format!("Failed to serialize request body: {}", e)))
}

/// Decode the `data` member of a response into a typed value
pub fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, OpenApiError> {
    serde_json::from_value(data)
        .map_err(|e| OpenApiError::Protocol(format!("Failed to deserialize response data: {}", e)))
}
