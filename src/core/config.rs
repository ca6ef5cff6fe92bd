use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HTTP_URL: &str = "https://openapi.longportapp.com";
const DEFAULT_TRADE_WS_URL: &str = "wss://openapi-trade.longportapp.com";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const KEY_APP_KEY: &str = "LONGPORT_APP_KEY";
pub const KEY_APP_SECRET: &str = "LONGPORT_APP_SECRET";
pub const KEY_ACCESS_TOKEN: &str = "LONGPORT_ACCESS_TOKEN";
pub const KEY_HTTP_URL: &str = "LONGPORT_HTTP_URL";
pub const KEY_TRADE_WS_URL: &str = "LONGPORT_TRADE_WS_URL";
pub const KEY_LANGUAGE: &str = "LONGPORT_LANGUAGE";
pub const KEY_REQUEST_TIMEOUT_SECS: &str = "LONGPORT_REQUEST_TIMEOUT_SECS";

/// Language identifier sent as `Accept-Language`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[allow(non_camel_case_types)]
pub enum Language {
    /// zh-CN
    ZH_CN,
    /// zh-HK
    ZH_HK,
    /// en
    #[default]
    EN,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZH_CN => "zh-CN",
            Self::ZH_HK => "zh-HK",
            Self::EN => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "zh-cn" => Ok(Self::ZH_CN),
            "zh-hk" => Ok(Self::ZH_HK),
            "en" => Ok(Self::EN),
            _ => Err(ConfigError::InvalidValue {
                key: KEY_LANGUAGE.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Validated, immutable client configuration
///
/// A `Config` only exists once every required field has been checked, so the
/// rest of the crate never re-validates it. Share it as `Arc<Config>`.
#[derive(Debug, Clone)]
pub struct Config {
    app_key: String,
    app_secret: Secret<String>,
    access_token: Secret<String>,
    http_url: Url,
    trade_ws_url: Url,
    language: Language,
    request_timeout: Duration,
}

// Never expose secrets in serialization
impl Serialize for Config {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Config", 7)?;
        state.serialize_field("app_key", &self.app_key)?;
        state.serialize_field("app_secret", "[REDACTED]")?;
        state.serialize_field("access_token", "[REDACTED]")?;
        state.serialize_field("http_url", self.http_url.as_str())?;
        state.serialize_field("trade_ws_url", self.trade_ws_url.as_str())?;
        state.serialize_field("language", self.language.as_str())?;
        state.serialize_field("request_timeout_secs", &self.request_timeout.as_secs())?;
        state.end()
    }
}

impl Config {
    /// Start building a configuration from explicit credentials
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a configuration from a key/value bundle
    ///
    /// Recognized keys:
    /// - `LONGPORT_APP_KEY`, `LONGPORT_APP_SECRET`, `LONGPORT_ACCESS_TOKEN` (required)
    /// - `LONGPORT_HTTP_URL` (default: `https://openapi.longportapp.com`)
    /// - `LONGPORT_TRADE_WS_URL` (default: `wss://openapi-trade.longportapp.com`)
    /// - `LONGPORT_LANGUAGE` (`en`, `zh-CN`, `zh-HK`; default: `en`)
    /// - `LONGPORT_REQUEST_TIMEOUT_SECS` (default: 30)
    ///
    /// Unknown keys are ignored, so the whole process environment can be passed in.
    pub fn load<I, K, V>(source: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: HashMap<String, String> = source
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut builder = ConfigBuilder {
            app_key: values.remove(KEY_APP_KEY),
            app_secret: values.remove(KEY_APP_SECRET),
            access_token: values.remove(KEY_ACCESS_TOKEN),
            http_url: values.remove(KEY_HTTP_URL),
            trade_ws_url: values.remove(KEY_TRADE_WS_URL),
            ..ConfigBuilder::default()
        };

        if let Some(language) = values.remove(KEY_LANGUAGE) {
            builder.language = Some(language.parse()?);
        }

        if let Some(timeout) = values.remove(KEY_REQUEST_TIMEOUT_SECS) {
            let secs = timeout
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: KEY_REQUEST_TIMEOUT_SECS.to_string(),
                    value: timeout,
                })?;
            builder.request_timeout = Some(Duration::from_secs(secs));
        }

        builder.build()
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Get app secret (use carefully - exposes secret)
    pub fn app_secret(&self) -> &str {
        self.app_secret.expose_secret()
    }

    /// Get access token (use carefully - exposes secret)
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn http_url(&self) -> &Url {
        &self.http_url
    }

    pub fn trade_ws_url(&self) -> &Url {
        &self.trade_ws_url
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Builder for [`Config`]; `build` validates everything at once
#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    app_key: Option<String>,
    app_secret: Option<String>,
    access_token: Option<String>,
    http_url: Option<String>,
    trade_ws_url: Option<String>,
    language: Option<Language>,
    request_timeout: Option<Duration>,
}

impl ConfigBuilder {
    pub fn app_key(mut self, app_key: impl Into<String>) -> Self {
        self.app_key = Some(app_key.into());
        self
    }

    pub fn app_secret(mut self, app_secret: impl Into<String>) -> Self {
        self.app_secret = Some(app_secret.into());
        self
    }

    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Specifies the url of the OpenAPI server.
    ///
    /// NOTE: Usually you don't need to change it.
    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Specifies the url of the trade push server.
    ///
    /// NOTE: Usually you don't need to change it.
    pub fn trade_ws_url(mut self, url: impl Into<String>) -> Self {
        self.trade_ws_url = Some(url.into());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let app_key = required_credential(KEY_APP_KEY, self.app_key)?;
        let app_secret = required_credential(KEY_APP_SECRET, self.app_secret)?;
        let access_token = required_credential(KEY_ACCESS_TOKEN, self.access_token)?;

        let http_url = parse_url(
            KEY_HTTP_URL,
            self.http_url.as_deref().unwrap_or(DEFAULT_HTTP_URL),
            &["http", "https"],
        )?;
        let trade_ws_url = parse_url(
            KEY_TRADE_WS_URL,
            self.trade_ws_url.as_deref().unwrap_or(DEFAULT_TRADE_WS_URL),
            &["ws", "wss"],
        )?;

        let request_timeout = self
            .request_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        if request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: KEY_REQUEST_TIMEOUT_SECS.to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Config {
            app_key,
            app_secret: Secret::new(app_secret),
            access_token: Secret::new(access_token),
            http_url,
            trade_ws_url,
            language: self.language.unwrap_or_default(),
            request_timeout,
        })
    }
}

fn required_credential(key: &str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingField(key.to_string()))?;

    // Credentials end up in HTTP headers verbatim
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::InvalidCredential(key.to_string()));
    }

    Ok(value)
}

fn parse_url(key: &str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            reason: format!(
                "unsupported scheme '{}', expected one of {:?}",
                url.scheme(),
                schemes
            ),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid URL for {key}: {reason}")]
    InvalidUrl { key: String, reason: String },

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
