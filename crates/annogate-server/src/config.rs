use axum::http::{Method, header::HeaderName};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default = "ServerConfig::default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl ServerConfig {
    fn default_max_body_bytes() -> usize {
        4 * 1024 * 1024
    }

    pub fn with_listen_addr(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            max_body_bytes: Self::default_max_body_bytes(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_headers")]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "CorsConfig::default_max_age_secs")]
    pub max_age_secs: u64,
}

impl CorsConfig {
    fn default_allow_methods() -> Vec<String> {
        vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
    }

    fn default_allow_headers() -> Vec<String> {
        vec!["content-type".to_string()]
    }

    fn default_max_age_secs() -> u64 {
        600
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: Vec::new(),
            allow_methods: Self::default_allow_methods(),
            allow_headers: Self::default_allow_headers(),
            allow_credentials: false,
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

pub fn parse_method(method: &str) -> Result<Method, String> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| format!("invalid HTTP method `{method}` in CORS allow_methods"))
}

pub fn parse_header(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| format!("invalid HTTP header `{name}` in CORS configuration"))
}
