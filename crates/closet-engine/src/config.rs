use std::env;
use std::fmt;
use std::time::Duration;

use crate::rotation::mask_credential;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 60.0;

const MIN_REQUEST_TIMEOUT_S: f64 = 5.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// Numbered credential variables, read in this order.
const CREDENTIAL_ENV_KEYS: [&str; 3] = ["GEMINI_API_KEY", "GEMINI_API_KEY_2", "GEMINI_API_KEY_3"];
/// Comma separated list appended after the numbered variables.
const CREDENTIAL_LIST_ENV_KEY: &str = "GEMINI_API_KEYS";

#[derive(Clone)]
pub struct ClientConfig {
    pub credentials: Vec<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub test_mode: bool,
}

impl ClientConfig {
    pub fn new(credentials: Vec<String>) -> Self {
        Self {
            credentials: dedupe_credentials(credentials),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            test_mode: false,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut credentials: Vec<String> = CREDENTIAL_ENV_KEYS
            .iter()
            .filter_map(|key| non_empty(*key))
            .collect();
        if let Some(list) = non_empty(CREDENTIAL_LIST_ENV_KEY) {
            credentials.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string),
            );
        }

        let mut config = Self::new(credentials);
        if let Some(api_base) = non_empty("GEMINI_API_BASE") {
            config.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty("GEMINI_MODEL") {
            config.model = model;
        }
        config.request_timeout =
            Duration::from_secs_f64(timeout_seconds(non_empty("GEMINI_REQUEST_TIMEOUT")));
        config.test_mode = non_empty("CLOSET_ENV")
            .map(|value| value.eq_ignore_ascii_case("test"))
            .unwrap_or(false);
        config
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: Vec<String> = self
            .credentials
            .iter()
            .map(|key| mask_credential(key))
            .collect();
        f.debug_struct("ClientConfig")
            .field("credentials", &masked)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

fn timeout_seconds(raw: Option<String>) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
        .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S)
}

fn dedupe_credentials(credentials: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(credentials.len());
    for key in credentials {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}
