use base64::Engine;
use closet_contracts::analysis::{AnalysisResult, StyleProfile};
use serde_json::{json, Map, Value};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::normalize::{
    extract_candidate_text, normalize_classification, parse_json_object, truncate_error_body,
};
use crate::rotation::CredentialPool;
use crate::transport::{HttpTransport, Transport};

const QUOTA_STATUS: u16 = 429;

pub const CLASSIFICATION_PROMPT: &str = r#"Analyze this clothing item and provide a JSON response with the following structure:
{
  "type": "shirt/pants/dress/shoes/accessory/jacket/skirt/etc",
  "colors": ["primary color", "secondary color"],
  "pattern": "solid/striped/floral/checkered/etc",
  "style": "casual/formal/sporty/elegant/etc",
  "fabric": "cotton/denim/leather/silk/etc",
  "season": "summer/winter/spring/fall/all-season",
  "occasion": "daily/work/party/sport/etc"
}

Provide accurate and specific information based on what you see in the image."#;

const PROFILE_SCHEMA: &str = r#"{
  "dominantStyle": "casual/formal/sporty/elegant/etc",
  "colorPalette": ["color1", "color2", "color3"],
  "stylePersonality": "A 2-3 sentence description of their style",
  "recommendations": [
    "Specific recommendation 1",
    "Specific recommendation 2",
    "Specific recommendation 3"
  ],
  "missingPieces": ["item type 1", "item type 2"]
}"#;

const MATCH_SCHEMA: &str = r#"{
  "recommendations": [
    {
      "itemId": "id from wardrobe",
      "matchScore": 0-100,
      "reason": "Why this item matches well"
    }
  ]
}"#;

/// Result of one attempt with one credential.
enum AttemptOutcome {
    Success(String),
    Rotate { status: Option<u16>, error: String },
    Fail { status: u16, body: String },
}

struct AttemptRecord {
    attempt: usize,
    slot: usize,
    status: Option<u16>,
    error: String,
}

/// Gemini `generateContent` client that spreads calls over a credential pool.
///
/// Every logical call reserves one start slot from the shared cursor and then
/// walks the pool from there, so a call never reuses a credential even when
/// other calls move the cursor concurrently.
pub struct GeminiClient {
    config: ClientConfig,
    pool: CredentialPool,
    transport: Box<dyn Transport>,
}

impl GeminiClient {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self, ClientError> {
        if config.credentials.is_empty() && !config.test_mode {
            return Err(ClientError::Configuration(
                "no Gemini API key configured (set GEMINI_API_KEY or GEMINI_API_KEYS)".to_string(),
            ));
        }
        let pool = CredentialPool::new(config.credentials.clone());
        if pool.is_empty() {
            tracing::warn!("test mode without credentials; provider calls will fail");
        } else {
            tracing::info!(
                credentials = pool.len(),
                keys = ?pool.masked(),
                model = %config.model,
                "gemini client ready"
            );
        }
        Ok(Self {
            config,
            pool,
            transport: Box::new(transport),
        })
    }

    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new().map_err(|err| {
            ClientError::Configuration(format!("HTTP client unavailable: {err}"))
        })?;
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credential_count(&self) -> usize {
        self.pool.len()
    }

    pub fn cursor(&self) -> usize {
        self.pool.cursor()
    }

    /// Classifies one garment image.
    pub fn analyze(&self, image: &[u8], media_type: &str) -> Result<AnalysisResult, ClientError> {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        let payload = json!({
            "contents": [{
                "parts": [
                    {"text": CLASSIFICATION_PROMPT},
                    {"inline_data": {"mime_type": media_type, "data": data}}
                ]
            }]
        });
        tracing::debug!(bytes = image.len(), media_type, "classifying image");
        let text = self.call(&payload)?;
        normalize_classification(&text)
    }

    /// Builds a style profile from per-item summaries
    /// (see `closet_contracts::analysis::profile_summary`).
    pub fn generate_profile(&self, summaries: &[Value]) -> Result<StyleProfile, ClientError> {
        let prompt = format!(
            "Based on this wardrobe collection, create a comprehensive style profile.\n\n\
             Wardrobe items: {}\n\n\
             Provide a JSON response with this structure:\n{PROFILE_SCHEMA}\n\n\
             Be specific and personalized based on the actual wardrobe items.",
            pretty(summaries)
        );
        let text = self.complete_text(&prompt)?;
        parse_json_object(&text)
    }

    /// Asks for wardrobe pieces that go with `reference`. The reply must carry
    /// a `recommendations` array; an empty one means nothing matched.
    pub fn find_similar_items(
        &self,
        reference: &Map<String, Value>,
        candidates: &[Value],
    ) -> Result<Vec<Value>, ClientError> {
        let prompt = format!(
            "Based on this clothing item, suggest matching items from the wardrobe.\n\n\
             Reference item:\n{}\n\n\
             Available wardrobe items:\n{}\n\n\
             Provide a JSON response with this structure:\n{MATCH_SCHEMA}\n\n\
             Suggest 3-5 best matching items.",
            pretty(reference),
            pretty(candidates)
        );
        let text = self.complete_text(&prompt)?;
        let mut parsed = parse_json_object(&text)?;
        match parsed.remove("recommendations") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(_) => Err(ClientError::MalformedResponse(
                "\"recommendations\" is not an array".to_string(),
            )),
            None => Err(ClientError::MalformedResponse(
                "reply has no \"recommendations\" array".to_string(),
            )),
        }
    }

    /// Sends a text-only prompt and returns the raw reply text.
    pub fn complete_text(&self, prompt: &str) -> Result<String, ClientError> {
        let payload = json!({"contents": [{"parts": [{"text": prompt}]}]});
        self.call(&payload)
    }

    fn call(&self, payload: &Value) -> Result<String, ClientError> {
        let total = self.pool.len();
        if total == 0 {
            return Err(ClientError::Configuration(
                "no Gemini API key configured; provider calls are disabled".to_string(),
            ));
        }
        let endpoint = self.config.endpoint();
        let start = self.pool.advance();
        let mut failures: Vec<AttemptRecord> = Vec::with_capacity(total);

        for attempt in 0..total {
            if attempt > 0 {
                self.pool.advance();
            }
            let slot = (start + attempt) % total;
            let Some(credential) = self.pool.credential(slot) else {
                continue;
            };
            match self.attempt(&endpoint, credential, payload) {
                AttemptOutcome::Success(body) => {
                    tracing::debug!(attempt = attempt + 1, slot, "provider call succeeded");
                    return extract_candidate_text(&body);
                }
                AttemptOutcome::Fail { status, body } => {
                    tracing::error!(attempt = attempt + 1, slot, status, "provider call failed");
                    return Err(ClientError::Upstream {
                        status,
                        body: truncate_error_body(&body),
                    });
                }
                AttemptOutcome::Rotate { status, error } => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        of = total,
                        slot,
                        status = ?status,
                        "{error}; rotating to next credential"
                    );
                    failures.push(AttemptRecord {
                        attempt: attempt + 1,
                        slot,
                        status,
                        error,
                    });
                }
            }
        }

        let last_error = failures
            .last()
            .map(|record| record.error.clone())
            .unwrap_or_else(|| "no attempt was made".to_string());
        let summary: Vec<String> = failures
            .iter()
            .map(|record| match record.status {
                Some(status) => format!("#{} slot {} -> {status}", record.attempt, record.slot),
                None => format!("#{} slot {} -> transport", record.attempt, record.slot),
            })
            .collect();
        tracing::error!(attempts = ?summary, "all credentials exhausted");
        Err(ClientError::AllCredentialsExhausted {
            attempts: failures.len(),
            last_error,
        })
    }

    fn attempt(&self, endpoint: &str, credential: &str, payload: &Value) -> AttemptOutcome {
        let response = match self.transport.post_json(
            endpoint,
            credential,
            payload,
            self.config.request_timeout,
        ) {
            Ok(response) => response,
            Err(err) => {
                return AttemptOutcome::Rotate {
                    status: None,
                    error: err.to_string(),
                }
            }
        };
        match response.status {
            200..=299 => AttemptOutcome::Success(response.body),
            QUOTA_STATUS => AttemptOutcome::Rotate {
                status: Some(QUOTA_STATUS),
                error: format!(
                    "API request failed with status {QUOTA_STATUS}: {}",
                    truncate_error_body(&response.body)
                ),
            },
            status => AttemptOutcome::Fail {
                status,
                body: response.body,
            },
        }
    }
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    use serde_json::{json, Value};

    use super::{GeminiClient, CLASSIFICATION_PROMPT};
    use crate::config::ClientConfig;
    use crate::error::ClientError;
    use crate::testing::{keys, quota, refused, reply, status, ScriptedTransport};

    fn pool_client(names: &[&str], transport: &ScriptedTransport) -> anyhow::Result<GeminiClient> {
        Ok(GeminiClient::new(
            ClientConfig::new(keys(names)),
            transport.clone(),
        )?)
    }

    #[test]
    fn quota_on_every_key_tries_each_once_then_exhausts() -> anyhow::Result<()> {
        for size in 1..=4 {
            let names: Vec<String> = (1..=size).map(|idx| format!("k{idx}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let transport = ScriptedTransport::always(quota());
            let client = pool_client(&refs, &transport)?;
            let before = client.cursor();

            let err = client.analyze(b"img", "image/png").err();
            match err {
                Some(ClientError::AllCredentialsExhausted {
                    attempts,
                    last_error,
                }) => {
                    assert_eq!(attempts, size);
                    assert!(last_error.contains("429"), "{last_error}");
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(transport.keys(), names);
            assert_eq!(client.cursor(), before);
        }
        Ok(())
    }

    #[test]
    fn non_quota_failure_stops_rotation() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![Ok(status(500, "server error"))]);
        let client = pool_client(&["k1", "k2", "k3"], &transport)?;

        let err = client.analyze(b"img", "image/png").err();
        assert!(matches!(
            err,
            Some(ClientError::Upstream { status: 500, ref body }) if body == "server error"
        ));
        assert_eq!(transport.keys(), vec!["k1"]);
        assert_eq!(client.cursor(), 1);
        Ok(())
    }

    #[test]
    fn quota_then_success_returns_second_key_result() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![
            quota(),
            reply("{\"type\":\"dress\",\"colors\":[\"red\"]}"),
        ]);
        let client = pool_client(&["k1", "k2", "k3"], &transport)?;

        let analysis = client.analyze(b"img", "image/jpeg")?;
        assert_eq!(
            Value::Object(analysis),
            json!({"type": "dress", "colors": ["red"]})
        );
        assert_eq!(transport.keys(), vec!["k1", "k2"]);
        assert_eq!(client.cursor(), 2);
        Ok(())
    }

    #[test]
    fn next_call_starts_where_the_cursor_points() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![
            reply("{\"type\":\"shirt\"}"),
            reply("{\"type\":\"skirt\"}"),
            reply("{\"type\":\"coat\"}"),
        ]);
        let client = pool_client(&["k1", "k2"], &transport)?;
        for _ in 0..3 {
            client.analyze(b"img", "image/png")?;
        }
        assert_eq!(transport.keys(), vec!["k1", "k2", "k1"]);
        Ok(())
    }

    #[test]
    fn transport_errors_rotate_like_quota() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![refused(), reply("{\"type\":\"shoes\"}")]);
        let client = pool_client(&["k1", "k2"], &transport)?;
        let analysis = client.analyze(b"img", "image/png")?;
        assert_eq!(analysis.get("type"), Some(&json!("shoes")));

        let failing = ScriptedTransport::always(refused());
        let client = pool_client(&["k1", "k2"], &failing)?;
        let err = client.analyze(b"img", "image/png").err();
        assert!(matches!(
            err,
            Some(ClientError::AllCredentialsExhausted { attempts: 2, ref last_error })
                if last_error.contains("connection refused")
        ));
        Ok(())
    }

    #[test]
    fn missing_type_is_malformed_after_success() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![reply("{\"colors\":[\"blue\"]}")]);
        let client = pool_client(&["k1", "k2"], &transport)?;
        assert!(matches!(
            client.analyze(b"img", "image/png"),
            Err(ClientError::MalformedResponse(_))
        ));
        assert_eq!(transport.keys(), vec!["k1"]);
        Ok(())
    }

    #[test]
    fn analyze_sends_prompt_and_inline_image() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![reply("```json\n{\"type\":\"shirt\"}\n```")]);
        let client = pool_client(&["k1"], &transport)?;
        client.analyze(b"abc", "image/webp")?;

        let payloads = transport.payloads();
        let parts = &payloads[0]["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], json!(CLASSIFICATION_PROMPT));
        assert_eq!(parts[1]["inline_data"]["mime_type"], json!("image/webp"));
        assert_eq!(parts[1]["inline_data"]["data"], json!("YWJj"));
        Ok(())
    }

    #[test]
    fn empty_pool_outside_test_mode_fails_at_construction() {
        let err = GeminiClient::new(ClientConfig::new(Vec::new()), ScriptedTransport::new(Vec::new()))
            .err();
        assert!(matches!(err, Some(ClientError::Configuration(_))));
    }

    #[test]
    fn empty_pool_in_test_mode_fails_each_call_without_traffic() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(Vec::new());
        let client = GeminiClient::new(
            ClientConfig::new(Vec::new()).with_test_mode(true),
            transport.clone(),
        )?;
        assert_eq!(client.credential_count(), 0);
        assert!(matches!(
            client.analyze(b"img", "image/png"),
            Err(ClientError::Configuration(_))
        ));
        assert!(transport.keys().is_empty());
        Ok(())
    }

    #[test]
    fn profile_and_matches_use_rotation_too() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![
            quota(),
            reply("{\"dominantStyle\":\"casual\",\"colorPalette\":[\"navy\"]}"),
            reply("Sure!\n{\"recommendations\":[{\"itemId\":2,\"matchScore\":90,\"reason\":\"navy\"}]}"),
            reply("{\"recommendations\":[]}"),
        ]);
        let client = pool_client(&["k1", "k2"], &transport)?;

        let profile = client.generate_profile(&[json!({"type": "shirt"})])?;
        assert_eq!(profile.get("dominantStyle"), Some(&json!("casual")));

        let reference = json!({"type": "jeans"});
        let reference = reference.as_object().cloned().unwrap_or_default();
        let matches = client.find_similar_items(&reference, &[json!({"id": 2})])?;
        assert_eq!(matches, vec![json!({"itemId": 2, "matchScore": 90, "reason": "navy"})]);

        let none = client.find_similar_items(&reference, &[json!({"id": 2})])?;
        assert!(none.is_empty());

        assert_eq!(transport.keys(), vec!["k1", "k2", "k1", "k2"]);
        let prompt = transport.payloads()[1]["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        assert!(prompt.contains("\"type\": \"shirt\""));
        Ok(())
    }

    #[test]
    fn concurrent_calls_never_repeat_a_key_within_one_call() -> anyhow::Result<()> {
        let transport = ScriptedTransport::always(quota());
        let client = Arc::new(pool_client(&["k1", "k2", "k3", "k4"], &transport)?);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&client);
                thread::spawn(move || client.complete_text("hi").is_err())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap_or(false));
        }

        let mut per_thread: HashMap<thread::ThreadId, Vec<String>> = HashMap::new();
        for (thread_id, key, _) in transport.calls() {
            per_thread.entry(thread_id).or_default().push(key);
        }
        assert_eq!(per_thread.len(), 4);
        for keys in per_thread.values_mut() {
            assert_eq!(keys.len(), 4);
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), 4);
        }
        Ok(())
    }

    #[test]
    fn match_reply_without_recommendation_list_is_malformed() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new(vec![
            reply("{\"notes\":\"nothing fits\"}"),
            reply("{\"recommendations\":{\"itemId\":2}}"),
        ]);
        let client = pool_client(&["k1"], &transport)?;
        let reference = json!({"type": "jeans"}).as_object().cloned().unwrap_or_default();

        assert!(matches!(
            client.find_similar_items(&reference, &[json!({"id": 2})]),
            Err(ClientError::MalformedResponse(message)) if message.contains("no \"recommendations\"")
        ));
        assert!(matches!(
            client.find_similar_items(&reference, &[json!({"id": 2})]),
            Err(ClientError::MalformedResponse(message)) if message.contains("not an array")
        ));
        Ok(())
    }

    #[test]
    fn from_config_builds_the_http_transport() -> anyhow::Result<()> {
        let client = GeminiClient::from_config(ClientConfig::new(keys(&["k1", "k2"])))?;
        assert_eq!(client.credential_count(), 2);

        let err = GeminiClient::from_config(ClientConfig::new(Vec::new())).err();
        assert!(matches!(err, Some(ClientError::Configuration(_))));
        Ok(())
    }
}
