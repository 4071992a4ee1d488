//! Decision oracle backed by a Messages-style HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use eoka_pilot_core::{DecisionOracle, OracleRequest};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::{Error, Result};

const SYSTEM_PROMPT: &str = "You drive a web browser one step at a time. \
Answer with a single JSON object and nothing else: no prose, no code fences.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Posts the adapter's prompt and returns the first text block of the reply.
pub struct HttpOracle {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    rate_limit_retries: u32,
    backoff: Duration,
}

impl HttpOracle {
    /// Build from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::Config(format!(
                "oracle API key not set: export {}",
                config.api_key_env
            ))
        })?;
        Ok(Self::with_api_key(config, api_key))
    }

    pub fn with_api_key(config: &OracleConfig, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_tokens: config.max_tokens,
            rate_limit_retries: config.rate_limit_retries.max(1),
            backoff: Duration::from_secs(5),
        }
    }

    /// Wait unit between rate-limited attempts. Attempt `n` waits `n * unit`.
    pub fn with_backoff(mut self, unit: Duration) -> Self {
        self.backoff = unit;
        self
    }

    fn body(&self, request: &OracleRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": request.prompt }],
        })
    }
}

fn oracle_err(msg: impl Into<String>) -> eoka_pilot_core::Error {
    eoka_pilot_core::Error::Oracle(msg.into())
}

fn is_rate_limited(status: StatusCode, json: &Value) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || json["error"]["type"] == "rate_limit_error"
}

/// First `text` block of a Messages reply.
fn first_text(json: &Value) -> eoka_pilot_core::Result<String> {
    json["content"]
        .as_array()
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b["type"] == "text")
                .and_then(|b| b["text"].as_str())
        })
        .map(str::to_string)
        .ok_or_else(|| oracle_err("reply had no text content"))
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn consult(&self, request: &OracleRequest) -> eoka_pilot_core::Result<String> {
        let body = self.body(request);

        for attempt in 1..=self.rate_limit_retries {
            let resp = self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| oracle_err(format!("request failed: {}", e)))?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| oracle_err(format!("reading reply failed: {}", e)))?;
            let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

            if is_rate_limited(status, &json) {
                let wait = self.backoff * attempt;
                warn!(
                    "oracle rate limited (attempt {}/{}), waiting {:?}",
                    attempt, self.rate_limit_retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let detail = json["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or(text);
                return Err(oracle_err(format!("HTTP {}: {}", status.as_u16(), detail)));
            }

            let reply = first_text(&json)?;
            debug!("oracle replied with {} chars", reply.len());
            return Ok(reply);
        }

        Err(oracle_err(format!(
            "rate limited after {} attempts",
            self.rate_limit_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoka_pilot_core::UseMode;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> OracleRequest {
        OracleRequest {
            goal: "open the docs".into(),
            mode: UseMode::Planner,
            page: String::new(),
            history: String::new(),
            allowed_actions: vec!["click".into(), "complete".into()],
            prompt: "GOAL: open the docs".into(),
        }
    }

    /// Serves canned `(status, body)` replies, one per connection, and keeps
    /// the raw requests.
    async fn serve(replies: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = sock.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let raw = String::from_utf8_lossy(&buf);
                    if let Some(end) = raw.find("\r\n\r\n") {
                        let len = raw[..end]
                            .lines()
                            .find_map(|l| {
                                let (k, v) = l.split_once(':')?;
                                k.eq_ignore_ascii_case("content-length")
                                    .then(|| v.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if buf.len() >= end + 4 + len {
                            break;
                        }
                    }
                }
                log.lock().unwrap().push(String::from_utf8_lossy(&buf).into_owned());
                let resp = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                sock.write_all(resp.as_bytes()).await.unwrap();
                sock.shutdown().await.ok();
            }
        });
        (format!("http://{}/v1/messages", addr), seen)
    }

    fn oracle(endpoint: String) -> HttpOracle {
        let config = OracleConfig {
            endpoint,
            model: "test-model".into(),
            rate_limit_retries: 3,
            ..Default::default()
        };
        HttpOracle::with_api_key(&config, "k-test").with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_first_text_block() {
        let reply = json!({
            "content": [
                { "type": "tool_use", "name": "x" },
                { "type": "text", "text": "{\"action\":\"complete\"}" },
                { "type": "text", "text": "ignored" }
            ]
        });
        assert_eq!(first_text(&reply).unwrap(), "{\"action\":\"complete\"}");
        assert!(first_text(&json!({ "content": [] })).is_err());
        assert!(first_text(&Value::Null).is_err());
    }

    #[test]
    fn test_body_carries_prompt_and_model() {
        let o = oracle("http://unused".into());
        let body = o.body(&request());
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["content"], "GOAL: open the docs");
        assert!(body["system"].as_str().unwrap().contains("JSON"));
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = OracleConfig {
            api_key_env: "EOKA_PILOT_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..Default::default()
        };
        let err = HttpOracle::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("EOKA_PILOT_TEST_KEY_THAT_IS_NOT_SET"));
    }

    #[tokio::test]
    async fn test_consult_retries_after_rate_limit() {
        let ok = json!({ "content": [{ "type": "text", "text": "{\"action\":\"complete\"}" }] });
        let (endpoint, seen) = serve(vec![
            (429, json!({ "error": { "type": "rate_limit_error" } }).to_string()),
            (200, ok.to_string()),
        ])
        .await;

        let reply = oracle(endpoint).consult(&request()).await.unwrap();
        assert_eq!(reply, "{\"action\":\"complete\"}");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].to_ascii_lowercase().contains("x-api-key: k-test"));
        assert!(seen[1].contains("GOAL: open the docs"));
    }

    #[tokio::test]
    async fn test_consult_error_status_is_oracle_error() {
        let (endpoint, _) = serve(vec![(
            500,
            json!({ "error": { "type": "api_error", "message": "overloaded" } }).to_string(),
        )])
        .await;

        let err = oracle(endpoint).consult(&request()).await.unwrap_err();
        assert!(matches!(err, eoka_pilot_core::Error::Oracle(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_consult_gives_up_when_always_limited() {
        let limited = (429, "{}".to_string());
        let (endpoint, seen) = serve(vec![limited.clone(), limited.clone(), limited]).await;

        let err = oracle(endpoint).consult(&request()).await.unwrap_err();
        assert!(err.to_string().contains("rate limited after 3 attempts"));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
