//! Vision locator backed by an Ollama-compatible `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{build_prompt, parse_response, VisionLocator};
use crate::errors::VisionError;
use crate::models::{VisionQuery, VisionResult};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "granite3.1-dense:8b";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpVisionConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Extra attempts after a transient failure.
    pub retries: u32,
}

impl Default for HttpVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            retries: 1,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct HttpVisionClient {
    client: Client,
    config: HttpVisionConfig,
}

impl HttpVisionClient {
    pub fn new(config: HttpVisionConfig) -> Result<Self, VisionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| VisionError::Unavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpVisionConfig {
        &self.config
    }

    async fn generate(&self, query: &VisionQuery) -> Result<VisionResult, VisionError> {
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: build_prompt(query),
            images: vec![STANDARD.encode(&query.screenshot.data)],
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    VisionError::Timeout(self.timeout_ms())
                } else {
                    VisionError::Unavailable(format!("vision request failed: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(VisionError::Unavailable(format!(
                "vision service returned {status}: {text}"
            )));
        }

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| VisionError::InvalidResponse(format!("unreadable body: {err}")))?;
        parse_response(&payload.response)
    }

    async fn attempt(
        &self,
        query: &VisionQuery,
        cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(VisionError::Cancelled),
            outcome = tokio::time::timeout(self.config.timeout, self.generate(query)) => {
                outcome.unwrap_or(Err(VisionError::Timeout(self.timeout_ms())))
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }
}

#[async_trait]
impl VisionLocator for HttpVisionClient {
    async fn locate(
        &self,
        query: &VisionQuery,
        cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(VisionError::Cancelled);
            }
            match self.attempt(query, cancel).await {
                Err(err) if err.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        target: "vision",
                        error = %err,
                        attempt,
                        model = %self.config.model,
                        "vision request failed; retrying"
                    );
                }
                outcome => {
                    if let Ok(result) = &outcome {
                        debug!(
                            target: "vision",
                            found = result.found,
                            confidence = result.confidence,
                            "vision response parsed"
                        );
                    }
                    return outcome;
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocator_core_types::{Point, Screenshot, Viewport};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query() -> VisionQuery {
        VisionQuery::new(
            "Search button",
            Screenshot::new(b"png".to_vec(), 1920, 1080),
            Viewport::new(1920, 1080),
        )
    }

    fn client(server: &MockServer, timeout: Duration) -> HttpVisionClient {
        HttpVisionClient::new(HttpVisionConfig {
            endpoint: server.uri(),
            timeout,
            ..HttpVisionConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_prompt_and_image_and_parses_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": DEFAULT_MODEL,
                "images": [STANDARD.encode(b"png")],
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "```json\n{\"found\": true, \"coordinates\": [1625, 14], \"confidence\": 0.92}\n```"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, Duration::from_secs(5))
            .locate(&query(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.found);
        assert_eq!(result.coordinates, Some(Point::new(1625.0, 14.0)));
    }

    #[tokio::test]
    async fn server_errors_are_retried_once_then_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .locate(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Unavailable(_)));
    }

    #[tokio::test]
    async fn non_json_answer_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "no idea, sorry"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_secs(5))
            .locate(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "{\"found\": false}"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = client(&server, Duration::from_millis(50))
            .locate(&query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Timeout(50)));
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_pending_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "{\"found\": false}"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = client(&server, Duration::from_secs(10))
            .locate(&query(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, VisionError::Cancelled);
    }

    #[test]
    fn config_reads_timeout_in_milliseconds() {
        let config: HttpVisionConfig =
            serde_json::from_value(json!({"model": "llava", "timeout_ms": 1500})).unwrap();
        assert_eq!(config.model, "llava");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.retries, 1);
    }
}
