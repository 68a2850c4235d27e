use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rekindle_common::{Error, Result};
use rekindle_config::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{ChatRole, CompletionClient, CompletionRequest};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI Chat Completions client.
/// Also works with OpenAI-compatible APIs (Azure, local models) via `base_url`.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    /// Build a client from config, or `None` when no API key is set. Callers
    /// treat `None` as "run the deterministic fallbacks".
    pub fn from_config(config: &LlmConfig) -> Result<Option<Arc<dyn CompletionClient>>> {
        let Some(api_key) = config.api_key.as_ref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Some(Arc::new(client)))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAiRequest {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let mut messages: Vec<OpenAiMessage> = Vec::new();

        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(OpenAiMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            });
        }

        OpenAiRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn provider_id(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, request), fields(model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.build_request(request);

        tracing::Span::current().record("model", body.model.as_str());
        debug!("openai request: model={}", body.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Analysis(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Analysis(format!(
                "openai API error: status={status}, body={body}"
            )));
        }

        let api_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Analysis(format!("failed to parse openai response: {e}")))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Analysis("openai response contained no choices".to_string()))
    }
}

// --- OpenAI Wire Types (private) ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PromptMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> OpenAiClient {
        OpenAiClient::new(
            "test-key",
            None,
            Some(base_url.to_string()),
            Duration::from_secs(5),
        )
        .expect("client should build")
    }

    #[test]
    fn builds_request_with_default_model() {
        let client = test_client("https://api.example.com");
        let request = CompletionRequest {
            model: None,
            system: Some("You are helpful".to_string()),
            messages: vec![PromptMessage {
                role: ChatRole::User,
                content: "hello".to_string(),
            }],
            max_tokens: Some(1024),
            temperature: None,
        };

        let openai_req = client.build_request(&request);
        assert_eq!(openai_req.model, DEFAULT_MODEL);
        // System message should be first
        assert_eq!(openai_req.messages[0].role, "system");
        assert_eq!(openai_req.messages[0].content, "You are helpful");
        assert_eq!(openai_req.messages[1].role, "user");
    }

    #[test]
    fn request_model_overrides_configured_model() {
        let client = test_client("https://api.example.com");
        let mut request = CompletionRequest::prompt("hi");
        request.model = Some("gpt-4o".to_string());

        let openai_req = client.build_request(&request);
        assert_eq!(openai_req.model, "gpt-4o");
    }

    #[test]
    fn serializes_request_without_optional_fields() {
        let req = OpenAiRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![OpenAiMessage {
                role: "user".to_string(),
                content: "Hello".to_string(),
            }],
            max_tokens: None,
            temperature: None,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = test_client("https://api.example.com/");
        assert_eq!(
            client.endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn from_config_without_key_yields_none() {
        let config = LlmConfig::default();
        assert!(OpenAiClient::from_config(&config).unwrap().is_none());

        let mut with_key = LlmConfig::default();
        with_key.api_key = Some("sk-test".to_string());
        assert!(OpenAiClient::from_config(&with_key).unwrap().is_some());
    }

    #[tokio::test]
    async fn complete_returns_first_choice_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "Hello back!"}
                }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let text = client
            .complete(&CompletionRequest::prompt("hello"))
            .await
            .expect("completion should succeed");
        assert_eq!(text, "Hello back!");
    }

    #[tokio::test]
    async fn complete_surfaces_api_errors_as_analysis_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .complete(&CompletionRequest::prompt("hello"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Analysis(_)));
    }

    #[tokio::test]
    async fn empty_choices_is_an_analysis_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client
            .complete(&CompletionRequest::prompt("hello"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Analysis(_)));
    }
}
