//! OpenRouter chat-completions backend for [`RelevanceService`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tenderscope_shared::{Result, ScoringConfig, TenderScopeError};

use crate::scoring::RelevanceService;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Relevance assessor backed by an OpenRouter model.
pub struct OpenRouterAssessor {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    client_profile: String,
}

impl OpenRouterAssessor {
    pub fn new(api_key: String, model: String, scoring: &ScoringConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("TenderScope/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(scoring.timeout_secs))
            .build()
            .map_err(|e| TenderScopeError::Scoring(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: OPENROUTER_BASE_URL.to_string(),
            client_profile: scoring.client_profile.clone(),
        })
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| TenderScopeError::config(format!("invalid API key: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("TenderScope"));
        Ok(headers)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You assess public procurement opportunities for {profile}. \
             Reply with a single JSON object and nothing else, with exactly these keys: \
             \"score\" (number 0-10, relevance for the client), \
             \"priority\" (\"High\" for 7-10, \"Medium\" for 4-6, \"Low\" for 0-3), \
             \"rationale\" (one or two sentences), \
             \"recommended_action\" (one of \"Apply Immediately\", \"Review Tender Documents\", \
             \"Low Priority\", \"Discard\").",
            profile = self.client_profile
        )
    }
}

#[async_trait]
impl RelevanceService for OpenRouterAssessor {
    fn model(&self) -> &str {
        &self.model
    }

    async fn assess(&self, text: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let system = self.system_prompt();
        let user = format!("Opportunity:\n{text}");
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
        };

        debug!(model = %self.model, chars = text.len(), "relevance request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TenderScopeError::Scoring(format!("request timed out: {e}"))
                } else {
                    TenderScopeError::Transport(format!("POST {url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TenderScopeError::Scoring(format!(
                "OpenRouter returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TenderScopeError::Scoring(format!("invalid completion payload: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TenderScopeError::Scoring("empty completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::parse_assessment;
    use tenderscope_shared::{FailureKind, Priority};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn assessor(server: &MockServer) -> OpenRouterAssessor {
        OpenRouterAssessor::new(
            "sk-test".into(),
            "test/model".into(),
            &ScoringConfig::default(),
        )
        .unwrap()
        .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        let content = "```json\n{\"score\": 9, \"priority\": \"High\", \"rationale\": \"fit\", \"recommended_action\": \"Apply Immediately\"}\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let a = assessor(&server);
        let raw = a.assess("Desarrollo de software").await.unwrap();
        let assessment = parse_assessment(&raw, a.model()).unwrap();
        assert_eq!(assessment.priority, Priority::High);
        assert_eq!(assessment.model, "test/model");
    }

    #[tokio::test]
    async fn error_status_is_a_scoring_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = assessor(&server).assess("x").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Scoring);
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_is_a_scoring_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = assessor(&server).assess("x").await.unwrap_err();
        assert!(err.to_string().contains("empty completion"));
    }

    #[test]
    fn prompt_names_the_client_and_keys() {
        let mut scoring = ScoringConfig::default();
        scoring.client_profile = "a data consultancy".into();
        let a = OpenRouterAssessor::new("k".into(), "m".into(), &scoring).unwrap();
        let prompt = a.system_prompt();
        assert!(prompt.contains("a data consultancy"));
        for key in ["score", "priority", "rationale", "recommended_action"] {
            assert!(prompt.contains(key));
        }
    }
}
