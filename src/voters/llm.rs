//! HTTP language-model voters
//!
//! One [`LlmVoter`] per configured provider. Three wire styles cover the
//! supported providers: OpenAI-compatible chat completions (OpenAI, Groq,
//! xAI, OpenRouter), Anthropic messages and Gemini `generateContent`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::parsing::parse_vote_response;
use super::VoterAdapter;
use crate::config::VoterSettings;
use crate::error::VoterError;
use crate::types::Vote;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 300;
const MAX_ERROR_BODY: usize = 200;

const SYSTEM_PROMPT: &str = "You resolve prediction market questions. Decide whether the \
question resolved YES, NO, or INVALID (ambiguous, unresolvable, or not yet determined). \
Reply with only a JSON object: {\"outcome\": \"YES\" | \"NO\" | \"INVALID\", \
\"confidence\": <integer 0-100>, \"reasoning\": \"<one sentence>\"}.";

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    Gemini,
    OpenAi,
    Anthropic,
    XAi,
    OpenRouter,
}

/// Request/response shape spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAiChat,
    AnthropicMessages,
    GeminiGenerateContent,
}

impl LlmProvider {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::XAi => "xai",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai",
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::XAi => "https://api.x.ai",
            Self::OpenRouter => "https://openrouter.ai/api",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Gemini => "gemini-1.5-flash",
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-20241022",
            Self::XAi => "grok-2-latest",
            Self::OpenRouter => "meta-llama/llama-3.1-70b-instruct",
        }
    }

    /// Prefix for `<PREFIX>_API_KEY`, `<PREFIX>_MODEL`, ...
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ",
            Self::Gemini => "GEMINI",
            Self::OpenAi => "OPENAI",
            Self::Anthropic => "ANTHROPIC",
            Self::XAi => "XAI",
            Self::OpenRouter => "OPENROUTER",
        }
    }

    pub fn api_style(&self) -> ApiStyle {
        match self {
            Self::Anthropic => ApiStyle::AnthropicMessages,
            Self::Gemini => ApiStyle::GeminiGenerateContent,
            Self::Groq | Self::OpenAi | Self::XAi | Self::OpenRouter => ApiStyle::OpenAiChat,
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "xai" | "grok" => Ok(Self::XAi),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Build the user prompt for one resolution attempt
pub fn build_prompt(question: &str, context: Option<&str>) -> String {
    let mut prompt = format!("Question: {}\n", question.trim());
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("Context: {}\n", context));
    }
    prompt.push_str("Respond with the JSON object only.");
    prompt
}

/// Language-model voter speaking one provider's HTTP API
pub struct LlmVoter {
    id: String,
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl fmt::Debug for LlmVoter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmVoter")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl LlmVoter {
    /// Create new voter; fails when credentials are missing
    pub fn new(settings: &VoterSettings, timeout: Duration) -> Result<Self, VoterError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            VoterError::AdapterUnavailable(format!(
                "missing {}_API_KEY",
                settings.provider.env_prefix()
            ))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoterError::AdapterUnavailable(format!("http client: {}", e)))?;

        Ok(Self {
            id: settings.id.clone(),
            provider: settings.provider,
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub(crate) fn endpoint(&self) -> String {
        match self.provider.api_style() {
            ApiStyle::OpenAiChat => format!("{}/v1/chat/completions", self.base_url),
            ApiStyle::AnthropicMessages => format!("{}/v1/messages", self.base_url),
            ApiStyle::GeminiGenerateContent => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
        }
    }

    pub(crate) fn request_body(&self, prompt: &str) -> serde_json::Value {
        match self.provider.api_style() {
            ApiStyle::OpenAiChat => serde_json::json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
                "temperature": 0.0,
                "max_tokens": MAX_OUTPUT_TOKENS,
            }),
            ApiStyle::AnthropicMessages => serde_json::json!({
                "model": self.model,
                "system": SYSTEM_PROMPT,
                "messages": [
                    { "role": "user", "content": prompt },
                ],
                "temperature": 0.0,
                "max_tokens": MAX_OUTPUT_TOKENS,
            }),
            ApiStyle::GeminiGenerateContent => serde_json::json!({
                "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
                "contents": [
                    { "role": "user", "parts": [{ "text": prompt }] },
                ],
                "generationConfig": {
                    "temperature": 0.0,
                    "maxOutputTokens": MAX_OUTPUT_TOKENS,
                },
            }),
        }
    }

    fn build_request(&self, prompt: &str) -> RequestBuilder {
        let request = self.client.post(self.endpoint()).json(&self.request_body(prompt));

        match self.provider.api_style() {
            ApiStyle::OpenAiChat => request.bearer_auth(&self.api_key),
            ApiStyle::AnthropicMessages => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ApiStyle::GeminiGenerateContent => request.query(&[("key", self.api_key.as_str())]),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> VoterError {
        if err.is_timeout() {
            VoterError::AdapterTimeout {
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            VoterError::AdapterUnavailable(format!("request failed: {}", err))
        }
    }
}

/// Map a non-success HTTP status to a voter error
///
/// Upstream timeouts report the voter's own budget, like a transport timeout.
pub(crate) fn status_error(status: StatusCode, body: &str, timeout: Duration) -> VoterError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VoterError::AdapterUnavailable(format!("credentials rejected (HTTP {})", status.as_u16()))
        }
        StatusCode::TOO_MANY_REQUESTS => VoterError::AdapterUnavailable("rate limited".to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => VoterError::AdapterTimeout {
            after_ms: timeout.as_millis() as u64,
        },
        _ => {
            let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
            VoterError::AdapterUnavailable(format!("HTTP {}: {}", status.as_u16(), snippet))
        }
    }
}

/// Pull the model's reply text out of a provider response
pub(crate) fn extract_text(style: ApiStyle, body: &serde_json::Value) -> Option<&str> {
    match style {
        ApiStyle::OpenAiChat => body.pointer("/choices/0/message/content")?.as_str(),
        ApiStyle::AnthropicMessages => body
            .get("content")?
            .as_array()?
            .iter()
            .find(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))?
            .get("text")?
            .as_str(),
        ApiStyle::GeminiGenerateContent => {
            body.pointer("/candidates/0/content/parts/0/text")?.as_str()
        }
    }
}

#[async_trait]
impl VoterAdapter for LlmVoter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn vote(&self, question: &str, context: Option<&str>) -> Result<Vote, VoterError> {
        let prompt = build_prompt(question, context);

        debug!(voter = %self.id, model = %self.model, "Requesting vote");

        let response = self
            .build_request(&prompt)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, self.timeout));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                VoterError::AdapterMalformedResponse(format!("invalid JSON body: {}", e))
            }
        })?;

        let text = extract_text(self.provider.api_style(), &body).ok_or_else(|| {
            VoterError::AdapterMalformedResponse("response contained no text".to_string())
        })?;

        parse_vote_response(&self.id, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    fn settings(provider: LlmProvider) -> VoterSettings {
        let mut settings = VoterSettings::for_provider(provider);
        settings.api_key = Some("test-key".to_string());
        settings
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let settings = VoterSettings::for_provider(LlmProvider::Groq);
        let err = LlmVoter::new(&settings, Duration::from_secs(5)).unwrap_err();
        assert_eq!(
            err,
            VoterError::AdapterUnavailable("missing GROQ_API_KEY".to_string())
        );
    }

    #[test]
    fn test_endpoints_per_style() {
        let groq = LlmVoter::new(&settings(LlmProvider::Groq), Duration::from_secs(5)).unwrap();
        assert_eq!(groq.endpoint(), "https://api.groq.com/openai/v1/chat/completions");

        let claude = LlmVoter::new(&settings(LlmProvider::Anthropic), Duration::from_secs(5)).unwrap();
        assert_eq!(claude.endpoint(), "https://api.anthropic.com/v1/messages");

        let gemini = LlmVoter::new(&settings(LlmProvider::Gemini), Duration::from_secs(5)).unwrap();
        assert_eq!(
            gemini.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_bodies_carry_prompt() {
        let prompt = build_prompt("Did it rain in Paris on 2024-07-14?", Some("Use Meteo France"));
        assert!(prompt.contains("Context: Use Meteo France"));

        let openai = LlmVoter::new(&settings(LlmProvider::OpenAi), Duration::from_secs(5)).unwrap();
        let body = openai.request_body(&prompt);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][1]["content"], prompt.as_str());

        let gemini = LlmVoter::new(&settings(LlmProvider::Gemini), Duration::from_secs(5)).unwrap();
        let body = gemini.request_body(&prompt);
        assert_eq!(body["contents"][0]["parts"][0]["text"], prompt.as_str());
    }

    #[test]
    fn test_extract_text_per_style() {
        let openai = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"outcome\":\"YES\",\"confidence\":90}" } }]
        });
        let text = extract_text(ApiStyle::OpenAiChat, &openai).unwrap();
        assert_eq!(parse_vote_response("openai", text).unwrap().outcome, Outcome::Yes);

        let anthropic = serde_json::json!({
            "content": [{ "type": "text", "text": "OUTCOME: NO\nCONFIDENCE: 80" }]
        });
        assert_eq!(
            extract_text(ApiStyle::AnthropicMessages, &anthropic),
            Some("OUTCOME: NO\nCONFIDENCE: 80")
        );

        let gemini = serde_json::json!({ "candidates": [] });
        assert_eq!(extract_text(ApiStyle::GeminiGenerateContent, &gemini), None);
    }

    #[test]
    fn test_status_mapping() {
        let budget = Duration::from_secs(30);
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "", budget),
            VoterError::AdapterUnavailable("credentials rejected (HTTP 401)".to_string())
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "", budget),
            VoterError::AdapterUnavailable("rate limited".to_string())
        );
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "oops", budget),
            VoterError::AdapterUnavailable(msg) if msg == "HTTP 500: oops"
        ));
    }

    #[test]
    fn test_upstream_timeout_statuses_are_timeouts() {
        let budget = Duration::from_secs(20);
        for status in [StatusCode::REQUEST_TIMEOUT, StatusCode::GATEWAY_TIMEOUT] {
            assert_eq!(
                status_error(status, "", budget),
                VoterError::AdapterTimeout { after_ms: 20_000 }
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let mut settings = settings(LlmProvider::OpenAi);
        settings.base_url = "http://127.0.0.1:1".to_string();
        let voter = LlmVoter::new(&settings, Duration::from_secs(2)).unwrap();

        let err = voter.vote("Will it happen?", None).await.unwrap_err();
        assert!(matches!(err, VoterError::AdapterUnavailable(_)));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("claude".parse::<LlmProvider>(), Ok(LlmProvider::Anthropic));
        assert_eq!("OpenAI".parse::<LlmProvider>(), Ok(LlmProvider::OpenAi));
        assert!("oracle9000".parse::<LlmProvider>().is_err());
    }
}
