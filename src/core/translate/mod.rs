//! Out-of-band text translation over plain HTTP.
//!
//! The streaming path handles spoken input; typed text goes through the
//! token collaborator's translation endpoint instead, which is cheaper
//! than opening a realtime turn for it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(String),

    #[error("translation endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    text: &'a str,
    source_language: &'a str,
    target_language: &'a str,
}

/// A completed translation from the HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    #[serde(default)]
    pub detected_language: Option<String>,
}

/// Client for the collaborator's text-translation endpoint.
#[derive(Debug, Clone)]
pub struct TextTranslator {
    http: reqwest::Client,
    endpoint: String,
}

impl TextTranslator {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Translation, TranslateError> {
        let request = TranslateRequest {
            text,
            source_language,
            target_language,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| TranslateError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "translation rejected");
            return Err(TranslateError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Translation>()
            .await
            .map_err(|e| TranslateError::Request(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_translate_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(body_partial_json(json!({
                "text": "hello",
                "sourceLanguage": "en",
                "targetLanguage": "ne",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "translatedText": "नमस्ते",
                "detectedLanguage": "en",
            })))
            .mount(&server)
            .await;

        let translator = TextTranslator::new(
            reqwest::Client::new(),
            format!("{}/translate", server.uri()),
        );
        let translation = translator.translate("hello", "en", "ne").await.unwrap();
        assert_eq!(translation.translated_text, "नमस्ते");
        assert_eq!(translation.detected_language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let translator = TextTranslator::new(reqwest::Client::new(), server.uri());
        let err = translator.translate("hello", "en", "ne").await.unwrap_err();
        match err {
            TranslateError::Rejected { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
