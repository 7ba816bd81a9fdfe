use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::http::{execute_with_deadline, HttpRequest, HttpTransport, ValidatedUrl};
use crate::voice_intent::ExtractionError;

/// A language-inference backend that answers a system instruction plus
/// one user message with free text.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, system: &str, transcript: &str) -> Result<String, ExtractionError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct HttpInferenceClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: ValidatedUrl,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: ValidatedUrl,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint,
            model: model.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    #[instrument(skip_all, fields(model = %self.model, transcript_len = transcript.len()))]
    async fn complete(&self, system: &str, transcript: &str) -> Result<String, ExtractionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: transcript,
                },
            ],
            temperature: 0.0,
        };

        let mut request = HttpRequest::post(self.endpoint.clone())
            .with_json(&body)?
            .with_header("Accept", "application/json")?
            .with_timeout(self.timeout)?;
        if let Some(key) = &self.api_key {
            request = request.with_header(
                "Authorization",
                format!("Bearer {}", key.expose_secret()),
            )?;
        }

        let response = execute_with_deadline(self.transport.as_ref(), request).await?;
        if !response.is_success() {
            return Err(ExtractionError::Status {
                status: response.status(),
                body_preview: response.body_preview(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::MalformedResponse("response has no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::http::{HttpError, HttpHeaders, HttpResponse};
    use std::sync::Mutex;

    struct RecordingTransport {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse::new(
                self.status,
                HttpHeaders::new(),
                self.body.as_bytes().to_vec(),
            ))
        }
    }

    fn client(transport: Arc<RecordingTransport>, key: Option<&str>) -> HttpInferenceClient {
        HttpInferenceClient::new(
            transport,
            ValidatedUrl::new("https://llm.example.com/v1/chat/completions").unwrap(),
            "test-model",
            key.map(|k| SecretString::new(k.to_string())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_complete_reads_first_choice() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            body: r#"{"choices":[{"message":{"role":"assistant","content":"{\"incidentType\":\"fire\"}"}}]}"#,
            seen: Mutex::new(Vec::new()),
        });

        let text = client(Arc::clone(&transport), Some("sk-test"))
            .complete("system", "fire near the village")
            .await
            .unwrap();
        assert_eq!(text, r#"{"incidentType":"fire"}"#);

        let seen = transport.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.headers().get("authorization"), Some("Bearer sk-test"));

        let body: serde_json::Value = serde_json::from_slice(request.body().unwrap()).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "fire near the village");
    }

    #[tokio::test]
    async fn test_complete_without_key_sends_no_auth() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            body: r#"{"choices":[{"message":{"content":"ok"}}]}"#,
            seen: Mutex::new(Vec::new()),
        });
        client(Arc::clone(&transport), None)
            .complete("s", "t")
            .await
            .unwrap();
        assert!(transport.seen.lock().unwrap()[0]
            .headers()
            .get("authorization")
            .is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let transport = Arc::new(RecordingTransport {
            status: 429,
            body: "rate limited",
            seen: Mutex::new(Vec::new()),
        });
        let result = client(transport, None).complete("s", "t").await;
        assert!(matches!(result, Err(ExtractionError::Status { status: 429, .. })));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            body: r#"{"choices":[]}"#,
            seen: Mutex::new(Vec::new()),
        });
        let result = client(transport, None).complete("s", "t").await;
        assert!(matches!(result, Err(ExtractionError::MalformedResponse(_))));
    }
}
