//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::clip::AudioClip;
use crate::config::{Config, SttProvider};
use crate::{Error, Result};

/// Default Gemini API base URL
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default `OpenAI` API base URL
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Turns one audio clip into text
///
/// Every failure is recoverable from the engine's point of view: the caller
/// apologizes and listens again.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a clip, consuming it
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential`, `Network`, `Service`, `Timeout` or
    /// `EmptyResult`
    async fn transcribe(&self, clip: AudioClip) -> Result<String>;
}

/// Build the transcriber selected in configuration
#[must_use]
pub fn transcriber_from_config(config: &Config) -> Box<dyn Transcriber> {
    let voice = &config.voice;
    match voice.stt_provider {
        SttProvider::Gemini => Box::new(GeminiTranscriber::new(
            copy_secret(config.api_keys.gemini.as_ref()),
            voice.stt_model.clone(),
            voice.stt_hint.clone(),
            voice.stt_base_url.clone(),
            voice.stt_timeout,
        )),
        SttProvider::Whisper => Box::new(WhisperTranscriber::new(
            copy_secret(config.api_keys.openai.as_ref()),
            voice.stt_model.clone(),
            voice.stt_hint.clone(),
            voice.stt_base_url.clone(),
            voice.stt_timeout,
        )),
    }
}

fn copy_secret(secret: Option<&SecretString>) -> Option<SecretString> {
    secret.map(|s| SecretString::from(s.expose_secret().to_string()))
}

pub(super) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Map a transport error, keeping timeouts distinct
fn transport_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(err)
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

/// Response from the Gemini `generateContent` API
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Extract the first candidate's text from a `generateContent` body
///
/// # Errors
///
/// Returns `EmptyResult` when there is no candidate or its text is blank
pub fn parse_gemini_response(body: &str) -> Result<String> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(Error::EmptyResult)
}

/// Transcribes speech via Gemini `generateContent` with inline audio
pub struct GeminiTranscriber {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    hint: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiTranscriber {
    /// Create a new Gemini transcriber
    ///
    /// A missing key is not an error here; each call reports
    /// `MissingCredential` so the engine can recover.
    #[must_use]
    pub fn new(
        api_key: Option<SecretString>,
        model: String,
        hint: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            api_key,
            model,
            hint,
            base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            timeout,
        }
    }
}

#[async_trait]
impl Transcriber for GeminiTranscriber {
    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(Error::MissingCredential("Gemini API key"))?;

        tracing::debug!(
            clip = %clip.handle(),
            audio_bytes = clip.bytes().len(),
            "starting Gemini transcription"
        );

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: &self.hint },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: clip.mime(),
                            data: base64::engine::general_purpose::STANDARD.encode(clip.bytes()),
                        },
                    },
                ],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                transport_error(e, self.timeout)
            })?;

        // Clip is released once the request is on the wire
        drop(clip);

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Gemini API error");
            return Err(Error::Service {
                status: status.as_u16(),
                body,
            });
        }

        let transcript = parse_gemini_response(&body)?;
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Response from `OpenAI` Whisper transcription API
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech via `OpenAI` Whisper
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    hint: String,
    base_url: String,
    timeout: Duration,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber
    #[must_use]
    pub fn new(
        api_key: Option<SecretString>,
        model: String,
        hint: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            api_key,
            model,
            hint,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            timeout,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, clip: AudioClip) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(Error::MissingCredential("OpenAI API key"))?;

        tracing::debug!(audio_bytes = clip.bytes().len(), "starting Whisper transcription");

        let mime = clip.mime();
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(clip.bytes().to_vec())
                    .file_name("audio.wav")
                    .mime_str(mime)
                    .map_err(|e| transport_error(e, self.timeout))?,
            )
            .text("model", self.model.clone())
            // Whisper takes free text as a style/vocabulary prompt
            .text("prompt", self.hint.clone());
        drop(clip);

        let response = self
            .client
            .post(format!(
                "{}/v1/audio/transcriptions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                transport_error(e, self.timeout)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Service {
                status: status.as_u16(),
                body,
            });
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let transcript = result.text.trim().to_string();
        if transcript.is_empty() {
            return Err(Error::EmptyResult);
        }

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_candidate_trimmed() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "  chat with Sam \n"}]}},
                {"content": {"parts": [{"text": "chat with Pam"}]}}
            ]
        }"#;
        assert_eq!(parse_gemini_response(body).unwrap(), "chat with Sam");
    }

    #[test]
    fn test_parse_missing_candidates_is_empty() {
        assert!(matches!(
            parse_gemini_response(r#"{"candidates": []}"#),
            Err(Error::EmptyResult)
        ));
        assert!(matches!(parse_gemini_response("{}"), Err(Error::EmptyResult)));
        assert!(matches!(
            parse_gemini_response(r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#),
            Err(Error::EmptyResult)
        ));
    }

    #[test]
    fn test_parse_garbage_is_serialization_error() {
        assert!(matches!(
            parse_gemini_response("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: "hint" },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "audio/wav",
                            data: "AAAA".to_string(),
                        },
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hint");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "audio/wav"
        );
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "AAAA");
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let stt = GeminiTranscriber::new(
            None,
            "gemini-2.0-flash".to_string(),
            "hint".to_string(),
            Some("http://127.0.0.1:9".to_string()),
            Duration::from_secs(1),
        );
        let clip = AudioClip::from_samples(&[0.1; 160], 16000).unwrap();

        assert!(matches!(
            stt.transcribe(clip).await,
            Err(Error::MissingCredential(_))
        ));
    }
}
