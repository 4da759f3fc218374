//! [`AnthropicVision`] – flask-volume queries against the Anthropic
//! Messages API.
//!
//! One JPEG and a fixed prompt go out; the first text block of the reply
//! comes back verbatim. Number extraction lives in [`crate::volume`].
//!
//! # Example
//!
//! ```rust,no_run
//! use labrig_runtime::vision::{AnthropicVision, VolumeModel};
//!
//! # async fn demo(jpeg: Vec<u8>) -> Result<(), labrig_runtime::vision::VisionError> {
//! let vision = AnthropicVision::new(
//!     "https://api.anthropic.com",
//!     "claude-haiku-4-5",
//!     "sk-…",
//!     10,
//!     std::time::Duration::from_secs(30),
//! )?;
//! let text = vision.estimate(&jpeg).await?;
//! println!("model said {text}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const VOLUME_PROMPT: &str = "Give me the volume of liquid and/or foam in the flask in \
milliliters as just the number. Use the graduation lines for reference. The height of \
substance may be higher than the highest marking. Infer the volume if between markings. \
The angle of the image may be skewed.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("anthropic_api_key_missing")]
    MissingApiKey,
}

/// Anything that can turn a webcam JPEG into a free-text volume answer.
#[async_trait]
pub trait VolumeModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn estimate(&self, jpeg: &[u8]) -> Result<String, VisionError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: [ContentBlock<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Image { source: ImageSource },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

fn build_request<'a>(model: &'a str, max_tokens: u32, jpeg: &[u8]) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens,
        temperature: 0.0,
        messages: [UserMessage {
            role: "user",
            content: [
                ContentBlock::Text {
                    text: VOLUME_PROMPT,
                },
                ContentBlock::Image {
                    source: ImageSource {
                        kind: "base64",
                        media_type: "image/jpeg",
                        data: STANDARD.encode(jpeg),
                    },
                },
            ],
        }],
    }
}

fn first_text(response: MessagesResponse) -> Result<String, VisionError> {
    response
        .content
        .into_iter()
        .next()
        .map(|block| block.text.unwrap_or_default().trim().to_string())
        .ok_or_else(|| VisionError::BadResponse("empty content array".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// AnthropicVision
// ─────────────────────────────────────────────────────────────────────────────

pub struct AnthropicVision {
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicVision {
    /// Build a client whose every call gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`VisionError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
            client,
        })
    }
}

#[async_trait]
impl VolumeModel for AnthropicVision {
    fn model_name(&self) -> &str {
        &self.model
    }

    /// # Errors
    ///
    /// [`VisionError::MissingApiKey`] without a key, [`VisionError::Http`]
    /// for transport or status failures, [`VisionError::BadResponse`] for an
    /// empty reply.
    async fn estimate(&self, jpeg: &[u8]) -> Result<String, VisionError> {
        if self.api_key.trim().is_empty() {
            return Err(VisionError::MissingApiKey);
        }
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = build_request(&self.model, self.max_tokens, jpeg);

        let response: MessagesResponse = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        first_text(response)
    }
}
