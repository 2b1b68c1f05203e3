//! Remote formula-to-markup OCR.
//!
//! Formula crops are PNG-encoded, base64 wrapped, and posted to an HTTP service that
//! answers with LaTeX. Every failure surfaces as [`FormulaProviderError`] so the extractor
//! can fall back to plain OCR.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Failures of the formula OCR provider. Never fatal; the extractor downgrades them.
#[derive(Debug, Error)]
pub enum FormulaProviderError {
    /// The crop could not be encoded for transport.
    #[error("failed to encode formula crop: {0}")]
    Encoding(String),
    /// The service could not be reached.
    #[error("formula OCR service unavailable: {0}")]
    Unavailable(String),
    /// The service answered with an error status.
    #[error("formula OCR service returned {status}: {body}")]
    Status {
        /// HTTP status returned by the service.
        status: reqwest::StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The service answered with something other than markup.
    #[error("malformed formula OCR response: {0}")]
    InvalidResponse(String),
    /// The service recognised nothing.
    #[error("formula OCR returned empty markup")]
    Empty,
}

/// Formula-to-markup recognition capability provider.
#[async_trait]
pub trait FormulaRecognizer: Send + Sync {
    /// Recognise the mathematical expression in a crop, returning markup without delimiters.
    async fn recognize_math(&self, crop: &DynamicImage) -> Result<String, FormulaProviderError>;
}

/// [`FormulaRecognizer`] backed by an HTTP service.
pub struct HttpFormulaRecognizer {
    http: Client,
    endpoint: String,
}

impl HttpFormulaRecognizer {
    /// Per-request timeout; a slow service is reported as a failure and falls back.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Build a recognizer that posts crops to `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, FormulaProviderError> {
        let http = Client::builder()
            .user_agent("mathdoc-rag/formula-ocr")
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|error| FormulaProviderError::Unavailable(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FormulaResponse {
    #[serde(default)]
    latex: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn encode_png_base64(crop: &DynamicImage) -> Result<String, FormulaProviderError> {
    let mut png_bytes: Vec<u8> = Vec::new();
    crop.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|error| FormulaProviderError::Encoding(error.to_string()))?;
    Ok(general_purpose::STANDARD.encode(png_bytes))
}

#[async_trait]
impl FormulaRecognizer for HttpFormulaRecognizer {
    async fn recognize_math(&self, crop: &DynamicImage) -> Result<String, FormulaProviderError> {
        let payload = json!({
            "image": encode_png_base64(crop)?,
            "format": "latex",
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                FormulaProviderError::Unavailable(format!(
                    "failed to reach {}: {error}",
                    self.endpoint
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FormulaProviderError::Status { status, body });
        }

        let body: FormulaResponse = response
            .json()
            .await
            .map_err(|error| FormulaProviderError::InvalidResponse(error.to_string()))?;

        let markup = body
            .latex
            .or(body.text)
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        if markup.is_empty() {
            return Err(FormulaProviderError::Empty);
        }
        Ok(markup)
    }
}

/// Stand-in used when no formula OCR endpoint is configured; every formula falls back.
pub struct UnconfiguredFormulaRecognizer;

#[async_trait]
impl FormulaRecognizer for UnconfiguredFormulaRecognizer {
    async fn recognize_math(&self, _crop: &DynamicImage) -> Result<String, FormulaProviderError> {
        Err(FormulaProviderError::Unavailable(
            "no formula OCR endpoint configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn crop() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    #[tokio::test]
    async fn returns_trimmed_latex() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/predict")
                    .body_contains("\"format\":\"latex\"");
                then.status(200).json_body(json!({ "latex": "  x^2 + y^2 = 1 " }));
            })
            .await;

        let recognizer = HttpFormulaRecognizer::new(&server.url("/predict")).expect("client");
        let markup = recognizer.recognize_math(&crop()).await.expect("markup");

        mock.assert_async().await;
        assert_eq!(markup, "x^2 + y^2 = 1");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/predict");
                then.status(503).body("warming up");
            })
            .await;

        let recognizer = HttpFormulaRecognizer::new(&server.url("/predict")).expect("client");
        let error = recognizer.recognize_math(&crop()).await.expect_err("failure");
        assert!(
            matches!(error, FormulaProviderError::Status { status, .. } if status.as_u16() == 503)
        );
    }

    #[tokio::test]
    async fn empty_markup_is_a_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/predict");
                then.status(200).json_body(json!({ "text": "   " }));
            })
            .await;

        let recognizer = HttpFormulaRecognizer::new(&server.url("/predict")).expect("client");
        let error = recognizer.recognize_math(&crop()).await.expect_err("failure");
        assert!(matches!(error, FormulaProviderError::Empty));
    }

    #[tokio::test]
    async fn unconfigured_recognizer_always_fails() {
        let error = UnconfiguredFormulaRecognizer
            .recognize_math(&crop())
            .await
            .expect_err("failure");
        assert!(matches!(error, FormulaProviderError::Unavailable(_)));
    }
}
