//! Cloud Translation v3 adapter, implementing `mt_client::Translator`.
//!
//! Ships behind the `gcp` feature so a build without cloud credentials
//! still compiles — the pipeline and rules engine are tested entirely
//! against the mock `Translator` instead.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::mt_client::{MtError, TranslateRequest, TranslateResponse, Translator};

pub struct GoogleTranslateV3 {
    http: Client,
    access_token: String,
}

impl GoogleTranslateV3 {
    pub fn new(http: Client, access_token: String) -> Self {
        Self { http, access_token }
    }
}

#[async_trait]
impl Translator for GoogleTranslateV3 {
    async fn translate_raw(&self, request: &TranslateRequest) -> Result<TranslateResponse, MtError> {
        let url = format!("https://translation.googleapis.com/v3/{}:translateText", request.parent);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| MtError::classify_and_build(None, None, &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let grpc_code = extract_grpc_code(&body);
            return Err(MtError::classify_and_build(Some(status.as_u16()), grpc_code, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| MtError::fatal(format!("failed to parse translate response: {e}")))?;

        let translation = body["translations"][0]["translatedText"]
            .as_str()
            .ok_or_else(|| MtError::fatal("missing translatedText in response"))?
            .to_string();

        let glossary_translation = body["glossaryTranslations"][0]["translatedText"]
            .as_str()
            .map(|s| s.to_string());

        Ok(TranslateResponse {
            translation,
            glossary_translation,
        })
    }
}

fn extract_grpc_code(body: &str) -> Option<u32> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed["error"]["code"].as_u64().map(|c| c as u32)
}

impl MtError {
    fn classify_and_build(status: Option<u16>, grpc_code: Option<u32>, message: &str) -> Self {
        match MtError::classify(status, grpc_code, message) {
            crate::mt_client::MtErrorKind::Retryable => MtError::retryable(message.to_string()),
            crate::mt_client::MtErrorKind::GlossaryMissing => MtError::glossary_missing(message.to_string()),
            crate::mt_client::MtErrorKind::Fatal => MtError::fatal(message.to_string()),
        }
    }
}
