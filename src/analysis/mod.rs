//! The two model operations: the structured image report and the ELI5
//! rephrasing of a previous report.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::ApiConfig;
use crate::media;
use crate::provider::{CompletionProvider, Detail, ImagePayload, LlmError};

/// Fixed instruction sent with every image analysis.
pub const REPORT_PROMPT: &str = "You're a medical expert.

You'll get medical images.

You must analyze them in a structured report.

Always give a disclaimer: 'Consult with a doctor before making decisions'.

If unclear, say 'Unable to determine based on image'.";

/// Wrap a report in the fixed simplification instruction.
pub fn simplify_prompt(report: &str) -> String {
    format!("Explain this like I'm 5 years old:\n\n{}", report)
}

/// Runs analysis and simplification over an injected provider.
pub struct Analyst {
    provider: Arc<dyn CompletionProvider>,
    api: ApiConfig,
}

impl Analyst {
    pub fn new(provider: Arc<dyn CompletionProvider>, api: ApiConfig) -> Self {
        Self { provider, api }
    }

    /// Encode the image at `path`, send it with the fixed report prompt
    /// to the vision model and return the first choice's text.
    pub async fn analyze(&self, path: &Path, media_type: &str) -> Result<String, LlmError> {
        let payload = media::encode_file(path).await?;
        let image = ImagePayload {
            data_uri: media::data_uri(media_type, &payload),
            detail: Detail::High,
        };

        let report = self
            .provider
            .vision_completion(
                &self.api.vision_model,
                REPORT_PROMPT,
                &image,
                self.api.report_max_tokens,
            )
            .await?;

        info!(model = %self.api.vision_model, chars = report.len(), "analysis complete");
        Ok(report)
    }

    /// Send a previous report wrapped in the ELI5 instruction to the
    /// text model and return the first choice's text.
    pub async fn simplify(&self, report: &str) -> Result<String, LlmError> {
        let prompt = simplify_prompt(report);

        let simplified = self
            .provider
            .text_completion(&self.api.text_model, &prompt, self.api.simplify_max_tokens)
            .await?;

        info!(model = %self.api.text_model, chars = simplified.len(), "simplification complete");
        Ok(simplified)
    }
}
