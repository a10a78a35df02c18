//! Stage one: the three-part LP planning analysis.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::constants;
use crate::error::{PipelineError, Stage};
use crate::llm_interaction::{ModelClient, ModelRequest};
use crate::prompts;
use crate::reference::CsvExcerpt;

/// Output of the text stage: the model's response, unmodified.
///
/// Only [`TextAnalysisGenerator`] produces values of this type, so the diagram
/// stage can only ever run on a completed analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisText(String);

impl AnalysisText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(text: &str) -> Self {
        Self(text.to_string())
    }
}

pub struct TextAnalysisGenerator {
    client: Arc<dyn ModelClient>,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl TextAnalysisGenerator {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            max_tokens: constants::DEFAULT_TEXT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn build_request(
        &self,
        theme: &str,
        csv: Option<&CsvExcerpt>,
    ) -> Result<ModelRequest, PipelineError> {
        Ok(ModelRequest {
            system: None,
            prompt: prompts::analysis_prompt(theme, csv)?,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }

    #[instrument(skip(self, csv), fields(client = %self.client.name(), with_csv = csv.is_some()))]
    pub async fn generate(
        &self,
        theme: &str,
        csv: Option<&CsvExcerpt>,
    ) -> Result<AnalysisText, PipelineError> {
        let request = self.build_request(theme, csv)?;
        let text = self
            .client
            .generate(&request)
            .await
            .map_err(|source| PipelineError::ModelTransport {
                stage: Stage::TextAnalysis,
                source,
            })?;

        if text.trim().is_empty() {
            warn!("Text model returned an empty analysis");
            return Err(PipelineError::ModelOutput {
                stage: Stage::TextAnalysis,
                reason: "empty response".to_string(),
            });
        }

        info!(len = text.chars().count(), "Analysis generated");
        Ok(AnalysisText(text))
    }
}
