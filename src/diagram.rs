//! Stage two: the 16:9 SVG slide built from the analysis.

use std::sync::Arc;

use regex::Regex;
use tracing::{info, instrument, warn};

use crate::analysis::AnalysisText;
use crate::constants;
use crate::error::{PipelineError, Stage};
use crate::llm_interaction::{ModelClient, ModelRequest};
use crate::prompts;
use crate::reference::SvgReference;

lazy_static::lazy_static! {
    static ref SVG_BLOCK: Regex =
        Regex::new(r"(?is)<svg\b[^>]*>.*?</svg\s*>").expect("valid SVG pattern");
}

/// First complete `<svg …>…</svg>` block in `text`, or `None`.
///
/// Commentary and markdown fences around the block are discarded.
pub fn extract_svg(text: &str) -> Option<&str> {
    SVG_BLOCK.find(text).map(|m| m.as_str())
}

/// Placeholder shown in the diagram panel when no SVG could be produced.
pub fn fallback_svg() -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="100%" height="100%" fill="#f8f9fa"/><text x="50%" y="50%" text-anchor="middle" font-family="Arial, Helvetica, sans-serif" font-size="18" fill="#dc3545">SVGデータの生成に失敗しました。もう一度お試しください。</text></svg>"##,
        w = constants::SLIDE_WIDTH,
        h = constants::SLIDE_HEIGHT
    )
}

pub struct DiagramGenerator {
    client: Arc<dyn ModelClient>,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl DiagramGenerator {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            max_tokens: constants::DEFAULT_DIAGRAM_MAX_TOKENS,
            temperature: Some(constants::DIAGRAM_TEMPERATURE),
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
        analysis: &AnalysisText,
        reference: Option<&SvgReference>,
    ) -> Result<ModelRequest, PipelineError> {
        let prompt = prompts::diagram_prompt(
            theme,
            analysis.as_str(),
            reference.map(|r| r.markup.as_str()),
        )?;
        Ok(ModelRequest {
            system: Some(prompts::DIAGRAM_SYSTEM.to_string()),
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }

    #[instrument(skip_all, fields(client = %self.client.name(), with_reference = reference.is_some()))]
    pub async fn generate(
        &self,
        theme: &str,
        analysis: &AnalysisText,
        reference: Option<&SvgReference>,
    ) -> Result<String, PipelineError> {
        let request = self.build_request(theme, analysis, reference)?;
        let response = self
            .client
            .generate(&request)
            .await
            .map_err(|source| PipelineError::ModelTransport {
                stage: Stage::Diagram,
                source,
            })?;

        match extract_svg(&response) {
            Some(svg) => {
                info!(len = svg.len(), "SVG extracted from diagram response");
                Ok(svg.to_string())
            }
            None => {
                warn!(response_len = response.len(), "Diagram response contained no <svg> block");
                Err(PipelineError::ModelOutput {
                    stage: Stage::Diagram,
                    reason: "no <svg> block in response".to_string(),
                })
            }
        }
    }
}
