//! The two-stage LP-planning pipeline: text analysis, then a diagram built
//! from that analysis. Stages run strictly in sequence; stage two takes the
//! [`AnalysisText`] produced by stage one.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::analysis::{AnalysisText, TextAnalysisGenerator};
use crate::config::Settings;
use crate::diagram::DiagramGenerator;
use crate::error::{PipelineError, Stage};
use crate::llm_interaction::{create_client, ModelClient};
use crate::reference::UploadedReferences;

/// Result of one successful LP-planning request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningOutcome {
    pub theme: String,
    pub analysis: String,
    pub diagram: String,
}

impl PlanningOutcome {
    /// Assistant transcript entry for this outcome.
    pub fn transcript_entry(&self) -> String {
        format!("### {} の法人向けLP企画分析\n\n{}", self.theme, self.analysis)
    }
}

/// Supplies a ready-to-run planner for each request.
pub trait PlannerSource {
    fn planner(&self) -> Result<LpPlanner, PipelineError>;
}

impl PlannerSource for Settings {
    fn planner(&self) -> Result<LpPlanner, PipelineError> {
        LpPlanner::from_settings(self)
    }
}

pub struct LpPlanner {
    analysis: TextAnalysisGenerator,
    diagram: DiagramGenerator,
}

impl LpPlanner {
    pub fn new(text: Arc<dyn ModelClient>, diagram: Arc<dyn ModelClient>) -> Self {
        Self {
            analysis: TextAnalysisGenerator::new(text),
            diagram: DiagramGenerator::new(diagram),
        }
    }

    /// Resolve both model clients. Any missing credential is reported here,
    /// before a single request is sent.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let text = create_client(&settings.text, Stage::TextAnalysis)?;
        let diagram = create_client(&settings.diagram, Stage::Diagram)?;
        Ok(Self {
            analysis: TextAnalysisGenerator::new(text)
                .with_limits(settings.text.max_tokens, settings.text.temperature),
            diagram: DiagramGenerator::new(diagram)
                .with_limits(settings.diagram.max_tokens, settings.diagram.temperature),
        })
    }

    /// Stage one.
    pub async fn analyze(
        &self,
        theme: &str,
        references: &UploadedReferences,
    ) -> Result<AnalysisText, PipelineError> {
        self.analysis.generate(theme, references.csv.as_ref()).await
    }

    /// Stage two. Requires the output of stage one.
    pub async fn draw(
        &self,
        theme: &str,
        analysis: &AnalysisText,
        references: &UploadedReferences,
    ) -> Result<String, PipelineError> {
        self.diagram
            .generate(theme, analysis, references.svg.as_ref())
            .await
    }

    #[instrument(skip(self, references), fields(csv = references.csv.is_some(), svg = references.svg.is_some()))]
    pub async fn plan(
        &self,
        theme: &str,
        references: &UploadedReferences,
    ) -> Result<PlanningOutcome, PipelineError> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(PipelineError::EmptyTheme);
        }

        info!("Stage 1/2: text analysis");
        let analysis = self.analyze(theme, references).await?;

        info!("Stage 2/2: diagram");
        let diagram = self.draw(theme, &analysis, references).await?;

        Ok(PlanningOutcome {
            theme: theme.to_string(),
            analysis: analysis.into_string(),
            diagram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::ScriptedClient;
    use crate::error::ModelError;

    const ANALYSIS: &str = "1. ターゲットの分析\n中堅企業\n2. 訴求軸の検討\n運用負荷\n3. 訴求シナリオの検討\n課題→解決";

    #[tokio::test]
    async fn test_plan_runs_both_stages_in_order() {
        let text = ScriptedClient::new(vec![Ok(ANALYSIS.to_string())]);
        let diagram = ScriptedClient::new(vec![Ok(
            "説明\n<svg width=\"800\" height=\"450\"><text>LP</text></svg>".to_string(),
        )]);
        let planner = LpPlanner::new(text.clone(), diagram.clone());

        let outcome = planner
            .plan("  クラウドセキュリティサービス ", &UploadedReferences::default())
            .await
            .unwrap();

        assert_eq!(outcome.theme, "クラウドセキュリティサービス");
        assert_eq!(outcome.analysis, ANALYSIS);
        assert_eq!(outcome.diagram, "<svg width=\"800\" height=\"450\"><text>LP</text></svg>");
        assert_eq!(text.calls(), 1);
        assert_eq!(diagram.calls(), 1);
        assert!(diagram.prompts.lock().unwrap()[0].contains(ANALYSIS));
    }

    #[tokio::test]
    async fn test_text_failure_skips_diagram_stage() {
        let text = ScriptedClient::new(vec![Err(ModelError::Api {
            status: 429,
            message: "quota".to_string(),
        })]);
        let diagram = ScriptedClient::new(vec![Ok("<svg></svg>".to_string())]);
        let planner = LpPlanner::new(text, diagram.clone());

        let err = planner
            .plan("テーマ", &UploadedReferences::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelTransport { stage: Stage::TextAnalysis, .. }));
        assert_eq!(diagram.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_theme_never_calls_models() {
        let text = ScriptedClient::new(vec![]);
        let diagram = ScriptedClient::new(vec![]);
        let planner = LpPlanner::new(text.clone(), diagram.clone());

        let err = planner
            .plan("   ", &UploadedReferences::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTheme));
        assert_eq!(text.calls(), 0);
        assert_eq!(diagram.calls(), 0);
    }

    #[tokio::test]
    async fn test_references_reach_their_stages() {
        let mut references = UploadedReferences::default();
        references
            .replace_csv("業種,従業員数\n製造,300\n".as_bytes(), 10)
            .unwrap();
        references
            .replace_svg(b"<svg><g id=\"layout-ref\"/></svg>")
            .unwrap();

        let text = ScriptedClient::new(vec![Ok(ANALYSIS.to_string())]);
        let diagram = ScriptedClient::new(vec![Ok("<svg></svg>".to_string())]);
        let planner = LpPlanner::new(text.clone(), diagram.clone());
        planner.plan("テーマ", &references).await.unwrap();

        let text_prompt = text.prompts.lock().unwrap()[0].clone();
        let diagram_prompt = diagram.prompts.lock().unwrap()[0].clone();
        assert!(text_prompt.contains("CSVデータの概要"));
        assert!(!text_prompt.contains("layout-ref"));
        assert!(diagram_prompt.contains("layout-ref"));
        assert!(!diagram_prompt.contains("CSVデータの概要"));
    }

    #[test]
    fn test_transcript_entry_format() {
        let outcome = PlanningOutcome {
            theme: "勤怠管理".to_string(),
            analysis: "本文".to_string(),
            diagram: "<svg></svg>".to_string(),
        };
        assert_eq!(outcome.transcript_entry(), "### 勤怠管理 の法人向けLP企画分析\n\n本文");
    }

    #[test]
    fn test_settings_without_keys_fail_before_any_call() {
        let settings = Settings::default();
        let err = settings.planner().err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("GOOGLE_API_KEY")));
    }
}
