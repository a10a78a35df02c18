//! Per-session chat state: transcript, held uploads and the last diagram.

use serde::Serialize;
use tracing::{error, info};

use crate::classifier::{classify, Intent};
use crate::config::Settings;
use crate::error::{PipelineError, ReferenceError};
use crate::pipeline::{PlannerSource, PlanningOutcome};
use crate::reference::{CsvExcerpt, SvgReference, UploadedReferences};
use crate::replies::canned_reply;

/// What clearing the chat does to the uploaded reference files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearPolicy {
    /// Clear drops uploads along with the transcript.
    #[default]
    DropReferences,
    /// Uploads survive a clear until replaced or the session ends.
    KeepReferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Outcome of one call to [`SessionContext::respond`].
#[derive(Debug)]
pub enum Reply {
    /// Blank input; nothing was recorded.
    Ignored,
    Canned(String),
    Planned(PlanningOutcome),
    Failed(PipelineError),
}

impl Reply {
    /// Text appended to the transcript for this reply.
    pub fn text(&self) -> Option<String> {
        match self {
            Reply::Ignored => None,
            Reply::Canned(text) => Some(text.clone()),
            Reply::Planned(outcome) => Some(outcome.transcript_entry()),
            Reply::Failed(err) => Some(err.user_message()),
        }
    }

    pub fn diagram(&self) -> Option<&str> {
        match self {
            Reply::Planned(outcome) => Some(&outcome.diagram),
            _ => None,
        }
    }
}

/// Serializable view used by the web API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub transcript: Vec<ChatMessage>,
    pub has_csv: bool,
    pub has_svg: bool,
    pub has_diagram: bool,
    pub clear_policy: ClearPolicy,
}

#[derive(Debug)]
pub struct SessionContext {
    transcript: Vec<ChatMessage>,
    references: UploadedReferences,
    last_outcome: Option<PlanningOutcome>,
    csv_sample_rows: usize,
    clear_policy: ClearPolicy,
}

impl SessionContext {
    pub fn new(settings: &Settings) -> Self {
        Self {
            transcript: Vec::new(),
            references: UploadedReferences::default(),
            last_outcome: None,
            csv_sample_rows: settings.csv_sample_rows,
            clear_policy: settings.clear_policy,
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn references(&self) -> &UploadedReferences {
        &self.references
    }

    pub fn last_diagram(&self) -> Option<&str> {
        self.last_outcome.as_ref().map(|outcome| outcome.diagram.as_str())
    }

    /// Most recent successful plan, kept for export.
    pub fn last_outcome(&self) -> Option<&PlanningOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn clear_policy(&self) -> ClearPolicy {
        self.clear_policy
    }

    pub fn upload_csv(&mut self, bytes: &[u8]) -> Result<&CsvExcerpt, ReferenceError> {
        self.references.replace_csv(bytes, self.csv_sample_rows)
    }

    pub fn upload_svg(&mut self, bytes: &[u8]) -> Result<&SvgReference, ReferenceError> {
        self.references.replace_svg(bytes)
    }

    /// Answer one chat message. Ordinary messages never reach `planners`.
    pub async fn respond<P>(&mut self, message: &str, planners: &P) -> Reply
    where
        P: PlannerSource + ?Sized,
    {
        let reply = match classify(message) {
            Intent::Empty => return Reply::Ignored,
            Intent::Ordinary => Reply::Canned(canned_reply(message).to_string()),
            Intent::LpPlanning { theme } => {
                info!(%theme, "LP planning request");
                match self.plan(&theme, planners).await {
                    Ok(outcome) => {
                        self.last_outcome = Some(outcome.clone());
                        Reply::Planned(outcome)
                    }
                    Err(err) => {
                        error!(kind = ?err.kind(), error = %err, "LP planning request failed");
                        Reply::Failed(err)
                    }
                }
            }
        };

        self.push(Role::User, message.trim().to_string());
        if let Some(text) = reply.text() {
            self.push(Role::Assistant, text);
        }
        reply
    }

    async fn plan<P>(&self, theme: &str, planners: &P) -> Result<PlanningOutcome, PipelineError>
    where
        P: PlannerSource + ?Sized,
    {
        if theme.is_empty() {
            return Err(PipelineError::EmptyTheme);
        }
        let planner = planners.planner()?;
        planner.plan(theme, &self.references).await
    }

    fn push(&mut self, role: Role, content: String) {
        self.transcript.push(ChatMessage { role, content });
    }

    /// Empty the transcript and diagram; uploads follow the clear policy.
    /// Clearing an already clear session changes nothing.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.last_outcome = None;
        if self.clear_policy == ClearPolicy::DropReferences {
            self.references.clear();
        }
        info!(policy = ?self.clear_policy, "Session cleared");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transcript: self.transcript.clone(),
            has_csv: self.references.csv.is_some(),
            has_svg: self.references.svg.is_some(),
            has_diagram: self.last_outcome.is_some(),
            clear_policy: self.clear_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::ScriptedClient;
    use crate::pipeline::LpPlanner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Planner source backed by scripted clients; counts how often a planner
    /// was requested.
    struct FakePlanners {
        text: Arc<ScriptedClient>,
        diagram: Arc<ScriptedClient>,
        built: AtomicUsize,
    }

    impl FakePlanners {
        fn new(text: Vec<Result<String, crate::error::ModelError>>, diagram: Vec<Result<String, crate::error::ModelError>>) -> Self {
            Self {
                text: ScriptedClient::new(text),
                diagram: ScriptedClient::new(diagram),
                built: AtomicUsize::new(0),
            }
        }
    }

    impl PlannerSource for FakePlanners {
        fn planner(&self) -> Result<LpPlanner, PipelineError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(LpPlanner::new(self.text.clone(), self.diagram.clone()))
        }
    }

    fn session(policy: ClearPolicy) -> SessionContext {
        let settings = Settings {
            clear_policy: policy,
            ..Settings::default()
        };
        SessionContext::new(&settings)
    }

    #[tokio::test]
    async fn test_ordinary_messages_never_reach_models() {
        let planners = FakePlanners::new(vec![], vec![]);
        let mut session = session(ClearPolicy::DropReferences);

        for message in ["こんにちは", "使い方", "LP企画について", "random text"] {
            let reply = session.respond(message, &planners).await;
            assert!(matches!(reply, Reply::Canned(_)));
        }
        assert_eq!(planners.built.load(Ordering::SeqCst), 0);
        assert_eq!(planners.text.calls() + planners.diagram.calls(), 0);
        assert_eq!(session.transcript().len(), 8);
    }

    #[tokio::test]
    async fn test_blank_message_is_ignored() {
        let planners = FakePlanners::new(vec![], vec![]);
        let mut session = session(ClearPolicy::DropReferences);
        assert!(matches!(session.respond("  ", &planners).await, Reply::Ignored));
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_planning_request_records_analysis_and_diagram() {
        let planners = FakePlanners::new(
            vec![Ok("分析本文".to_string())],
            vec![Ok("<svg id=\"slide\"></svg>".to_string())],
        );
        let mut session = session(ClearPolicy::DropReferences);

        let reply = session
            .respond("LP企画: クラウドセキュリティサービス", &planners)
            .await;
        assert_eq!(reply.diagram(), Some("<svg id=\"slide\"></svg>"));
        assert_eq!(session.last_diagram(), Some("<svg id=\"slide\"></svg>"));
        let kept = session.last_outcome().unwrap();
        assert_eq!(kept.theme, "クラウドセキュリティサービス");
        assert_eq!(kept.analysis, "分析本文");

        let transcript = session.transcript();
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "LP企画: クラウドセキュリティサービス");
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(
            transcript[1].content,
            "### クラウドセキュリティサービス の法人向けLP企画分析\n\n分析本文"
        );
    }

    #[tokio::test]
    async fn test_failure_is_reported_in_transcript() {
        let planners = FakePlanners::new(vec![Ok("分析".to_string())], vec![Ok("no svg here".to_string())]);
        let mut session = session(ClearPolicy::DropReferences);

        let reply = session.respond("LP企画: テーマ", &planners).await;
        match reply {
            Reply::Failed(err) => assert_eq!(err.kind(), crate::error::ErrorKind::ModelOutput),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(session.last_diagram().is_none());
        assert!(session.transcript()[1].content.contains("SVG図"));
    }

    #[tokio::test]
    async fn test_empty_theme_does_not_build_planner() {
        let planners = FakePlanners::new(vec![], vec![]);
        let mut session = session(ClearPolicy::DropReferences);
        let reply = session.respond("LP企画:", &planners).await;
        assert!(matches!(reply, Reply::Failed(PipelineError::EmptyTheme)));
        assert_eq!(planners.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_as_configuration() {
        let mut session = session(ClearPolicy::DropReferences);
        let reply = session
            .respond("LP企画: テーマ", &Settings::default())
            .await;
        assert!(matches!(reply, Reply::Failed(PipelineError::Configuration(_))));
    }

    async fn populated(policy: ClearPolicy) -> SessionContext {
        let planners = FakePlanners::new(vec![Ok("分析".to_string())], vec![Ok("<svg></svg>".to_string())]);
        let mut session = session(policy);
        session.upload_csv("a,b\n1,2\n".as_bytes()).unwrap();
        session.upload_svg(b"<svg></svg>").unwrap();
        session.respond("LP企画: テーマ", &planners).await;
        session
    }

    #[tokio::test]
    async fn test_clear_drops_references_and_is_idempotent() {
        let mut session = populated(ClearPolicy::DropReferences).await;
        session.clear();
        let once = serde_json::to_value(session.snapshot()).unwrap();
        session.clear();
        let twice = serde_json::to_value(session.snapshot()).unwrap();

        assert_eq!(once, twice);
        assert!(session.transcript().is_empty());
        assert!(session.last_diagram().is_none());
        assert!(session.references().is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_references_and_is_idempotent() {
        let mut session = populated(ClearPolicy::KeepReferences).await;
        session.clear();
        let once = serde_json::to_value(session.snapshot()).unwrap();
        session.clear();
        let twice = serde_json::to_value(session.snapshot()).unwrap();

        assert_eq!(once, twice);
        assert!(session.transcript().is_empty());
        assert!(session.last_diagram().is_none());
        assert!(session.references().csv.is_some());
        assert!(session.references().svg.is_some());
    }

    #[test]
    fn test_failed_upload_is_soft() {
        let mut session = session(ClearPolicy::DropReferences);
        assert!(session.upload_svg(b"not svg").is_err());
        assert!(!session.snapshot().has_svg);
        assert!(session.transcript().is_empty());
    }
}
