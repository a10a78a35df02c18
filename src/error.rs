//! Error types shared by the planning pipeline.

use std::fmt;

use thiserror::Error;

/// The two model-backed stages of an LP-planning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TextAnalysis,
    Diagram,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::TextAnalysis => write!(f, "text analysis"),
            Stage::Diagram => write!(f, "diagram"),
        }
    }
}

/// Failure of a single call to a model provider.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification used by the chat surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidRequest,
    ModelTransport,
    ModelOutput,
}

/// Terminal failure of one LP-planning request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LP planning request has an empty theme")]
    EmptyTheme,

    #[error("Prompt template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("{stage} model call failed: {source}")]
    ModelTransport {
        stage: Stage,
        #[source]
        source: ModelError,
    },

    #[error("{stage} model returned no usable output: {reason}")]
    ModelOutput { stage: Stage, reason: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) | PipelineError::Template(_) => ErrorKind::Configuration,
            PipelineError::EmptyTheme => ErrorKind::InvalidRequest,
            PipelineError::ModelTransport { .. } => ErrorKind::ModelTransport,
            PipelineError::ModelOutput { .. } => ErrorKind::ModelOutput,
        }
    }

    /// Message shown in the chat transcript.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Configuration(detail) => {
                format!("エラー: 設定が不足しています。{}", detail)
            }
            PipelineError::Template(e) => {
                format!("エラー: プロンプトの生成に失敗しました: {}", e)
            }
            PipelineError::EmptyTheme => {
                "LP企画のテーマが空です。「LP企画: 商品名やテーマ」のように入力してください。".to_string()
            }
            PipelineError::ModelTransport { stage, source } => {
                format!(
                    "エラー: {}の生成中にモデルAPIとの通信に失敗しました: {}",
                    stage_label(*stage),
                    source
                )
            }
            PipelineError::ModelOutput { stage, reason } => {
                format!(
                    "モデルは応答しましたが、{}として利用できる内容がありませんでした ({})。もう一度お試しください。",
                    stage_label(*stage),
                    reason
                )
            }
        }
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::TextAnalysis => "LP企画分析",
        Stage::Diagram => "SVG図",
    }
}

/// Why an uploaded reference file could not be used.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("file is empty")]
    Empty,

    #[error("could not decode text as UTF-8, Shift_JIS, EUC-JP or ISO-2022-JP")]
    Encoding,

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV has no data rows")]
    NoRows,

    #[error("no <svg> element found")]
    MalformedSvg,
}

/// Failure to build a presentation from a planning outcome.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Slide template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Failed to write presentation archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error while writing presentation: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not rasterize diagram: {0}")]
    Rasterize(String),
}
