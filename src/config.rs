//! Runtime settings, assembled from CLI flags and environment variables.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::constants;
use crate::error::{PipelineError, Stage};
use crate::session::ClearPolicy;

/// Hosted (or local) model API that serves a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Gemini,
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Gemini => constants::DEFAULT_GEMINI_URL,
            Provider::Anthropic => constants::DEFAULT_ANTHROPIC_URL,
            Provider::Ollama => constants::DEFAULT_OLLAMA_URL,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => constants::DEFAULT_GEMINI_MODEL,
            Provider::Anthropic => constants::DEFAULT_ANTHROPIC_MODEL,
            Provider::Ollama => constants::DEFAULT_OLLAMA_MODEL,
        }
    }

    /// Environment variable holding the credential, if the provider needs one.
    pub fn key_env(self) -> Option<&'static str> {
        match self {
            Provider::Gemini => Some("GOOGLE_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Ollama => write!(f, "ollama"),
        }
    }
}

/// Connection settings for the model serving one stage.
#[derive(Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ModelSettings {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            api_key: None,
            max_tokens: constants::DEFAULT_TEXT_MAX_TOKENS,
            temperature: None,
            timeout: Duration::from_secs(constants::DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// The credential this stage needs, or a configuration error naming the
    /// missing variable. Providers without credentials yield `None`.
    pub fn credential(&self, stage: Stage) -> Result<Option<&str>, PipelineError> {
        let Some(var) = self.provider.key_env() else {
            return Ok(None);
        };
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(PipelineError::Configuration(format!(
                "{} の {} プロバイダーには環境変数 {} の設定が必要です",
                stage, self.provider, var
            ))),
        }
    }
}

/// Everything the session, pipeline and surfaces need at runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    pub text: ModelSettings,
    pub diagram: ModelSettings,
    pub csv_sample_rows: usize,
    pub chunk_chars: usize,
    pub render_delay: Duration,
    pub clear_policy: ClearPolicy,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let mut diagram = ModelSettings::new(Provider::Anthropic);
        diagram.max_tokens = constants::DEFAULT_DIAGRAM_MAX_TOKENS;
        diagram.temperature = Some(constants::DIAGRAM_TEMPERATURE);
        Self {
            text: ModelSettings::new(Provider::Gemini),
            diagram,
            csv_sample_rows: constants::DEFAULT_CSV_SAMPLE_ROWS,
            chunk_chars: constants::DEFAULT_RENDER_CHUNK_CHARS,
            render_delay: Duration::from_millis(constants::DEFAULT_RENDER_DELAY_MS),
            clear_policy: ClearPolicy::default(),
            template_dir: PathBuf::from(constants::DEFAULT_TEMPLATE_DIR),
            static_dir: PathBuf::from(constants::DEFAULT_STATIC_DIR),
        }
    }
}

/// Command-line / environment view of [`Settings`].
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Provider for the text analysis stage.
    #[arg(long, global = true, env = "LP_TEXT_PROVIDER", value_enum, default_value_t = Provider::Gemini)]
    pub text_provider: Provider,

    /// Model name for the text analysis stage (provider default if unset).
    #[arg(long, global = true, env = "LP_TEXT_MODEL")]
    pub text_model: Option<String>,

    /// Base URL of the text provider API (provider default if unset).
    #[arg(long, global = true, env = "LP_TEXT_BASE_URL")]
    pub text_base_url: Option<String>,

    /// Provider for the diagram stage.
    #[arg(long, global = true, env = "LP_DIAGRAM_PROVIDER", value_enum, default_value_t = Provider::Anthropic)]
    pub diagram_provider: Provider,

    /// Model name for the diagram stage (provider default if unset).
    #[arg(long, global = true, env = "LP_DIAGRAM_MODEL")]
    pub diagram_model: Option<String>,

    /// Base URL of the diagram provider API (provider default if unset).
    #[arg(long, global = true, env = "LP_DIAGRAM_BASE_URL")]
    pub diagram_base_url: Option<String>,

    #[arg(long, global = true, env = "GOOGLE_API_KEY", hide_env_values = true, hide = true)]
    pub google_api_key: Option<String>,

    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true, hide = true)]
    pub anthropic_api_key: Option<String>,

    /// HTTP timeout for each model call, in seconds.
    #[arg(long, global = true, env = "LP_HTTP_TIMEOUT_SECS", default_value_t = constants::DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,

    /// Rows of an uploaded CSV quoted in the analysis prompt.
    #[arg(long, global = true, env = "LP_CSV_SAMPLE_ROWS", default_value_t = constants::DEFAULT_CSV_SAMPLE_ROWS)]
    pub csv_sample_rows: usize,

    /// Characters emitted per typewriter increment.
    #[arg(long, global = true, env = "LP_RENDER_CHUNK_CHARS", default_value_t = constants::DEFAULT_RENDER_CHUNK_CHARS)]
    pub chunk_chars: usize,

    /// Delay between typewriter increments, in milliseconds.
    #[arg(long, global = true, env = "LP_RENDER_DELAY_MS", default_value_t = constants::DEFAULT_RENDER_DELAY_MS)]
    pub render_delay_ms: u64,

    /// Keep uploaded CSV/SVG references when the chat is cleared.
    #[arg(long, global = true, env = "LP_KEEP_UPLOADS_ON_CLEAR")]
    pub keep_uploads_on_clear: bool,

    #[arg(long, global = true, env = "LP_TEMPLATE_DIR", default_value = constants::DEFAULT_TEMPLATE_DIR, hide = true)]
    pub template_dir: PathBuf,

    #[arg(long, global = true, env = "LP_STATIC_DIR", default_value = constants::DEFAULT_STATIC_DIR, hide = true)]
    pub static_dir: PathBuf,
}

impl SettingsArgs {
    fn key_for(&self, provider: Provider) -> Option<String> {
        match provider {
            Provider::Gemini => self.google_api_key.clone(),
            Provider::Anthropic => self.anthropic_api_key.clone(),
            Provider::Ollama => None,
        }
    }

    fn model_settings(
        &self,
        provider: Provider,
        model: &Option<String>,
        base_url: &Option<String>,
    ) -> ModelSettings {
        let mut settings = ModelSettings::new(provider);
        if let Some(model) = model {
            settings.model = model.clone();
        }
        if let Some(url) = base_url {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        settings.api_key = self.key_for(provider);
        settings.timeout = Duration::from_secs(self.http_timeout_secs);
        settings
    }
}

impl From<SettingsArgs> for Settings {
    fn from(args: SettingsArgs) -> Self {
        let text = args.model_settings(args.text_provider, &args.text_model, &args.text_base_url);

        let mut diagram =
            args.model_settings(args.diagram_provider, &args.diagram_model, &args.diagram_base_url);
        diagram.max_tokens = constants::DEFAULT_DIAGRAM_MAX_TOKENS;
        diagram.temperature = Some(constants::DIAGRAM_TEMPERATURE);

        Settings {
            text,
            diagram,
            csv_sample_rows: args.csv_sample_rows.max(1),
            chunk_chars: args.chunk_chars.max(1),
            render_delay: Duration::from_millis(args.render_delay_ms),
            clear_policy: if args.keep_uploads_on_clear {
                ClearPolicy::KeepReferences
            } else {
                ClearPolicy::DropReferences
            },
            template_dir: args.template_dir,
            static_dir: args.static_dir,
        }
    }
}
