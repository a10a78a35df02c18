// Defaults for every setting. Each one can be overridden through the matching
// environment variable or CLI flag (see config.rs).

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:12b";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_TEXT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_DIAGRAM_MAX_TOKENS: u32 = 16_000;
pub const DIAGRAM_TEMPERATURE: f32 = 0.1;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Rows of an uploaded CSV that are quoted verbatim in the analysis prompt.
pub const DEFAULT_CSV_SAMPLE_ROWS: usize = 10;
/// Most frequent values listed per categorical CSV column.
pub const CSV_TOP_VALUES: usize = 5;

pub const DEFAULT_RENDER_CHUNK_CHARS: usize = 1;
pub const DEFAULT_RENDER_DELAY_MS: u64 = 10;

pub const DEFAULT_PORT: u16 = 7860;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_TEMPLATE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");
pub const DEFAULT_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

/// Slide canvas requested from the diagram model (16:9).
pub const SLIDE_WIDTH: u32 = 800;
pub const SLIDE_HEIGHT: u32 = 450;

/// PowerPoint export canvas in EMU (13.333 x 7.5 in, 16:9).
pub const PPTX_SLIDE_WIDTH_EMU: i64 = 12_192_000;
pub const PPTX_SLIDE_HEIGHT_EMU: i64 = 6_858_000;
/// Scale applied when rasterizing the diagram for export.
pub const PPTX_DIAGRAM_SCALE: f32 = 2.0;
/// Body paragraphs per analysis slide before a new slide is started.
pub const PPTX_PARAGRAPHS_PER_SLIDE: usize = 5;
