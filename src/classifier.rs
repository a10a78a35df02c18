//! Decides whether a chat message is an LP-planning request.

/// Label that opens an LP-planning command, e.g. `LP企画: クラウド会計`.
pub const LP_LABEL: &str = "LP企画";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Blank input; produces no reply.
    Empty,
    /// Anything else. Answered from canned replies, never sent to a model.
    Ordinary,
    /// `LP企画: <theme>`. The theme is trimmed and may be empty.
    LpPlanning { theme: String },
}

/// Classify a raw chat message.
///
/// The label match ignores ASCII case and surrounding whitespace and accepts
/// both `:` and the full-width `：` as the separator.
pub fn classify(message: &str) -> Intent {
    let text = message.trim_start();
    if text.trim().is_empty() {
        return Intent::Empty;
    }

    match strip_label(text) {
        Some(rest) => {
            let rest = rest.trim_start();
            let theme = rest
                .strip_prefix(':')
                .or_else(|| rest.strip_prefix('：'));
            match theme {
                Some(theme) => Intent::LpPlanning {
                    theme: theme.trim().to_string(),
                },
                None => Intent::Ordinary,
            }
        }
        None => Intent::Ordinary,
    }
}

fn strip_label(text: &str) -> Option<&str> {
    // "LP" is ASCII so a byte-length prefix comparison is safe.
    let head = text.get(..LP_LABEL.len())?;
    if head.eq_ignore_ascii_case(LP_LABEL) {
        Some(&text[LP_LABEL.len()..])
    } else {
        None
    }
}
