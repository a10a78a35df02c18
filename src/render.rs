//! Typewriter-style rendering of finished replies.
//!
//! [`Typewriter::chunks`] is the pure producer: a lazy, finite sequence of
//! increments that concatenate back to the input. [`Typewriter::pace`] and
//! [`Typewriter::render`] add the fixed delay between increments.

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

/// One unit emitted to a chat surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RenderEvent {
    Text(String),
    /// A complete SVG document, emitted once and never split.
    Diagram(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Typewriter {
    chunk_chars: usize,
    delay: Duration,
}

impl Default for Typewriter {
    fn default() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Typewriter {
    /// `chunk_chars` below 1 is treated as 1.
    pub fn new(chunk_chars: usize, delay: Duration) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
            delay,
        }
    }

    pub fn chunk_chars(&self) -> usize {
        self.chunk_chars
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Split `text` into increments of at most `chunk_chars` characters.
    /// Calling this again restarts the sequence from the beginning.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            rest: text,
            size: self.chunk_chars,
        }
    }

    /// Increments of `text` with the configured delay between them.
    pub fn pace<'a>(&self, text: &'a str) -> impl Stream<Item = &'a str> + 'a {
        let delay = self.delay;
        stream::iter(self.chunks(text).enumerate()).then(move |(idx, chunk)| async move {
            if idx > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        })
    }

    /// Full reply: paced text increments, then the diagram in one piece, then
    /// [`RenderEvent::Done`].
    pub fn render<'a>(
        &self,
        text: &'a str,
        diagram: Option<&'a str>,
    ) -> impl Stream<Item = RenderEvent> + 'a {
        let tail = diagram
            .map(|svg| RenderEvent::Diagram(svg.to_string()))
            .into_iter()
            .chain(std::iter::once(RenderEvent::Done));

        self.pace(text)
            .map(|chunk| RenderEvent::Text(chunk.to_string()))
            .chain(stream::iter(tail))
    }
}

/// Iterator returned by [`Typewriter::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    size: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .char_indices()
            .nth(self.size)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "### クラウドセキュリティサービス の法人向けLP企画分析\n\n1. ターゲットの分析: 🚀 mid-size firms";

    #[test]
    fn test_chunks_reassemble_for_every_size() {
        let total = SAMPLE.chars().count();
        for size in 1..=total + 2 {
            let typewriter = Typewriter::new(size, Duration::ZERO);
            let chunks: Vec<&str> = typewriter.chunks(SAMPLE).collect();
            assert_eq!(chunks.concat(), SAMPLE, "size {size}");
            assert!(chunks.iter().all(|c| !c.is_empty() && c.chars().count() <= size));
            assert_eq!(chunks.len(), total.div_ceil(size));
        }
    }

    #[test]
    fn test_chunks_are_restartable() {
        let typewriter = Typewriter::new(3, Duration::ZERO);
        let first: Vec<&str> = typewriter.chunks(SAMPLE).collect();
        let second: Vec<&str> = typewriter.chunks(SAMPLE).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_chunk_size_is_one() {
        let typewriter = Typewriter::new(0, Duration::ZERO);
        assert_eq!(typewriter.chunk_chars(), 1);
        assert_eq!(typewriter.chunks("あいう").collect::<Vec<_>>(), vec!["あ", "い", "う"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert_eq!(Typewriter::default().chunks("").count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_waits_between_increments() {
        let typewriter = Typewriter::new(2, Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let chunks: Vec<&str> = typewriter.pace("abcdef").collect().await;
        assert_eq!(chunks, vec!["ab", "cd", "ef"]);
        // Two gaps for three increments.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_render_emits_diagram_atomically_after_text() {
        let typewriter = Typewriter::new(4, Duration::ZERO);
        let svg = "<svg width=\"800\" height=\"450\"></svg>";
        let events: Vec<RenderEvent> = typewriter.render("分析結果です", Some(svg)).collect().await;

        assert_eq!(
            events,
            vec![
                RenderEvent::Text("分析結果".to_string()),
                RenderEvent::Text("です".to_string()),
                RenderEvent::Diagram(svg.to_string()),
                RenderEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_render_without_diagram() {
        let events: Vec<RenderEvent> = Typewriter::default().render("ok", None).collect().await;
        assert_eq!(events.last(), Some(&RenderEvent::Done));
        assert!(!events.iter().any(|e| matches!(e, RenderEvent::Diagram(_))));
    }
}
