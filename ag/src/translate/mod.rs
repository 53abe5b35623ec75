//! Log translation - free-text executor log lines into structured events
//!
//! A [`LogTranslator`] walks an ordered pattern table and classifies a line
//! by the first pattern that matches it. Lines matching nothing are dropped.
//! Translation is pure and never fails: a matched line whose fields cannot
//! be parsed still yields an event with placeholder values.
//!
//! The [`TranslatorLayer`] plugs the translator into `tracing`, so any log
//! line emitted inside a task session's span lands in that session's queue.

mod layer;
mod patterns;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use layer::{SESSION_SPAN, TranslatorLayer};
pub use patterns::{ARGS_MAX_CHARS, Extractor, Matcher, Pattern, RESULT_MAX_CHARS, THOUGHT_MAX_CHARS, default_patterns};

use crate::events::StreamEvent;

/// How much of a thought is captured
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThoughtCapture {
    /// Keep only the first line after the marker
    #[default]
    SingleLine,
    /// Keep everything after the marker
    MultiLine,
}

/// Knobs shared by all extractors
#[derive(Clone, Debug, Default)]
pub struct TranslateOptions {
    pub thought_capture: ThoughtCapture,
}

/// Ordered pattern engine converting log lines into [`StreamEvent`]s
#[derive(Clone, Debug)]
pub struct LogTranslator {
    patterns: Vec<Pattern>,
    options: TranslateOptions,
}

impl LogTranslator {
    /// Create a translator over a custom pattern table
    pub fn new(patterns: Vec<Pattern>, options: TranslateOptions) -> Self {
        debug!(pattern_count = patterns.len(), ?options, "LogTranslator::new: called");
        Self { patterns, options }
    }

    /// Create a translator over the built-in pattern table
    pub fn with_options(options: TranslateOptions) -> Self {
        Self::new(default_patterns(), options)
    }

    /// Classify a line and build its event
    ///
    /// The first matching pattern decides; later patterns are never consulted,
    /// even when the matching extractor drops the line.
    pub fn translate(&self, line: &str) -> Option<StreamEvent> {
        let pattern = self.patterns.iter().find(|p| (p.matches)(line))?;
        (pattern.extract)(line, &self.options)
    }

    /// Name of the pattern that would classify this line
    pub fn classify(&self, line: &str) -> Option<&'static str> {
        self.patterns.iter().find(|p| (p.matches)(line)).map(|p| p.name)
    }

    /// The pattern table, in priority order
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

impl Default for LogTranslator {
    fn default() -> Self {
        Self::with_options(TranslateOptions::default())
    }
}
