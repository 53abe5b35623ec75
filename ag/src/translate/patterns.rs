//! Recognized executor log shapes
//!
//! The executor's log wording is an implicit contract: when its phrasing
//! changes, only this table needs updating. Order matters, the first
//! matching pattern classifies the line.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use super::{ThoughtCapture, TranslateOptions};
use crate::events::{StreamEvent, StreamKind, truncate_chars};

/// Maximum characters of a thought
pub const THOUGHT_MAX_CHARS: usize = 500;
/// Maximum characters of tool arguments and error lines
pub const ARGS_MAX_CHARS: usize = 300;
/// Maximum characters of a tool result
pub const RESULT_MAX_CHARS: usize = 200;

static STEP_PAIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"step (\d+)/(\d+)").unwrap());
static SELECTED_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"selected (\d+) tools").unwrap());
static QUOTED_IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"['"](\w+)['"]"#).unwrap());
static TOKEN_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Cumulative )?(Input|Completion|Total)=(\d+)").unwrap());

/// Decides whether a line has this pattern's shape
pub type Matcher = fn(&str) -> bool;

/// Builds the event for a matched line; `None` drops the line
pub type Extractor = fn(&str, &TranslateOptions) -> Option<StreamEvent>;

/// One entry of the pattern table
#[derive(Clone, Copy)]
pub struct Pattern {
    pub name: &'static str,
    pub matches: Matcher,
    pub extract: Extractor,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("name", &self.name).finish()
    }
}

/// The built-in pattern table, highest priority first
pub fn default_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            name: "step",
            matches: |line| line.contains("Executing step"),
            extract: extract_step,
        },
        Pattern {
            name: "thought",
            matches: |line| line.contains("'s thoughts"),
            extract: extract_thought,
        },
        Pattern {
            name: "tool_selection",
            matches: |line| line.contains("selected") && line.contains("tools to use"),
            extract: extract_tool_selection,
        },
        Pattern {
            name: "tools_prepared",
            matches: |line| line.contains("Tools being prepared"),
            extract: extract_tools_prepared,
        },
        Pattern {
            name: "tool_arguments",
            matches: |line| line.contains("Tool arguments"),
            extract: extract_tool_arguments,
        },
        Pattern {
            name: "tool_activation",
            matches: |line| line.contains("Activating tool"),
            extract: extract_tool_activation,
        },
        Pattern {
            name: "tool_completion",
            matches: |line| line.contains("completed its mission"),
            extract: extract_tool_completion,
        },
        Pattern {
            name: "token_usage",
            matches: |line| line.contains("Token usage"),
            extract: extract_token_usage,
        },
        Pattern {
            name: "error",
            matches: |line| line.contains("ERROR") || line.contains("Error"),
            extract: extract_error,
        },
    ]
}

/// Text after the last occurrence of `marker`, trimmed
fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.rsplit_once(marker).map(|(_, rest)| rest.trim())
}

fn extract_step(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let pair = STEP_PAIR.captures(line).and_then(|caps| {
        let step = caps[1].parse::<u32>().ok()?;
        let max_steps = caps[2].parse::<u32>().ok()?;
        Some((step, max_steps))
    });

    Some(match pair {
        Some((step, max_steps)) => StreamEvent::new(StreamKind::Step, "📍", format!("Step {step}/{max_steps}"))
            .with("step", step)
            .with("max_steps", max_steps),
        None => StreamEvent::new(StreamKind::Step, "📍", "Step ?"),
    })
}

fn extract_thought(line: &str, options: &TranslateOptions) -> Option<StreamEvent> {
    let captured = after(line, "thoughts:").unwrap_or("");
    let captured = match options.thought_capture {
        ThoughtCapture::SingleLine => captured.lines().next().unwrap_or("").trim(),
        ThoughtCapture::MultiLine => captured,
    };
    let content = if captured.is_empty() {
        "Thinking...".to_string()
    } else {
        truncate_chars(captured, THOUGHT_MAX_CHARS)
    };
    Some(StreamEvent::new(StreamKind::Thought, "💭", content))
}

fn extract_tool_selection(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let count = SELECTED_COUNT
        .captures(line)
        .and_then(|caps| caps[1].parse::<u64>().ok());

    Some(match count {
        Some(count) => {
            StreamEvent::new(StreamKind::Tool, "🛠️", format!("Selected {count} tool(s)")).with("count", count)
        }
        None => StreamEvent::new(StreamKind::Tool, "🛠️", "Selected ? tool(s)"),
    })
}

fn extract_tools_prepared(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let tools = after(line, "prepared:").unwrap_or(line);
    let names: Vec<Value> = QUOTED_IDENT
        .captures_iter(tools)
        .map(|caps| json!(&caps[1]))
        .collect();
    Some(StreamEvent::new(StreamKind::Tool, "🧰", format!("Tools: {tools}")).with("tools", names))
}

fn extract_tool_arguments(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let args = after(line, "arguments:").unwrap_or(line);
    Some(StreamEvent::new(StreamKind::Args, "🔧", truncate_chars(args, ARGS_MAX_CHARS)))
}

fn extract_tool_activation(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    // Without a quoted name the tool cannot be identified
    let caps = QUOTED_IDENT.captures(line)?;
    let tool = &caps[1];
    Some(StreamEvent::new(StreamKind::Tool, "⚡", format!("Running: {tool}")).with("tool", tool))
}

fn extract_tool_completion(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let (head, result) = match line.rsplit_once("Result:") {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let content = if result.is_empty() {
        "Done".to_string()
    } else {
        truncate_chars(result, RESULT_MAX_CHARS)
    };

    let mut event = StreamEvent::new(StreamKind::Result, "✅", content);
    if let Some(caps) = QUOTED_IDENT.captures(head) {
        event = event.with("tool", &caps[1]);
    }
    Some(event)
}

fn extract_token_usage(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    let (mut input, mut output, mut total) = (None, None, None);
    for caps in TOKEN_FIELD.captures_iter(line) {
        if caps.get(1).is_some() {
            continue;
        }
        let Ok(value) = caps[3].parse::<u64>() else {
            continue;
        };
        let slot = match &caps[2] {
            "Input" => &mut input,
            "Completion" => &mut output,
            _ => &mut total,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    let Some(total) = total else {
        return Some(StreamEvent::new(StreamKind::Tokens, "📊", "Tokens: ?"));
    };
    let mut event = StreamEvent::new(StreamKind::Tokens, "📊", format!("Tokens: {total}")).with("tokens", total);
    if let (Some(input), Some(output)) = (input, output) {
        event = event.with("input", input).with("output", output);
    }
    Some(event)
}

fn extract_error(line: &str, _: &TranslateOptions) -> Option<StreamEvent> {
    Some(StreamEvent::new(StreamKind::Error, "❌", truncate_chars(line, ARGS_MAX_CHARS)))
}
