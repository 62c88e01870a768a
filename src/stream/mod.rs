//! Line-delimited JSON protocol spoken by agent commands.
//!
//! An agent writes one JSON object per line on stdout. Lines that are not
//! protocol events are treated as plain output and folded into the summary.
//!
//! ```text
//! {"type":"progress","status":"editing","message":"src/lib.rs"}
//! {"type":"plan","tasks":[{"id":"T-1","description":"..."}]}
//! {"type":"failure","class":"transient","message":"rate limited"}
//! {"type":"result","summary":"Implemented parser"}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::errors::FailureClass;

/// Events an agent command may emit.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Progress {
        status: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Value,
    },
    /// A development plan, in any format `plan::parse_plan` accepts.
    Plan { tasks: Value },
    Failure { class: FailureClass, message: String },
    Result { summary: String },
}

/// One parsed line of agent output.
#[derive(Debug)]
pub enum AgentLine {
    Event(AgentEvent),
    Text(String),
}

/// Parse a single stdout line. Empty lines yield `None`.
pub fn parse_line(line: &str) -> Option<AgentLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{')
        && let Ok(event) = serde_json::from_str::<AgentEvent>(trimmed)
    {
        return Some(AgentLine::Event(event));
    }
    Some(AgentLine::Text(trimmed.to_string()))
}

/// Shorten long output to a single display line.
pub fn truncate_line(text: &str, max_len: usize) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() <= max_len {
        first.to_string()
    } else {
        let cut: String = first.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
