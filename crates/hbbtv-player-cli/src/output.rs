//! Output formatting for CLI

use console::style;
use hbbtv_player_core::{ControlState, PlayerState};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Pretty JSON for structured output
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// One line describing a committed state
pub fn state_line(step: usize, state: &PlayerState, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "step": step,
            "tag": state.tag(),
            "state": state,
        })
        .to_string(),
        OutputFormat::Text => {
            let tag = match state {
                PlayerState::Control(ControlState::Error { .. }) => style(state.tag()).red().bold(),
                PlayerState::Control(_) => style(state.tag()).cyan(),
                PlayerState::Source(_) => style(state.tag()).magenta(),
            };
            format!("{:>3}. {} {}", step, tag, style(detail(state)).dim())
        }
    }
}

fn detail(state: &PlayerState) -> String {
    match state {
        PlayerState::Control(ControlState::Loading { url, .. }) => url.clone(),
        PlayerState::Control(ControlState::Seeking {
            from_time, to_time, ..
        }) => format!("{:.1}s -> {:.1}s", from_time, to_time),
        PlayerState::Control(ControlState::Error { kind, message, .. }) => {
            format!("[{}] {}", kind, message)
        }
        PlayerState::Control(ControlState::Ended { duration, looping }) => {
            format!("{:.1}s loop={}", duration, looping)
        }
        _ => match (state.current_time(), state.duration()) {
            (Some(time), Some(duration)) => format!("{:.1}s / {:.1}s", time, duration),
            (None, Some(duration)) => format!("{:.1}s", duration),
            _ => String::new(),
        },
    }
}
