//! Turns pipeline output lines into `PipelineEvent`s.
//!
//! JSON lines carrying an `event` field are decoded as-is. Everything else
//! goes through marker matching on the text the pipeline scripts print
//! ("Step 2/5: render", "Starting step: upscale"). The text path is best
//! effort: there is no contract behind it.

use crate::model::PipelineEvent;
use once_cell::sync::Lazy;
use regex::Regex;

static STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstep\s+(\d+)\s*/\s*(\d+)(?:\s*[:\-]\s*(.+?))?\s*$").expect("valid step regex")
});
static STARTING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)starting step:\s*(.+?)\s*$").expect("valid starting-step regex"));
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bprogress:?\s*(\d{1,3}(?:\.\d+)?)\s*%").expect("valid progress regex")
});
static ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|failed)\b").expect("valid error regex"));
static WARNING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(warning|warn)\b").expect("valid warning regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default)]
pub struct LineParser {
    verbose: bool,
}

impl LineParser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn parse(&self, stream: Stream, line: &str) -> Option<PipelineEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(ev) = parse_structured(trimmed) {
            return Some(ev);
        }
        if let Some(c) = STEP_RE.captures(trimmed) {
            let index = c[1].parse().ok()?;
            let total: u32 = c[2].parse().ok()?;
            if total > 0 {
                return Some(PipelineEvent::Step {
                    index,
                    total,
                    name: c.get(3).map(|m| m.as_str().to_string()),
                });
            }
        }
        if let Some(c) = STARTING_RE.captures(trimmed) {
            return Some(PipelineEvent::StepStarted {
                name: c[1].to_string(),
            });
        }
        if let Some(c) = PROGRESS_RE.captures(trimmed) {
            if let Ok(percent) = c[1].parse::<f64>() {
                return Some(PipelineEvent::Progress { percent });
            }
        }
        let message = trimmed.to_string();
        // Warning markers win: "Warning: retry failed" is still a warning.
        if trimmed.contains('⚠') || WARNING_RE.is_match(trimmed) {
            return Some(PipelineEvent::Warning { message });
        }
        if trimmed.contains('❌') || ERROR_RE.is_match(trimmed) {
            return Some(PipelineEvent::Error { message });
        }
        if starts_with_emoji(trimmed) {
            return Some(PipelineEvent::Log { message });
        }
        if self.verbose {
            let message = match stream {
                Stream::Stdout => message,
                Stream::Stderr => format!("[stderr] {message}"),
            };
            return Some(PipelineEvent::Log { message });
        }
        None
    }
}

fn parse_structured(line: &str) -> Option<PipelineEvent> {
    if !line.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("event")?;
    match serde_json::from_value(value) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised structured event");
            None
        }
    }
}

/// Pipeline scripts prefix notable lines with an emoji (✅ 🎬 📦 ...).
fn starts_with_emoji(s: &str) -> bool {
    let Some(c) = s.chars().next() else {
        return false;
    };
    let cp = c as u32;
    (0x1F300..=0x1FAFF).contains(&cp) || (0x2600..=0x27BF).contains(&cp) || (0x2B00..=0x2BFF).contains(&cp)
}
