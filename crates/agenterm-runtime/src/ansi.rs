//! ANSI stripping and message classification for the terminal gateway's
//! output parser. Stripping must be idempotent: `strip(strip(x)) == strip(x)`,
//! since the gateway may re-flush partial chunks.

use regex::Regex;
use std::sync::OnceLock;

fn csi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences: ESC [ ... <final byte in 0x40-0x7E>
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap())
}

fn osc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // OSC sequences: ESC ] ... terminated by BEL or ST (ESC \)
    RE.get_or_init(|| Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)").unwrap())
}

fn misc_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Other two-character escapes (cursor save/restore, charset selection, etc.)
    RE.get_or_init(|| Regex::new(r"\x1b[()#][0-9A-Za-z]|\x1b[0-9A-Za-z]").unwrap())
}

/// Strips SGR/cursor/erase CSI sequences, OSC sequences, and remaining
/// two-character escapes, then normalizes `\r` (carriage-return overwrite)
/// by collapsing each `\r`-terminated segment to its last write, mirroring
/// how a real terminal renders repeated `\r` progress updates.
pub fn strip_ansi(input: &str) -> String {
    let no_osc = osc_re().replace_all(input, "");
    let no_csi = csi_re().replace_all(&no_osc, "");
    let no_misc = misc_escape_re().replace_all(&no_csi, "");
    normalize_carriage_returns(&no_misc)
}

fn normalize_carriage_returns(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.split('\n') {
        if let Some(last_segment) = line.split('\r').next_back() {
            out.push_str(last_segment);
        }
        out.push('\n');
    }
    // split('\n') always yields at least one element; drop the trailing
    // synthetic newline introduced by the loop if the input didn't end in one.
    if !input.ends_with('\n') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    Normal,
    Prompt,
    Error,
    Code,
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuickAction {
    pub label: String,
    pub keys: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParsedMessage {
    pub text: String,
    pub class: MessageClass,
    #[serde(default)]
    pub quick_actions: Vec<QuickAction>,
}

/// Classifies a flushed, ANSI-stripped chunk. A yes/no confirmation such as
/// `"Proceed? [Y/n] "` becomes a prompt with yes/no/interrupt quick actions.
pub fn classify(text: &str) -> ParsedMessage {
    let trimmed = text.trim_end();
    if is_prompt(trimmed) {
        return ParsedMessage {
            text: text.to_string(),
            class: MessageClass::Prompt,
            quick_actions: prompt_quick_actions(trimmed),
        };
    }
    if looks_like_error(trimmed) {
        return ParsedMessage {
            text: text.to_string(),
            class: MessageClass::Error,
            quick_actions: Vec::new(),
        };
    }
    if looks_like_code(trimmed) {
        return ParsedMessage {
            text: text.to_string(),
            class: MessageClass::Code,
            quick_actions: Vec::new(),
        };
    }
    ParsedMessage {
        text: text.to_string(),
        class: MessageClass::Normal,
        quick_actions: Vec::new(),
    }
}

fn is_prompt(trimmed: &str) -> bool {
    let lower = trimmed.to_ascii_lowercase();
    (lower.contains("[y/n]") || lower.contains("(y/n)") || lower.contains("[y/n] "))
        || trimmed.ends_with('?')
        || trimmed.ends_with(':')
        || trimmed.ends_with('>')
        || trimmed.ends_with('$')
}

fn looks_like_error(trimmed: &str) -> bool {
    let lower = trimmed.to_ascii_lowercase();
    lower.contains("error") || lower.contains("panic") || lower.contains("traceback")
}

fn looks_like_code(trimmed: &str) -> bool {
    trimmed.starts_with("```") || trimmed.contains("fn ") || trimmed.contains("def ")
}

fn prompt_quick_actions(_trimmed: &str) -> Vec<QuickAction> {
    vec![
        QuickAction { label: "Yes".to_string(), keys: "y\n".to_string() },
        QuickAction { label: "No".to_string(), keys: "n\n".to_string() },
        QuickAction { label: "Interrupt".to_string(), keys: "\u{3}".to_string() },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sgr_sequences() {
        let raw = "\x1b[31mhello\x1b[0m world";
        assert_eq!(strip_ansi(raw), "hello world");
    }

    #[test]
    fn strips_osc_title_sequence() {
        let raw = "\x1b]0;window title\x07visible text";
        assert_eq!(strip_ansi(raw), "visible text");
    }

    #[test]
    fn stripping_is_idempotent() {
        let raw = "\x1b[31mhello\x1b[0m\r\nworld\x1b]0;t\x07";
        let once = strip_ansi(raw);
        let twice = strip_ansi(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn carriage_return_collapses_to_last_write() {
        let raw = "progress: 1%\rprogress: 50%\rprogress: 100%\n";
        assert_eq!(strip_ansi(raw), "progress: 100%\n");
    }

    #[test]
    fn classifies_yes_no_prompt() {
        let parsed = classify("Proceed? [Y/n] ");
        assert_eq!(parsed.class, MessageClass::Prompt);
        assert_eq!(parsed.quick_actions.len(), 3);
        assert_eq!(parsed.quick_actions[0].label, "Yes");
    }

    #[test]
    fn classifies_error_text() {
        let parsed = classify("Error: file not found");
        assert_eq!(parsed.class, MessageClass::Error);
    }
}
