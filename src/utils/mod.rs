//! Shared text-processing helpers

use once_cell::sync::Lazy;
use regex::Regex;

/// ANSI escape sequences (CSI, OSC and single-character escapes)
static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]")
        .expect("valid ANSI regex")
});

/// Strip ANSI escape sequences from captured terminal output
pub fn strip_ansi(input: &str) -> String {
    ANSI_RE.replace_all(input, "").into_owned()
}

/// Sanitise a query parameter: drop NUL bytes and ANSI escapes
pub fn sanitize_query_param(input: &str) -> String {
    let without_nul: String = input.chars().filter(|c| *c != '\0').collect();
    strip_ansi(&without_nul)
}

/// Count scrollback lines, ignoring trailing blank padding that tmux
/// appends to fill the pane height
pub fn scrollback_line_count(captured: &str) -> usize {
    captured.trim_end_matches('\n').lines().count()
}

/// Return the scrollback delta past `baseline` lines, ANSI-stripped
pub fn scrollback_delta(captured: &str, baseline: usize) -> String {
    let delta: Vec<&str> = captured
        .trim_end_matches('\n')
        .lines()
        .skip(baseline)
        .collect();
    strip_ansi(&delta.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_colors() {
        let colored = "\x1b[31merror\x1b[0m: something failed";
        assert_eq!(strip_ansi(colored), "error: something failed");
    }

    #[test]
    fn test_strip_ansi_cursor_movement() {
        let input = "\x1b[2J\x1b[Hprompt> ";
        assert_eq!(strip_ansi(input), "prompt> ");
    }

    #[test]
    fn test_sanitize_query_param() {
        assert_eq!(sanitize_query_param("idle\0"), "idle");
        assert_eq!(sanitize_query_param("\x1b[31mbusy\x1b[0m"), "busy");
        assert_eq!(sanitize_query_param("pending"), "pending");
    }

    #[test]
    fn test_scrollback_line_count_ignores_trailing_blanks() {
        assert_eq!(scrollback_line_count("a\nb\nc\n\n\n"), 3);
        assert_eq!(scrollback_line_count(""), 0);
        assert_eq!(scrollback_line_count("single"), 1);
    }

    #[test]
    fn test_scrollback_delta() {
        let captured = "old line\n> hello\nresponse text\n";
        assert_eq!(scrollback_delta(captured, 1), "> hello\nresponse text");
        assert_eq!(scrollback_delta(captured, 3), "");
    }
}
