//! Keeps editor-supplied text on one log line.
//!
//! Console commands and prompt answers come from players in edit mode and may
//! carry newlines or control characters.

use std::fmt::Write;

const MAX_PREVIEW: usize = 200;

/// Escapes backslashes, newlines, tabs and other control characters, and
/// truncates past [`MAX_PREVIEW`] characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn multi_line_command_stays_on_one_line() {
        assert_eq!(escape_log("say hi\nop {player}"), "say hi\\nop {player}");
        assert_eq!(escape_log("a\u{7}b"), "a\\x07b");
    }

    #[test]
    fn long_answers_are_cut() {
        let long = "x".repeat(500);
        let escaped = escape_log(&long);
        assert_eq!(escaped.chars().count(), 201);
        assert!(escaped.ends_with('…'));
    }
}
