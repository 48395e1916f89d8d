//! Post-processing: deterministic cleanup of VLM-generated Markdown.
//!
//! Models sometimes ignore "do not wrap in fences", emit CRLF line endings,
//! or leak zero-width characters from the source scan. These rules fix such
//! quirks while leaving Markdown-significant whitespace alone: leading
//! indentation and trailing two-space hard breaks survive. Order matters:
//! fences are stripped before line endings are normalised, and the
//! final-newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of raw VLM output.
///
/// 1. Strip an outer ```` ```markdown ```` fence
/// 2. Normalise line endings (CRLF → LF)
/// 3. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Empty whitespace-only lines
/// 5. Collapse runs of blank lines to a single blank line
/// 6. End with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = blank_whitespace_lines(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(markdown|md)?[ \t]*\r?\n(.*?)\r?\n```[ \t]*$").unwrap()
});

/// A bare opening fence is only a wrapper when nothing inside it is a fence
/// line; otherwise the text starts and ends with two separate code blocks.
fn strip_markdown_fences(input: &str) -> String {
    let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) else {
        return input.to_string();
    };
    let body = &caps[2];
    let tagged = caps.get(1).is_some();
    if tagged || !body.lines().any(|l| l.trim_start().starts_with("```")) {
        body.to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Strip invisible characters ───────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

// ── Rule 4: Empty whitespace-only lines ──────────────────────────────────

fn blank_whitespace_lines(input: &str) -> String {
    input
        .split('\n')
        .map(|line| if line.trim().is_empty() { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ─────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 6: Single final newline ─────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}
