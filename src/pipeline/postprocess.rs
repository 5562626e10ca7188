//! Post-processing: deterministic cleanup of model-generated section text.
//!
//! Even when told otherwise, vision models regularly:
//!
//! - wrap the whole response in ` ```markdown ... ``` ` fences
//! - emit Windows `\r\n` line endings and trailing spaces
//! - break GFM tables (no separator row, or extra separators mid-table)
//! - invent `![figure](chart.png)` links for graphics they cannot embed
//! - leak zero-width spaces and BOMs from the OCR'd source
//!
//! Every rule below is a pure `&str → String` pass so each is testable on its
//! own. [`clean_content`] runs them over the extracted-content section when
//! the document leaves `processing`; [`clean_inline`] is the light variant for
//! one-line fields such as the title.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Clean the extracted-content section of a finished response.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse 3+ consecutive blank lines down to 2
/// 4. Insert a missing GFM table separator row
/// 5. Remove spurious mid-table separator rows
/// 6. Replace hallucinated image links with their italic caption
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 8. Trim leading/trailing blank lines
pub fn clean_content(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = remove_hallucinated_images(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

/// Clean a short field (title, category, summary).
pub fn clean_inline(input: &str) -> String {
    remove_invisible_chars(&normalise_line_endings(input))
        .trim()
        .to_string()
}

// ── Outer fences ─────────────────────────────────────────────────────────────

/// Drop a ```` ```markdown ```` fence wrapped around the whole response.
///
/// Works on partial text: the opening fence is removed as soon as its line is
/// complete, the closing fence only once it has arrived.
pub fn strip_outer_fence(input: &str) -> Cow<'_, str> {
    let start = input.trim_start();
    let Some((first, body)) = start.split_once('\n') else {
        return Cow::Borrowed(input);
    };
    let opener = first.trim().to_ascii_lowercase();
    if !matches!(opener.as_str(), "```" | "```markdown" | "```md") {
        return Cow::Borrowed(input);
    }

    let body = body.trim_end();
    match body.rsplit_once('\n') {
        Some((inner, last)) if last.trim() == "```" => Cow::Owned(inner.to_string()),
        None if body.trim() == "```" => Cow::Owned(String::new()),
        _ => Cow::Owned(body.to_string()),
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 4: Fix broken GFM tables ────────────────────────────────────────────

/// Insert a separator row after a table's first row when the model left it out.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result = Vec::with_capacity(lines.len() + 4);
    let mut prev_is_row = false;

    for (i, line) in lines.iter().enumerate() {
        result.push(line.to_string());
        let is_row = is_table_row(line);
        let starts_table = is_row && !prev_is_row && !is_separator_row(line);
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", cols))
                    .collect();
                result.push(sep);
            }
        }
        prev_is_row = is_row;
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

// ── Rule 5: Remove spurious mid-table separator rows ─────────────────────────
//
// GFM allows a separator only as the second row of a table.

fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            row_in_table += 1;
            if is_separator_row(line) && row_in_table != 2 {
                continue;
            }
        } else {
            row_in_table = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Rule 6: Remove hallucinated image links ──────────────────────────────────
//
// Cropped graphics are attached to the document separately, so any image link
// in the transcription points at nothing. Links to real absolute URLs are
// kept; everything else becomes its caption in italics.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    ["example.com", "placeholder.com", "placehold.it", "dummyimage.com"]
        .iter()
        .any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .to_string()
}

// ── Rule 7: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
