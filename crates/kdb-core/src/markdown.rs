//! Markdown-to-HTML rendering for streamed assistant messages.
//!
//! The renderer is re-run over the whole message buffer every time a fragment
//! arrives, so it has to be total: truncated syntax (an unclosed `**`, half a
//! link, a fence without its closing pair) degrades to literal text instead of
//! failing.
//!
//! Rules are applied as successive whole-string substitutions in a fixed
//! order. Later rules see the HTML produced by earlier ones, which can
//! double-wrap rare inputs (a link label spanning a heading line, for
//! example). Text is interpolated without HTML escaping.

use std::sync::LazyLock;

use regex::Regex;

/// Stands in for newlines inside `<details>` blocks while the other rules run.
const NEWLINE_SENTINEL: &str = "\u{E000}";

const LINE_BREAK: &str = "<br>";

static DETAILS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<details>.*?</details>").expect("valid details regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid link regex"));

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.*)```").expect("valid code fence regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid inline code regex"));

/// Renders the full message buffer to an HTML fragment.
///
/// Pure and deterministic: the same input always yields byte-identical output.
pub fn render(text: &str) -> String {
    let protected = protect_details(text);
    let html = protected.replace('\n', LINE_BREAK);

    let html = LINK.replace_all(
        &html,
        r#"<a href="${2}" target="_blank" class="course-link">${1}</a>"#,
    );
    let html = BOLD.replace_all(&html, "<strong>${1}</strong>");

    let html = map_lines(&html, heading);
    let html = map_lines(&html, bullet_item);
    let html = map_lines(&html, numbered_item);
    let html = map_lines(&html, horizontal_rule);

    let html = CODE_FENCE.replace_all(&html, "<pre><code>${1}</code></pre>");
    let html = INLINE_CODE.replace_all(&html, "<code>${1}</code>");

    html.replace(NEWLINE_SENTINEL, "\n")
}

/// Swaps newlines inside complete `<details>` blocks for the sentinel.
///
/// An unclosed `<details>` (still streaming) is left alone.
fn protect_details(text: &str) -> String {
    DETAILS_BLOCK
        .replace_all(text, |caps: &regex::Captures<'_>| {
            caps[0].replace('\n', NEWLINE_SENTINEL)
        })
        .into_owned()
}

/// Applies a line rule to every `<br>`-delimited segment.
///
/// Segments are cut on every `<br>` in the current string, including ones
/// that came from the input text or from an earlier rule's output.
fn map_lines(html: &str, rule: fn(&str) -> Option<String>) -> String {
    html.split(LINE_BREAK)
        .map(|line| rule(line).unwrap_or_else(|| line.to_string()))
        .collect::<Vec<_>>()
        .join(LINE_BREAK)
}

fn heading(line: &str) -> Option<String> {
    if let Some(text) = line.strip_prefix("### ") {
        Some(format!("<h4>{text}</h4>"))
    } else if let Some(text) = line.strip_prefix("## ") {
        Some(format!("<h3>{text}</h3>"))
    } else {
        line.strip_prefix("# ")
            .map(|text| format!("<h2>{text}</h2>"))
    }
}

fn bullet_item(line: &str) -> Option<String> {
    line.strip_prefix("- ")
        .map(|text| format!("<li>{text}</li>"))
}

fn numbered_item(line: &str) -> Option<String> {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == line.len() {
        return None;
    }
    rest.strip_prefix(". ")
        .map(|text| format!("<li>{text}</li>"))
}

fn horizontal_rule(line: &str) -> Option<String> {
    (line == "---").then(|| "<hr>".to_string())
}
