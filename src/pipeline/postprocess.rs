//! Post-processing: strip model markup, clean up text, join pages.
//!
//! DeepSeek-OCR in grounding mode interleaves its transcription with layout
//! annotations:
//!
//! ```text
//! <|ref|>title<|/ref|><|det|>[[84, 41, 912, 88]]<|/det|>
//! # Annual Report
//! sub_title[[84, 120, 500, 150]]
//! ```
//!
//! The `ref` label is a layout category and the `det` payload a bounding
//! box; neither belongs in the returned text. After markup removal a few
//! deterministic rules normalise whitespace and stray fences.
//!
//! ## Rule Order
//!
//! Markup first (it spans line boundaries that later rules would split),
//! then fences, line endings, trailing whitespace, blank-line collapse,
//! invisible characters, and finally exactly one trailing newline.

use crate::config::{OutputFormat, PageSeparator};
use crate::output::PageText;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page of raw model output.
pub fn clean_page(input: &str, format: OutputFormat) -> String {
    let s = strip_model_markup(input);
    let s = match format {
        OutputFormat::Markdown => strip_outer_fences(&s),
        OutputFormat::PlainText => s,
    };
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Join cleaned pages in ascending index order with `separator`.
///
/// The separator for page `n` (1-based) goes before that page; the first
/// page has none. The result ends with a single newline.
pub fn assemble(pages: &[PageText], separator: &PageSeparator) -> String {
    let mut ordered: Vec<&PageText> = pages.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut out = String::new();
    for (i, page) in ordered.iter().enumerate() {
        if i > 0 {
            out.push_str(&separator.render(i + 1));
        }
        out.push_str(page.text.trim_end());
    }
    ensure_final_newline(&out)
}

// ── Model markup ─────────────────────────────────────────────────────────

/// `<|ref|>label<|/ref|><|det|>[[...]]<|/det|>` grounding pairs. Neither
/// part may contain another tag, so an unpaired `ref` never swallows text.
static RE_GROUNDING_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\|ref\|>[^<]*<\|/ref\|>[ \t]*<\|det\|>[^<]*<\|/det\|>[ \t]*\n?").unwrap()
});

/// Lone `<|det|>[[...]]<|/det|>` boxes.
static RE_DET_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|det\|>[^<]*<\|/det\|>").unwrap());

/// Layout lines such as `sub_title[[84, 120, 500, 150]]`.
static RE_LAYOUT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[A-Za-z0-9_]+\[\[[^\n]*?\]\]\s*(?:\n|$)").unwrap());

/// Remaining `<|ref|>`, `<|/ref|>`, `<|det|>`, `<|/det|>` tags.
static RE_INLINE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\|/?(?:ref|det)\|>").unwrap());

/// End-of-sentence / special tokens leaked when special tokens are kept.
static RE_SPECIAL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<｜[^｜]{1,40}｜>|<\|(?:end_of_sentence|eos|grounding)\|>").unwrap());

/// Remove DeepSeek grounding and layout markup.
pub fn strip_model_markup(input: &str) -> String {
    let s = RE_GROUNDING_PAIR.replace_all(input, "");
    let s = RE_DET_BLOCK.replace_all(&s, "");
    let s = RE_LAYOUT_LINE.replace_all(&s, "");
    let s = RE_INLINE_TAG.replace_all(&s, "");
    RE_SPECIAL_TOKEN.replace_all(&s, "").into_owned()
}

// ── Format cleanup ───────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// At most one blank line between blocks.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_matches('\n').trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_grounding_pairs() {
        let input = "<|ref|>title<|/ref|><|det|>[[84, 41, 912, 88]]<|/det|>\n# Annual Report\n\
                     <|ref|>text<|/ref|><|det|>[[84, 100, 912, 300]]<|/det|>\nRevenue grew.";
        let out = strip_model_markup(input);
        assert_eq!(out, "# Annual Report\nRevenue grew.");
    }

    #[test]
    fn unpaired_ref_keeps_following_text() {
        let input = "Intro <|ref|>note<|/ref|> IMPORTANT BODY TEXT\n\
                     <|ref|>title<|/ref|><|det|>[[1,2,3,4]]<|/det|>\n# Heading";
        assert_eq!(
            strip_model_markup(input),
            "Intro note IMPORTANT BODY TEXT\n# Heading"
        );
    }

    #[test]
    fn strips_layout_lines() {
        let input = "sub_title[[84, 120, 500, 150]]\nOverview\ntext[[1,2,3,4]]\nBody";
        assert_eq!(strip_model_markup(input), "Overview\nBody");
    }

    #[test]
    fn strips_stray_tags_and_tokens() {
        let input = "A <|ref|>cell<|/ref|> value<｜end▁of▁sentence｜>";
        assert_eq!(strip_model_markup(input), "A cell value");
    }

    #[test]
    fn leaves_ordinary_brackets() {
        let input = "See [[wiki link]] and arr[0]";
        assert_eq!(strip_model_markup(input), input);
    }

    #[test]
    fn markdown_fences_removed() {
        let out = clean_page("```markdown\n# Hi\n```", OutputFormat::Markdown);
        assert_eq!(out, "# Hi\n");
    }

    #[test]
    fn plain_text_keeps_fences() {
        let out = clean_page("```\ncode\n```", OutputFormat::PlainText);
        assert_eq!(out, "```\ncode\n```\n");
    }

    #[test]
    fn whitespace_rules() {
        let out = clean_page("a  \r\n\r\n\r\n\r\nb\u{200B}\n\n\n", OutputFormat::PlainText);
        assert_eq!(out, "a\n\nb\n");
    }

    #[test]
    fn empty_output_is_single_newline() {
        assert_eq!(clean_page("", OutputFormat::Markdown), "\n");
        assert_eq!(
            clean_page("<|det|>[[1,2,3,4]]<|/det|>", OutputFormat::Markdown),
            "\n"
        );
    }

    #[test]
    fn assemble_orders_by_index() {
        let pages = vec![
            PageText {
                index: 2,
                text: "three\n".into(),
            },
            PageText {
                index: 0,
                text: "one\n".into(),
            },
            PageText {
                index: 1,
                text: "two\n".into(),
            },
        ];
        assert_eq!(assemble(&pages, &PageSeparator::None), "one\n\ntwo\n\nthree\n");
        assert_eq!(
            assemble(&pages, &PageSeparator::Comment),
            "one\n\n<!-- page 2 -->\n\ntwo\n\n<!-- page 3 -->\n\nthree\n"
        );
    }

    #[test]
    fn assemble_single_page() {
        let pages = vec![PageText {
            index: 0,
            text: "only\n".into(),
        }];
        assert_eq!(assemble(&pages, &PageSeparator::HorizontalRule), "only\n");
    }
}
