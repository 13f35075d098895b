//! Prompts sent to the OCR model.
//!
//! The `<image>` and `<|grounding|>` markers are DeepSeek-OCR conventions;
//! other vision models ignore them. Callers override the defaults through
//! [`crate::config::OcrConfig::prompt_markdown`] /
//! [`crate::config::OcrConfig::prompt_plain`] or per request.

use crate::config::DescriptionType;

/// Default prompt for markdown output.
pub const DEFAULT_MARKDOWN_PROMPT: &str = "<image>\n<|grounding|>Convert the document to markdown.";

/// Default prompt for plain-text output.
pub const DEFAULT_PLAIN_PROMPT: &str = "<image>\nFree OCR.";

const DESCRIBE_FULL_PROMPT: &str = "<image>\nDescribe this image in full. Transcribe all visible text exactly, \
then describe every chart, figure, table and visual element and how they relate.";

const DESCRIBE_DETAILED_PROMPT: &str = "<image>\nDescribe this image in detail.";

const DESCRIBE_CONCISE_PROMPT: &str = "<image>\nDescribe this image in one or two sentences.";

/// Prompt used by `describe_image` for the given description type.
pub fn description_prompt(kind: DescriptionType) -> &'static str {
    match kind {
        DescriptionType::Full => DESCRIBE_FULL_PROMPT,
        DescriptionType::Detailed => DESCRIBE_DETAILED_PROMPT,
        DescriptionType::Concise => DESCRIBE_CONCISE_PROMPT,
    }
}

/// Wrap directly-extracted page text for a text-only refinement call.
pub fn text_refinement_message(prompt: &str, text: &str) -> String {
    let instruction = prompt
        .trim_start_matches("<image>")
        .replace("<|grounding|>", "");
    format!(
        "{}\nThe page content was extracted as text and is given below. \
Return it cleaned up in the requested format without adding content.\n\n\"\"\"{}\"\"\"",
        instruction.trim(),
        text
    )
}
