//! Instruction prompt for image-to-LaTeX extraction.
//!
//! Kept in one place so tests can inspect it without a live model, and so a
//! wording change touches exactly one file. Callers override it via
//! [`crate::config::OcrConfig::prompt`].

/// Default instruction sent alongside the image.
///
/// Asks for bare LaTeX. Models still wrap their answer in code fences now and
/// then; [`crate::pipeline::normalize::strip_fences`] removes those.
pub const LATEX_OCR_PROMPT: &str = "Act as an expert Mathematics OCR. Analyze the provided image of a mathematical equation and convert it into a clean, accurate LaTeX string. Return only the plain text LaTeX code without any additional explanations, markdown formatting, or preamble.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_forbids_markdown_and_commentary() {
        assert!(LATEX_OCR_PROMPT.contains("LaTeX"));
        assert!(LATEX_OCR_PROMPT.contains("without any additional explanations"));
        assert!(LATEX_OCR_PROMPT.contains("markdown formatting"));
    }
}
