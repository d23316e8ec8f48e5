//! Rendered preview of the extracted LaTeX.
//!
//! Typesetting is delegated to KaTeX. [`KatexHtmlRenderer`] writes a
//! self-contained HTML page that loads KaTeX and renders the expression in
//! display mode with `throwOnError: false`, so malformed LaTeX shows up
//! inline in the error colour instead of failing. A bad expression never
//! reaches back into the extraction state.

use crate::error::{MathOcrError, RenderError};
use std::path::Path;
use tracing::info;

/// Turns LaTeX into a displayable document.
pub trait MathRenderer {
    fn render(&self, latex: &str) -> Result<String, RenderError>;
}

/// Renders LaTeX into a standalone HTML page typeset by KaTeX.
#[derive(Debug, Clone)]
pub struct KatexHtmlRenderer {
    /// Colour used for LaTeX KaTeX cannot parse. Default: `#ef4444`.
    pub error_color: String,
    /// KaTeX release loaded from the CDN.
    pub katex_version: String,
    /// Page title.
    pub title: String,
}

impl Default for KatexHtmlRenderer {
    fn default() -> Self {
        Self {
            error_color: "#ef4444".into(),
            katex_version: "0.16.11".into(),
            title: "Math OCR preview".into(),
        }
    }
}

impl MathRenderer for KatexHtmlRenderer {
    fn render(&self, latex: &str) -> Result<String, RenderError> {
        if latex.trim().is_empty() {
            return Err(RenderError::Empty);
        }
        let source_json = script_safe_json(latex)?;
        let color_json = script_safe_json(&self.error_color)?;
        let cdn = format!("https://cdn.jsdelivr.net/npm/katex@{}/dist", self.katex_version);

        Ok(format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="{cdn}/katex.min.css">
<script defer src="{cdn}/katex.min.js"></script>
<style>
  body {{ font-family: system-ui, sans-serif; max-width: 60rem; margin: 2rem auto; color: #18181b; }}
  #math {{ font-size: 1.25rem; overflow-x: auto; padding: 1rem 0.5rem; }}
  pre {{ background: #fafafa; border: 1px solid #e4e4e7; border-radius: 0.75rem; padding: 1rem; white-space: pre-wrap; }}
</style>
</head>
<body>
<div id="math"></div>
<pre>{escaped}</pre>
<script>
  window.addEventListener("DOMContentLoaded", function () {{
    katex.render({source_json}, document.getElementById("math"), {{
      displayMode: true,
      throwOnError: false,
      errorColor: {color_json}
    }});
  }});
</script>
</body>
</html>
"#,
            title = escape_html(&self.title),
            escaped = escape_html(latex),
        ))
    }
}

/// JSON string literal that cannot terminate the surrounding `<script>`.
fn script_safe_json(s: &str) -> Result<String, RenderError> {
    serde_json::to_string(s)
        .map(|json| json.replace("</", "<\\/"))
        .map_err(|e| RenderError::Embed(e.to_string()))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render `latex` and write the result to `path`.
///
/// Render failures are returned as [`MathOcrError::Internal`] only to the
/// caller asking for the file; the session is never involved.
pub async fn write_preview<R: MathRenderer>(
    renderer: &R,
    latex: &str,
    path: impl AsRef<Path>,
) -> Result<(), MathOcrError> {
    let html = renderer
        .render(latex)
        .map_err(|e| MathOcrError::Internal(format!("preview: {e}")))?;
    let path = path.as_ref();
    crate::output::write_atomic(path, html.as_bytes()).await?;
    info!("Preview written to {}", path.display());
    Ok(())
}
