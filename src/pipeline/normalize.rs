//! Response normalization: strip code fences the model was told not to add.
//!
//! The prompt asks for bare LaTeX, but models still answer with
//! ` ```latex ... ``` ` now and then. This is string surgery, not a parser:
//! a fence is removed only when it opens the very first characters of the
//! reply, and at most one fence pair is assumed to wrap the whole content.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_LATEX_OPENER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```latex\n?").unwrap());
static RE_GENERIC_OPENER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```\n?").unwrap());
static RE_CLOSER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// Remove a leading ` ```latex ` or ` ``` ` fence and its closer, then trim.
///
/// Text that does not start with a fence is only trimmed, so the function is
/// idempotent on its own output as long as the body inside the fence does not
/// itself start with a fence. Only one layer is peeled per call: for
/// ` ```\n```\nx\n``` ` the first call leaves ` ```\nx ` and a second call
/// gives `x`.
pub fn strip_fences(raw: &str) -> String {
    let stripped = if raw.starts_with("```latex") {
        unwrap_fence(&RE_LATEX_OPENER, raw)
    } else if raw.starts_with("```") {
        unwrap_fence(&RE_GENERIC_OPENER, raw)
    } else {
        raw.to_string()
    };
    stripped.trim().to_string()
}

fn unwrap_fence(opener: &Regex, raw: &str) -> String {
    let body = opener.replace(raw, "");
    RE_CLOSER.replace(&body, "").into_owned()
}
