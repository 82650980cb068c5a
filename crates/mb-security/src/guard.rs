//! Pattern heuristics for pages that probe for an attached inspector.
//!
//! The pattern sources are plain regex syntax accepted by both the `regex`
//! crate and ECMAScript `RegExp`, so the sandbox bootstrap compiles the same
//! text. Patterns named in [`CASE_INSENSITIVE_PATTERNS`] carry no inline flag;
//! each side sets it when compiling.

use regex::Regex;
use regex::RegexBuilder;
use std::sync::LazyLock;

pub const TO_STRING_ASSIGN_PATTERN: &str = r"\.toString\s*=\s*function";
pub const CONSOLE_CALL_PATTERN: &str = r"console\.(log|debug|dir|info|warn)\s*\(";
pub const DEVTOOLS_MARKER_PATTERN: &str = r"\bdetectDevTools\b";
pub const TO_STRING_WORD_PATTERN: &str = r"\btoString\b";
pub const INSPECTION_WORD_PATTERN: &str = r"\b(console|devtools|debugger|inspect)\b";

pub const CASE_INSENSITIVE_PATTERNS: &[&str] = &[
    DEVTOOLS_MARKER_PATTERN,
    TO_STRING_WORD_PATTERN,
    INSPECTION_WORD_PATTERN,
];

static TO_STRING_ASSIGN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(TO_STRING_ASSIGN_PATTERN).ok());
static CONSOLE_CALL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(CONSOLE_CALL_PATTERN).ok());
static DEVTOOLS_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| case_insensitive(DEVTOOLS_MARKER_PATTERN));
static TO_STRING_WORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| case_insensitive(TO_STRING_WORD_PATTERN));
static INSPECTION_WORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| case_insensitive(INSPECTION_WORD_PATTERN));

fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

/// Source that overrides `toString` and logs an object: the classic
/// "is the console open" probe.
pub fn is_devtools_probe_source(source: &str) -> bool {
    if source.is_empty() {
        return false;
    }
    matches(&TO_STRING_ASSIGN, source) && matches(&CONSOLE_CALL, source)
}

pub(crate) fn is_suspicious_stack(stack: &str) -> bool {
    if stack.is_empty() {
        return false;
    }
    if matches(&DEVTOOLS_MARKER, stack) {
        return true;
    }
    matches(&TO_STRING_WORD, stack) && matches(&INSPECTION_WORD, stack)
}

/// Receiver of a DOM mutation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationTarget<'a> {
    Document,
    DocumentElement,
    Body,
    Element(&'a str),
}

impl MutationTarget<'_> {
    pub fn is_critical(self) -> bool {
        match self {
            Self::Document | Self::DocumentElement | Self::Body => true,
            Self::Element(tag) => tag.eq_ignore_ascii_case("html") || tag.eq_ignore_ascii_case("body"),
        }
    }
}

/// Blocks a mutation of the document root or body when the calling stack
/// looks like a probe.
pub fn should_block_mutation(target: MutationTarget<'_>, stack: &str) -> bool {
    target.is_critical() && is_suspicious_stack(stack)
}

#[cfg(test)]
mod tests {
    use super::MutationTarget;
    use super::is_devtools_probe_source;
    use super::is_suspicious_stack;
    use super::should_block_mutation;

    #[test]
    fn detects_to_string_console_probe() {
        let probe = "var el = new Image(); el.toString = function () { opened = true; }; console.log(el);";
        assert!(is_devtools_probe_source(probe));
        assert!(!is_devtools_probe_source("console.log('hello')"));
        assert!(!is_devtools_probe_source("obj.toString = function () {}"));
        assert!(!is_devtools_probe_source(""));
    }

    #[test]
    fn flags_suspicious_stacks() {
        assert!(is_suspicious_stack("at detectDevTools (app.js:1:2)"));
        assert!(is_suspicious_stack("at Object.toString (x.js)\nat console.log"));
        assert!(!is_suspicious_stack("at toString (x.js)\nat render (y.js)"));
        assert!(!is_suspicious_stack("at render (y.js)"));
    }

    #[test]
    fn only_critical_targets_are_blocked() {
        let stack = "at detectDevTools (probe.js:3:9)";
        assert!(should_block_mutation(MutationTarget::Body, stack));
        assert!(should_block_mutation(MutationTarget::Document, stack));
        assert!(should_block_mutation(MutationTarget::Element("HTML"), stack));
        assert!(!should_block_mutation(MutationTarget::Element("div"), stack));
        assert!(!should_block_mutation(MutationTarget::Body, "at render (y.js)"));
    }
}
