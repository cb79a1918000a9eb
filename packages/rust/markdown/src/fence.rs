//! Removal of the code-fence wrapper chat models like to put around replies.

use std::sync::LazyLock;

use regex::Regex;

/// Strip one leading ```` ```lang ```` fence and one trailing ```` ``` ```` fence.
///
/// Either side is removed independently, so a reply truncated before its
/// closing fence is still unwrapped. Fences in the middle of the text are
/// left alone.
pub(crate) fn strip_code_fence(text: &str) -> String {
    static OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*\r?\n?\s*").expect("valid regex")
    });
    static CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s*```\s*$").expect("valid regex"));

    let trimmed = text.trim();
    let without_open = OPEN_RE.replace(trimmed, "");
    CLOSE_RE.replace(&without_open, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_fence() {
        assert_eq!(strip_code_fence("```\nhello\n```"), "hello");
    }

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(strip_code_fence("```markdown\n# Title\n```"), "# Title");
        assert_eq!(strip_code_fence("```md\nx\n```"), "x");
    }

    #[test]
    fn tolerates_missing_closing_fence() {
        assert_eq!(strip_code_fence("```markdown\nbody"), "body");
    }

    #[test]
    fn leaves_unfenced_text() {
        assert_eq!(strip_code_fence("  plain text  "), "plain text");
    }

    #[test]
    fn keeps_inner_code_blocks() {
        let text = "```markdown\nintro\n```rust\nfn main() {}\n```\noutro\n```";
        let stripped = strip_code_fence(text);
        assert!(stripped.starts_with("intro"));
        assert!(stripped.contains("```rust"));
        assert!(stripped.ends_with("outro"));
    }
}
