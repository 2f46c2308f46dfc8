//! Text helpers for rendering model output, plus the transport retry helper.
//!
//! Regexes are `lazy_regex!` statics: validated at compile time and built on first use.

#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use uuid::Uuid;

use crate::config::{
    TRANSPORT_API_INITIAL_BACKOFF_MS, TRANSPORT_API_MAX_BACKOFF_MS, TRANSPORT_API_MAX_RETRIES,
};

/// Fenced code block, language and body captured
static RE_CODE_FENCE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```(\w+)?\n?([\s\S]*?)```");

/// Markdown heading at line start
static RE_HEADING: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^#{1,6} +(.+)$");

/// Bullet at line start, `*` or `-`
static RE_BULLET: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^[*-] ");

/// `**bold**`
static RE_BOLD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*\*(.+?)\*\*");

/// `*italic*`
static RE_ITALIC: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*([^*\n]+?)\*");

/// `~~strike~~`
static RE_STRIKE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"~~(.+?)~~");

/// `` `code` ``
static RE_INLINE_CODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"`([^`\n]+?)`");

/// 3+ consecutive newlines
static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

/// Tags Telegram's HTML parse mode accepts
const TELEGRAM_ALLOWED_TAGS: &[&str] = &[
    "b", "i", "u", "s", "code", "pre", "a", "blockquote", "/b", "/i", "/u", "/s", "/code",
    "/pre", "/a", "/blockquote",
];

/// Escape `<` and `>` unless they belong to a whitelisted tag.
fn escape_angle_brackets(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_tag = false;

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut name = String::new();
                if let Some(slash) = chars.next_if_eq(&'/') {
                    name.push(slash);
                }
                while let Some(next) = chars.next_if(char::is_ascii_alphanumeric) {
                    name.push(next);
                }

                if TELEGRAM_ALLOWED_TAGS.contains(&name.as_str()) {
                    result.push('<');
                    in_tag = true;
                } else {
                    result.push_str("&lt;");
                }
                result.push_str(&name);
            }
            '>' if in_tag => {
                result.push('>');
                in_tag = false;
            }
            '>' => result.push_str("&gt;"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape stray angle brackets while leaving code blocks and allowed tags intact.
///
/// ```
/// use oxide_relay_core::utils::clean_html;
/// assert_eq!(clean_html("1 < 2 but <b>bold</b>"), "1 &lt; 2 but <b>bold</b>");
/// ```
#[must_use]
pub fn clean_html(text: &str) -> String {
    // Random placeholders so user text cannot collide with them
    let mut code_blocks: Vec<(String, String)> = Vec::new();
    let mut protected = String::with_capacity(text.len());
    let mut last_end = 0;
    for mat in RE_CODE_FENCE.find_iter(text) {
        protected.push_str(&text[last_end..mat.start()]);
        let placeholder = format!("__CODE_BLOCK_{}__", Uuid::new_v4().as_simple());
        code_blocks.push((placeholder.clone(), mat.as_str().to_string()));
        protected.push_str(&placeholder);
        last_end = mat.end();
    }
    protected.push_str(&text[last_end..]);

    let mut cleaned = escape_angle_brackets(&protected);
    for (placeholder, block) in code_blocks {
        cleaned = cleaned.replace(&placeholder, &block);
    }
    cleaned
}

/// Convert model markdown into Telegram HTML.
///
/// ```
/// use oxide_relay_core::utils::format_text;
/// assert_eq!(
///     format_text("**Bold** and *italic* with `code`"),
///     "<b>Bold</b> and <i>italic</i> with <code>code</code>"
/// );
/// ```
#[must_use]
pub fn format_text(text: &str) -> String {
    let mut html = clean_html(text);

    html = RE_CODE_FENCE
        .replace_all(&html, |caps: &regex::Captures| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let code = html_escape::encode_text(caps.get(2).map_or("", |m| m.as_str()).trim());
            if lang.is_empty() {
                format!("<pre>{code}</pre>")
            } else {
                format!("<pre><code class=\"language-{lang}\">{code}</code></pre>")
            }
        })
        .to_string();

    html = RE_HEADING.replace_all(&html, "<b>$1</b>").to_string();
    html = RE_BULLET.replace_all(&html, "• ").to_string();
    html = RE_BOLD.replace_all(&html, "<b>$1</b>").to_string();
    html = RE_ITALIC.replace_all(&html, "<i>$1</i>").to_string();
    html = RE_STRIKE.replace_all(&html, "<s>$1</s>").to_string();
    // Inline code was already escaped by clean_html
    html = RE_INLINE_CODE.replace_all(&html, "<code>$1</code>").to_string();
    html = RE_MULTI_NEWLINE.replace_all(&html, "\n\n").to_string();

    html.trim().to_string()
}

/// Truncate to at most `max_chars` characters (not bytes).
///
/// ```
/// use oxide_relay_core::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    split_at_chars(s, max_chars).0.to_string()
}

/// Split after exactly `n` characters; the head is shorter only if `s` is.
#[must_use]
pub fn split_at_chars(s: &str, n: usize) -> (&str, &str) {
    s.char_indices()
        .nth(n)
        .map_or((s, ""), |(pos, _)| s.split_at(pos))
}

/// Retry a transport API call with exponential backoff and jitter.
///
/// Starts at `TRANSPORT_API_INITIAL_BACKOFF_MS`, capped at
/// `TRANSPORT_API_MAX_BACKOFF_MS`, for `TRANSPORT_API_MAX_RETRIES` retries.
///
/// # Errors
///
/// Returns the last error once the retries are used up.
pub async fn retry_transport_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TRANSPORT_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TRANSPORT_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TRANSPORT_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            retries = TRANSPORT_API_MAX_RETRIES,
            error = %e,
            "Transport API operation failed"
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_split_at_chars_is_char_exact() {
        assert_eq!(split_at_chars("ábcdé", 2), ("áb", "cdé"));
        assert_eq!(split_at_chars("abc", 3), ("abc", ""));
        assert_eq!(split_at_chars("abc", 10), ("abc", ""));
        assert_eq!(split_at_chars("abc", 0), ("", "abc"));
    }

    #[test]
    fn test_truncate_str_unicode() {
        assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
        assert_eq!(truncate_str("Привет, мир!", 50), "Привет, мир!");
    }

    #[test]
    fn test_clean_html_keeps_code_blocks() {
        let input = "Start\n```rust\nprintln!(\"<hello>\");\n```\nEnd < 3";
        let expected = "Start\n```rust\nprintln!(\"<hello>\");\n```\nEnd &lt; 3";
        assert_eq!(clean_html(input), expected);
    }

    #[test]
    fn test_clean_html_escapes_unknown_tags_once() {
        let input = "<think>x</think> and <blockquote>q</blockquote> 3 > 1";
        let cleaned = clean_html(input);
        assert_eq!(
            cleaned,
            "&lt;think&gt;x&lt;/think&gt; and <blockquote>q</blockquote> 3 &gt; 1"
        );
        assert_eq!(clean_html(&cleaned), cleaned);
    }

    #[test]
    fn test_format_text_markdown() {
        let input = "## Title\n* Bullet\n- Dash\nAnd **bold**, *italic*, ~~gone~~ and `x<y`";
        insta::assert_snapshot!(format_text(input), @r"
        <b>Title</b>
        • Bullet
        • Dash
        And <b>bold</b>, <i>italic</i>, <s>gone</s> and <code>x&lt;y</code>
        ");
    }

    #[test]
    fn test_format_text_code_blocks() {
        assert_eq!(
            format_text("Code:\n```rust\nlet x = 1 < 2;\n```"),
            "Code:\n<pre><code class=\"language-rust\">let x = 1 &lt; 2;</code></pre>"
        );
        assert_eq!(format_text("```\nplain\n```"), "<pre>plain</pre>");
    }

    #[test]
    fn test_format_text_collapses_newlines() {
        assert_eq!(format_text("Line 1\n\n\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transport_operation_recovers() -> Result<()> {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let value = retry_transport_operation(move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("flaky");
            }
            Ok(42)
        })
        .await?;
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transport_operation_gives_up() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<()> = retry_transport_operation(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), TRANSPORT_API_MAX_RETRIES + 1);
    }
}
