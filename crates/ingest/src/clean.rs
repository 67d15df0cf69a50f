use regex::Regex;
use std::sync::LazyLock;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid url pattern"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+").expect("valid email pattern"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s-]{7,}\d").expect("valid phone pattern"));
static SPECIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s.,;:!?()-]").expect("valid charset pattern"));
static NEWLINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+").expect("valid newline pattern"));
static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Strip URLs, emails, phone numbers and special characters, then collapse whitespace.
///
/// Order matters: URLs go before emails so `user@host` inside a link is removed
/// with the link, and phone numbers go before the charset filter drops `+`.
pub fn clean_text(text: &str) -> String {
    let text = URL_RE.replace_all(text, "");
    let text = EMAIL_RE.replace_all(&text, "");
    let text = PHONE_RE.replace_all(&text, "");
    let text = SPECIAL_RE.replace_all(&text, "");
    let text = NEWLINES_RE.replace_all(&text, "\n");
    let text = SPACES_RE.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_urls_and_emails() {
        let cleaned = clean_text("See https://example.com/page and www.acme.org or mail bob@acme.org now");
        assert_eq!(cleaned, "See and or mail now");
    }

    #[test]
    fn test_removes_phone_numbers() {
        let cleaned = clean_text("Call +1 555-123-4567 today");
        assert_eq!(cleaned, "Call today");
    }

    #[test]
    fn test_keeps_allowed_punctuation() {
        let cleaned = clean_text("Alice (CEO) works at Acme; really? Yes! #1 & co.");
        assert_eq!(cleaned, "Alice (CEO) works at Acme; really? Yes! 1 co.");
    }

    #[test]
    fn test_collapses_whitespace() {
        let cleaned = clean_text("  Alice\n\n\nworks\t\tat   Acme.  ");
        assert_eq!(cleaned, "Alice works at Acme.");
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(clean_text(" \n\t "), "");
    }
}
