use once_cell::sync::Lazy;
use regex::Regex;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Comparison form of an entity label: lowercase, punctuation removed,
/// whitespace collapsed, leading articles dropped.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(label: &str) -> String {
    let lowered = label.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");

    let mut normalized: &str = &collapsed;
    // "the a team" -> "team"; repeat so a second pass has nothing left to drop
    while let Some(rest) = ARTICLES
        .iter()
        .find_map(|article| normalized.strip_prefix(article))
    {
        normalized = rest;
    }

    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_article_insensitive() {
        assert_eq!(normalize("The United Nations "), normalize("united nations"));
        assert_eq!(normalize("the NATO alliance"), "nato alliance");
        assert_eq!(normalize("An Agreement"), "agreement");
    }

    #[test]
    fn test_punctuation_and_whitespace() {
        assert_eq!(normalize("U.S."), "us");
        assert_eq!(normalize("People's  Republic\tof China"), "peoples republic of china");
    }

    #[test]
    fn test_article_inside_word_is_kept() {
        assert_eq!(normalize("Theater Command"), "theater command");
        assert_eq!(normalize("Another Plan"), "another plan");
    }

    #[test]
    fn test_idempotent() {
        for label in ["The A-Team", "  the  U.N. ", "an a the Fed", "Sanctions!", "The"] {
            let once = normalize(label);
            assert_eq!(normalize(&once), once, "label: {label:?}");
        }
    }
}
