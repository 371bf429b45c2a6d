//! GitHub-style heading slugs.

use std::collections::HashMap;

/// Generates unique, URL-safe ids for the headings of one document.
#[derive(Debug, Default)]
pub struct Slugger {
    occurrences: HashMap<String, usize>,
}

impl Slugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug for `text`, suffixed `-1`, `-2`, … when already handed out.
    pub fn slug(&mut self, text: &str) -> String {
        let mut base = slugify(text);
        if base.is_empty() {
            base = "section".to_string();
        }

        let mut candidate = base.clone();
        while self.occurrences.contains_key(&candidate) {
            let count = self.occurrences.entry(base.clone()).or_insert(0);
            *count += 1;
            candidate = format!("{}-{}", base, count);
        }
        self.occurrences.insert(candidate.clone(), 0);
        candidate
    }
}

/// Lowercase, drop punctuation, turn spaces into hyphens. Letters and digits
/// of every script survive, so CJK headings keep readable ids.
pub fn slugify(text: &str) -> String {
    text.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| match c {
            ' ' => Some('-'),
            '-' | '_' => Some(c),
            c if c.is_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("What's new in v2.0?"), "whats-new-in-v20");
        assert_eq!(slugify("  snake_case and-dash "), "snake_case-and-dash");
        assert_eq!(slugify("第一章 开始"), "第一章-开始");
    }

    #[test]
    fn test_duplicates_get_suffixes() {
        let mut slugger = Slugger::new();
        assert_eq!(slugger.slug("Intro"), "intro");
        assert_eq!(slugger.slug("Intro"), "intro-1");
        assert_eq!(slugger.slug("Intro"), "intro-2");
        assert_eq!(slugger.slug("Intro 1"), "intro-1-1");
    }

    #[test]
    fn test_punctuation_only_heading_gets_fallback() {
        let mut slugger = Slugger::new();
        assert_eq!(slugger.slug("???"), "section");
        assert_eq!(slugger.slug("!!!"), "section-1");
    }
}
