use std::collections::HashSet;

/// Lowercase, trim, drop empties and duplicates. First occurrence wins, so
/// the input order is kept.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

// "Go, web,,go" -> ["go", "web"]
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(','))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert!(normalize_tags(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn mixed_case_whitespace_and_duplicates() {
        let tags = normalize_tags(["  GoLang  ", "golang", "Backend", "  ", "backend"]);
        assert_eq!(tags, vec!["golang", "backend"]);
    }

    #[test]
    fn comma_separated() {
        assert_eq!(parse_tag_list("Onboarding, tutorial,,ONBOARDING"), vec!["onboarding", "tutorial"]);
        assert!(parse_tag_list("").is_empty());
    }
}
