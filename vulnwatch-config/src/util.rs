/// Split a comma separated value, dropping blanks.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Treat blank values as unset.
pub fn non_empty(raw: Option<String>) -> Option<String> {
    raw.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_skips_blank_entries() {
        assert_eq!(parse_csv(" apps, ,batch ,"), vec!["apps", "batch"]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn blank_is_unset() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" ns ".into())), Some("ns".into()));
        assert_eq!(non_empty(None), None);
    }
}
