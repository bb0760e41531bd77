use crate::tool::FieldMap;
use serde_json::Value;
use std::collections::BTreeSet;

/// Metadata fields that carry tags, in lookup order.
pub const TAG_FIELDS: &[&str] = &[
    "Keywords",
    "Subject",
    "XPKeywords",
    "IPTCCode",
    "Category",
    "SupplementalCategories",
];

/// Only the first delimiter present in a value is used to split it.
pub const TAG_DELIMITERS: &[char] = &[',', ';', '|', '/', '\n'];

/// Collects tags from every tag field, deduplicated and sorted.
pub fn extract_tags(fields: &FieldMap) -> Vec<String> {
    let mut tags = BTreeSet::<String>::new();
    for name in TAG_FIELDS {
        match fields.get(*name) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    push_trimmed(&mut tags, &stringify(item));
                }
            }
            Some(Value::String(text)) => tags.extend(split_tag_string(text)),
            Some(other) => push_trimmed(&mut tags, &stringify(other)),
        }
    }
    tags.into_iter().collect()
}

pub fn split_tag_string(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() {
        return Vec::new();
    }
    match TAG_DELIMITERS.iter().find(|sep| value.contains(**sep)) {
        Some(sep) => value
            .split(*sep)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        None => vec![value.to_string()],
    }
}

fn push_trimmed(tags: &mut BTreeSet<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        tags.insert(trimmed.to_string());
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn first_listed_delimiter_wins() {
        assert_eq!(split_tag_string("cat, dog;  fox"), vec!["cat", "dog;  fox"]);
        assert_eq!(split_tag_string("cat; dog|fox"), vec!["cat", "dog|fox"]);
        assert_eq!(split_tag_string("a/b|c"), vec!["a/b", "c"]);
    }

    #[test]
    fn string_without_delimiter_is_one_tag() {
        assert_eq!(split_tag_string("  sunset  "), vec!["sunset"]);
        assert!(split_tag_string("   ").is_empty());
    }

    #[test]
    fn newline_splits_when_nothing_else_matches() {
        assert_eq!(split_tag_string("beach\nsea\n\n"), vec!["beach", "sea"]);
    }

    #[test]
    fn empty_parts_are_dropped() {
        assert_eq!(split_tag_string(",a,, b ,"), vec!["a", "b"]);
    }

    #[test]
    fn tags_are_merged_across_fields_sorted_and_deduplicated() {
        let meta = fields(json!({
            "Keywords": ["Zebra", " lion ", "", "Zebra"],
            "Subject": "lion; tiger",
            "XPKeywords": "savanna",
            "IPTCCode": 2023,
            "Category": null,
            "Model": "ignored"
        }));
        assert_eq!(
            extract_tags(&meta),
            vec!["2023", "Zebra", "lion", "savanna", "tiger"]
        );
    }

    #[test]
    fn deduplication_is_case_sensitive() {
        let meta = fields(json!({"Keywords": ["Cat", "cat"]}));
        assert_eq!(extract_tags(&meta), vec!["Cat", "cat"]);
    }

    #[test]
    fn extraction_is_stable_across_runs() {
        let meta = fields(json!({
            "Keywords": "b, a, c",
            "SupplementalCategories": ["c", "d"]
        }));
        let first = extract_tags(&meta);
        let second = extract_tags(&meta);
        assert_eq!(first, second);
        assert_eq!(first, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn no_tag_fields_yields_empty_list() {
        let meta = fields(json!({"Model": "X-T5"}));
        assert!(extract_tags(&meta).is_empty());
    }
}
