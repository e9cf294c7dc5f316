use std::collections::HashMap;

/// Pulls `Label: value` lines out of a completion.
///
/// Labels match case-insensitively at the start of a (trimmed) line, the first
/// matching line wins, and a value of `None` (any case) or an empty value is
/// recorded as absent. Labels that never appear are missing from the map.
pub fn parse_labeled_fields(output: &str, labels: &[&str]) -> HashMap<String, Option<String>> {
    let mut fields = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        for label in labels {
            if fields.contains_key(*label) {
                continue;
            }
            let Some(value) = strip_label(line, label) else {
                continue;
            };
            fields.insert(label.to_string(), normalize_value(value));
            break;
        }
    }
    fields
}

/// Convenience accessor: a label counts only when present with a real value.
pub fn labeled_value(fields: &HashMap<String, Option<String>>, label: &str) -> Option<String> {
    fields.get(label).cloned().flatten()
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    line[label.len()..].strip_prefix(':')
}

fn normalize_value(raw: &str) -> Option<String> {
    let value = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value.to_string())
    }
}
