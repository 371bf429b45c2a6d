use std::collections::BTreeMap;

/// Split a leading `---` block of `key: value` lines off a Markdown source.
///
/// Values keep any further colons; one leading and one trailing quote are
/// removed. Without a frontmatter block the source is returned unchanged.
pub fn parse_frontmatter(source: &str) -> (BTreeMap<String, String>, &str) {
    let mut metadata = BTreeMap::new();

    let Some(rest) = source.strip_prefix("---\n") else {
        return (metadata, source);
    };
    let Some(end) = rest.find("\n---\n") else {
        return (metadata, source);
    };

    for line in rest[..end].lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        metadata.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }

    (metadata, &rest[end + "\n---\n".len()..])
}

fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix('"')
        .or_else(|| value.strip_prefix('\''))
        .unwrap_or(value);
    value
        .strip_suffix('"')
        .or_else(|| value.strip_suffix('\''))
        .unwrap_or(value)
}
