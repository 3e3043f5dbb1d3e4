/// Number of characters in a level-2 prefix bucket key.
pub const PREFIX_LEN: usize = 2;

/// Padding used when a normalized title is shorter than a prefix.
pub const PREFIX_SENTINEL: char = '_';

/// Normalize a title for prefix search: lowercase, ASCII alphanumerics only.
pub fn search_key(title: &str) -> String {
    title
        .chars()
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Level-2 prefix of a normalized key, padded with the sentinel.
pub fn prefix2(key: &str) -> String {
    padded_prefix(key, PREFIX_LEN)
}

/// Level-3 prefix of a normalized key, padded with the sentinel.
pub fn prefix3(key: &str) -> String {
    padded_prefix(key, PREFIX_LEN + 1)
}

fn padded_prefix(key: &str, len: usize) -> String {
    let mut prefix: String = key.chars().take(len).collect();
    while prefix.chars().count() < len {
        prefix.push(PREFIX_SENTINEL);
    }
    prefix
}
