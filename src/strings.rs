//! URL slugs and random names.

use rand::{distributions::Alphanumeric, Rng};

/// Lowercase ASCII words joined by `separator`. Accented letters are
/// transliterated, `@` reads as "at" and other punctuation is dropped.
pub fn slug(text: &str, separator: char) -> String {
    let ascii = deunicode::deunicode(text).replace('@', " at ").to_lowercase();
    let mut out = String::with_capacity(ascii.len());
    let mut gap = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push(separator);
            }
            gap = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            gap = true;
        }
    }
    out
}

/// `-` separated slug; `None` passes through.
pub fn to_slug(name: Option<&str>) -> Option<String> {
    name.map(|n| slug(n, '-'))
}

pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
