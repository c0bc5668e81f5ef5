//! URL slugs for course titles.

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed
/// into a single `-`, no leading or trailing `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("course");
    }
    slug
}

/// Disambiguated slug for the `n`-th collision (`n >= 2`).
pub fn with_suffix(base: &str, n: u32) -> String {
    format!("{base}-{n}")
}
