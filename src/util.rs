//! ASCII case-insensitive matching on server messages and reported names.

/// Whether `needle` occurs in `haystack`, ignoring ASCII case.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    needle.is_empty()
        || haystack
            .as_bytes()
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Whether `haystack` begins with `prefix`, ignoring ASCII case.
pub fn starts_with_ci(haystack: &str, prefix: &str) -> bool {
    haystack
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}
