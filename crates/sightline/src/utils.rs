use chrono::Local;

/// Normalize a string by removing zero-width and special Unicode whitespace characters,
/// trimming it and lowercasing it.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| {
            // Remove zero-width and non-breaking spaces, but keep regular spaces
            !matches!(
                *c,
                '\u{200B}' | // zero-width space
                '\u{200C}' | // zero-width non-joiner
                '\u{200D}' | // zero-width joiner
                '\u{00A0}' | // non-breaking space
                '\u{FEFF}' // zero-width no-break space
            )
        })
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// Substring test with optional case folding. An empty needle never matches.
pub fn text_contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        let needle = needle.trim();
        !needle.is_empty() && haystack.contains(needle)
    } else {
        let needle = normalize(needle);
        !needle.is_empty() && normalize(haystack).contains(&needle)
    }
}

/// `[HH:MM:SS] message` using local time.
pub fn timestamped(message: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), message)
}
