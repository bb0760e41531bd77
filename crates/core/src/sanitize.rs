const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turns a rendered template into a single, visible path component.
pub fn sanitize_filename(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|ch| if is_disallowed_char(ch) { '_' } else { ch })
        .collect();

    let mut out = replaced.trim().trim_end_matches([' ', '.']).to_string();

    // Empty stem or a bare extension like ".jpg".
    if out.is_empty() || out.starts_with('.') {
        out.insert_str(0, "untitled");
    }

    let stem_end = out.find('.').unwrap_or(out.len());
    if is_windows_reserved(&out[..stem_end]) {
        out.insert_str(stem_end, "_file");
    }

    out
}

fn is_disallowed_char(ch: char) -> bool {
    matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_control()
}

fn is_windows_reserved(stem: &str) -> bool {
    let stem = stem.to_ascii_uppercase();
    WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| *reserved == stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_separators_never_survive() {
        assert_eq!(sanitize_filename("2023/05/01_a.jpg"), "2023_05_01_a.jpg");
        assert_eq!(sanitize_filename("..\\evil.jpg"), "untitled.._evil.jpg");
    }

    #[test]
    fn bare_extension_gets_a_stem() {
        assert_eq!(sanitize_filename(".jpg"), "untitled.jpg");
        assert_eq!(sanitize_filename("   "), "untitled");
    }

    #[test]
    fn reserved_names_are_suffixed_before_extension() {
        assert_eq!(sanitize_filename("aux.png"), "aux_file.png");
        assert_eq!(sanitize_filename("img_001.jpg"), "img_001.jpg");
    }
}
