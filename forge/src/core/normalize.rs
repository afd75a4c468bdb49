//! Output normalization applied to both expected and actual program output.

/// Unify line endings, right-trim every line, and trim the whole text.
///
/// Idempotent: `normalize_output(&normalize_output(x)) == normalize_output(x)`.
pub fn normalize_output(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .trim()
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_whitespace_and_blank_lines_are_dropped() {
        assert_eq!(normalize_output("6\n\n"), "6");
        assert_eq!(normalize_output("1 2  \r\n3\t\r\n"), "1 2\n3");
    }

    #[test]
    fn interior_content_is_preserved() {
        assert_eq!(normalize_output("Sum: 6"), "Sum: 6");
        assert_eq!(normalize_output("  a\n\n b"), "a\n\n b");
    }

    #[test]
    fn lone_carriage_returns_become_newlines() {
        assert_eq!(normalize_output("a\rb\r"), "a\nb");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "",
            "   ",
            "6\n\n",
            " x \r\n y \r\n\r\n",
            "\n\n  leading\ntrailing  \n",
            "tab\t\nend",
            "\u{3000}wide space\u{3000}\n",
        ];
        for sample in samples {
            let once = normalize_output(sample);
            assert_eq!(normalize_output(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
