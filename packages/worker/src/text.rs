//! Output normalization shared by the diff engine, the similarity scorer
//! and the verdict classifier.

/// Canonicalize text before structural comparison: tabs become spaces, runs
/// of spaces and blank lines collapse, spaces adjacent to a newline are
/// dropped, and everything is case-folded.
pub fn regularize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for raw in text.chars() {
        let c = if raw == '\t' { ' ' } else { raw };
        match c {
            ' ' => {
                if out.ends_with(' ') || out.ends_with('\n') {
                    continue;
                }
                out.push(' ');
            }
            '\n' => {
                if out.ends_with(' ') {
                    out.pop();
                }
                if out.ends_with('\n') {
                    continue;
                }
                out.push('\n');
            }
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Remove every whitespace character. The strictest comparison tier works
/// on this form.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regularize_tabs_and_spaces() {
        assert_eq!(regularize("a\tb"), "a b");
        assert_eq!(regularize("a    b"), "a b");
    }

    #[test]
    fn test_regularize_blank_lines() {
        assert_eq!(regularize("a\n\n\nb"), "a\nb");
    }

    #[test]
    fn test_regularize_space_around_newline() {
        assert_eq!(regularize("a \nb"), "a\nb");
        assert_eq!(regularize("a\n b"), "a\nb");
    }

    #[test]
    fn test_regularize_case_folds() {
        assert_eq!(regularize("Hello World"), "hello world");
    }

    #[test]
    fn test_strip_whitespace() {
        assert_eq!(strip_whitespace(" a\tb\nc \r\n"), "abc");
        assert_eq!(strip_whitespace(""), "");
    }
}
