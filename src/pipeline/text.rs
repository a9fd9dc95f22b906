//! Text preparation for in-process pages: WinAnsi folding and word wrap.
//!
//! The standard Type1 fonts only cover WinAnsi, so typographic punctuation
//! is folded to its ASCII look-alike before layout. Everything the writer
//! cannot encode ends up as `?` rather than as a broken glyph.

/// Spaces a tab expands to.
pub const TAB_WIDTH: usize = 4;

/// Fold characters outside WinAnsi's Latin-1 half to ASCII, expand tabs and
/// drop control characters other than `\n`.
pub fn normalize_winansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\t' => out.push_str(&" ".repeat(TAB_WIDTH)),
            '\n' => out.push('\n'),
            '\r' => {}
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{2032}' => out.push('\''),
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' => out.push('*'),
            '\u{00a0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{202f}' => out.push(' '),
            '\u{200b}' | '\u{feff}' => {}
            c if c.is_control() => {}
            c if (c as u32) < 0x100 => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Wrap `text` to at most `width` characters per line.
///
/// Existing line breaks are kept. Lines break at the last space that fits;
/// words longer than `width` are split hard.
pub fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for raw in text.split('\n') {
        let mut rest: Vec<char> = raw.trim_end().chars().collect();
        if rest.is_empty() {
            lines.push(String::new());
            continue;
        }
        while rest.len() > width {
            let cut = rest[..=width]
                .iter()
                .rposition(|c| *c == ' ')
                .filter(|&pos| pos > 0)
                .unwrap_or(width);
            let line: String = rest[..cut].iter().collect();
            lines.push(line.trim_end().to_string());
            let skip = if rest.get(cut) == Some(&' ') { cut + 1 } else { cut };
            rest.drain(..skip);
        }
        lines.push(rest.into_iter().collect());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_typographic_punctuation() {
        assert_eq!(
            normalize_winansi("\u{201c}Hi\u{201d} \u{2014} it\u{2019}s\u{2026}"),
            "\"Hi\" - it's..."
        );
    }

    #[test]
    fn keeps_latin1_and_replaces_the_rest() {
        assert_eq!(normalize_winansi("café 日"), "café ?");
    }

    #[test]
    fn tabs_and_carriage_returns() {
        assert_eq!(normalize_winansi("a\tb\r\nc"), "a    b\nc");
    }

    #[test]
    fn wraps_at_word_boundaries() {
        let lines = wrap_lines("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn long_words_are_split_hard() {
        let lines = wrap_lines("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn blank_lines_survive() {
        assert_eq!(wrap_lines("a\n\nb", 80), vec!["a", "", "b"]);
    }
}
