//! Small helpers shared across the binding
//!
//! Currently just the scanner for the compact key-list wire format.

/// Parse the compact array-of-strings text returned by `minijs_object_keys`.
///
/// The format is `["a","b"]` with the escapes `\\`, `\"`, `\n`, `\r`,
/// `\t`. This is deliberately not a JSON parser: the engine guarantees
/// nothing beyond flat string arrays, so nothing else is accepted.
/// Malformed tails are cut off rather than reported; the engine is the
/// only producer of this text.
pub(crate) fn parse_string_array(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut chars = text.chars().peekable();

    skip_ws(&mut chars);
    if chars.next() != Some('[') {
        return keys;
    }

    loop {
        skip_ws(&mut chars);
        match chars.peek() {
            Some(']') | None => break,
            Some('"') => {
                chars.next();
            }
            // Anything else is malformed; stop scanning.
            Some(_) => break,
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                None | Some('"') => break,
                Some('\\') => match chars.next() {
                    Some('\\') => key.push('\\'),
                    Some('"') => key.push('"'),
                    Some('n') => key.push('\n'),
                    Some('r') => key.push('\r'),
                    Some('t') => key.push('\t'),
                    Some(other) => key.push(other),
                    None => break,
                },
                Some(c) => key.push(c),
            }
        }
        keys.push(key);

        skip_ws(&mut chars);
        match chars.peek() {
            Some(',') => {
                chars.next();
            }
            _ => break,
        }
    }

    keys
}

fn skip_ws(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while matches!(chars.peek(), Some(' ' | '\t' | '\r' | '\n')) {
        chars.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_array() {
        assert!(parse_string_array("[]").is_empty());
        assert!(parse_string_array("  [ ]  ").is_empty());
    }

    #[test]
    fn plain_keys() {
        assert_eq!(parse_string_array(r#"["a","b"]"#), vec!["a", "b"]);
        assert_eq!(parse_string_array(r#"[ "x" , "y" ]"#), vec!["x", "y"]);
    }

    #[test]
    fn escaped_keys() {
        assert_eq!(
            parse_string_array(r#"["a\\b","c\"d","e\nf","g\th","i\rj"]"#),
            vec!["a\\b", "c\"d", "e\nf", "g\th", "i\rj"]
        );
    }

    #[test]
    fn unknown_escape_passes_through() {
        assert_eq!(parse_string_array(r#"["a\qb"]"#), vec!["aqb"]);
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_string_array("").is_empty());
        assert!(parse_string_array("not a list").is_empty());
        assert!(parse_string_array("{\"a\":1}").is_empty());
    }

    #[test]
    fn truncated_input_keeps_complete_prefix() {
        assert_eq!(parse_string_array(r#"["a","b"#), vec!["a", "b"]);
    }
}
