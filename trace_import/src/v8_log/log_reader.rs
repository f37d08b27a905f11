//! Field splitting for V8 log lines.
//!
//! A line is a comma separated record; the first field names the record
//! kind. Fields may be wrapped in double quotes, inside which commas are
//! literal and `""` stands for one quote.

/// Split one log line into its fields.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.next_if_eq(&'"').is_some() {
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(field: &str) -> Option<u64> {
    let field = field.trim();
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(
            split_fields(r#"code-creation,LazyCompile,0,0x2905d0c0,1800,"f native a.js:26, col 3",~"#),
            vec!["code-creation", "LazyCompile", "0", "0x2905d0c0", "1800", "f native a.js:26, col 3", "~"]
        );
        assert_eq!(split_fields(r#"a,"say ""hi""",b"#), vec!["a", r#"say "hi""#, "b"]);
        assert_eq!(split_fields("tick,"), vec!["tick", ""]);
        assert_eq!(split_fields(""), vec![""]);
    }

    #[test]
    fn parses_numbers() {
        assert_eq!(parse_number("12158"), Some(12158));
        assert_eq!(parse_number("0x99d8aae0"), Some(0x99d8aae0));
        assert_eq!(parse_number(" 0x10 "), Some(16));
        assert_eq!(parse_number("0xzz"), None);
        assert_eq!(parse_number("-3"), None);
        assert_eq!(parse_number(""), None);
    }
}
