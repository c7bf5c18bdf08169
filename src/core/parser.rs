//! Command line tokenizer
//!
//! Total by design: malformed quoting degrades to a best-effort token set
//! instead of failing, so the caller never has to handle a parse error.

/// Split a raw input line into an argument vector.
///
/// Whitespace separates tokens. A token starting with `"` or `'` runs to the
/// matching quote (or end of input if unterminated) and may contain backslash
/// escapes: `n`, `t`, `r`, `\`, `"`, `'` produce the control/literal
/// character, anything else escapes the following character verbatim. Outside
/// quotes a backslash always escapes the next character verbatim.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else { break };

        let mut token = String::new();
        if first == '"' || first == '\'' {
            let quote = first;
            chars.next();
            while let Some(c) = chars.next() {
                if c == quote {
                    break;
                }
                if c == '\\' {
                    match chars.next() {
                        Some('n') => token.push('\n'),
                        Some('t') => token.push('\t'),
                        Some('r') => token.push('\r'),
                        Some(other) => token.push(other),
                        // Trailing backslash in an unterminated quote
                        None => token.push('\\'),
                    }
                } else {
                    token.push(c);
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                chars.next();
                if c == '\\' {
                    match chars.next() {
                        Some(escaped) => token.push(escaped),
                        None => token.push('\\'),
                    }
                } else {
                    token.push(c);
                }
            }
        }
        args.push(token);
    }

    args
}
