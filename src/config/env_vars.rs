//! `$VAR` / `${VAR}` expansion for operator-declared paths.

/// Expand Unix-style environment variables in a declared path.
///
/// `${VAR}` and `$VAR` are both accepted. Unset variables expand to an empty
/// string so a declaration like `${HOME}/.bash_history` degrades to a
/// nonexistent path (and is skipped) rather than a literal `$` path.
pub fn expand_env_vars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                let rest = &path[idx + 2..];
                match rest.find('}') {
                    Some(end) => {
                        let name = &rest[..end];
                        out.push_str(&std::env::var(name).unwrap_or_default());
                        // skip `{name}`
                        for _ in 0..name.chars().count() + 2 {
                            chars.next();
                        }
                    }
                    // Unterminated brace, keep it literal
                    None => out.push(c),
                }
            }
            Some((_, next)) if is_name_char(*next) => {
                let mut name = String::new();
                while let Some((_, n)) = chars.peek() {
                    if !is_name_char(*n) {
                        break;
                    }
                    name.push(*n);
                    chars.next();
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push(c),
        }
    }

    out
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
