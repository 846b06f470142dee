//! Redis-style glob matching for `scan` on the in-memory store

/// Match `text` against a pattern supporting `*`, `?` and `\` escapes
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("user:1", "user:1"));
        assert!(!glob_match("user:1", "user:12"));
        assert!(!glob_match("user:12", "user:1"));
    }

    #[test]
    fn test_wildcards() {
        assert!(glob_match("user:*", "user:123"));
        assert!(glob_match("user:*", "user:"));
        assert!(glob_match("*:views", "page:1:views"));
        assert!(glob_match("u?er:*", "user:9"));
        assert!(!glob_match("u?er:*", "uer:9"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("**", ""));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match(r"lock\*", "lock*"));
        assert!(!glob_match(r"lock\*", "locks"));
        assert!(glob_match(r"what\?", "what?"));
    }

    proptest! {
        #[test]
        fn prop_star_matches_everything(text in ".*") {
            prop_assert!(glob_match("*", &text));
        }

        #[test]
        fn prop_literal_matches_itself(text in "[a-z0-9:_-]{0,24}") {
            prop_assert!(glob_match(&text, &text));
            let prefix = format!("{}*", text);
            let extended = format!("{}suffix", text);
            prop_assert!(glob_match(&prefix, &extended));
        }
    }
}
