/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// `${VAR:-default}` falls back to `default` when the variable is unset
/// or empty, like the shell. Unresolvable variables without a default are
/// left as-is.
pub fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut inner = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                inner.push(c);
            }
            if closed && !inner.is_empty() {
                let (var_name, default) = match inner.split_once(":-") {
                    Some((name, fallback)) => (name, Some(fallback)),
                    None => (inner.as_str(), None),
                };
                match (std::env::var(var_name), default) {
                    (Ok(val), Some(fallback)) if val.is_empty() => result.push_str(fallback),
                    (Ok(val), _) => result.push_str(&val),
                    (Err(_), Some(fallback)) => result.push_str(fallback),
                    (Err(_), None) => {
                        // Leave unresolved placeholder as-is.
                        result.push_str("${");
                        result.push_str(&inner);
                        result.push('}');
                    },
                }
            } else {
                // Malformed — emit literal.
                result.push_str("${");
                result.push_str(&inner);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[allow(unsafe_code)] // set_var/remove_var are unsafe since the 2024 edition
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        unsafe { std::env::set_var("CHORUS_TEST_VAR", "hello") };
        assert_eq!(substitute_env("key=${CHORUS_TEST_VAR}"), "key=hello");
        unsafe { std::env::remove_var("CHORUS_TEST_VAR") };
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${CHORUS_NONEXISTENT_XYZ}"),
            "${CHORUS_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }

    #[test]
    fn default_applies_when_unset_or_empty() {
        assert_eq!(
            substitute_env("${CHORUS_NONEXISTENT_XYZ:-fallback}"),
            "fallback"
        );
        unsafe { std::env::set_var("CHORUS_TEST_EMPTY", "") };
        assert_eq!(substitute_env("${CHORUS_TEST_EMPTY:-fallback}"), "fallback");
        unsafe { std::env::remove_var("CHORUS_TEST_EMPTY") };
    }

    #[test]
    fn env_value_wins_over_default() {
        unsafe { std::env::set_var("CHORUS_TEST_WITH_DEFAULT", "real") };
        assert_eq!(
            substitute_env("bind=${CHORUS_TEST_WITH_DEFAULT:-fallback}"),
            "bind=real"
        );
        unsafe { std::env::remove_var("CHORUS_TEST_WITH_DEFAULT") };
    }
}
