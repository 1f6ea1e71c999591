use std::borrow::Cow;

/// Quote a string for safe interpolation into a POSIX shell command line.
///
/// Strings made only of safe characters are returned as-is; anything else is
/// wrapped in single quotes with embedded quotes written as `'\''`.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-./:=+@%,".contains(&b));
    if safe {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', "'\\''")))
}

/// Return the tools from `tools` that cannot be found on PATH
pub fn missing_tools<'a>(tools: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    tools
        .into_iter()
        .filter(|tool| which::which(tool.as_str()).is_err())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/tmp/ce-abc/main.py"), "/tmp/ce-abc/main.py");
    }

    #[test]
    fn test_shell_quote_special() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(id)"), "'$(id)'");
    }

    #[test]
    fn test_missing_tools() {
        let tools = vec!["sh".to_string(), "definitely-not-a-real-tool-42".to_string()];
        assert_eq!(missing_tools(&tools), vec!["definitely-not-a-real-tool-42"]);
    }
}
