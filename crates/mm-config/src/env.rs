//! `${VAR}` / `${VAR:-default}` substitution over raw config text (§6),
//! applied before TOML parsing so any string field in the config file can
//! reference the process environment.

/// Expand every `${VAR}` / `${VAR:-default}` occurrence in `input` using
/// `lookup` to resolve `VAR`. An unset variable with no default expands to
/// the empty string (shell `${VAR:-}` semantics), matching how most
/// deployment tooling treats an absent env var in a config template.
pub fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let body = &input[i + 2..i + 2 + end];
                let (name, default) = match body.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (body, None),
                };
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(default.unwrap_or("")),
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// [`expand`] sourced from the real process environment via
/// [`std::env::var`].
pub fn expand_from_process_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_set_variable() {
        let out = expand("host = \"${HOST}\"", |name| {
            (name == "HOST").then(|| "example.com".to_owned())
        });
        assert_eq!(out, "host = \"example.com\"");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let out = expand("port = ${PORT:-9000}", |_| None);
        assert_eq!(out, "port = 9000");
    }

    #[test]
    fn set_variable_wins_over_default() {
        let out = expand("port = ${PORT:-9000}", |name| {
            (name == "PORT").then(|| "1234".to_owned())
        });
        assert_eq!(out, "port = 1234");
    }

    #[test]
    fn unset_without_default_expands_empty() {
        let out = expand("x = \"${MISSING}\"", |_| None);
        assert_eq!(out, "x = \"\"");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let out = expand("no substitution here", |_| None);
        assert_eq!(out, "no substitution here");
    }
}
