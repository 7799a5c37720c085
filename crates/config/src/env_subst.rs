//! `${VAR}` and `${VAR:-fallback}` expansion over raw config text.

/// Expand placeholders against the process environment.
///
/// Unknown variables without a fallback are left untouched so the parse error
/// (or validation diagnostic) points at the original text.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];
        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "TWILIO_SID" => Some("AC42".to_string()),
            _ => None,
        }
    }

    #[test]
    fn replaces_known_variable() {
        assert_eq!(expand("sid = \"${TWILIO_SID}\"", env), "sid = \"AC42\"");
    }

    #[test]
    fn uses_fallback_for_missing_variable() {
        assert_eq!(expand("port = ${PORT:-8080}", env), "port = 8080");
        assert_eq!(expand("${TWILIO_SID:-x}", env), "AC42");
    }

    #[test]
    fn keeps_unknown_and_malformed_placeholders() {
        assert_eq!(expand("${NOPE}", env), "${NOPE}");
        assert_eq!(expand("a ${} b", env), "a ${} b");
        assert_eq!(expand("tail ${OPEN", env), "tail ${OPEN");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute_env("nothing here"), "nothing here");
    }
}
