/// Expand `${VAR}` and `${VAR:-fallback}` placeholders using the process
/// environment.
///
/// A variable that is unset (and has no fallback) leaves the placeholder
/// untouched so the parse error points at it. An unterminated `${` is copied
/// through literally.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
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
            "SECRET" => Some("s3cr3t".into()),
            "PORT" => Some("9000".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_vars() {
        assert_eq!(
            substitute_with("secret=${SECRET} port=${PORT}", env),
            "secret=s3cr3t port=9000"
        );
    }

    #[test]
    fn unknown_var_left_in_place() {
        assert_eq!(substitute_with("${NOPE}", env), "${NOPE}");
    }

    #[test]
    fn fallback_used_when_unset() {
        assert_eq!(substitute_with("${NOPE:-1234}", env), "1234");
        assert_eq!(substitute_with("${PORT:-1234}", env), "9000");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("a ${SECRET", env), "a ${SECRET");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
