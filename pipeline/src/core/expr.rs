//! Key and argument expressions.
//!
//! The only supported expression form is string-literal concatenation with
//! path-variable substitution: `"order:" + OrderId + ":lines"`.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RequestError;

/// Evaluate a key/argument expression against the request's path variables.
///
/// Quoted terms are literals; bare terms name path variables. An empty
/// expression evaluates to the empty string.
pub fn evaluate(expr: &str, vars: &HashMap<String, String>) -> Result<String, RequestError> {
    let mut out = String::new();
    for term in split_quoted(expr, '+') {
        if term.is_empty() {
            continue;
        }
        if let Some(literal) = unquote(&term) {
            out.push_str(literal);
            continue;
        }
        let name = term.trim_start_matches('{').trim_end_matches('}');
        let value = vars
            .get(name)
            .ok_or_else(|| RequestError::UnboundVariable(name.to_string()))?;
        out.push_str(value);
    }
    Ok(out)
}

/// Split an argument list on commas, ignoring commas inside single or double
/// quotes. Nested parentheses are not tracked.
pub fn split_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    split_quoted(raw, ',')
}

/// Strip one layer of matching single or double quotes.
pub fn unquote(term: &str) -> Option<&str> {
    let bytes = term.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&term[1..term.len() - 1]);
        }
    }
    None
}

/// String form of a field value used by filters, preconditions and enum checks.
///
/// Strings are taken verbatim; `null` and missing values become `""`.
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn split_quoted(raw: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in raw.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == sep => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            None => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn evaluate_concatenates_literals_and_variables() {
        let vars = vars(&[("OrderId", "42")]);
        let key = evaluate(r#""order:" + OrderId + ':lines'"#, &vars).expect("evaluate");
        assert_eq!(key, "order:42:lines");
    }

    #[test]
    fn evaluate_keeps_plus_inside_quotes() {
        let key = evaluate(r#""a+b""#, &HashMap::new()).expect("evaluate");
        assert_eq!(key, "a+b");
    }

    #[test]
    fn evaluate_rejects_unbound_variable() {
        let err = evaluate("Missing", &HashMap::new()).unwrap_err();
        assert!(matches!(err, RequestError::UnboundVariable(name) if name == "Missing"));
    }

    #[test]
    fn split_args_respects_both_quote_styles() {
        let args = split_args(r#""hooks.example", '/a,b', "x" + Id"#);
        assert_eq!(args, vec![r#""hooks.example""#, "'/a,b'", r#""x" + Id"#]);
        assert!(split_args("  ").is_empty());
    }

    #[test]
    fn stringify_uses_raw_strings_and_json_for_the_rest() {
        assert_eq!(stringify(Some(&json!("open"))), "open");
        assert_eq!(stringify(Some(&json!(2))), "2");
        assert_eq!(stringify(Some(&json!(true))), "true");
        assert_eq!(stringify(None), "");
    }
}
