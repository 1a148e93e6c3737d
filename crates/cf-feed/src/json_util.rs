//! Shared JSON parsing helpers for feed documents.
//!
//! The feed encodes numbers inconsistently: prices may be JSON numbers
//! (`12.5`) or numeric strings (`"12.5"`), and optional fields may be absent
//! or `null`. These helpers normalise all of that to `Option`.

use serde_json::Value;

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s.trim()).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.trim().parse().ok()
    } else {
        v.as_u64()
    }
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// Read a named string field, `None` when absent or not a string.
#[inline]
pub fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// Read a named boolean field, accepting `0`/`1` as well.
#[inline]
pub fn bool_field(v: &Value, key: &str) -> Option<bool> {
    let v = v.get(key)?;
    v.as_bool().or_else(|| v.as_u64().map(|n| n != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn f64_from_number_or_string() {
        let v = json!({"a": 1.5, "b": "2.25", "c": null, "d": "x"});
        assert_eq!(parse_f64_field(&v, "a"), Some(1.5));
        assert_eq!(parse_f64_field(&v, "b"), Some(2.25));
        assert_eq!(parse_f64_field(&v, "c"), None);
        assert_eq!(parse_f64_field(&v, "d"), None);
        assert_eq!(parse_f64_field(&v, "missing"), None);
    }

    #[test]
    fn u64_from_number_or_string() {
        assert_eq!(parse_str_u64(Some(&json!(42))), Some(42));
        assert_eq!(parse_str_u64(Some(&json!("42"))), Some(42));
        assert_eq!(parse_str_u64(Some(&json!(-1))), None);
        assert_eq!(parse_str_u64(Some(&json!(1.5))), None);
    }

    #[test]
    fn bool_and_str_fields() {
        let v = json!({"flag": true, "n": 1, "s": "hello"});
        assert_eq!(bool_field(&v, "flag"), Some(true));
        assert_eq!(bool_field(&v, "n"), Some(true));
        assert_eq!(bool_field(&v, "s"), None);
        assert_eq!(str_field(&v, "s"), Some("hello"));
        assert_eq!(str_field(&v, "flag"), None);
    }
}
