//! Key/value merging and message rendering.
//!
//! Everything here is total: malformed input degrades to sentinel text
//! instead of failing, so a log line is never lost over formatting.

use crate::point::{non_finite_text, FieldValue};
use crate::record::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Stored for a trailing key that has no value.
pub const MISSING_VALUE: &str = "!VALUE";

/// Field key used when a key renders as an empty string.
pub const MISSING_KEY: &str = "!KEY";

/// Merge alternating key/value entries into `fields`.
///
/// Keys are the `Display` rendering of the key value, or [`MISSING_KEY`]
/// when that is empty. Later duplicates overwrite earlier ones.
pub fn merge_key_values(fields: &mut BTreeMap<String, FieldValue>, key_values: &[Value]) {
    for pair in key_values.chunks(2) {
        let mut key = pair[0].to_string();
        if key.is_empty() {
            key = MISSING_KEY.to_string();
        }
        let value = match pair.get(1) {
            Some(v) => to_field_value(v),
            None => FieldValue::String(MISSING_VALUE.to_string()),
        };
        fields.insert(key, value);
    }
}

/// Narrow an arbitrary value to something the store can hold.
pub fn to_field_value(value: &Value) -> FieldValue {
    match value {
        Value::Str(s) => FieldValue::String(s.clone()),
        Value::I64(v) => FieldValue::Integer(*v),
        Value::U64(v) => FieldValue::UInteger(*v),
        Value::F64(v) if v.is_finite() => FieldValue::Float(*v),
        Value::F64(v) => FieldValue::String(non_finite_text(*v).to_string()),
        Value::Bool(v) => FieldValue::Boolean(*v),
        Value::Error(msg) => FieldValue::String(msg.clone()),
        Value::Debug(s) => FieldValue::String(s.clone()),
    }
}

/// Concatenate operands, adding a space between two neighbours when
/// neither of them is a string.
pub fn render_parts(parts: &[Value]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 && !part.is_str() && !parts[i - 1].is_str() {
            out.push(' ');
        }
        let _ = write!(out, "{}", part);
    }
    out
}

/// Render a printf-style format string.
///
/// Supported verbs: `%v %s %d %i %f %t %q %x %%`, with optional `-`/`0`
/// flags, width and precision. A verb without an argument renders as
/// `%!d(MISSING)`; leftover arguments are appended as `%!(EXTRA a, b)`.
pub fn render_format(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len() + args.len() * 8);
    let mut args_iter = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut directive = Directive::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => directive.left = true,
                '0' => directive.zero = true,
                '+' | ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        directive.width = read_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            directive.precision = Some(read_number(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        if !matches!(verb, 'v' | 's' | 'd' | 'i' | 'f' | 't' | 'q' | 'x') {
            out.push('%');
            out.push(verb);
            continue;
        }

        match args_iter.next() {
            Some(arg) => {
                let rendered = render_verb(verb, &directive, arg);
                directive.pad_into(&mut out, &rendered);
            }
            None => {
                let _ = write!(out, "%!{}(MISSING)", verb);
            }
        }
    }

    let extra: Vec<String> = args_iter.map(|a| a.to_string()).collect();
    if !extra.is_empty() {
        let _ = write!(out, "%!(EXTRA {})", extra.join(", "));
    }
    out
}

#[derive(Default)]
struct Directive {
    left: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Directive {
    fn pad_into(&self, out: &mut String, s: &str) {
        let len = s.chars().count();
        let pad = self.width.unwrap_or(0).saturating_sub(len);
        if pad == 0 {
            out.push_str(s);
        } else if self.left {
            out.push_str(s);
            out.extend(std::iter::repeat(' ').take(pad));
        } else if self.zero {
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", s),
            };
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(pad));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(s);
        }
    }
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut n: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = Some(n.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    n
}

fn render_verb(verb: char, directive: &Directive, arg: &Value) -> String {
    match (verb, arg) {
        ('f', Value::F64(v)) => format!("{:.*}", directive.precision.unwrap_or(6), v),
        ('f', Value::I64(v)) => format!("{:.*}", directive.precision.unwrap_or(6), *v as f64),
        ('f', Value::U64(v)) => format!("{:.*}", directive.precision.unwrap_or(6), *v as f64),
        ('x', Value::I64(v)) if *v < 0 => format!("-{:x}", v.unsigned_abs()),
        ('x', Value::I64(v)) => format!("{:x}", v),
        ('x', Value::U64(v)) => format!("{:x}", v),
        ('x', other) => other
            .to_string()
            .bytes()
            .fold(String::new(), |mut acc, b| {
                let _ = write!(acc, "{:02x}", b);
                acc
            }),
        ('q', other) => format!("{:?}", other.to_string()),
        ('s', other) | ('v', other) => match directive.precision {
            Some(p) => other.to_string().chars().take(p).collect(),
            None => other.to_string(),
        },
        (_, other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_of(kvs: &[Value]) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        merge_key_values(&mut fields, kvs);
        fields
    }

    #[test]
    fn test_merge_pairs() {
        let f = fields_of(&["user".into(), 42i64.into(), "ok".into(), true.into()]);
        assert_eq!(f.len(), 2);
        assert_eq!(f["user"], FieldValue::Integer(42));
        assert_eq!(f["ok"], FieldValue::Boolean(true));
    }

    #[test]
    fn test_merge_odd_length_uses_sentinel() {
        let f = fields_of(&["a".into(), 1u64.into(), "dangling".into()]);
        assert_eq!(f["a"], FieldValue::UInteger(1));
        assert_eq!(f["dangling"], FieldValue::String("!VALUE".to_string()));
    }

    #[test]
    fn test_merge_last_write_wins() {
        let f = fields_of(&["k1".into(), "v1".into(), "k1".into(), "v2".into()]);
        assert_eq!(f.len(), 1);
        assert_eq!(f["k1"], FieldValue::String("v2".to_string()));
    }

    #[test]
    fn test_merge_non_string_keys_are_rendered() {
        let f = fields_of(&[7i32.into(), "seven".into()]);
        assert_eq!(f["7"], FieldValue::String("seven".to_string()));
    }

    #[test]
    fn test_merge_error_value_becomes_text() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such table");
        let f = fields_of(&["err".into(), Value::error(&err)]);
        assert_eq!(f["err"], FieldValue::String("no such table".to_string()));
    }

    #[test]
    fn test_merge_empty_key_uses_sentinel() {
        let f = fields_of(&["".into(), 1i64.into()]);
        assert_eq!(f.len(), 1);
        assert_eq!(f["!KEY"], FieldValue::Integer(1));
    }

    #[test]
    fn test_non_finite_floats_become_text() {
        let f = fields_of(&[
            "ratio".into(),
            f64::NAN.into(),
            "lat".into(),
            f64::INFINITY.into(),
            "floor".into(),
            f64::NEG_INFINITY.into(),
            "ok".into(),
            0.5f64.into(),
        ]);
        assert_eq!(f["ratio"], FieldValue::String("NaN".to_string()));
        assert_eq!(f["lat"], FieldValue::String("+Inf".to_string()));
        assert_eq!(f["floor"], FieldValue::String("-Inf".to_string()));
        assert_eq!(f["ok"], FieldValue::Float(0.5));
    }

    #[test]
    fn test_merge_empty_is_noop() {
        assert!(fields_of(&[]).is_empty());
    }

    #[test]
    fn test_render_parts_spacing() {
        assert_eq!(render_parts(&["a".into(), "b".into()]), "ab");
        assert_eq!(render_parts(&[1i64.into(), 2i64.into()]), "1 2");
        assert_eq!(render_parts(&["n=".into(), 3i64.into(), 4i64.into()]), "n=3 4");
        assert_eq!(render_parts(&[]), "");
    }

    #[test]
    fn test_render_format_basic_verbs() {
        assert_eq!(render_format("count=%d", &[3i64.into()]), "count=3");
        assert_eq!(render_format("%s/%v", &["a".into(), true.into()]), "a/true");
        assert_eq!(render_format("%.2f", &[1.23456.into()]), "1.23");
        assert_eq!(render_format("%f", &[2.0.into()]), "2.000000");
        assert_eq!(render_format("%q", &["hi".into()]), "\"hi\"");
        assert_eq!(render_format("%x", &[255u64.into()]), "ff");
        assert_eq!(render_format("100%%", &[]), "100%");
    }

    #[test]
    fn test_render_format_width() {
        assert_eq!(render_format("[%5d]", &[42i64.into()]), "[   42]");
        assert_eq!(render_format("[%-5s]", &["ab".into()]), "[ab   ]");
        assert_eq!(render_format("[%05d]", &[(-42i64).into()]), "[-0042]");
    }

    #[test]
    fn test_render_format_missing_and_extra() {
        assert_eq!(render_format("a=%d b=%d", &[1i64.into()]), "a=1 b=%!d(MISSING)");
        assert_eq!(
            render_format("a=%d", &[1i64.into(), 2i64.into(), "x".into()]),
            "a=1%!(EXTRA 2, x)"
        );
    }

    #[test]
    fn test_render_format_unknown_verb_is_literal() {
        assert_eq!(render_format("%z %d", &[5i64.into()]), "%z 5");
        assert_eq!(render_format("trailing %", &[]), "trailing %!(NOVERB)");
    }
}
