//! Canonical JSON serialization.
//!
//! Output is byte-identical to `JSON.stringify` over a value whose object
//! keys were sorted beforehand: no whitespace, keys in byte order, arrays in
//! source order. Numbers follow the ECMAScript rendering so that a digest
//! computed here matches one computed by any other conforming producer.

use serde_json::{Number, Value};

/// Serialize `value` canonically.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort explicitly; the map's own iteration order depends on
            // serde_json feature flags.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(f) = n.as_f64() {
        out.push_str(&format_f64(f));
    } else {
        out.push_str(&n.to_string());
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// ECMAScript `Number.prototype.toString` for finite values.
pub fn format_f64(f: f64) -> String {
    if f == 0.0 {
        return "0".to_owned();
    }
    if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
        return format!("{}", f as i64);
    }
    // `{:e}` gives the shortest round-trip digits with a decimal exponent,
    // e.g. "1.5e-7" or "1e300".
    let sci = format!("{:e}", f);
    let exp: i32 = sci
        .rsplit_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp >= 21 || exp <= -7 {
        let (mantissa, _) = sci.rsplit_once('e').unwrap_or((sci.as_str(), ""));
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{}", mantissa, sign, exp.abs())
    } else {
        format!("{}", f)
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
