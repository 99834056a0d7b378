//! Strict JSON parsing and string escaping.
//!
//! The parser is a single-pass recursive descent over UTF-8 bytes that
//! builds a [`Value`] tree. It is all-or-nothing: any malformed input -
//! including trailing garbage - yields `Value::Undefined`, never a partial
//! tree.
//!
//! Comments are not JSON; [`strip_comments`] is the out-of-band pre-pass
//! that removes `//` and `/* */` regions (string literals preserved) so a
//! host can accept commented documents before handing them to [`parse`].

use tracing::debug;

use crate::digit::{self, ParsedNumber};
use crate::map::OrderedMap;
use crate::value::Value;

/// Parses a complete JSON document. Whitespace may surround the document;
/// anything else makes the result `Value::Undefined`.
pub fn parse(text: &str) -> Value {
    let bytes = text.as_bytes();
    let end = bytes.len();
    let mut offset = 0;

    trim_left(bytes, &mut offset, end);

    if offset >= end {
        return Value::Undefined;
    }

    let mut scratch = String::new();
    let value = parse_value(text, &mut offset, end, &mut scratch);

    trim_left(bytes, &mut offset, end);

    if offset == end {
        value
    } else {
        debug!(offset, "json parse stopped before the end of input");
        Value::Undefined
    }
}

fn trim_left(bytes: &[u8], offset: &mut usize, end: usize) {
    while *offset < end && matches!(bytes[*offset], b' ' | b'\t' | b'\r' | b'\n') {
        *offset += 1;
    }
}

fn parse_value(text: &str, offset: &mut usize, end: usize, scratch: &mut String) -> Value {
    let bytes = text.as_bytes();

    match bytes[*offset] {
        b'{' => {
            *offset += 1;
            parse_object(text, offset, end, scratch)
        }

        b'[' => {
            *offset += 1;
            parse_array(text, offset, end, scratch)
        }

        b'"' => {
            *offset += 1;

            match parse_string_at(text, offset, end, scratch) {
                Some(string) => Value::String(string),
                None => fail(offset, end),
            }
        }

        b't' => parse_literal(bytes, offset, end, b"true", Value::Bool(true)),
        b'f' => parse_literal(bytes, offset, end, b"false", Value::Bool(false)),
        b'n' => parse_literal(bytes, offset, end, b"null", Value::Null),

        _ => match digit::parse_number(bytes, offset, end) {
            ParsedNumber::Natural(number) => Value::UInt(number),
            ParsedNumber::Integer(number) => Value::Int(number),
            ParsedNumber::Real(number) => Value::Real(number),
            ParsedNumber::NaN => fail(offset, end),
        },
    }
}

/// Failure moves the cursor to the end so no outer rule can resume.
fn fail(offset: &mut usize, end: usize) -> Value {
    *offset = end;
    Value::Undefined
}

fn parse_literal(
    bytes: &[u8],
    offset: &mut usize,
    end: usize,
    word: &[u8],
    value: Value,
) -> Value {
    if (end - *offset) >= word.len() && &bytes[*offset..*offset + word.len()] == word {
        *offset += word.len();
        return value;
    }

    fail(offset, end)
}

fn parse_object(text: &str, offset: &mut usize, end: usize, scratch: &mut String) -> Value {
    let bytes = text.as_bytes();

    trim_left(bytes, offset, end);

    if *offset >= end {
        return fail(offset, end);
    }

    let mut map = OrderedMap::new();

    if bytes[*offset] == b'}' {
        *offset += 1;
        return Value::Object(map);
    }

    while *offset < end && bytes[*offset] == b'"' {
        *offset += 1;

        let key = match parse_string_at(text, offset, end, scratch) {
            Some(key) => key,
            None => break,
        };

        trim_left(bytes, offset, end);

        if *offset >= end || bytes[*offset] != b':' {
            break;
        }

        *offset += 1;
        trim_left(bytes, offset, end);

        if *offset >= end {
            break;
        }

        let value = parse_value(text, offset, end, scratch);

        if value.is_undefined() {
            break;
        }

        map.insert(&key, value);
        trim_left(bytes, offset, end);

        if *offset < end {
            match bytes[*offset] {
                b',' => {
                    *offset += 1;
                    trim_left(bytes, offset, end);
                    continue;
                }

                b'}' => {
                    *offset += 1;
                    return Value::Object(map);
                }

                _ => {}
            }
        }

        break;
    }

    fail(offset, end)
}

fn parse_array(text: &str, offset: &mut usize, end: usize, scratch: &mut String) -> Value {
    let bytes = text.as_bytes();

    trim_left(bytes, offset, end);

    if *offset >= end {
        return fail(offset, end);
    }

    let mut items: Vec<Value> = Vec::new();

    if bytes[*offset] == b']' {
        *offset += 1;
        return Value::Array(items);
    }

    while *offset < end {
        let value = parse_value(text, offset, end, scratch);

        if value.is_undefined() {
            break;
        }

        items.push(value);
        trim_left(bytes, offset, end);

        if *offset < end {
            match bytes[*offset] {
                b',' => {
                    *offset += 1;
                    trim_left(bytes, offset, end);
                    continue;
                }

                b']' => {
                    *offset += 1;
                    return Value::Array(items);
                }

                _ => {}
            }
        }

        break;
    }

    fail(offset, end)
}

/// Decodes a string body starting just past the opening quote. `*offset`
/// lands after the closing quote on success.
fn parse_string_at(
    text: &str,
    offset: &mut usize,
    end: usize,
    scratch: &mut String,
) -> Option<String> {
    scratch.clear();

    let consumed = unescape(&text[*offset..end], scratch);

    if consumed == 0 {
        return None;
    }

    let string = if scratch.is_empty() {
        text[*offset..*offset + consumed - 1].to_owned()
    } else {
        std::mem::take(scratch)
    };

    *offset += consumed;
    Some(string)
}

/// Decodes JSON escapes up to the closing quote. Returns the consumed byte
/// count including the quote, or zero on failure (unterminated string, bad
/// escape, raw control byte, truncated `\uXXXX`, broken surrogate pair).
///
/// When the body holds no escapes, `out` stays empty and the caller can
/// borrow the raw bytes instead.
pub fn unescape(content: &str, out: &mut String) -> usize {
    let bytes = content.as_bytes();
    let length = bytes.len();
    let mut offset = 0;
    let mut offset2 = 0;

    while offset < length {
        match bytes[offset] {
            b'"' => {
                if !out.is_empty() {
                    out.push_str(&content[offset2..offset]);
                }

                return offset + 1;
            }

            b'\\' => {
                out.push_str(&content[offset2..offset]);
                offset += 1;

                if offset >= length {
                    return 0;
                }

                let escaped = bytes[offset];
                offset2 = offset + 1;

                match escaped {
                    b'"' | b'\\' | b'/' => out.push(char::from(escaped)),
                    b'b' => out.push('\u{8}'),
                    b't' => out.push('\t'),
                    b'n' => out.push('\n'),
                    b'f' => out.push('\u{C}'),
                    b'r' => out.push('\r'),

                    b'u' | b'U' => {
                        offset += 1;

                        if (length - offset) < 4 {
                            return 0;
                        }

                        let mut hex_end = offset;
                        let mut code = digit::parse_hex(bytes, &mut hex_end, offset + 4) as u32;

                        if hex_end != offset + 4 {
                            return 0;
                        }

                        offset += 4;
                        offset2 = offset;

                        if (code >> 8) == 0xD8 {
                            // High surrogate; the low half must follow.
                            if (length - offset) < 6
                                || bytes[offset] != b'\\'
                                || !matches!(bytes[offset + 1], b'u' | b'U')
                            {
                                return 0;
                            }

                            offset += 2;
                            let mut low_end = offset;
                            let low = digit::parse_hex(bytes, &mut low_end, offset + 4) as u32;

                            if low_end != offset + 4 {
                                return 0;
                            }

                            code = ((code ^ 0xD800) << 10) + (low & 0x3FF) + 0x10000;
                            offset += 4;
                            offset2 = offset;
                        }

                        match char::from_u32(code) {
                            Some(decoded) => out.push(decoded),
                            None => return 0,
                        }

                        continue;
                    }

                    _ => return 0,
                }
            }

            b'\n' | b'\t' | b'\r' => return 0,

            _ => {}
        }

        offset += 1;
    }

    // No closing quote.
    0
}

/// JSON-escapes `content` into `out` (quotes, backslash, slash, and the
/// short control escapes).
pub fn escape_into(content: &str, out: &mut String) {
    let bytes = content.as_bytes();
    let mut offset = 0;
    let mut offset2 = 0;

    while offset < bytes.len() {
        let replacement = match bytes[offset] {
            b'"' => "\\\"",
            b'\\' => "\\\\",
            b'/' => "\\/",
            0x8 => "\\b",
            b'\t' => "\\t",
            b'\n' => "\\n",
            0xC => "\\f",
            b'\r' => "\\r",
            _ => {
                offset += 1;
                continue;
            }
        };

        out.push_str(&content[offset2..offset]);
        out.push_str(replacement);
        offset += 1;
        offset2 = offset;
    }

    out.push_str(&content[offset2..]);
}

/// Removes `//` line comments and `/* */` block comments in place, leaving
/// string literals untouched. A line comment keeps its newline; a block
/// comment left open runs to the end of the buffer.
pub fn strip_comments(text: &mut String) {
    let mut bytes = std::mem::take(text).into_bytes();
    let end = bytes.len();
    let mut read = 0;
    let mut write = 0;
    let mut inside_text = false;

    while read < end {
        let byte = bytes[read];

        if byte == b'"' {
            let mut escapes = 0;
            let mut back = read;

            while back > 0 && bytes[back - 1] == b'\\' {
                escapes += 1;
                back -= 1;
            }

            if escapes % 2 == 0 {
                inside_text = !inside_text;
            }
        } else if byte == b'/' && !inside_text && (read + 1) < end {
            match bytes[read + 1] {
                b'/' => {
                    read += 2;

                    while read < end && bytes[read] != b'\n' {
                        read += 1;
                    }

                    continue;
                }

                b'*' => {
                    read += 2;

                    loop {
                        while read < end && bytes[read] != b'*' {
                            read += 1;
                        }

                        read += 1;

                        if read >= end {
                            break;
                        }

                        if bytes[read] == b'/' {
                            read += 1;
                            break;
                        }
                    }

                    continue;
                }

                _ => {}
            }
        }

        bytes[write] = byte;
        write += 1;
        read += 1;
    }

    bytes.truncate(write);

    // Removal happens at ASCII boundaries, so the buffer stays UTF-8.
    match String::from_utf8(bytes) {
        Ok(stripped) => *text = stripped,
        Err(error) => *text = String::from_utf8_lossy(error.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars_in_array() {
        let value = parse(r#"[0, -1, 1.5, true, false, null, "x"]"#);
        assert_eq!(value.get_index(0), Some(&Value::UInt(0)));
        assert_eq!(value.get_index(1), Some(&Value::Int(-1)));
        assert_eq!(value.get_index(2), Some(&Value::Real(1.5)));
        assert_eq!(value.get_index(3), Some(&Value::Bool(true)));
        assert_eq!(value.get_index(4), Some(&Value::Bool(false)));
        assert_eq!(value.get_index(5), Some(&Value::Null));
        assert_eq!(value.get_index(6).and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn test_parse_nested_object() {
        let value = parse(r#"{"a": {"b": [1, 2]}, "c": "d"}"#);
        let inner = value.get("a").and_then(|a| a.get("b"));
        assert_eq!(inner.map(Value::len), Some(2));
        assert_eq!(value.get("c").and_then(Value::as_str), Some("d"));
    }

    #[test]
    fn test_parse_preserves_key_order() {
        let value = parse(r#"{"z": 1, "a": 2, "m": 3}"#);
        assert_eq!(value.entry_at(0).map(|(key, _)| key), Some("z"));
        assert_eq!(value.entry_at(1).map(|(key, _)| key), Some("a"));
        assert_eq!(value.entry_at(2).map(|(key, _)| key), Some("m"));
    }

    #[test]
    fn test_parse_failures_return_undefined() {
        for bad in [
            "",
            "{",
            "[1,]",
            "{\"a\":}",
            "{\"a\" 1}",
            "[1 2]",
            "tru",
            "\"unterminated",
            "[1] trailing",
            "{'single': 1}",
        ] {
            assert!(parse(bad).is_undefined(), "accepted: {bad}");
        }
    }

    #[test]
    fn test_parse_whitespace_tolerance() {
        let value = parse(" \t\r\n {\"a\" : 1 } \n");
        assert_eq!(value.get("a"), Some(&Value::UInt(1)));
    }

    #[test]
    fn test_unescape_plain_and_escaped() {
        let mut out = String::new();
        assert_eq!(unescape("plain\"", &mut out), 6);
        assert!(out.is_empty());

        out.clear();
        let consumed = unescape(r#"a\tb\n\"q\"\\ \/ done""#, &mut out);
        assert_eq!(consumed, 22);
        assert_eq!(out, "a\tb\n\"q\"\\ / done");
    }

    #[test]
    fn test_unescape_unicode() {
        let mut out = String::new();
        assert_ne!(unescape(r#"\u0041\u00A1\u08A7\uD834\uDD1E""#, &mut out), 0);
        assert_eq!(out, "A\u{A1}\u{8A7}\u{1D11E}");
    }

    #[test]
    fn test_unescape_rejects() {
        for bad in [
            "no quote",
            "bad \\q escape\"",
            "raw \n newline\"",
            "truncated \\u00\"",
            "lone high \\uD834\"",
            "lone low \\uDD1E\"",
            "dangling \\",
        ] {
            let mut out = String::new();
            assert_eq!(unescape(bad, &mut out), 0, "accepted: {bad}");
        }
    }

    #[test]
    fn test_escape_round_trip() {
        let source = "tab\tquote\"slash/back\\newline\n";
        let mut escaped = String::new();
        escape_into(source, &mut escaped);
        assert_eq!(escaped, "tab\\tquote\\\"slash\\/back\\\\newline\\n");

        let mut decoded = String::new();
        escaped.push('"');
        assert_ne!(unescape(&escaped, &mut decoded), 0);
        assert_eq!(decoded, source);
    }

    #[test]
    fn test_strip_line_comments() {
        let mut text = String::from("{\n  \"a\": 1, // count\n  \"b\": 2\n}");
        strip_comments(&mut text);
        assert_eq!(text, "{\n  \"a\": 1, \n  \"b\": 2\n}");
        assert!(!parse(&text).is_undefined());
    }

    #[test]
    fn test_strip_block_comments() {
        let mut text = String::from("[1, /* gone */ 2]");
        strip_comments(&mut text);
        assert_eq!(text, "[1,  2]");

        let mut open = String::from("[1] /* runs to eof");
        strip_comments(&mut open);
        assert_eq!(open, "[1] ");
    }

    #[test]
    fn test_strip_preserves_strings() {
        let mut text = String::from(r#"{"url": "http://example", "q": "a \" // b"}"#);
        let expected = text.clone();
        strip_comments(&mut text);
        assert_eq!(text, expected);
    }

    #[test]
    fn test_round_trip_with_serde_json() {
        let source = r#"{"name":"q\"x","xs":[1,-2,0.5],"flag":true,"none":null}"#;
        let value = parse(source);
        let ours = value.stringify();

        let reference: serde_json::Value = serde_json::from_str(&ours).expect("strict JSON");
        let original: serde_json::Value = serde_json::from_str(source).expect("strict JSON");
        assert_eq!(reference, original);
    }

    #[test]
    fn test_negative_zero_round_trip() {
        let value = parse("[-0.0]");
        assert_eq!(value.stringify(), "[-0]");

        let again = parse("[-0]");
        match again.get_index(0) {
            Some(Value::Real(real)) => assert_eq!(real.to_bits(), (-0.0f64).to_bits()),
            other => panic!("expected real, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_stringify_round_trip() {
        let source = r#"{"a":{"b":[1,2,{"c":"d"}]},"e":[true,false,null],"f":-3,"g":2.5}"#;
        let value = parse(source);
        let text = value.stringify();
        let back = parse(&text);
        assert_eq!(value, back);
    }
}
