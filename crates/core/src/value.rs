//! Dynamic JSON-shaped value.
//!
//! `Value` is what templates render against: a tagged tree of objects,
//! arrays, strings, numbers, booleans and null, with two extra states - an
//! `Undefined` default marking absent/erased slots, and `Ptr`, a shared
//! alias that reads transparently as its target.
//!
//! Numbers keep their parsed flavor (`UInt`/`Int`/`Real`) so stringify can
//! reproduce them exactly.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::digit::{self, ParsedNumber, RealFormat};
use crate::json;
use crate::map::OrderedMap;

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Real(f64),
    String(String),
    Array(Vec<Value>),
    Object(OrderedMap),
    /// Non-owning-style alias; every read is the read of the target.
    Ptr(Rc<Value>),
}

impl Value {
    /// Follows `Ptr` links to the underlying value.
    pub fn target(&self) -> &Value {
        let mut value = self;

        while let Value::Ptr(inner) = value {
            value = inner;
        }

        value
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.target(), Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.target(), Value::Null)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.target(), Value::Bool(_))
    }

    pub fn is_true(&self) -> bool {
        matches!(self.target(), Value::Bool(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.target(), Value::Bool(false))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.target(), Value::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.target(), Value::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.target(), Value::Object(_))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Value::Ptr(_))
    }

    /// True for the three numeric variants only; strings do not count even
    /// when their text parses as a number.
    pub fn is_number(&self) -> bool {
        matches!(self.target(), Value::UInt(_) | Value::Int(_) | Value::Real(_))
    }

    /// Container size: object item count (tombstones included, so positional
    /// indices stay valid), array length, zero otherwise.
    pub fn len(&self) -> usize {
        match self.target() {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up one path segment: an object key, or a decimal array index.
    /// Undefined slots read as absent.
    pub fn get(&self, segment: &str) -> Option<&Value> {
        match self.target() {
            Value::Object(map) => map.get(segment).filter(|value| !value.is_undefined()),

            Value::Array(items) => {
                let index = digit::parse_index(segment.as_bytes())?;
                items
                    .get(usize::try_from(index).ok()?)
                    .filter(|value| !value.is_undefined())
            }

            _ => None,
        }
    }

    /// Positional access for loops; object tombstones and undefined slots
    /// read as absent.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self.target() {
            Value::Object(map) => map.value_at(index).filter(|value| !value.is_undefined()),
            Value::Array(items) => items.get(index).filter(|value| !value.is_undefined()),
            _ => None,
        }
    }

    /// Object entry at a position, for key-aware iteration.
    pub fn entry_at(&self, index: usize) -> Option<(&str, &Value)> {
        match self.target() {
            Value::Object(map) => map
                .item_at(index)
                .filter(|(_, value)| !value.is_undefined()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.target() {
            Value::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// String contents, or the canonical text of a bool/null.
    pub fn text_contents(&self) -> Option<&str> {
        match self.target() {
            Value::String(text) => Some(text.as_str()),
            Value::Bool(true) => Some("true"),
            Value::Bool(false) => Some("false"),
            Value::Null => Some("null"),
            _ => None,
        }
    }

    /// Numeric reading: numbers pass through, bools map to 1/0, null to 0,
    /// and strings go through the numeric lexer (whole-string match only).
    pub fn as_number(&self) -> ParsedNumber {
        match self.target() {
            Value::UInt(number) => ParsedNumber::Natural(*number),
            Value::Int(number) => ParsedNumber::Integer(*number),
            Value::Real(number) => ParsedNumber::Real(*number),
            Value::Bool(true) => ParsedNumber::Natural(1),
            Value::Bool(false) | Value::Null => ParsedNumber::Natural(0),
            Value::String(text) => digit::parse_number_complete(text.as_bytes()),
            _ => ParsedNumber::NaN,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.target() {
            Value::Bool(value) => Some(*value),
            Value::Null => Some(false),
            Value::UInt(number) => Some(*number > 0),
            Value::Int(number) => Some(*number > 0),
            Value::Real(number) => Some(*number > 0.0),
            Value::String(text) if text == "true" => Some(true),
            Value::String(text) if text == "false" => Some(false),
            _ => None,
        }
    }

    pub fn to_u64(&self) -> u64 {
        match self.as_number() {
            ParsedNumber::Natural(number) => number,
            ParsedNumber::Integer(number) => number as u64,
            ParsedNumber::Real(number) => number as i64 as u64,
            ParsedNumber::NaN => 0,
        }
    }

    pub fn to_i64(&self) -> i64 {
        match self.as_number() {
            ParsedNumber::Natural(number) => number as i64,
            ParsedNumber::Integer(number) => number,
            ParsedNumber::Real(number) => number as i64,
            ParsedNumber::NaN => 0,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self.as_number() {
            ParsedNumber::Natural(number) => number as f64,
            ParsedNumber::Integer(number) => number as f64,
            ParsedNumber::Real(number) => number,
            ParsedNumber::NaN => 0.0,
        }
    }

    /// Writes the textual form of a leaf value. Strings go through
    /// `escape` when one is given; containers and undefined return false.
    pub fn write_text(
        &self,
        out: &mut String,
        format: RealFormat,
        escape: Option<fn(&str, &mut String)>,
    ) -> bool {
        match self.target() {
            Value::String(text) => match escape {
                Some(escape) => escape(text, out),
                None => out.push_str(text),
            },
            Value::UInt(number) => digit::write_uint(out, *number),
            Value::Int(number) => digit::write_int(out, *number),
            Value::Real(number) => digit::write_real(out, *number, format),
            Value::Bool(true) => out.push_str("true"),
            Value::Bool(false) => out.push_str("false"),
            Value::Null => out.push_str("null"),
            _ => return false,
        }

        true
    }

    /// Finds or creates the object slot for `key`; a non-object value is
    /// replaced by a fresh object first.
    pub fn entry(&mut self, key: &str) -> &mut Value {
        if !matches!(self, Value::Object(_)) {
            *self = Value::Object(OrderedMap::new());
        }

        match self {
            Value::Object(map) => map.entry(key),
            _ => unreachable!("just replaced with an object"),
        }
    }

    pub fn set_key(&mut self, key: &str, value: Value) {
        *self.entry(key) = value;
    }

    /// Appends to the array, replacing a non-array value by a fresh array.
    pub fn push(&mut self, value: Value) {
        if !matches!(self, Value::Array(_)) {
            *self = Value::Array(Vec::new());
        }

        if let Value::Array(items) = self {
            items.push(value);
        }
    }

    /// Removes an object key by tombstoning its slot.
    pub fn remove_key(&mut self, key: &str) {
        if let Value::Object(map) = self {
            map.remove(key);
        }
    }

    /// Erases a positional slot: objects tombstone it, arrays reset the
    /// element to `Undefined` without shifting neighbours.
    pub fn remove_at(&mut self, index: usize) {
        match self {
            Value::Object(map) => map.remove_at(index),

            Value::Array(items) => {
                if let Some(slot) = items.get_mut(index) {
                    *slot = Value::Undefined;
                }
            }

            _ => {}
        }
    }

    /// Merges `other` into `self`: object keys overwrite, arrays append.
    /// Anything else replaces `self` wholesale.
    pub fn merge(&mut self, other: Value) {
        match (&mut *self, other) {
            (Value::Object(into), Value::Object(from)) => {
                for (key, value) in from.iter() {
                    into.insert(key, value.clone());
                }
            }

            (Value::Array(into), Value::Array(mut from)) => {
                into.append(&mut from);
            }

            (_, other) => {
                *self = other;
            }
        }
    }

    /// Recursively drops `Undefined` array slots and object tombstones.
    pub fn compress(&mut self) {
        match self {
            Value::Array(items) => {
                items.retain(|item| !item.is_undefined());

                for item in items.iter_mut() {
                    if item.is_array() || item.is_object() {
                        item.compress();
                    }
                }
            }

            Value::Object(map) => {
                map.compress();

                for (_, value) in map.iter_mut() {
                    if value.is_array() || value.is_object() {
                        value.compress();
                    }
                }
            }

            _ => {}
        }
    }

    /// Regroups an array of objects into an object of arrays keyed by the
    /// textual value of `key` in each element. `None` for an empty array,
    /// and when any element is not an object, lacks the key, or holds an
    /// untextualizable key value.
    pub fn group_by(&self, key: &str) -> Option<Value> {
        let items = match self.target() {
            Value::Array(items) => items,
            _ => return None,
        };

        // An empty set has no first element to take the key from.
        if items.is_empty() {
            return None;
        }

        let mut grouped = OrderedMap::new();
        let mut scratch = String::new();

        for item in items {
            let map = match item.target() {
                Value::Object(map) => map,
                _ => return None,
            };

            let group_value = map.get(key).filter(|value| !value.is_undefined())?;

            scratch.clear();
            let group_key = match group_value.text_contents() {
                Some(text) => text,
                None => {
                    if !group_value.write_text(&mut scratch, RealFormat::default(), None) {
                        return None;
                    }

                    scratch.as_str()
                }
            };

            let mut rest = OrderedMap::new();

            for (item_key, item_value) in map.iter() {
                if item_key != key && !item_value.is_undefined() {
                    rest.insert(item_key, item_value.clone());
                }
            }

            grouped
                .entry(group_key)
                .push(Value::Object(rest));
        }

        Some(Value::Object(grouped))
    }

    /// Sorts an array by value order or an object by key.
    pub fn sort(&mut self, ascend: bool) {
        match self {
            Value::Array(items) => {
                if ascend {
                    items.sort_by(Value::order);
                } else {
                    items.sort_by(|a, b| b.order(a));
                }
            }

            Value::Object(map) => map.sort(ascend),

            _ => {}
        }
    }

    /// Total order used by sorting: variant rank first, then payload -
    /// containers by size, strings by bytes, numbers by value. `Ptr`
    /// compares as its target.
    pub fn order(&self, other: &Value) -> Ordering {
        let left = self.target();
        let right = other.target();

        fn rank(value: &Value) -> u8 {
            match value {
                Value::Undefined => 0,
                Value::Ptr(_) => 1,
                Value::Object(_) => 2,
                Value::Array(_) => 3,
                Value::String(_) => 4,
                Value::UInt(_) => 5,
                Value::Int(_) => 6,
                Value::Real(_) => 7,
                Value::Bool(true) => 8,
                Value::Bool(false) => 9,
                Value::Null => 10,
            }
        }

        match (left, right) {
            (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
            (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            _ => rank(left).cmp(&rank(right)),
        }
    }

    /// Compact JSON with the default real precision.
    pub fn stringify(&self) -> String {
        self.stringify_with(digit::JSON_PRECISION)
    }

    pub fn stringify_with(&self, precision: u32) -> String {
        let mut out = String::new();
        self.stringify_into(&mut out, precision);
        out
    }

    /// Writes compact JSON. Only containers produce output at the top
    /// level, mirroring the strict JSON document forms.
    pub fn stringify_into(&self, out: &mut String, precision: u32) {
        match self.target() {
            Value::Object(_) | Value::Array(_) => self.write_json(out, precision),
            _ => {}
        }
    }

    fn write_json(&self, out: &mut String, precision: u32) {
        match self.target() {
            Value::Object(map) => {
                out.push('{');
                let mut first = true;

                for (key, value) in map.iter() {
                    if value.is_undefined() {
                        continue;
                    }

                    if !first {
                        out.push(',');
                    }

                    first = false;
                    out.push('"');
                    json::escape_into(key, out);
                    out.push_str("\":");
                    value.write_json(out, precision);
                }

                out.push('}');
            }

            Value::Array(items) => {
                out.push('[');
                let mut first = true;

                for item in items {
                    if item.is_undefined() {
                        continue;
                    }

                    if !first {
                        out.push(',');
                    }

                    first = false;
                    item.write_json(out, precision);
                }

                out.push(']');
            }

            Value::String(text) => {
                out.push('"');
                json::escape_into(text, out);
                out.push('"');
            }

            Value::UInt(number) => digit::write_uint(out, *number),
            Value::Int(number) => digit::write_int(out, *number),
            Value::Real(number) => digit::write_real(out, *number, RealFormat::new(precision)),
            Value::Bool(true) => out.push_str("true"),
            Value::Bool(false) => out.push_str("false"),
            Value::Null => out.push_str("null"),

            // Undefined slots inside containers are skipped by the callers;
            // a bare undefined writes nothing.
            _ => {}
        }
    }
}

impl PartialEq for Value {
    /// Same-variant comparison; `Ptr` compares as its target. Numbers of
    /// different flavors are not equal, keeping round-trips type-exact.
    fn eq(&self, other: &Self) -> bool {
        match (self.target(), other.target()) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<u64> for Value {
    fn from(number: u64) -> Self {
        Value::UInt(number)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Value::Int(number)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Real(number)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object() -> Value {
        let mut value = Value::Undefined;
        value.set_key("name", Value::from("stencil"));
        value.set_key("count", Value::UInt(3));
        value.set_key("ratio", Value::Real(0.5));
        value
    }

    #[test]
    fn test_type_queries() {
        assert!(Value::Undefined.is_undefined());
        assert!(Value::Null.is_null());
        assert!(Value::Bool(true).is_true());
        assert!(Value::from("x").is_string());
        assert!(Value::UInt(1).is_number());
        assert!(!Value::from("1").is_number());
    }

    #[test]
    fn test_get_by_key_and_index() {
        let value = sample_object();
        assert_eq!(value.get("name").and_then(Value::as_str), Some("stencil"));
        assert_eq!(value.get_index(1), Some(&Value::UInt(3)));
        assert_eq!(value.get("missing"), None);

        let mut array = Value::Undefined;
        array.push(Value::UInt(10));
        array.push(Value::UInt(20));
        assert_eq!(array.get("1"), Some(&Value::UInt(20)));
        assert_eq!(array.get("2"), None);
        assert_eq!(array.get("x"), None);
    }

    #[test]
    fn test_ptr_reads_transparently() {
        let target = Rc::new(sample_object());
        let alias = Value::Ptr(target.clone());

        assert!(alias.is_object());
        assert_eq!(alias.len(), 3);
        assert_eq!(alias.get("count"), Some(&Value::UInt(3)));
        assert_eq!(alias, *target);
    }

    #[test]
    fn test_as_number_coercions() {
        assert_eq!(Value::UInt(4).as_number(), ParsedNumber::Natural(4));
        assert_eq!(Value::Int(-4).as_number(), ParsedNumber::Integer(-4));
        assert_eq!(Value::Bool(true).as_number(), ParsedNumber::Natural(1));
        assert_eq!(Value::Null.as_number(), ParsedNumber::Natural(0));
        assert_eq!(Value::from("12").as_number(), ParsedNumber::Natural(12));
        assert_eq!(Value::from("1.5").as_number(), ParsedNumber::Real(1.5));
        assert_eq!(Value::from("12x").as_number(), ParsedNumber::NaN);
        assert_eq!(Value::Array(Vec::new()).as_number(), ParsedNumber::NaN);
    }

    #[test]
    fn test_remove_at_keeps_array_indices() {
        let mut array = Value::Undefined;
        array.push(Value::UInt(1));
        array.push(Value::UInt(2));
        array.push(Value::UInt(3));

        array.remove_at(1);
        assert_eq!(array.len(), 3);
        assert_eq!(array.get_index(1), None);
        assert_eq!(array.get_index(2), Some(&Value::UInt(3)));

        array.compress();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get_index(1), Some(&Value::UInt(3)));
    }

    #[test]
    fn test_merge_objects() {
        let mut left = sample_object();
        let mut right = Value::Undefined;
        right.set_key("count", Value::UInt(9));
        right.set_key("extra", Value::Null);

        left.merge(right);
        assert_eq!(left.get("count"), Some(&Value::UInt(9)));
        assert_eq!(left.get("extra"), Some(&Value::Null));
        assert_eq!(left.get("name").and_then(Value::as_str), Some("stencil"));
    }

    #[test]
    fn test_group_by() {
        let mut rows = Value::Undefined;

        for (year, name) in [("2019", "a"), ("2020", "b"), ("2019", "c")] {
            let mut row = Value::Undefined;
            row.set_key("year", Value::from(year));
            row.set_key("name", Value::from(name));
            rows.push(row);
        }

        let grouped = rows.group_by("year").unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped.get("2019").map(Value::len), Some(2));
        assert_eq!(grouped.get("2020").map(Value::len), Some(1));

        let first = grouped.get("2019").and_then(|group| group.get_index(0)).unwrap();
        assert_eq!(first.get("name").and_then(Value::as_str), Some("a"));
        assert_eq!(first.get("year"), None);
    }

    #[test]
    fn test_group_by_rejects_non_objects() {
        let mut rows = Value::Undefined;
        rows.push(Value::UInt(1));
        assert!(rows.group_by("k").is_none());
    }

    #[test]
    fn test_group_by_rejects_empty_array() {
        let rows = Value::Array(Vec::new());
        assert!(rows.group_by("k").is_none());
    }

    #[test]
    fn test_sort_array() {
        let mut array = Value::Undefined;
        array.push(Value::UInt(3));
        array.push(Value::UInt(1));
        array.push(Value::UInt(2));

        array.sort(true);
        assert_eq!(array.get_index(0), Some(&Value::UInt(1)));
        assert_eq!(array.get_index(2), Some(&Value::UInt(3)));

        array.sort(false);
        assert_eq!(array.get_index(0), Some(&Value::UInt(3)));
    }

    #[test]
    fn test_order_across_types() {
        assert_eq!(Value::from("a").order(&Value::UInt(1)), Ordering::Less);
        assert_eq!(Value::Null.order(&Value::Bool(false)), Ordering::Greater);
        assert_eq!(Value::Int(-1).order(&Value::Int(1)), Ordering::Less);
    }

    #[test]
    fn test_stringify_skips_undefined() {
        let mut value = sample_object();
        value.set_key("gone", Value::Undefined);

        let mut array = Value::Undefined;
        array.push(Value::UInt(1));
        array.push(Value::Undefined);
        array.push(Value::UInt(2));
        value.set_key("xs", array);

        let text = value.stringify();
        assert_eq!(
            text,
            "{\"name\":\"stencil\",\"count\":3,\"ratio\":0.5,\"xs\":[1,2]}"
        );
    }
}
