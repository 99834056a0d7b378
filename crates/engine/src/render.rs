//! Tag-tree rendering.
//!
//! Walks a compiled tag slice, writing the literal bytes between tags and
//! the rendered form of each tag. An unresolvable variable or an inert math
//! expression falls back to its original template bytes, so the operator
//! sees exactly what did not resolve.
//!
//! Loop state lives in a grow-only stack of `(value, key)` slots indexed by
//! the loop's parse-time `level`; slots are overwritten per iteration, not
//! popped. Grouped or sorted working sets are materialized per loop entry
//! and their items cloned into the slot, while plain sets borrow straight
//! from the value tree.

use stencil_core::digit::{self, RealFormat, TEMPLATE_PRECISION};
use stencil_core::value::Value;
use tracing::trace;

use crate::eval::{EvalContext, Num, evaluate};
use crate::expr::Expression;
use crate::tags::{InlineIfTag, LoopTag, MathTag, SortOrder, SuperVariableTag, TagBit, VariablePath};

/// One live loop: the current item (or a clone of it, for materialized
/// sets) and its object key when iterating an object.
#[derive(Default)]
pub(crate) struct LoopFrame<'v> {
    value: Slot<'v>,
    key: KeySlot<'v>,
}

#[derive(Default)]
enum Slot<'v> {
    #[default]
    Empty,
    Tree(&'v Value),
    Owned(Value),
}

#[derive(Default)]
enum KeySlot<'v> {
    #[default]
    Empty,
    Tree(&'v str),
    Owned(String),
}

impl<'v> Slot<'v> {
    fn get(&self) -> Option<&Value> {
        match self {
            Slot::Empty => None,
            Slot::Tree(value) => Some(value),
            Slot::Owned(value) => Some(value),
        }
    }
}

impl<'v> KeySlot<'v> {
    fn get(&self) -> Option<&str> {
        match self {
            KeySlot::Empty => None,
            KeySlot::Tree(key) => Some(key),
            KeySlot::Owned(key) => Some(key.as_str()),
        }
    }
}

/// The loop-item stack; `LoopTag::level` indexes it.
#[derive(Default)]
pub(crate) struct LoopStack<'v> {
    frames: Vec<LoopFrame<'v>>,
}

impl<'v> LoopStack<'v> {
    fn frame(&self, level: u8) -> Option<&LoopFrame<'v>> {
        self.frames.get(level as usize)
    }

    fn ensure(&mut self, level: u8) {
        while self.frames.len() <= level as usize {
            self.frames.push(LoopFrame::default());
        }
    }
}

/// Walks `name[segment_start..]` as `seg] [seg] [seg]` bracket segments,
/// descending one lookup per segment - object keys by bytes, array slots by
/// decimal index.
fn descend<'a>(mut value: &'a Value, name: &str, mut segment_start: usize) -> Option<&'a Value> {
    let bytes = name.as_bytes();
    let length = name.len();

    loop {
        segment_start = segment_start.min(length);
        let mut segment_end = segment_start;

        while segment_end < length && bytes[segment_end] != b']' {
            segment_end += 1;
        }

        value = value.get(&name[segment_start..segment_end])?;

        segment_end += 1;

        if segment_end >= length || bytes[segment_end] != b'[' {
            break;
        }

        segment_start = segment_end + 1;
    }

    Some(value)
}

/// Resolves a variable path against the root value and the loop stack.
///
/// A bound path (`id_length != 0`) starts at the loop item and skips its
/// own name; the rest descends bracket segment by bracket segment.
pub(crate) fn resolve<'a, 'v: 'a>(
    root: &'v Value,
    content: &str,
    frames: &'a LoopStack<'v>,
    path: &VariablePath,
) -> Option<&'a Value> {
    if path.id_length == 0 {
        return resolve_tree(root, content, path);
    }

    let start = path.offset;
    let length = path.length as usize;

    if length == 0 || start + length > content.len() {
        return None;
    }

    let name = &content[start..start + length];
    let item = frames.frame(path.level)?.value.get()?;

    if !name.ends_with(']') {
        return Some(item);
    }

    descend(item, name, path.id_length as usize + 1)
}

/// Root-only resolution for paths that never touch the loop stack.
fn resolve_tree<'v>(root: &'v Value, content: &str, path: &VariablePath) -> Option<&'v Value> {
    let start = path.offset;
    let length = path.length as usize;

    if length == 0 || start + length > content.len() || path.id_length != 0 {
        return None;
    }

    let name = &content[start..start + length];

    if !name.ends_with(']') {
        return root.get(name);
    }

    let bracket = name.find('[')?;

    if bracket == 0 {
        return None;
    }

    let value = root.get(&name[..bracket])?;
    descend(value, name, bracket + 1)
}

/// HTML-escapes `& < > " '` into entities.
pub fn escape_html(content: &str, out: &mut String) {
    let bytes = content.as_bytes();
    let mut offset = 0;
    let mut offset2 = 0;

    while offset < bytes.len() {
        let replacement = match bytes[offset] {
            b'&' => "&amp;",
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'"' => "&quot;",
            b'\'' => "&#39;",
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

fn template_format() -> RealFormat {
    RealFormat::new(TEMPLATE_PRECISION)
}

pub(crate) struct Renderer<'t, 'v> {
    content: &'t str,
    root: &'v Value,
    frames: LoopStack<'v>,
}

impl<'t, 'v> Renderer<'t, 'v> {
    pub fn new(content: &'t str, root: &'v Value) -> Self {
        Self {
            content,
            root,
            frames: LoopStack::default(),
        }
    }

    /// Renders a tag slice over `[offset, end_offset)`: literal bytes before
    /// each tag, the tag itself, then the literal tail.
    pub fn render(&mut self, out: &mut String, tags: &[TagBit], offset: usize, end_offset: usize) {
        let mut offset = offset;

        for tag in tags {
            match tag {
                TagBit::Variable(path) => self.render_variable(out, path, &mut offset),
                TagBit::RawVariable(path) => self.render_raw_variable(out, path, &mut offset),
                TagBit::Math(tag) => self.render_math(out, tag, &mut offset),
                TagBit::SuperVariable(tag) => self.render_super_variable(out, tag, &mut offset),
                TagBit::InlineIf(tag) => self.render_inline_if(out, tag, &mut offset),
                TagBit::Loop(tag) => self.render_loop(out, tag, &mut offset),
                TagBit::If(tag) => self.render_if(out, tag, &mut offset),
            }
        }

        self.write_span(out, offset, end_offset);
    }

    fn write_span(&self, out: &mut String, from: usize, to: usize) {
        if from < to && to <= self.content.len() {
            out.push_str(&self.content[from..to]);
        }
    }

    fn eval(&self, expressions: &[Expression]) -> Option<Num> {
        if expressions.is_empty() {
            return None;
        }

        let ctx = EvalContext {
            content: self.content,
            root: self.root,
            frames: &self.frames,
        };

        evaluate(&ctx, expressions)
    }

    fn render_variable(&mut self, out: &mut String, path: &VariablePath, offset: &mut usize) {
        // "{var:" plus the trailing "}".
        let tag_offset = path.offset - 5;
        let tag_length = path.length as usize + 6;

        self.write_span(out, *offset, tag_offset);
        *offset = tag_offset + tag_length;

        let written = match resolve(self.root, self.content, &self.frames, path) {
            Some(value) => value.write_text(out, template_format(), Some(escape_html)),
            None => false,
        };

        if !written {
            // A loop-bound name may still print its item's key.
            if path.id_length != 0 {
                if let Some(key) = self.frames.frame(path.level).and_then(|f| f.key.get()) {
                    if !key.is_empty() {
                        escape_html(key, out);
                        return;
                    }
                }
            }

            trace!(name = &self.content[path.offset..path.offset + path.length as usize],
                   "variable did not resolve; emitting literal");
            escape_html(&self.content[tag_offset..tag_offset + tag_length], out);
        }
    }

    fn render_raw_variable(&mut self, out: &mut String, path: &VariablePath, offset: &mut usize) {
        // "{raw:" plus the trailing "}".
        let tag_offset = path.offset - 5;
        let tag_length = path.length as usize + 6;

        self.write_span(out, *offset, tag_offset);
        *offset = tag_offset + tag_length;

        let written = match resolve(self.root, self.content, &self.frames, path) {
            Some(value) => value.write_text(out, template_format(), None),
            None => false,
        };

        if !written {
            self.write_span(out, tag_offset, tag_offset + tag_length);
        }
    }

    fn render_math(&mut self, out: &mut String, tag: &MathTag, offset: &mut usize) {
        self.write_span(out, *offset, tag.offset);
        *offset = tag.end_offset;

        match self.eval(&tag.expressions) {
            Some(Num::Natural(value)) => digit::write_uint(out, value),
            Some(Num::Integer(value)) => digit::write_int(out, value),
            Some(Num::Real(value)) => digit::write_real(out, value, template_format()),
            None => self.write_span(out, tag.offset, tag.end_offset),
        }
    }

    fn render_super_variable(&mut self, out: &mut String, tag: &SuperVariableTag, offset: &mut usize) {
        self.write_span(out, *offset, tag.offset);
        *offset = tag.end_offset;

        // The format variable always resolves from the root.
        let resolved: Option<&'v str> =
            resolve_tree(self.root, self.content, &tag.variable).and_then(Value::text_contents);

        let Some(text) = resolved else {
            self.write_span(out, tag.offset, tag.end_offset);
            return;
        };

        let bytes = text.as_bytes();
        let mut index = 0;
        let mut last_index = 0;

        while index < bytes.len() {
            if bytes[index] == b'{' {
                let start = index;

                escape_html(&text[last_index..start], out);
                last_index = start;
                index += 1;

                if index < bytes.len() {
                    let id = bytes[index].wrapping_sub(b'0') as usize;
                    index += 1;

                    if index < bytes.len() && bytes[index] == b'}' {
                        index += 1;

                        if id < tag.sub_tags.len() {
                            last_index = index;

                            match &tag.sub_tags[id] {
                                TagBit::Variable(path) => {
                                    let mut sub_offset = path.offset - 5;
                                    self.render_variable(out, path, &mut sub_offset);
                                }

                                TagBit::RawVariable(path) => {
                                    let mut sub_offset = path.offset - 5;
                                    self.render_raw_variable(out, path, &mut sub_offset);
                                }

                                TagBit::Math(math) => {
                                    let mut sub_offset = math.offset;
                                    self.render_math(out, math, &mut sub_offset);
                                }

                                _ => {}
                            }

                            continue;
                        }
                    }
                }
            } else {
                index += 1;
            }
        }

        escape_html(&text[last_index..index], out);
    }

    fn render_inline_if(&mut self, out: &mut String, tag: &InlineIfTag, offset: &mut usize) {
        self.write_span(out, *offset, tag.offset);
        *offset = tag.offset + tag.length as usize;

        let Some(result) = self.eval(&tag.case) else {
            return;
        };

        let sub_tags;
        let value_offset;
        let value_length;

        if result.is_positive() {
            if tag.true_offset < tag.false_offset {
                let cut = (tag.false_tags_start_id as usize).min(tag.sub_tags.len());
                sub_tags = &tag.sub_tags[..cut];
            } else {
                let cut = (tag.true_tags_start_id as usize).min(tag.sub_tags.len());
                sub_tags = &tag.sub_tags[cut..];
            }

            value_offset = tag.offset + tag.true_offset as usize;
            value_length = tag.true_length as usize;
        } else {
            if tag.false_offset < tag.true_offset {
                let cut = (tag.true_tags_start_id as usize).min(tag.sub_tags.len());
                sub_tags = &tag.sub_tags[..cut];
            } else {
                let cut = (tag.false_tags_start_id as usize).min(tag.sub_tags.len());
                sub_tags = &tag.sub_tags[cut..];
            }

            value_offset = tag.offset + tag.false_offset as usize;
            value_length = tag.false_length as usize;
        }

        self.render(out, sub_tags, value_offset, value_offset + value_length);
    }

    fn render_loop(&mut self, out: &mut String, tag: &LoopTag, offset: &mut usize) {
        self.write_span(out, *offset, tag.offset);
        *offset = tag.end_offset + 7; // "</loop>"

        enum SetSource<'v> {
            Tree(&'v Value),
            Owned(Value),
        }

        // Resolve the working set.
        let mut source: SetSource<'v> = if tag.set.length != 0 {
            if tag.set.id_length == 0 {
                match resolve_tree(self.root, self.content, &tag.set) {
                    Some(value) => SetSource::Tree(value),
                    None => return,
                }
            } else {
                // Bound to an outer loop item; clone out of the stack so the
                // frames stay free for this loop's own slot.
                match resolve(self.root, self.content, &self.frames, &tag.set) {
                    Some(value) => SetSource::Owned(value.clone()),
                    None => return,
                }
            }
        } else {
            SetSource::Tree(self.root)
        };

        if tag.group_length != 0 {
            let group_start = tag.offset + tag.group_offset as usize;
            let key = &self.content[group_start..group_start + tag.group_length as usize];

            let grouped = match &source {
                SetSource::Tree(value) => value.group_by(key),
                SetSource::Owned(value) => value.group_by(key),
            };

            match grouped {
                Some(grouped) => source = SetSource::Owned(grouped),
                None => return,
            }
        }

        if let Some(order) = tag.sort {
            let mut owned = match source {
                SetSource::Tree(value) => value.clone(),
                SetSource::Owned(value) => value,
            };

            owned.sort(order == SortOrder::Ascend);
            source = SetSource::Owned(owned);
        }

        let level = tag.level;
        self.frames.ensure(level);

        let content_offset = tag.offset + tag.content_offset as usize;
        let sub_tags = &tag.sub_tags;

        match source {
            SetSource::Tree(set) => {
                let size = set.len();

                if set.is_object() {
                    for index in 0..size {
                        let Some((key, item)) = set.entry_at(index) else {
                            continue;
                        };

                        self.frames.frames[level as usize] = LoopFrame {
                            value: Slot::Tree(item),
                            key: KeySlot::Tree(key),
                        };
                        self.render(out, sub_tags, content_offset, tag.end_offset);
                    }
                } else {
                    for index in 0..size {
                        let Some(item) = set.get_index(index) else {
                            continue;
                        };

                        self.frames.frames[level as usize] = LoopFrame {
                            value: Slot::Tree(item),
                            key: KeySlot::Empty,
                        };
                        self.render(out, sub_tags, content_offset, tag.end_offset);
                    }
                }
            }

            SetSource::Owned(set) => {
                let size = set.len();

                if set.is_object() {
                    for index in 0..size {
                        let Some((key, item)) = set.entry_at(index) else {
                            continue;
                        };

                        let frame = LoopFrame {
                            value: Slot::Owned(item.clone()),
                            key: KeySlot::Owned(key.to_owned()),
                        };
                        self.frames.frames[level as usize] = frame;
                        self.render(out, sub_tags, content_offset, tag.end_offset);
                    }
                } else {
                    for index in 0..size {
                        let Some(item) = set.get_index(index) else {
                            continue;
                        };

                        let frame = LoopFrame {
                            value: Slot::Owned(item.clone()),
                            key: KeySlot::Empty,
                        };
                        self.frames.frames[level as usize] = frame;
                        self.render(out, sub_tags, content_offset, tag.end_offset);
                    }
                }
            }
        }
    }

    fn render_if(&mut self, out: &mut String, tag: &crate::tags::IfTag, offset: &mut usize) {
        self.write_span(out, *offset, tag.offset);
        *offset = tag.end_offset;

        // The first case must carry a condition; a bare <else> alone stays
        // silent.
        let Some(first) = tag.cases.first() else {
            return;
        };

        if first.case.is_empty() {
            return;
        }

        for case in &tag.cases {
            let taken = case.case.is_empty()
                || self.eval(&case.case).is_some_and(|result| result.is_positive());

            if taken {
                self.render(out, &case.sub_tags, case.offset, case.end_offset);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        let mut out = String::new();
        escape_html("a & <b> \"c\" 'd'", &mut out);
        assert_eq!(out, "a &amp; &lt;b&gt; &quot;c&quot; &#39;d&#39;");

        out.clear();
        escape_html("plain", &mut out);
        assert_eq!(out, "plain");
    }

    #[test]
    fn test_resolve_paths() {
        let value = stencil_core::json::parse(
            r#"{"a": {"b": [10, {"c": 7}]}, "xs": [1, 2, 3], "0": "zero"}"#,
        );
        let frames = LoopStack::default();

        let check = |text: &str, prefix: usize| {
            let path = VariablePath {
                offset: prefix,
                length: (text.len() - prefix) as u16,
                id_length: 0,
                level: 0,
            };
            resolve(&value, text, &frames, &path)
        };

        assert_eq!(check("a", 0), value.get("a"));
        assert_eq!(check("xs[1]", 0), Some(&Value::UInt(2)));
        assert_eq!(check("a[b][0]", 0), Some(&Value::UInt(10)));
        assert_eq!(check("a[b][1][c]", 0), Some(&Value::UInt(7)));
        assert_eq!(check("0", 0), value.get("0"));
        assert_eq!(check("missing[0]", 0), None);
        assert_eq!(check("xs[9]", 0), None);
        assert_eq!(check("xs[", 0), None);
        assert_eq!(check("[x]", 0), None);
    }
}
