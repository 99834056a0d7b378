//! Template parsing.
//!
//! Drives the scanner over the template and builds the tag tree. State is a
//! stack of currently-open containers: each opening construct (super
//! variable, inline if, loop, if case) pushes a frame that collects child
//! tags, and the matching closer pops it and attaches the finished tag to
//! its parent. Anything left open at the end of input is discarded, so a
//! malformed construct never survives past its outermost scope.
//!
//! Open loops are tracked separately so variable names inside a loop can be
//! bound to the loop's `value` name at parse time; the renderer then
//! resolves them by indexing the loop-item stack instead of re-parsing.

use tracing::debug;

use crate::expr;
use crate::scanner::{self, Scanner};
use crate::tags::{
    IfTag, IfTagCase, InlineIfTag, LoopTag, MathTag, SortOrder, SuperVariableTag, TagBit,
    VariablePath,
};

/// An open loop during parsing: where its `value` name lives and which
/// loop-item level it owns.
pub(crate) struct LoopBinding {
    pub value_offset: usize,
    pub value_length: usize,
    pub level: u8,
}

enum OpenTag {
    SuperVariable(Box<SuperVariableTag>),
    InlineIf(Box<InlineIfTag>),
    Loop(Box<LoopTag>),
    IfCase { tag: Box<IfTag>, case: IfTagCase },
}

struct Frame {
    open: Option<OpenTag>,
    tags: Vec<TagBit>,
}

impl Frame {
    fn root() -> Self {
        Self {
            open: None,
            tags: Vec::new(),
        }
    }

    fn child(open: OpenTag) -> Self {
        Self {
            open: Some(open),
            tags: Vec::new(),
        }
    }
}

/// Binds a variable name to the innermost enclosing loop whose `value` name
/// prefixes it, recording the loop's level so the renderer can index the
/// loop-item stack directly.
pub(crate) fn check_loop_variable(bytes: &[u8], tag: &mut VariablePath, loops: &[LoopBinding]) {
    for binding in loops.iter().rev() {
        let length = binding.value_length;

        if tag.offset + length <= bytes.len()
            && binding.value_offset + length <= bytes.len()
            && bytes[tag.offset..tag.offset + length]
                == bytes[binding.value_offset..binding.value_offset + length]
        {
            tag.id_length = length as u8;
            tag.level = binding.level;
            break;
        }
    }
}

/// Parses a template into its top-level tag sequence.
pub fn parse(content: &str) -> Vec<TagBit> {
    let bytes = content.as_bytes();
    let length = bytes.len();
    let mut scanner = Scanner::new(bytes);

    let mut stack: Vec<Frame> = vec![Frame::root()];
    let mut loops: Vec<LoopBinding> = Vec::new();
    let mut is_child = false;

    scanner.next_segment();

    loop {
        let match_id = scanner.current_match();

        if match_id == 0 {
            break;
        }

        match match_id {
            scanner::LINE_END => {
                if is_child && stack.len() > 1 {
                    is_child = false;

                    let frame = match stack.pop() {
                        Some(frame) => frame,
                        None => break,
                    };

                    match frame.open {
                        Some(OpenTag::SuperVariable(mut tag)) => {
                            tag.end_offset = scanner.offset();
                            tag.sub_tags = frame.tags;
                            push_tag(&mut stack, TagBit::SuperVariable(tag));
                        }

                        Some(OpenTag::InlineIf(tag)) => {
                            match close_inline_if(bytes, scanner.offset(), tag, frame.tags) {
                                InlineIfClose::Attach(tag) => {
                                    push_tag(&mut stack, TagBit::InlineIf(tag));
                                }

                                InlineIfClose::Reopen(tag, tags) => {
                                    // A branch value carried the '}'; keep
                                    // collecting children until the real end.
                                    is_child = true;
                                    stack.push(Frame {
                                        open: Some(OpenTag::InlineIf(tag)),
                                        tags,
                                    });
                                }

                                InlineIfClose::Drop => {
                                    debug!("inline if without branches dropped");
                                }
                            }
                        }

                        Some(OpenTag::Loop(_)) => {
                            // An unterminated loop inside an inline tag.
                            loops.pop();
                        }

                        _ => {}
                    }
                }

                scanner.next_segment();
            }

            scanner::VARIABLE | scanner::RAW_VARIABLE => {
                let offset = scanner.offset();

                scanner.next_segment();

                if scanner.current_match() == scanner::LINE_END {
                    let var_length = (scanner.offset() - offset - 1) & 0xFF;

                    if var_length != 0 {
                        let mut path = VariablePath {
                            offset,
                            length: var_length as u16,
                            id_length: 0,
                            level: 0,
                        };
                        check_loop_variable(bytes, &mut path, &loops);

                        let tag = if match_id == scanner::VARIABLE {
                            TagBit::Variable(path)
                        } else {
                            TagBit::RawVariable(path)
                        };
                        push_tag(&mut stack, tag);
                    }

                    scanner.next_segment();
                }
            }

            scanner::MATH => {
                let offset = scanner.offset();
                let mut end_offset = 0usize;
                let mut skip_var = 0u32;

                scanner.next_segment();

                loop {
                    let mut inner = scanner.current_match();

                    if inner != 0 && inner < scanner::MATH && inner != scanner::LINE_END {
                        // A nested {var:}/{raw:} opener; its '}' balances it.
                        scanner.next_segment();
                        inner = scanner.current_match();
                        skip_var += 1;
                    }

                    if inner == scanner::LINE_END {
                        if skip_var != 0 {
                            scanner.next_segment();
                            skip_var -= 1;
                            continue;
                        }

                        end_offset = scanner.offset();
                        scanner.next_segment();
                    }

                    break;
                }

                if end_offset != 0 {
                    let expressions = expr::compile(content, offset, end_offset - 1, &loops);
                    push_tag(
                        &mut stack,
                        TagBit::Math(Box::new(MathTag {
                            offset: offset - 6,
                            end_offset,
                            expressions,
                        })),
                    );
                }
            }

            scanner::SUPER_VARIABLE => {
                let mut offset = scanner.offset();
                let svar_id_offset = offset;
                let svar_offset = offset - 6;

                scanner.next_segment();
                let end_offset = scanner.offset();

                // The name ends at the first comma, or at the '}' when the
                // tag has no children.
                let scan_end = if scanner.current_match() == scanner::LINE_END {
                    end_offset - 1
                } else {
                    end_offset
                };

                while offset < scan_end && bytes[offset] != b',' {
                    offset += 1;
                }

                let var_length = (offset - svar_id_offset) & 0xFF;

                if var_length != 0 {
                    let tag = SuperVariableTag {
                        offset: svar_offset,
                        end_offset: 0,
                        variable: VariablePath {
                            offset: svar_id_offset,
                            length: var_length as u16,
                            id_length: 0,
                            level: 0,
                        },
                        sub_tags: Vec::new(),
                    };

                    is_child = true;
                    stack.push(Frame::child(OpenTag::SuperVariable(Box::new(tag))));
                }
            }

            scanner::INLINE_IF => {
                let mut offset = scanner.offset();
                let iif_offset = offset - 3;

                scanner.next_segment();
                let mut end_offset = scanner.offset();

                while offset < end_offset && bytes[offset] == b' ' {
                    offset += 1;
                }

                if offset < end_offset
                    && (end_offset - offset) > 4
                    && &bytes[offset..offset + 4] == b"case"
                {
                    offset += 4;

                    while offset < end_offset && bytes[offset] != b'=' {
                        offset += 1;
                    }

                    loop {
                        offset += 1;

                        if !(offset < end_offset && bytes[offset] == b' ') {
                            break;
                        }
                    }

                    if offset < end_offset {
                        let quote = bytes[offset];
                        offset += 1;
                        let case_offset = offset;

                        // The case value may cross '}' boundaries; extend
                        // through them until the closing quote shows up.
                        let mut inner;

                        loop {
                            inner = scanner.current_match();

                            if inner == 0 {
                                break;
                            }

                            while offset < end_offset && bytes[offset] != quote {
                                offset += 1;
                            }

                            if offset < end_offset {
                                break;
                            }

                            scanner.next_segment();
                            inner = scanner.current_match();

                            if inner == scanner::LINE_END {
                                scanner.next_segment();
                                end_offset = scanner.offset();
                                continue;
                            }

                            break;
                        }

                        if inner != 0 {
                            let mut tag = InlineIfTag {
                                offset: iif_offset,
                                case: expr::compile(content, case_offset, offset, &loops),
                                ..InlineIfTag::default()
                            };

                            offset += 1;
                            // Attribute scan starts near here; exact branch
                            // offsets come from the close pass.
                            tag.true_offset = (offset - iif_offset) as u16;

                            is_child = true;
                            stack.push(Frame::child(OpenTag::InlineIf(Box::new(tag))));
                        }
                    }
                }
            }

            scanner::LOOP => {
                let mut offset = scanner.offset();
                let loop_offset = offset - 5;

                scanner.next_segment();
                let end_offset = scanner.offset();

                while offset < end_offset && bytes[offset] != b'>' {
                    offset += 1;
                }

                if offset < end_offset {
                    let mut tag = LoopTag {
                        offset: loop_offset,
                        end_offset: 0,
                        content_offset: 0,
                        set: VariablePath::default(),
                        value_offset: 0,
                        value_length: 0,
                        group_offset: 0,
                        group_length: 0,
                        sort: None,
                        level: (stack.len() - 1) as u8,
                        sub_tags: Vec::new(),
                    };

                    parse_loop_attributes(bytes, offset, &mut tag, &loops);

                    offset += 1;
                    tag.content_offset = (offset - loop_offset) as u16;

                    loops.push(LoopBinding {
                        value_offset: tag.offset + tag.value_offset as usize,
                        value_length: tag.value_length as usize,
                        level: tag.level,
                    });
                    stack.push(Frame::child(OpenTag::Loop(Box::new(tag))));
                }
            }

            scanner::LOOP_END => {
                let closes_loop = matches!(
                    stack.last().and_then(|frame| frame.open.as_ref()),
                    Some(OpenTag::Loop(_))
                );

                if closes_loop && stack.len() > 1 {
                    if let Some(frame) = stack.pop() {
                        if let Some(OpenTag::Loop(mut tag)) = frame.open {
                            tag.end_offset = scanner.offset() - 7;
                            tag.sub_tags = frame.tags;
                            loops.pop();
                            push_tag(&mut stack, TagBit::Loop(tag));
                        }
                    }
                }

                scanner.next_segment();
            }

            scanner::IF => {
                let mut offset = scanner.offset();
                let if_offset = offset - 3;
                let mut case_offset = 0usize;
                let mut case_end_offset = 0usize;

                parse_if_case(bytes, &mut offset, length, &mut case_offset, &mut case_end_offset);
                scanner.set_offset(offset);

                if offset < length {
                    let tag = IfTag {
                        offset: if_offset,
                        end_offset: 0,
                        cases: Vec::new(),
                    };
                    let case = IfTagCase {
                        offset,
                        end_offset: 0,
                        case: expr::compile(content, case_offset, case_end_offset, &loops),
                        sub_tags: Vec::new(),
                    };

                    stack.push(Frame::child(OpenTag::IfCase {
                        tag: Box::new(tag),
                        case,
                    }));
                }

                scanner.next_segment();
            }

            scanner::IF_END => {
                let closes_if = matches!(
                    stack.last().and_then(|frame| frame.open.as_ref()),
                    Some(OpenTag::IfCase { .. })
                );

                if closes_if && stack.len() > 1 {
                    if let Some(frame) = stack.pop() {
                        if let Some(OpenTag::IfCase { mut tag, mut case }) = frame.open {
                            case.end_offset = scanner.offset() - 5;
                            case.sub_tags = frame.tags;
                            tag.cases.push(case);
                            tag.end_offset = scanner.offset();
                            push_tag(&mut stack, TagBit::If(tag));
                        }
                    }
                }

                scanner.next_segment();
            }

            scanner::ELSE => {
                let top_is_if = matches!(
                    stack.last().and_then(|frame| frame.open.as_ref()),
                    Some(OpenTag::IfCase { .. })
                );

                if top_is_if && stack.len() > 1 {
                    let handled = parse_else(
                        content,
                        bytes,
                        length,
                        &mut scanner,
                        &mut stack,
                        &loops,
                    );

                    if handled {
                        continue;
                    }
                }

                scanner.next_segment();
            }

            _ => {
                scanner.next_segment();
            }
        }
    }

    // Anything still open is malformed; discard it whole.
    while stack.len() > 1 {
        if let Some(frame) = stack.pop() {
            if matches!(frame.open, Some(OpenTag::Loop(_))) {
                loops.pop();
            }

            debug!("unterminated tag dropped at end of template");
        }
    }

    stack.pop().map(|frame| frame.tags).unwrap_or_default()
}

fn push_tag(stack: &mut Vec<Frame>, tag: TagBit) {
    if let Some(frame) = stack.last_mut() {
        frame.tags.push(tag);
    }
}

/// Handles `<else>` / `<else if case="...">`: closes the current case and
/// opens the next one. Returns true when the scanner has already been
/// advanced. A malformed else drops the whole if construct.
fn parse_else(
    content: &str,
    bytes: &[u8],
    length: usize,
    scanner: &mut Scanner<'_>,
    stack: &mut Vec<Frame>,
    loops: &[LoopBinding],
) -> bool {
    let else_offset = scanner.offset();

    let Some(Frame { open, tags }) = stack.last_mut() else {
        return false;
    };

    let Some(OpenTag::IfCase { tag, case }) = open.as_mut() else {
        return false;
    };

    // Close the running case at the '<else'.
    let mut closed = std::mem::replace(
        case,
        IfTagCase {
            offset: 0,
            end_offset: 0,
            case: Vec::new(),
            sub_tags: Vec::new(),
        },
    );
    closed.end_offset = else_offset - 5;
    closed.sub_tags = std::mem::take(tags);
    tag.cases.push(closed);

    // Distinguish <else> from <else if ...>.
    let mut offset = else_offset;
    let mut is_if_else = false;

    while offset < length && bytes[offset] != b'>' {
        if bytes[offset] == b'i' {
            offset += 2;
            is_if_else = true;
            break;
        }

        offset += 1;
    }

    if is_if_else {
        let mut case_offset = 0usize;
        let mut case_end_offset = 0usize;

        parse_if_case(bytes, &mut offset, length, &mut case_offset, &mut case_end_offset);
        scanner.set_offset(offset);
        scanner.next_segment();

        if offset < length && case_end_offset != 0 {
            case.offset = offset;
            case.case = expr::compile(content, case_offset, case_end_offset, loops);
            return true;
        }
    } else if offset < length {
        offset += 1;
        case.offset = offset;
        case.case = Vec::new();
        scanner.set_offset(offset);
        scanner.next_segment();
        return true;
    }

    // Bad else: drop the whole if construct.
    stack.pop();
    debug!("malformed else dropped its if construct");
    scanner.next_segment();
    true
}

/// Scans `case="..."` (either quote style) and leaves `*offset` after the
/// closing `>` of the opening tag.
fn parse_if_case(
    bytes: &[u8],
    offset: &mut usize,
    end_offset: usize,
    case_offset: &mut usize,
    case_end_offset: &mut usize,
) {
    while *offset < end_offset && bytes[*offset] == b' ' {
        *offset += 1;
    }

    if *offset < end_offset
        && (end_offset - *offset) > 4
        && &bytes[*offset..*offset + 4] == b"case"
    {
        *offset += 4;

        while *offset < end_offset && bytes[*offset] != b'=' {
            *offset += 1;
        }

        loop {
            *offset += 1;

            if !(*offset < end_offset && bytes[*offset] == b' ') {
                break;
            }
        }

        if *offset < end_offset {
            let quote = bytes[*offset];
            *offset += 1;
            *case_offset = *offset;

            while *offset < end_offset && bytes[*offset] != quote {
                *offset += 1;
            }

            *case_end_offset = *offset;

            while *offset < end_offset && bytes[*offset] != b'>' {
                *offset += 1;
            }

            *offset += 1;
        }
    }
}

/// Parses `<loop ...>` attributes in any order: `set`, `value`, `sort`,
/// `group`. `end_offset` sits on the closing `>`.
fn parse_loop_attributes(
    bytes: &[u8],
    end_offset: usize,
    tag: &mut LoopTag,
    outer_loops: &[LoopBinding],
) {
    enum Attribute {
        None,
        Set,
        Value,
        Sort,
        Group,
    }

    let mut offset = tag.offset + 5;

    loop {
        let mut attribute = Attribute::None;

        while offset < end_offset && bytes[offset] == b' ' {
            offset += 1;
        }

        if offset >= end_offset {
            break;
        }

        match bytes[offset] {
            b's' => {
                let remaining = end_offset - offset;

                if remaining > 3 && &bytes[offset..offset + 3] == b"set" {
                    offset += 3;
                    attribute = Attribute::Set;
                } else if remaining > 4 && &bytes[offset..offset + 4] == b"sort" {
                    offset += 4;
                    attribute = Attribute::Sort;
                } else {
                    offset += 1;
                    continue;
                }
            }

            b'v' => {
                if (end_offset - offset) > 5 && &bytes[offset..offset + 5] == b"value" {
                    offset += 5;
                    attribute = Attribute::Value;
                } else {
                    offset += 1;
                    continue;
                }
            }

            b'g' => {
                if (end_offset - offset) > 5 && &bytes[offset..offset + 5] == b"group" {
                    offset += 5;
                    attribute = Attribute::Group;
                } else {
                    offset += 1;
                    continue;
                }
            }

            _ => {
                offset += 1;
                continue;
            }
        }

        while offset < end_offset && bytes[offset] != b'=' {
            offset += 1;
        }

        loop {
            offset += 1;

            if !(offset < end_offset && bytes[offset] == b' ') {
                break;
            }
        }

        if offset < end_offset {
            let attribute_offset = offset + 1;
            let quote = bytes[offset];

            loop {
                offset += 1;

                if !(offset < end_offset && bytes[offset] != quote) {
                    break;
                }
            }

            match attribute {
                Attribute::Set => {
                    tag.set.offset = attribute_offset;
                    tag.set.length = (offset - attribute_offset) as u16;
                    check_loop_variable(bytes, &mut tag.set, outer_loops);
                }

                Attribute::Value => {
                    tag.value_offset = (attribute_offset - tag.offset) as u8;
                    tag.value_length = (offset - attribute_offset) as u8;
                }

                Attribute::Sort => {
                    tag.sort = Some(if bytes.get(attribute_offset) == Some(&b'a') {
                        SortOrder::Ascend
                    } else {
                        SortOrder::Descend
                    });
                }

                Attribute::Group => {
                    tag.group_offset = (attribute_offset - tag.offset) as u8;
                    tag.group_length = (offset - attribute_offset) as u8;
                }

                Attribute::None => {}
            }

            offset += 1;
        }

        if offset >= end_offset {
            break;
        }
    }
}

enum InlineIfClose {
    Attach(Box<InlineIfTag>),
    Reopen(Box<InlineIfTag>, Vec<TagBit>),
    Drop,
}

/// Runs the post-child attribute scan of an inline if: finds `true="..."` /
/// `false="..."`, computes where the later branch's child tags begin, and
/// decides whether the tag is complete, needs more children (a branch value
/// carried a `}`), or has no branches at all.
fn close_inline_if(
    bytes: &[u8],
    end_offset: usize,
    mut tag: Box<InlineIfTag>,
    children: Vec<TagBit>,
) -> InlineIfClose {
    let stashed_true_offset = tag.true_offset;
    let mut offset = tag.offset + stashed_true_offset as usize;
    let mut is_true = false;

    tag.true_offset = 0;
    tag.length = (end_offset - tag.offset) as u16;

    'scan: loop {
        while offset < end_offset && bytes[offset] == b' ' {
            offset += 1;
        }

        if offset < end_offset {
            let first = bytes[offset];

            if first == b't' {
                if (end_offset - offset) > 4 && &bytes[offset..offset + 4] == b"true" {
                    offset += 4;
                    is_true = true;
                }
            } else if first == b'f'
                && (end_offset - offset) > 5
                && &bytes[offset..offset + 5] == b"false"
            {
                offset += 5;
            } else {
                break 'scan;
            }

            while offset < end_offset && bytes[offset] != b'=' {
                offset += 1;
            }

            loop {
                offset += 1;

                if !(offset < end_offset && bytes[offset] == b' ') {
                    break;
                }
            }

            if offset < end_offset {
                let quote = bytes[offset];
                offset += 1;
                let attribute_offset = offset;

                while offset < end_offset && bytes[offset] != quote {
                    offset += 1;
                }

                if offset < end_offset {
                    if is_true {
                        is_true = false;
                        tag.true_offset = (attribute_offset - tag.offset) as u16;
                        tag.true_length = (offset - attribute_offset) as u16;
                    } else {
                        tag.false_offset = (attribute_offset - tag.offset) as u16;
                        tag.false_length = (offset - attribute_offset) as u16;
                    }

                    offset += 1;

                    if offset < end_offset {
                        continue 'scan;
                    }

                    break 'scan;
                }

                // The closing quote lies beyond this '}': the branch value
                // contains it, so child collection continues.
                tag.true_offset = stashed_true_offset;
                return InlineIfClose::Reopen(tag, children);
            }
        }

        offset += 1;

        if offset >= end_offset {
            break;
        }
    }

    if tag.true_offset == 0 && tag.false_offset == 0 {
        return InlineIfClose::Drop;
    }

    // Children are shared between the branches; find the index where the
    // later-appearing branch's tags begin.
    let later_start =
        tag.offset + tag.true_offset.max(tag.false_offset) as usize;
    let mut id: u8 = 0;

    for child in &children {
        let child_offset = match child {
            TagBit::Variable(path) | TagBit::RawVariable(path) => path.offset,
            TagBit::Math(math) => math.offset,
            _ => return InlineIfClose::Drop,
        };

        if child_offset >= later_start {
            break;
        }

        id = id.saturating_add(1);
    }

    if tag.true_offset < tag.false_offset {
        tag.false_tags_start_id = id;
    } else {
        tag.true_tags_start_id = id;
    }

    tag.sub_tags = children;
    InlineIfClose::Attach(tag)
}
