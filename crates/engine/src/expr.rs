//! Expression stream and compiler.
//!
//! A condition or math body compiles into a flat sequence of [`Expression`]
//! nodes, each an operand plus the operator that follows it; the final node
//! carries [`Operation::NoOp`]. Parenthesised groups become nested streams
//! (`SubOperation`) unless the whole input is parenthesised, in which case
//! the inner stream replaces the outer one.
//!
//! Compilation is all-or-nothing: any malformed piece yields an empty
//! stream, which callers treat as an inert expression.

use stencil_core::digit::{self, ParsedNumber};

use crate::parser::LoopBinding;
use crate::tags::VariablePath;

/// Operators in precedence order: the numeric rank of the variant IS its
/// binding strength, which is what the evaluator's climb compares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub enum Operation {
    NoOp = 0,
    Or,             // ||
    And,            // &&
    Equal,          // ==
    NotEqual,       // !=
    GreaterOrEqual, // >=
    LessOrEqual,    // <=
    Greater,        // >
    Less,           // <
    BitwiseOr,      // |
    BitwiseAnd,     // &
    Addition,       // +
    Subtraction,    // -
    Multiplication, // *
    Division,       // /
    Remainder,      // %
    Exponent,       // ^
    Error,
}

#[derive(Clone, Debug)]
pub enum Operand {
    Natural(u64),
    Integer(i64),
    Real(f64),
    /// Byte range kept for string comparison; only valid next to `==`/`!=`.
    NotANumber { offset: usize, length: usize },
    Variable(VariablePath),
    SubOperation(Vec<Expression>),
}

#[derive(Clone, Debug)]
pub struct Expression {
    pub operand: Operand,
    /// The operator following this operand; `NoOp` terminates the stream.
    pub operation: Operation,
}

fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | b'\n')
}

/// Compiles `content[offset..end_offset]` into an expression stream.
/// Returns an empty vector when the input is malformed.
pub fn compile(
    content: &str,
    mut offset: usize,
    end_offset: usize,
    loops: &[LoopBinding],
) -> Vec<Expression> {
    let mut exprs: Vec<Expression> = Vec::new();
    let mut last_oper = Operation::NoOp;

    while offset < end_offset {
        let num_offset = offset;
        let oper = next_operation(content.as_bytes(), &mut offset, end_offset);

        if oper != Operation::Error
            && parse_operand(&mut exprs, oper, last_oper, content, num_offset, offset, loops)
        {
            offset += 1;

            if oper < Operation::Greater {
                // Two-character operator (or the terminating NoOp).
                offset += 1;
            }

            last_oper = oper;
            continue;
        }

        break;
    }

    // A full scan overshoots the end by construction; anything else means
    // the walk stopped on a malformed piece.
    if offset > end_offset {
        exprs
    } else {
        Vec::new()
    }
}

/// One operand, honoring parentheses and `{var:...}` references. Non-numeric
/// text survives only next to an equality operator.
fn parse_operand(
    exprs: &mut Vec<Expression>,
    oper: Operation,
    last_oper: Operation,
    content: &str,
    mut offset: usize,
    mut end_offset: usize,
    loops: &[LoopBinding],
) -> bool {
    let bytes = content.as_bytes();

    while offset < end_offset && is_space(bytes[offset]) {
        offset += 1;
    }

    while end_offset > offset && is_space(bytes[end_offset - 1]) {
        end_offset -= 1;
    }

    if offset >= end_offset {
        return false;
    }

    match bytes[offset] {
        b'(' => {
            offset += 1;
            end_offset -= 1;

            if (last_oper != oper) || (oper != Operation::NoOp) {
                let sub = compile(content, offset, end_offset, loops);
                let filled = !sub.is_empty();

                exprs.push(Expression {
                    operand: Operand::SubOperation(sub),
                    operation: oper,
                });

                filled
            } else {
                // The entire expression sits inside (...).
                *exprs = compile(content, offset, end_offset, loops);
                !exprs.is_empty()
            }
        }

        b'{' => {
            // {var:...} is the only variable form inside expressions.
            if (end_offset - offset) > 6 {
                end_offset -= 1;

                if bytes[end_offset] == b'}' {
                    offset += 5;

                    let mut path = VariablePath {
                        offset,
                        length: (end_offset - offset) as u16,
                        id_length: 0,
                        level: 0,
                    };
                    crate::parser::check_loop_variable(bytes, &mut path, loops);

                    exprs.push(Expression {
                        operand: Operand::Variable(path),
                        operation: oper,
                    });

                    return true;
                }
            }

            false
        }

        _ => {
            let original_offset = offset;
            let number = digit::parse_number(bytes, &mut offset, end_offset);

            let operand = if !number.is_nan() && offset == end_offset {
                match number {
                    ParsedNumber::Natural(value) => Operand::Natural(value),
                    ParsedNumber::Integer(value) => Operand::Integer(value),
                    ParsedNumber::Real(value) => Operand::Real(value),
                    ParsedNumber::NaN => return false,
                }
            } else {
                let beside_equality = matches!(last_oper, Operation::Equal | Operation::NotEqual)
                    || matches!(oper, Operation::Equal | Operation::NotEqual);

                if !beside_equality {
                    return false;
                }

                Operand::NotANumber {
                    offset: original_offset,
                    length: end_offset - original_offset,
                }
            };

            exprs.push(Expression {
                operand,
                operation: oper,
            });

            true
        }
    }
}

/// Scans forward for the operator that ends the operand starting at
/// `*offset`, leaving `*offset` on the operator's first character.
/// Parenthesised groups and `{...}` references are skipped over.
fn next_operation(bytes: &[u8], offset: &mut usize, end_offset: usize) -> Operation {
    while *offset < end_offset {
        match bytes[*offset] {
            b'|' => {
                if bytes.get(*offset + 1) == Some(&b'|') {
                    return Operation::Or;
                }

                return Operation::BitwiseOr;
            }

            b'&' => {
                if bytes.get(*offset + 1) == Some(&b'&') {
                    return Operation::And;
                }

                return Operation::BitwiseAnd;
            }

            b'>' => {
                if bytes.get(*offset + 1) == Some(&b'=') {
                    return Operation::GreaterOrEqual;
                }

                return Operation::Greater;
            }

            b'<' => {
                if bytes.get(*offset + 1) == Some(&b'=') {
                    return Operation::LessOrEqual;
                }

                return Operation::Less;
            }

            b'!' => {
                if bytes.get(*offset + 1) == Some(&b'=') {
                    return Operation::NotEqual;
                }

                return Operation::Error;
            }

            b'=' => {
                if bytes.get(*offset + 1) == Some(&b'=') {
                    return Operation::Equal;
                }

                return Operation::Error;
            }

            b'-' => {
                if is_binary_position(bytes, *offset) {
                    return Operation::Subtraction;
                }
            }

            b'+' => {
                if is_binary_position(bytes, *offset) {
                    return Operation::Addition;
                }
            }

            b'/' => {
                return Operation::Division;
            }

            b'*' => {
                return Operation::Multiplication;
            }

            b'%' => {
                return Operation::Remainder;
            }

            b'^' => {
                return Operation::Exponent;
            }

            b'(' => {
                *offset += 1;
                let mut depth = 0u32;

                while *offset < end_offset {
                    if bytes[*offset] == b')' {
                        if depth == 0 {
                            break;
                        }

                        depth -= 1;
                    } else if bytes[*offset] == b'(' {
                        depth += 1;
                    }

                    *offset += 1;
                }

                if *offset < end_offset {
                    continue;
                }

                return Operation::Error;
            }

            b'{' => {
                loop {
                    *offset += 1;

                    if !(*offset < end_offset && bytes[*offset] != b'}') {
                        break;
                    }
                }

                if *offset < end_offset {
                    continue;
                }

                *offset = end_offset;
                return Operation::Error;
            }

            _ => {}
        }

        *offset += 1;
    }

    Operation::NoOp
}

/// `+`/`-` are binary only when the nearest non-space character to the left
/// is a digit, `)`, or `}`; otherwise they sign the operand.
fn is_binary_position(bytes: &[u8], mut offset: usize) -> bool {
    while offset != 0 {
        offset -= 1;

        match bytes[offset] {
            b' ' => {}
            b')' | b'}' => return true,
            byte => return byte.is_ascii_digit(),
        }
    }

    false
}
