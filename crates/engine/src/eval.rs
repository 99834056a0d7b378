//! Expression evaluation.
//!
//! Reduces a compiled expression stream to a typed number by operator
//! precedence climbing: the rank of [`Operation`] is the precedence, and a
//! fold happens whenever the current operator binds at least as tightly as
//! the next one.
//!
//! Failure is `None` (division by zero, fractional exponent, unresolvable
//! variable, non-numeric operand in a numeric position); the caller decides
//! between "render the literal" and "condition is false".

use stencil_core::ParsedNumber;
use stencil_core::value::Value;

use crate::expr::{Expression, Operand, Operation};
use crate::render::{LoopStack, resolve};
use crate::tags::VariablePath;

/// A number in flight during evaluation.
#[derive(Clone, Copy, Debug)]
pub enum Num {
    Natural(u64),
    Integer(i64),
    Real(f64),
}

impl Num {
    pub fn is_positive(&self) -> bool {
        match *self {
            Num::Natural(value) => value > 0,
            Num::Integer(value) => value > 0,
            Num::Real(value) => value > 0.0,
        }
    }

    fn as_i64(&self) -> i64 {
        match *self {
            Num::Natural(value) => value as i64,
            Num::Integer(value) => value,
            Num::Real(value) => value as i64,
        }
    }

    fn as_f64(&self) -> f64 {
        match *self {
            Num::Natural(value) => value as f64,
            Num::Integer(value) => value as f64,
            Num::Real(value) => value,
        }
    }

    fn is_zero(&self) -> bool {
        match *self {
            Num::Natural(value) => value == 0,
            Num::Integer(value) => value == 0,
            Num::Real(value) => value == 0.0,
        }
    }
}

fn num_from(number: ParsedNumber) -> Option<Num> {
    match number {
        ParsedNumber::Natural(value) => Some(Num::Natural(value)),
        ParsedNumber::Integer(value) => Some(Num::Integer(value)),
        ParsedNumber::Real(value) => Some(Num::Real(value)),
        ParsedNumber::NaN => None,
    }
}

/// Everything variable resolution needs at evaluation time.
pub(crate) struct EvalContext<'a, 'v> {
    pub content: &'a str,
    pub root: &'v Value,
    pub frames: &'a LoopStack<'v>,
}

impl<'a, 'v> EvalContext<'a, 'v> {
    fn get_value(&self, path: &VariablePath) -> Option<&'a Value>
    where
        'v: 'a,
    {
        resolve(self.root, self.content, self.frames, path)
    }
}

/// An operand after one resolution step. Variables and text survive only
/// up to an equality fold, which consumes them.
enum Slot {
    Num(Num),
    Text { offset: usize, length: usize },
    Variable(VariablePath),
}

/// Evaluates a stream against the value tree and loop-item stack.
pub(crate) fn evaluate(ctx: &EvalContext<'_, '_>, exprs: &[Expression]) -> Option<Num> {
    if exprs.is_empty() {
        return None;
    }

    let mut at = 0;

    match climb(ctx, exprs, &mut at, Operation::NoOp)? {
        Slot::Num(number) => Some(number),
        _ => None,
    }
}

fn climb(
    ctx: &EvalContext<'_, '_>,
    exprs: &[Expression],
    at: &mut usize,
    previous: Operation,
) -> Option<Slot> {
    let mut left = operand_value(ctx, exprs, *at, exprs[*at].operation)?;

    while exprs[*at].operation != Operation::NoOp {
        let oper = exprs[*at].operation;
        let next = *at + 1;

        if next >= exprs.len() {
            return None;
        }

        if oper >= exprs[next].operation {
            let right = operand_value(ctx, exprs, next, oper)?;
            apply(ctx, &mut left, right, oper)?;
            *at = next;

            if previous < exprs[*at].operation {
                continue;
            }

            return Some(left);
        }

        let mut right_at = next;
        let right = climb(ctx, exprs, &mut right_at, oper)?;
        apply(ctx, &mut left, right, oper)?;
        *at = right_at;
    }

    Some(left)
}

fn operand_value(
    ctx: &EvalContext<'_, '_>,
    exprs: &[Expression],
    at: usize,
    operation: Operation,
) -> Option<Slot> {
    let expr = &exprs[at];

    match &expr.operand {
        Operand::SubOperation(sub) => {
            if sub.is_empty() {
                return None;
            }

            let mut sub_at = 0;
            climb(ctx, sub, &mut sub_at, Operation::NoOp)
        }

        Operand::Variable(path) => {
            if !matches!(operation, Operation::Equal | Operation::NotEqual) {
                if let Some(value) = ctx.get_value(path) {
                    if let Some(number) = num_from(value.as_number()) {
                        return Some(Slot::Num(number));
                    }
                }

                // A lone variable used as the whole condition is true iff it
                // resolves to a non-empty string.
                if operation == Operation::NoOp && expr.operation == Operation::NoOp {
                    let truthy = ctx
                        .get_value(path)
                        .and_then(Value::as_str)
                        .is_some_and(|text| !text.is_empty());

                    return Some(Slot::Num(Num::Natural(u64::from(truthy))));
                }

                return None;
            }

            // Deferred: the equality fold coerces or string-compares.
            Some(Slot::Variable(path.clone()))
        }

        Operand::Natural(value) => Some(Slot::Num(Num::Natural(*value))),
        Operand::Integer(value) => Some(Slot::Num(Num::Integer(*value))),
        Operand::Real(value) => Some(Slot::Num(Num::Real(*value))),

        Operand::NotANumber { offset, length } => Some(Slot::Text {
            offset: *offset,
            length: *length,
        }),
    }
}

fn apply(ctx: &EvalContext<'_, '_>, left: &mut Slot, right: Slot, oper: Operation) -> Option<()> {
    match oper {
        Operation::Equal => {
            let equal = is_equal(ctx, left, &right)?;
            *left = Slot::Num(Num::Natural(u64::from(equal)));
        }

        Operation::NotEqual => {
            let equal = is_equal(ctx, left, &right)?;
            *left = Slot::Num(Num::Natural(u64::from(!equal)));
        }

        _ => {
            let (a, b) = match (&*left, &right) {
                (Slot::Num(a), Slot::Num(b)) => (*a, *b),
                _ => return None,
            };

            let folded = match oper {
                Operation::Or => Num::Natural(u64::from(a.is_positive() || b.is_positive())),
                Operation::And => Num::Natural(u64::from(a.is_positive() && b.is_positive())),
                Operation::Greater => Num::Natural(u64::from(num_greater(a, b))),
                Operation::GreaterOrEqual => Num::Natural(u64::from(num_greater_or_equal(a, b))),
                Operation::Less => Num::Natural(u64::from(num_greater(b, a))),
                Operation::LessOrEqual => Num::Natural(u64::from(num_greater_or_equal(b, a))),
                Operation::BitwiseOr => bit_or(a, b),
                Operation::BitwiseAnd => bit_and(a, b),
                Operation::Addition => add(a, b),
                Operation::Subtraction => subtract(a, b),
                Operation::Multiplication => multiply(a, b),
                Operation::Division => divide(a, b)?,
                Operation::Remainder => remainder(a, b)?,
                Operation::Exponent => power(a, b)?,
                _ => return None,
            };

            *left = Slot::Num(folded);
        }
    }

    Some(())
}

/// Equality with coercion: a number on either side pulls the other side
/// through numeric conversion; two non-numbers compare as bytes.
fn is_equal(ctx: &EvalContext<'_, '_>, left: &Slot, right: &Slot) -> Option<bool> {
    struct Side<'a> {
        number: Option<Num>,
        text: Option<&'a str>,
        value: Option<&'a Value>,
    }

    fn gather<'a>(ctx: &EvalContext<'a, '_>, slot: &Slot) -> Option<Side<'a>> {
        match slot {
            Slot::Num(number) => Some(Side {
                number: Some(*number),
                text: None,
                value: None,
            }),

            Slot::Variable(path) => {
                let value = ctx.get_value(path)?;

                if value.is_number() {
                    return Some(Side {
                        number: num_from(value.as_number()),
                        text: None,
                        value: Some(value),
                    });
                }

                let text = value.text_contents()?;

                Some(Side {
                    number: None,
                    text: Some(text),
                    value: Some(value),
                })
            }

            Slot::Text { offset, length } => Some(Side {
                number: None,
                text: Some(&ctx.content[*offset..*offset + *length]),
                value: None,
            }),
        }
    }

    let left_side = gather(ctx, left)?;
    let right_side = gather(ctx, right)?;

    if left_side.number.is_some() || right_side.number.is_some() {
        let coerce = |side: &Side| -> Option<Num> {
            match side.number {
                Some(number) => Some(number),
                None => num_from(side.value?.as_number()),
            }
        };

        let a = coerce(&left_side)?;
        let b = coerce(&right_side)?;
        return Some(num_equal(a, b));
    }

    Some(left_side.text == right_side.text)
}

/// Mixed-flavor comparison: a real on either side lifts both to f64,
/// otherwise both sides compare through their signed 64-bit view.
fn num_greater(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Real(x), y) => x > y.as_f64(),
        (x, Num::Real(y)) => x.as_f64() > y,
        (x, y) => x.as_i64() > y.as_i64(),
    }
}

fn num_greater_or_equal(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Real(x), y) => x >= y.as_f64(),
        (x, Num::Real(y)) => x.as_f64() >= y,
        (x, y) => x.as_i64() >= y.as_i64(),
    }
}

fn num_equal(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::Real(x), y) => x == y.as_f64(),
        (x, Num::Real(y)) => x.as_f64() == y,
        (x, y) => x.as_i64() == y.as_i64(),
    }
}

fn add(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Natural(x), Num::Natural(y)) => Num::Natural(x.wrapping_add(y)),
        (Num::Real(x), y) => Num::Real(x + y.as_f64()),
        (x, Num::Real(y)) => Num::Real(x.as_f64() + y),
        (x, y) => Num::Integer(x.as_i64().wrapping_add(y.as_i64())),
    }
}

fn subtract(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Natural(x), Num::Natural(y)) => {
            if x < y {
                Num::Integer((x.wrapping_sub(y)) as i64)
            } else {
                Num::Natural(x - y)
            }
        }
        (Num::Real(x), y) => Num::Real(x - y.as_f64()),
        (x, Num::Real(y)) => Num::Real(x.as_f64() - y),
        (x, y) => Num::Integer(x.as_i64().wrapping_sub(y.as_i64())),
    }
}

fn multiply(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Natural(x), Num::Natural(y)) => Num::Natural(x.wrapping_mul(y)),
        (Num::Real(x), y) => Num::Real(x * y.as_f64()),
        (x, Num::Real(y)) => Num::Real(x.as_f64() * y),
        (x, y) => Num::Integer(x.as_i64().wrapping_mul(y.as_i64())),
    }
}

/// Division always yields a real; zero divisors fail.
fn divide(a: Num, b: Num) -> Option<Num> {
    if b.is_zero() {
        return None;
    }

    Some(Num::Real(a.as_f64() / b.as_f64()))
}

/// Remainder coerces both sides to integers.
fn remainder(a: Num, b: Num) -> Option<Num> {
    let divisor = b.as_i64();

    if divisor == 0 {
        return None;
    }

    Some(Num::Integer(a.as_i64().wrapping_rem(divisor)))
}

fn bit_and(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Natural(x), Num::Natural(y)) => Num::Natural(x & y),
        (x, y) => Num::Integer(x.as_i64() & y.as_i64()),
    }
}

fn bit_or(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Natural(x), Num::Natural(y)) => Num::Natural(x | y),
        (x, y) => Num::Integer(x.as_i64() | y.as_i64()),
    }
}

fn power_u64(mut base: u64, mut exponent: u64) -> u64 {
    let mut result: u64 = 1;

    while exponent != 0 {
        if exponent & 1 == 1 {
            result = result.wrapping_mul(base);
        }

        base = base.wrapping_mul(base);
        exponent >>= 1;
    }

    result
}

/// Integer exponentiation. Fractional operands in (0, 1) fail; a negative
/// exponent turns the result into a real reciprocal.
fn power(a: Num, b: Num) -> Option<Num> {
    let mut left_negative = false;

    let base: u64 = match a {
        Num::Natural(value) => value,

        Num::Integer(value) => {
            left_negative = value < 0;
            value.unsigned_abs()
        }

        Num::Real(value) => {
            let mut real = value;
            left_negative = real < 0.0;

            if left_negative {
                real = -real;
            }

            if real > 0.0 && real < 1.0 {
                return None;
            }

            real as i64 as u64
        }
    };

    let mut right_negative = false;

    let exponent: u64 = match b {
        Num::Natural(value) => value,

        Num::Integer(value) => {
            right_negative = value < 0;
            value.unsigned_abs()
        }

        Num::Real(value) => {
            let mut real = value;
            right_negative = real < 0.0;

            if right_negative {
                real = -real;
            }

            if real > 0.0 && real < 1.0 {
                return None;
            }

            real as i64 as u64
        }
    };

    if base == 0 {
        return Some(Num::Natural(0));
    }

    if exponent == 0 {
        return Some(Num::Natural(1));
    }

    let exponent_odd = exponent & 1 == 1;
    let powered = power_u64(base, exponent);

    if right_negative {
        let mut real = 1.0 / (powered as f64);

        if left_negative {
            real = -real;
        }

        Some(Num::Real(real))
    } else if left_negative && exponent_odd {
        Some(Num::Integer((powered as i64).wrapping_neg()))
    } else {
        Some(Num::Natural(powered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;
    use stencil_core::json;

    fn eval_with(text: &str, value: &Value) -> Option<Num> {
        let exprs = compile(text, 0, text.len(), &[]);
        let frames = LoopStack::default();
        let ctx = EvalContext {
            content: text,
            root: value,
            frames: &frames,
        };
        evaluate(&ctx, &exprs)
    }

    fn eval(text: &str) -> Option<Num> {
        eval_with(text, &Value::Undefined)
    }

    fn natural(result: Option<Num>) -> u64 {
        match result {
            Some(Num::Natural(value)) => value,
            other => panic!("expected natural, got {other:?}"),
        }
    }

    fn real(result: Option<Num>) -> f64 {
        match result {
            Some(Num::Real(value)) => value,
            other => panic!("expected real, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(natural(eval("2 + 3 * 4")), 14);
        assert_eq!(natural(eval("3 * 4 + 2")), 14);
        assert_eq!(natural(eval("2 ^ 3 * 2")), 16);
        assert_eq!(real(eval("8 / 2 + 1")), 5.0);
    }

    #[test]
    fn test_parentheses() {
        assert_eq!(natural(eval("(2 + 3) * 4")), 20);
        assert_eq!(real(eval("(5+3*(1+2)/2^2)")), 7.25);
    }

    #[test]
    fn test_compound_condition() {
        let result = eval("(5+3*(1+2)/2^2 == 7.25) || (3==((8-2)/2))");
        assert_eq!(natural(result), 1);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(natural(eval("3 == 3")), 1);
        assert_eq!(natural(eval("3 != 4")), 1);
        assert_eq!(natural(eval("3 > 4")), 0);
        assert_eq!(natural(eval("3 >= 3")), 1);
        assert_eq!(natural(eval("2 < 3")), 1);
        assert_eq!(natural(eval("2 <= 1")), 0);
        assert_eq!(natural(eval("-1 < 1")), 1);
    }

    #[test]
    fn test_logic() {
        assert_eq!(natural(eval("1 && 1")), 1);
        assert_eq!(natural(eval("0 || 1")), 1);
        assert_eq!(natural(eval("0 || 0")), 0);
        assert_eq!(natural(eval("(1 && 1) || (3 && 3)")), 1);
    }

    #[test]
    fn test_division_by_zero_fails() {
        assert!(eval("1 / 0").is_none());
        assert!(eval("1 % 0").is_none());
    }

    #[test]
    fn test_power_rules() {
        assert_eq!(natural(eval("2 ^ 3")), 8);
        assert_eq!(natural(eval("2 ^ 0")), 1);
        assert_eq!(natural(eval("0 ^ 5")), 0);
        assert_eq!(real(eval("8 ^ -2")), 1.0 / 64.0);

        match eval("-2 ^ 3") {
            Some(Num::Integer(value)) => assert_eq!(value, -8),
            other => panic!("expected integer, got {other:?}"),
        }

        assert!(eval("2 ^ 0.5").is_none());
    }

    #[test]
    fn test_remainder_coerces_to_integer() {
        match eval("7.5 % 2") {
            Some(Num::Integer(value)) => assert_eq!(value, 1),
            other => panic!("expected integer, got {other:?}"),
        }
    }

    #[test]
    fn test_real_arithmetic() {
        assert_eq!(real(eval("0.2 + 0.3")), 0.5);
        assert_eq!(natural(eval("0.2 + 0.3 == 0.5")), 1);
    }

    #[test]
    fn test_variables() {
        let value = json::parse(r#"{"n": 2, "s": "5", "name": "x", "empty": ""}"#);

        assert_eq!(natural(eval_with("{var:n} > 1", &value)), 1);
        assert_eq!(natural(eval_with("{var:s} == 5", &value)), 1);
        assert_eq!(natural(eval_with("{var:n} + 3", &value)), 5);

        // Lone variable: non-empty string is true.
        assert_eq!(natural(eval_with("{var:name}", &value)), 1);
        assert_eq!(natural(eval_with("{var:empty}", &value)), 0);
        assert!(eval_with("{var:missing}", &value).is_none());
    }

    #[test]
    fn test_string_equality() {
        let value = json::parse(r#"{"a": "abc", "b": "abc", "c": "xyz"}"#);

        assert_eq!(natural(eval_with("{var:a} == {var:b}", &value)), 1);
        assert_eq!(natural(eval_with("{var:a} == {var:c}", &value)), 0);
        assert_eq!(natural(eval_with("{var:a} == abc", &value)), 1);
        assert_eq!(natural(eval_with("{var:a} != abc", &value)), 0);
    }

    #[test]
    fn test_bool_variables_compare_with_numbers() {
        let value = json::parse(r#"{"t": true, "f": false}"#);
        assert_eq!(natural(eval_with("{var:t} == 1", &value)), 1);
        assert_eq!(natural(eval_with("{var:f} == 0", &value)), 1);
        assert_eq!(natural(eval_with("{var:t} == true", &value)), 1);
    }

    #[test]
    fn test_empty_stream_fails() {
        assert!(eval("").is_none());
    }
}
