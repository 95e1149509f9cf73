//! Binary and unary operator tables.
//!
//! Every binary operator except the two logical ones lowers to a single
//! `NEO_<name>(left, right)` runtime call. The logical operators are
//! combined natively through `NEO_get_truthy`.

use crate::runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    /// `NEO_<name>(left, right)`.
    Runtime(&'static str),
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryOperator {
    pub symbol: &'static str,
    /// Higher binds tighter.
    pub precedence: u8,
    pub right_associative: bool,
    pub lowering: Lowering,
}

const fn runtime_op(symbol: &'static str, precedence: u8, name: &'static str) -> BinaryOperator {
    BinaryOperator {
        symbol,
        precedence,
        right_associative: false,
        lowering: Lowering::Runtime(name),
    }
}

pub const BINARY_OPERATORS: &[BinaryOperator] = &[
    BinaryOperator {
        symbol: "**",
        precedence: 10,
        right_associative: true,
        lowering: Lowering::Runtime("power"),
    },
    runtime_op("*", 9, "multiply"),
    runtime_op("/", 9, "divide"),
    runtime_op("%", 9, "modulo"),
    runtime_op("+", 8, "add"),
    runtime_op("-", 8, "subtract"),
    runtime_op("<<", 7, "shift_left"),
    runtime_op(">>", 7, "shift_right"),
    runtime_op("<", 6, "less_than"),
    runtime_op(">", 6, "greater_than"),
    runtime_op("<=", 6, "less_or_equals"),
    runtime_op(">=", 6, "greater_or_equals"),
    runtime_op("==", 5, "equals"),
    runtime_op("!=", 5, "not_equals"),
    runtime_op("&", 4, "bit_and"),
    runtime_op("^", 3, "xor"),
    runtime_op("|", 2, "bit_or"),
    BinaryOperator {
        symbol: "&&",
        precedence: 1,
        right_associative: false,
        lowering: Lowering::And,
    },
    BinaryOperator {
        symbol: "||",
        precedence: 0,
        right_associative: false,
        lowering: Lowering::Or,
    },
];

pub fn find_binary(symbol: &str) -> Option<&'static BinaryOperator> {
    BINARY_OPERATORS.iter().find(|op| op.symbol == symbol)
}

impl BinaryOperator {
    /// Whether `self`, already on the operator stack, must be reduced
    /// before `incoming` is pushed.
    pub fn reduces_before(&self, incoming: &BinaryOperator) -> bool {
        if self.precedence == incoming.precedence {
            !incoming.right_associative
        } else {
            self.precedence > incoming.precedence
        }
    }

    pub fn runtime_call(&self) -> Option<String> {
        match self.lowering {
            Lowering::Runtime(name) => Some(format!("{}{}", runtime::OPERATOR_PREFIX, name)),
            Lowering::And | Lowering::Or => None,
        }
    }
}

/// Runtime function for a prefix operator. `+` is the identity and has
/// no call.
pub fn unary_call(symbol: &str) -> Option<&'static str> {
    match symbol {
        "!" => Some(runtime::NOT),
        "~" => Some(runtime::BIT_NOT),
        "-" => Some(runtime::NEGATE),
        _ => None,
    }
}

pub fn is_unary(symbol: &str) -> bool {
    matches!(symbol, "!" | "~" | "-" | "+")
}

/// Binary runtime call behind a compound assignment operator such as
/// `+=` or `<<=`. Plain `=` and `:=` have none.
pub fn compound_operator(set_operator: &str) -> Option<&'static BinaryOperator> {
    let symbol = set_operator.strip_suffix('=')?;
    if symbol.is_empty() || symbol == ":" {
        return None;
    }
    find_binary(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let plus = find_binary("+").expect("plus");
        let times = find_binary("*").expect("times");
        assert!(times.reduces_before(plus));
        assert!(!plus.reduces_before(times));
    }

    #[test]
    fn power_is_right_associative() {
        let power = find_binary("**").expect("power");
        assert!(!power.reduces_before(power));
        let minus = find_binary("-").expect("minus");
        assert!(minus.reduces_before(minus));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let and = find_binary("&&").expect("and");
        let or = find_binary("||").expect("or");
        assert!(and.reduces_before(or));
        assert_eq!(and.runtime_call(), None);
    }

    #[test]
    fn maps_compound_assignments() {
        assert_eq!(
            compound_operator("+=").and_then(BinaryOperator::runtime_call).as_deref(),
            Some("NEO_add")
        );
        assert_eq!(
            compound_operator("**=").and_then(BinaryOperator::runtime_call).as_deref(),
            Some("NEO_power")
        );
        assert_eq!(compound_operator("&&=").map(|op| op.lowering), Some(Lowering::And));
        assert!(compound_operator("=").is_none());
        assert!(compound_operator(":=").is_none());
    }
}
