//! Expression parsing and evaluation for linked parameters
//!
//! Linked peak parameters are stored as small arithmetic expressions over other
//! parameter names, e.g. `d1_amplitude * d2_amp_ratio` or `d1_center + d2_center_diff`.
//! This module parses such strings with `nom` into an AST and evaluates them against
//! an [`EvaluationContext`] (normally the [`Parameters`](super::Parameters) collection).
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := power (('*' | '/') power)*
//! power   := unary ('^' power)?
//! unary   := '-' unary | primary
//! primary := number | function '(' args ')' | identifier | '(' expr ')'
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::recognize,
    error::Error as NomError,
    multi::many0,
    number::complete::double,
    sequence::pair,
    IResult, Parser,
};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Error that can occur during expression parsing or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },
}

type ExprResult<T> = Result<T, ExpressionError>;

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(f64),
    Variable(String),
    Neg(Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    Function(String, Vec<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Source of variable values during evaluation
pub trait EvaluationContext {
    fn get_variable(&self, name: &str) -> ExprResult<f64>;
}

impl EvaluationContext for HashMap<String, f64> {
    fn get_variable(&self, name: &str) -> ExprResult<f64> {
        self.get(name)
            .copied()
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

impl Expression {
    /// Parse an expression from a string
    ///
    /// # Arguments
    ///
    /// * `input` - Expression text, e.g. `"g1_amplitude * g2_amp_ratio"`
    ///
    /// # Returns
    ///
    /// The parsed AST, or `ExpressionError::ParseError` if the text is malformed or
    /// has unconsumed trailing characters
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use xpsfit_rs::parameters::Expression;
    ///
    /// let expr = Expression::parse("d1_center + d2_center_diff").unwrap();
    /// let mut ctx = HashMap::new();
    /// ctx.insert("d1_center".to_string(), 284.6);
    /// ctx.insert("d2_center_diff".to_string(), 1.2);
    /// assert!((expr.evaluate(&ctx).unwrap() - 285.8).abs() < 1e-12);
    /// ```
    pub fn parse(input: &str) -> ExprResult<Self> {
        match expr_parser(input) {
            Ok((remainder, expr)) if remainder.trim().is_empty() => Ok(expr),
            Ok((remainder, _)) => Err(ExpressionError::ParseError {
                message: format!("unexpected trailing characters: '{}'", remainder),
            }),
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{} in '{}'", e, input),
            }),
        }
    }

    /// Evaluate the expression with the given context
    pub fn evaluate<C: EvaluationContext>(&self, context: &C) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Variable(name) => context.get_variable(name),
            Self::Neg(inner) => Ok(-inner.evaluate(context)?),
            Self::Binary(op, left, right) => {
                let l = left.evaluate(context)?;
                let r = right.evaluate(context)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div => {
                        if r == 0.0 {
                            Err(ExpressionError::DivisionByZero)
                        } else {
                            Ok(l / r)
                        }
                    }
                    BinaryOp::Pow => Ok(l.powf(r)),
                }
            }
            Self::Function(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(context))
                    .collect::<ExprResult<Vec<f64>>>()?;
                apply_function(name, &values)
            }
        }
    }

    /// Names of all variables referenced by the expression, sorted and deduplicated
    pub fn variables(&self) -> Vec<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars.into_iter().collect()
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                vars.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_variables(vars),
            Self::Binary(_, left, right) => {
                left.collect_variables(vars);
                right.collect_variables(vars);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
        }
    }
}

fn apply_function(name: &str, args: &[f64]) -> ExprResult<f64> {
    let arity = |n: usize| -> ExprResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExpressionError::InvalidOperation {
                message: format!("{}() takes {} argument(s), got {}", name, n, args.len()),
            })
        }
    };

    match name {
        "sqrt" => {
            arity(1)?;
            if args[0] < 0.0 {
                return Err(ExpressionError::InvalidOperation {
                    message: format!("sqrt of negative value {}", args[0]),
                });
            }
            Ok(args[0].sqrt())
        }
        "log" | "ln" => {
            arity(1)?;
            if args[0] <= 0.0 {
                return Err(ExpressionError::InvalidOperation {
                    message: format!("log of non-positive value {}", args[0]),
                });
            }
            Ok(args[0].ln())
        }
        "exp" => arity(1).map(|_| args[0].exp()),
        "abs" => arity(1).map(|_| args[0].abs()),
        "sin" => arity(1).map(|_| args[0].sin()),
        "cos" => arity(1).map(|_| args[0].cos()),
        "min" => arity(2).map(|_| args[0].min(args[1])),
        "max" => arity(2).map(|_| args[0].max(args[1])),
        _ => Err(ExpressionError::UndefinedFunction {
            name: name.to_string(),
        }),
    }
}

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0.parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn number(input: &str) -> IResult<&str, Expression> {
    // Signs are handled by `unary`; `double` alone would also accept "inf"/"nan".
    match input.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => {
            let (input, value) = double::<&str, NomError<&str>>(input)?;
            Ok((input, Expression::Number(value)))
        }
        _ => Err(nom::Err::Error(NomError::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn call_or_variable(input: &str) -> IResult<&str, Expression> {
    let (input, name) = identifier(input)?;
    let (after_ws, _) = ws(input)?;
    if let Ok((rest, _)) = char::<&str, NomError<&str>>('(').parse(after_ws) {
        let (rest, _) = ws(rest)?;
        if let Ok((rest, _)) = char::<&str, NomError<&str>>(')').parse(rest) {
            return Ok((rest, Expression::Function(name.to_string(), Vec::new())));
        }
        let (mut rest, first) = expr_parser(rest)?;
        let mut args = vec![first];
        loop {
            let (r, _) = ws(rest)?;
            if let Ok((r, _)) = char::<&str, NomError<&str>>(',').parse(r) {
                let (r, arg) = expr_parser(r)?;
                args.push(arg);
                rest = r;
            } else {
                rest = r;
                break;
            }
        }
        let (rest, _) = char(')').parse(rest)?;
        return Ok((rest, Expression::Function(name.to_string(), args)));
    }
    Ok((input, Expression::Variable(name.to_string())))
}

fn parens(input: &str) -> IResult<&str, Expression> {
    let (input, _) = char('(').parse(input)?;
    let (input, expr) = expr_parser(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = char(')').parse(input)?;
    Ok((input, expr))
}

fn primary(input: &str) -> IResult<&str, Expression> {
    let (input, _) = ws(input)?;
    alt((number, call_or_variable, parens)).parse(input)
}

fn unary(input: &str) -> IResult<&str, Expression> {
    let (input, _) = ws(input)?;
    if let Ok((rest, _)) = char::<&str, NomError<&str>>('-').parse(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Expression::Neg(Box::new(inner))));
    }
    primary(input)
}

fn power(input: &str) -> IResult<&str, Expression> {
    let (input, base) = unary(input)?;
    let (after_ws, _) = ws(input)?;
    if let Ok((rest, _)) = char::<&str, NomError<&str>>('^').parse(after_ws) {
        let (rest, exponent) = power(rest)?;
        return Ok((
            rest,
            Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
        ));
    }
    Ok((input, base))
}

/// Left-associative chain of `operand (op operand)*`
fn chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expression>,
    ops: &[(char, BinaryOp)],
) -> IResult<&'a str, Expression> {
    let (mut input, mut acc) = operand(input)?;
    'outer: loop {
        let (after_ws, _) = ws(input)?;
        for &(symbol, op) in ops {
            if let Ok((rest, _)) = char::<&str, NomError<&str>>(symbol).parse(after_ws) {
                let (rest, rhs) = operand(rest)?;
                acc = Expression::Binary(op, Box::new(acc), Box::new(rhs));
                input = rest;
                continue 'outer;
            }
        }
        return Ok((input, acc));
    }
}

fn term(input: &str) -> IResult<&str, Expression> {
    chain(input, power, &[('*', BinaryOp::Mul), ('/', BinaryOp::Div)])
}

fn expr_parser(input: &str) -> IResult<&str, Expression> {
    chain(input, term, &[('+', BinaryOp::Add), ('-', BinaryOp::Sub)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_link_expressions() {
        let expr = Expression::parse("d1_amplitude * d2_amp_ratio").unwrap();
        assert_eq!(
            expr,
            Expression::Binary(
                BinaryOp::Mul,
                Box::new(Expression::Variable("d1_amplitude".to_string())),
                Box::new(Expression::Variable("d2_amp_ratio".to_string())),
            )
        );
        assert_eq!(expr.variables(), vec!["d1_amplitude", "d2_amp_ratio"]);

        let context = ctx(&[("d1_amplitude", 1200.0), ("d2_amp_ratio", 0.5)]);
        assert_relative_eq!(expr.evaluate(&context).unwrap(), 600.0);
    }

    #[test]
    fn test_left_associativity() {
        let context = ctx(&[]);
        assert_relative_eq!(
            Expression::parse("10 - 4 - 3").unwrap().evaluate(&context).unwrap(),
            3.0
        );
        assert_relative_eq!(
            Expression::parse("8 / 4 / 2").unwrap().evaluate(&context).unwrap(),
            1.0
        );
        assert_relative_eq!(
            Expression::parse("2 ^ 3 ^ 2").unwrap().evaluate(&context).unwrap(),
            512.0
        );
    }

    #[test]
    fn test_precedence_and_unary() {
        let context = ctx(&[("a", 2.0), ("b", 3.0)]);
        let value = Expression::parse("-a + b * (a - -1) ^ 2")
            .unwrap()
            .evaluate(&context)
            .unwrap();
        assert_relative_eq!(value, -2.0 + 3.0 * 9.0);
    }

    #[test]
    fn test_functions() {
        let context = ctx(&[("x", 4.0)]);
        let value = Expression::parse("sqrt(x) + max(1, 2.5) + ln(exp(1))")
            .unwrap()
            .evaluate(&context)
            .unwrap();
        assert_relative_eq!(value, 2.0 + 2.5 + 1.0, epsilon = 1e-12);

        assert!(matches!(
            Expression::parse("gamma(1)").unwrap().evaluate(&context),
            Err(ExpressionError::UndefinedFunction { .. })
        ));
        assert!(matches!(
            Expression::parse("max(1)").unwrap().evaluate(&context),
            Err(ExpressionError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_identifiers_that_look_like_numbers() {
        let context = ctx(&[("inf_ratio", 2.0), ("nan1", 3.0)]);
        let value = Expression::parse("inf_ratio * nan1")
            .unwrap()
            .evaluate(&context)
            .unwrap();
        assert_relative_eq!(value, 6.0);
    }

    #[test]
    fn test_errors() {
        let context = ctx(&[]);
        assert!(matches!(
            Expression::parse("1 / 0").unwrap().evaluate(&context),
            Err(ExpressionError::DivisionByZero)
        ));
        assert!(matches!(
            Expression::parse("missing * 2").unwrap().evaluate(&context),
            Err(ExpressionError::UndefinedVariable { .. })
        ));
        assert!(Expression::parse("a * ").is_err());
        assert!(Expression::parse("a b").is_err());
        assert!(Expression::parse("(a + 1").is_err());
    }
}
