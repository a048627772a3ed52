//! Parser for interpolation templates.
//!
//! A template is literal text interleaved with `${ ... }` regions. `$${`
//! produces a literal `${`. Regions hold expressions: literals, dotted
//! variable names, calls such as `str.truncate(10, name)`, indexing,
//! unary and binary operators, and `cond ? a : b`.

use crate::model::Value;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{all_consuming, cut, map, map_res, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

type Res<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Literal(String),
    Interpolation(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A quoted string, which may itself contain interpolations.
    Text(Template),
    Variable(String),
    Index(Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} at position {position}")]
pub struct ParseError {
    pub expected: String,
    pub position: usize,
}

impl Template {
    fn from_parts(parts: Vec<Part>) -> Self {
        let mut merged: Vec<Part> = Vec::with_capacity(parts.len());
        for part in parts {
            if let Part::Literal(text) = &part {
                if let Some(Part::Literal(existing)) = merged.last_mut() {
                    existing.push_str(text);
                    continue;
                }
            }
            merged.push(part);
        }
        Self { parts: merged }
    }

    pub fn is_plain_text(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, Part::Literal(_)))
    }
}

pub fn parse_template(input: &str) -> Result<Template, ParseError> {
    match all_consuming(many0(template_part))(input) {
        Ok((_, parts)) => Ok(Template::from_parts(parts)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(describe_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            expected: "more input".to_string(),
            position: input.len(),
        }),
    }
}

fn describe_error(input: &str, error: VerboseError<&str>) -> ParseError {
    let position_of = |rest: &str| input.len() - rest.len();

    let labelled = error.errors.iter().find_map(|(rest, kind)| match kind {
        VerboseErrorKind::Context(label) => Some((label.to_string(), position_of(*rest))),
        _ => None,
    });
    let (expected, position) = labelled
        .or_else(|| {
            error.errors.iter().find_map(|(rest, kind)| match kind {
                VerboseErrorKind::Char(c) => Some((format!("'{}'", c), position_of(*rest))),
                _ => None,
            })
        })
        .unwrap_or_else(|| {
            let position = error.errors.first().map(|(rest, _)| position_of(*rest)).unwrap_or(0);
            ("end of template".to_string(), position)
        });

    ParseError { expected, position }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn template_part(input: &str) -> Res<Part> {
    alt((
        value(Part::Literal("${".to_string()), tag("$${")),
        map(interpolation, Part::Interpolation),
        value(Part::Literal("$".to_string()), char('$')),
        map(is_not("$"), |text: &str| Part::Literal(text.to_string())),
    ))(input)
}

fn interpolation(input: &str) -> Res<Expr> {
    preceded(
        tag("${"),
        cut(terminated(ws(expr), context("'}'", char('}')))),
    )(input)
}

fn expr(input: &str) -> Res<Expr> {
    let (input, condition) = or_expr(input)?;
    let (input, branches) = opt(pair(
        preceded(ws(char('?')), cut(ws(expr))),
        preceded(cut(context("':'", char(':'))), cut(ws(expr))),
    ))(input)?;

    let expr = match branches {
        Some((then, otherwise)) => Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)),
        None => condition,
    };
    Ok((input, expr))
}

fn binary_chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> Res<'a, Expr>,
    operator: fn(&'a str) -> Res<'a, BinaryOp>,
) -> Res<'a, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(operator), cut(operand)))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
    Ok((input, folded))
}

fn or_expr(input: &str) -> Res<Expr> {
    binary_chain(input, and_expr, |i| value(BinaryOp::Or, tag("||"))(i))
}

fn and_expr(input: &str) -> Res<Expr> {
    binary_chain(input, equality, |i| value(BinaryOp::And, tag("&&"))(i))
}

fn equality(input: &str) -> Res<Expr> {
    binary_chain(input, comparison, |i| {
        alt((value(BinaryOp::Eq, tag("==")), value(BinaryOp::Ne, tag("!="))))(i)
    })
}

fn comparison(input: &str) -> Res<Expr> {
    binary_chain(input, additive, |i| {
        alt((
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, char('<')),
            value(BinaryOp::Gt, char('>')),
        ))(i)
    })
}

fn additive(input: &str) -> Res<Expr> {
    binary_chain(input, multiplicative, |i| {
        alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))(i)
    })
}

fn multiplicative(input: &str) -> Res<Expr> {
    binary_chain(input, unary, |i| {
        alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Mod, char('%')),
        ))(i)
    })
}

fn unary(input: &str) -> Res<Expr> {
    alt((
        map(preceded(ws(char('!')), cut(unary)), |e| Expr::Unary(UnaryOp::Not, Box::new(e))),
        map(preceded(ws(char('-')), cut(unary)), |e| Expr::Unary(UnaryOp::Neg, Box::new(e))),
        postfix,
    ))(input)
}

fn postfix(input: &str) -> Res<Expr> {
    let (input, base) = ws(primary)(input)?;
    let (input, indexes) = many0(delimited(
        ws(char('[')),
        cut(expr),
        cut(ws(context("']'", char(']')))),
    ))(input)?;
    let folded = indexes
        .into_iter()
        .fold(base, |target, index| Expr::Index(Box::new(target), Box::new(index)));
    Ok((input, folded))
}

fn primary(input: &str) -> Res<Expr> {
    context(
        "expression",
        alt((
            number,
            string_literal,
            delimited(char('('), ws(expr), cut(context("')'", char(')')))),
            call_or_variable,
        )),
    )(input)
}

fn number(input: &str) -> Res<Expr> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |digits: &str| -> Result<Expr, std::num::ParseFloatError> {
            match digits.parse::<i64>() {
                Ok(i) => Ok(Expr::Literal(Value::Integer(i))),
                Err(_) => digits.parse::<f64>().map(|f| Expr::Literal(Value::Float(f))),
            }
        },
    )(input)
}

fn string_literal(input: &str) -> Res<Expr> {
    let (input, _) = char('"')(input)?;
    let (input, parts) = many0(string_part)(input)?;
    let (input, _) = cut(context("closing quote", char('"')))(input)?;
    Ok((input, Expr::Text(Template::from_parts(parts))))
}

fn string_part(input: &str) -> Res<Part> {
    alt((
        value(Part::Literal("${".to_string()), tag("$${")),
        map(interpolation, Part::Interpolation),
        value(Part::Literal("$".to_string()), char('$')),
        map(escape_sequence, |c| Part::Literal(c.to_string())),
        map(is_not("\"\\$"), |text: &str| Part::Literal(text.to_string())),
    ))(input)
}

fn escape_sequence(input: &str) -> Res<char> {
    preceded(
        char('\\'),
        cut(alt((
            value('"', char('"')),
            value('\\', char('\\')),
            value('\n', char('n')),
            value('\t', char('t')),
        ))),
    )(input)
}

fn identifier(input: &str) -> Res<&str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn call_or_variable(input: &str) -> Res<Expr> {
    let (input, name) = recognize(separated_list1(char('.'), identifier))(input)?;
    let (input, args) = opt(preceded(
        ws(char('(')),
        cut(terminated(
            separated_list0(ws(char(',')), ws(expr)),
            context("')'", char(')')),
        )),
    ))(input)?;

    let parsed = match (args, name) {
        (Some(args), name) => Expr::Call {
            name: name.to_string(),
            args,
        },
        (None, "true") => Expr::Literal(Value::Bool(true)),
        (None, "false") => Expr::Literal(Value::Bool(false)),
        (None, name) => Expr::Variable(name.to_string()),
    };
    Ok((input, parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_expr(template: &str) -> Expr {
        let parsed = parse_template(template).unwrap();
        match parsed.parts.as_slice() {
            [Part::Interpolation(expr)] => expr.clone(),
            other => panic!("expected a single interpolation, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_and_escape() {
        let parsed = parse_template("cost is $5 and $${literal}").unwrap();
        assert_eq!(parsed.parts, vec![Part::Literal("cost is $5 and ${literal}".to_string())]);
        assert!(parsed.is_plain_text());

        assert!(parse_template("").unwrap().parts.is_empty());
    }

    #[test]
    fn test_mixed_template_parts() {
        let parsed = parse_template("pcf-${request.instance_id}-db").unwrap();
        assert_eq!(
            parsed.parts,
            vec![
                Part::Literal("pcf-".to_string()),
                Part::Interpolation(Expr::Variable("request.instance_id".to_string())),
                Part::Literal("-db".to_string()),
            ]
        );
    }

    #[test]
    fn test_operator_precedence() {
        let expr = single_expr("${1 + 2 * 3}");
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(Value::Integer(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Literal(Value::Integer(2))),
                    Box::new(Expr::Literal(Value::Integer(3))),
                )),
            )
        );
    }

    #[test]
    fn test_calls_with_nested_string_interpolation() {
        let expr = single_expr(r#"${assert(size <= 10, "too big: ${size}")}"#);
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "assert");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::Binary(BinaryOp::Le, _, _)));
                match &args[1] {
                    Expr::Text(template) => assert_eq!(template.parts.len(), 2),
                    other => panic!("unexpected argument {:?}", other),
                }
            }
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_conditional_and_index() {
        let expr = single_expr(r#"${labels["env"] == "prod" ? 3 : 1}"#);
        match expr {
            Expr::Conditional(condition, _, _) => match *condition {
                Expr::Binary(BinaryOp::Eq, lhs, _) => assert!(matches!(*lhs, Expr::Index(_, _))),
                other => panic!("unexpected condition {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_boolean_keywords_and_floats() {
        assert_eq!(single_expr("${true}"), Expr::Literal(Value::Bool(true)));
        assert_eq!(single_expr("${ 2.5 }"), Expr::Literal(Value::Float(2.5)));
        assert_eq!(single_expr("${counter.next()}"), Expr::Call { name: "counter.next".to_string(), args: vec![] });
    }

    #[test]
    fn test_unterminated_interpolation_is_an_error() {
        let err = parse_template("${").unwrap_err();
        assert_eq!(err.expected, "expression");
        assert_eq!(err.position, 2);

        assert!(parse_template("${1 +}").is_err());
        assert!(parse_template("${foo").is_err());
        assert!(parse_template(r#"${"open}"#).is_err());
    }
}
