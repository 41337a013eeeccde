//! Statement and expression grammar of the script language.
use crate::error::Error;
use chumsky::prelude::*;
use chumsky::Parser;

type Err<'a> = extra::Err<Rich<'a, char>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Text(String),
    Var(String),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Let {
        name: String,
        is_const: bool,
        value: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Return(Option<Expr>),
    Eval(Expr),
}

/// Routine header: `routine [schema.]name(param, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub schema: Option<String>,
    pub name: String,
    pub params: Vec<String>,
}

fn identifier<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    text::ascii::ident()
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

fn keyword<'a>(word: &'static str) -> impl Parser<'a, &'a str, (), Err<'a>> + Clone {
    just(word)
        .then(text::whitespace().at_least(1))
        .ignored()
        .labelled(word)
}

fn expression<'a>() -> impl Parser<'a, &'a str, Expr, Err<'a>> + Clone {
    recursive(|expr| {
        let op = |c| just(c).padded();

        let int = text::int(10)
            .try_map(|s: &str, span| {
                s.parse::<i64>()
                    .map(Expr::Int)
                    .map_err(|e| Rich::custom(span, e))
            })
            .labelled("integer");

        let string = just('\'')
            .ignore_then(
                just("''")
                    .to('\'')
                    .or(none_of("'"))
                    .repeated()
                    .collect::<String>(),
            )
            .then_ignore(just('\''))
            .map(Expr::Text)
            .labelled("string");

        let args = expr
            .clone()
            .separated_by(op(','))
            .collect::<Vec<_>>()
            .delimited_by(op('('), op(')'));
        let var_or_call = identifier()
            .then(args.or_not())
            .map(|(name, args)| match args {
                Some(args) => Expr::Call(name, args),
                None => Expr::Var(name),
            });

        let atom = choice((
            int,
            string,
            var_or_call,
            expr.delimited_by(op('('), op(')')),
        ))
        .padded();

        let unary = op('-')
            .repeated()
            .foldr(atom, |_op, rhs| Expr::Neg(Box::new(rhs)));

        let product = unary.clone().foldl(
            choice((op('*').to(BinOp::Mul), op('/').to(BinOp::Div)))
                .then(unary)
                .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        );

        product.clone().foldl(
            choice((op('+').to(BinOp::Add), op('-').to(BinOp::Sub)))
                .then(product)
                .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        )
    })
}

fn statement<'a>() -> impl Parser<'a, &'a str, Stmt, Err<'a>> {
    let decl = keyword("let")
        .to(false)
        .or(keyword("const").to(true))
        .then(identifier().padded())
        .then(just('=').padded().ignore_then(expression()).or_not())
        .map(|((is_const, name), value)| Stmt::Let {
            name,
            is_const,
            value,
        });

    let ret = keyword("return")
        .ignore_then(expression())
        .map(|e| Stmt::Return(Some(e)))
        .or(just("return").padded().to(Stmt::Return(None)));

    let assign = identifier()
        .padded()
        .then_ignore(just('=').padded())
        .then(expression())
        .map(|(name, value)| Stmt::Assign { name, value });

    let eval = expression().map(Stmt::Eval);

    choice((
        decl.then_ignore(end()),
        ret.then_ignore(end()),
        assign.then_ignore(end()),
        eval.then_ignore(end()),
    ))
}

fn header<'a>() -> impl Parser<'a, &'a str, Header, Err<'a>> {
    let name = identifier()
        .then(just('.').ignore_then(identifier()).or_not())
        .map(|(first, second)| match second {
            Some(name) => (Some(first), name),
            None => (None, first),
        });
    let params = identifier()
        .padded()
        .separated_by(just(','))
        .collect::<Vec<_>>()
        .delimited_by(just('(').padded(), just(')').padded());

    keyword("routine")
        .ignore_then(name)
        .then(params)
        .then_ignore(end())
        .map(|((schema, name), params)| Header {
            schema,
            name,
            params,
        })
}

fn parse_with<'a, T>(
    parser: impl Parser<'a, &'a str, T, Err<'a>>,
    input: &'a str,
    line: usize,
) -> Result<T, Error> {
    parser
        .parse(input.trim())
        .into_result()
        .map_err(|errs| Error::Parse {
            line,
            message: errs
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "syntax error".to_string()),
        })
}

/// Parse one statement, `line` is used for error reports.
pub fn parse_statement(input: &str, line: usize) -> Result<Stmt, Error> {
    parse_with(statement(), input, line)
}

pub fn parse_expression(input: &str) -> Result<Expr, Error> {
    parse_with(expression().then_ignore(end()), input, 0)
}

pub fn parse_header(input: &str, line: usize) -> Result<Header, Error> {
    parse_with(header(), input, line)
}

#[cfg(test)]
mod test {
    use super::*;

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Int(v))
    }

    #[test]
    fn test_expression_parser() {
        struct TestCase {
            string: &'static str,
            result: Result<Expr, ()>,
        }
        let cases = vec![
            TestCase {
                string: "5+5",
                result: Ok(Expr::Binary(BinOp::Add, int(5), int(5))),
            },
            TestCase {
                string: " 1 + 2 * 3 ",
                result: Ok(Expr::Binary(
                    BinOp::Add,
                    int(1),
                    Box::new(Expr::Binary(BinOp::Mul, int(2), int(3))),
                )),
            },
            TestCase {
                string: "(1 - 2) / x",
                result: Ok(Expr::Binary(
                    BinOp::Div,
                    Box::new(Expr::Binary(BinOp::Sub, int(1), int(2))),
                    Box::new(Expr::Var("x".to_string())),
                )),
            },
            TestCase {
                string: "-a",
                result: Ok(Expr::Neg(Box::new(Expr::Var("a".to_string())))),
            },
            TestCase {
                string: "'it''s'",
                result: Ok(Expr::Text("it's".to_string())),
            },
            TestCase {
                string: "add(a, 1)",
                result: Ok(Expr::Call(
                    "add".to_string(),
                    vec![Expr::Var("a".to_string()), Expr::Int(1)],
                )),
            },
            TestCase {
                string: "now()",
                result: Ok(Expr::Call("now".to_string(), vec![])),
            },
            TestCase {
                string: "not valid sql",
                result: Err(()),
            },
            TestCase {
                string: "'unterminated",
                result: Err(()),
            },
            TestCase {
                string: "99999999999999999999",
                result: Err(()),
            },
        ];

        for tc in cases {
            let expr = parse_expression(tc.string);
            assert_eq!(expr.map_err(|_| ()), tc.result, "input: {}", tc.string);
        }
    }

    #[test]
    fn test_statement_parser() {
        struct TestCase {
            string: &'static str,
            result: Result<Stmt, ()>,
        }
        let cases = vec![
            TestCase {
                string: "let x = 1",
                result: Ok(Stmt::Let {
                    name: "x".to_string(),
                    is_const: false,
                    value: Some(Expr::Int(1)),
                }),
            },
            TestCase {
                string: "const  limit = 10",
                result: Ok(Stmt::Let {
                    name: "limit".to_string(),
                    is_const: true,
                    value: Some(Expr::Int(10)),
                }),
            },
            TestCase {
                string: "let y",
                result: Ok(Stmt::Let {
                    name: "y".to_string(),
                    is_const: false,
                    value: None,
                }),
            },
            TestCase {
                string: "letter = 2",
                result: Ok(Stmt::Assign {
                    name: "letter".to_string(),
                    value: Expr::Int(2),
                }),
            },
            TestCase {
                string: "return",
                result: Ok(Stmt::Return(None)),
            },
            TestCase {
                string: "return x",
                result: Ok(Stmt::Return(Some(Expr::Var("x".to_string())))),
            },
            TestCase {
                string: "returned = 1",
                result: Ok(Stmt::Assign {
                    name: "returned".to_string(),
                    value: Expr::Int(1),
                }),
            },
            TestCase {
                string: "log(x)",
                result: Ok(Stmt::Eval(Expr::Call(
                    "log".to_string(),
                    vec![Expr::Var("x".to_string())],
                ))),
            },
            TestCase {
                string: "let x =",
                result: Err(()),
            },
        ];

        for tc in cases {
            let stmt = parse_statement(tc.string, 1);
            assert_eq!(stmt.map_err(|_| ()), tc.result, "input: {}", tc.string);
        }
    }

    #[test]
    fn test_header_parser() {
        let header = parse_header("routine public.add(a, b)", 1).unwrap();
        assert_eq!(header.schema.as_deref(), Some("public"));
        assert_eq!(header.name, "add");
        assert_eq!(header.params, vec!["a".to_string(), "b".to_string()]);

        let header = parse_header("routine main()", 1).unwrap();
        assert_eq!(header.schema, None);
        assert!(header.params.is_empty());

        let err = parse_header("function main()", 7).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 7, .. }));
    }
}
