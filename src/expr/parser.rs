use super::{ExpressionError, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub(super) fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Literal(Scalar),
    Variable(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Integer(i64),
    Text(String),
    Ident(String),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |pos: usize, message: &str| ExpressionError::Syntax {
        expression: src.to_string(),
        position: pos,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((pos, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((pos, Token::And));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((pos, Token::Or));
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push((pos, Token::Cmp(CmpOp::Eq)));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push((pos, Token::Cmp(CmpOp::Ne)));
                i += 2;
            }
            '!' => {
                tokens.push((pos, Token::Not));
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push((pos, Token::Cmp(op)));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.get(i + 1) {
                                text.push(*escaped);
                            }
                            i += 2;
                        }
                        Some((_, c)) if *c == quote => {
                            i += 1;
                            break;
                        }
                        Some((_, c)) => {
                            text.push(*c);
                            i += 1;
                        }
                        None => return Err(err(pos, "unterminated string")),
                    }
                }
                tokens.push((pos, Token::Text(text)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                i += 1;
                while chars.get(i).is_some_and(|(_, c)| c.is_ascii_digit()) {
                    i += 1;
                }
                let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
                let value = src[pos..end]
                    .parse()
                    .map_err(|_| err(pos, "invalid integer"))?;
                tokens.push((pos, Token::Integer(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.')
                {
                    i += 1;
                }
                let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
                let token = match &src[pos..end] {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "eq" => Token::Cmp(CmpOp::Eq),
                    "ne" => Token::Cmp(CmpOp::Ne),
                    "lt" => Token::Cmp(CmpOp::Lt),
                    "le" => Token::Cmp(CmpOp::Le),
                    "gt" => Token::Cmp(CmpOp::Gt),
                    "ge" => Token::Cmp(CmpOp::Ge),
                    ident => Token::Ident(ident.to_string()),
                };
                tokens.push((pos, token));
            }
            _ => return Err(err(pos, &format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

/// Recursive descent parser
///
/// ```text
/// or      := and (('||' | 'or') and)*
/// and     := unary (('&&' | 'and') unary)*
/// unary   := ('!' | 'not') unary | compare
/// compare := primary (op primary)?
/// primary := integer | string | identifier | '(' or ')'
/// ```
struct Parser<'a> {
    src: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.src.to_string(),
            position: self
                .tokens
                .get(self.pos)
                .map(|(p, _)| *p)
                .unwrap_or(self.src.len()),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.advance();
            let right = self.primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Integer(i)) => Ok(Expr::Literal(Scalar::Integer(i))),
            Some(Token::Text(s)) => Ok(Expr::Literal(Scalar::Text(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Scalar::Boolean(true)),
                "false" => Expr::Literal(Scalar::Boolean(false)),
                _ => Expr::Variable(name),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => {
                        self.pos -= 1;
                        Err(self.error("expected ')'"))
                    }
                }
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.error("expected a value"))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

pub(super) fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let expr = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_string()))
    }

    #[test]
    fn it_parses_comparisons() {
        assert_eq!(
            parse("version==latest").unwrap(),
            Expr::Compare(CmpOp::Eq, var("version"), var("latest"))
        );
        assert_eq!(
            parse("version ge 3").unwrap(),
            Expr::Compare(
                CmpOp::Ge,
                var("version"),
                Box::new(Expr::Literal(Scalar::Integer(3)))
            )
        );
    }

    #[test]
    fn it_binds_and_tighter_than_or() {
        let expr = parse("a || b && !c").unwrap();
        assert_eq!(
            expr,
            Expr::Or(
                var("a"),
                Box::new(Expr::And(var("b"), Box::new(Expr::Not(var("c")))))
            )
        );
    }

    #[test]
    fn it_parses_literals() {
        assert_eq!(
            parse("'it\\'s'").unwrap(),
            Expr::Literal(Scalar::Text("it's".to_string()))
        );
        assert_eq!(
            parse("-12").unwrap(),
            Expr::Literal(Scalar::Integer(-12))
        );
        assert_eq!(
            parse("(true)").unwrap(),
            Expr::Literal(Scalar::Boolean(true))
        );
    }

    #[test]
    fn it_reports_syntax_errors() {
        for src in ["", "version ==", "(version == 1", "version = 1", "a b", "'open"] {
            assert!(
                matches!(parse(src), Err(ExpressionError::Syntax { .. })),
                "{src} should not parse"
            );
        }
    }
}
