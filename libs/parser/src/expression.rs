use quick_error::quick_error;
use tokenizer::token::{Kind, Token};

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        MissingOperand(position: usize) {
            display("Missing operand")
        }
        MissingCharacter(character: char, position: usize) {
            display("Missing character '{}'", character)
        }
        UnexpectedToken(token: Token) {
            display("Unexpected token '{}'", token)
        }
    }
}

impl Error {
    pub fn position(&self) -> usize {
        match self {
            Error::MissingOperand(position) => *position,
            Error::MissingCharacter(_, position) => *position,
            Error::UnexpectedToken(token) => token.position,
        }
    }
}

/// An operator/operand tree built from the tokens of a single statement.
///
/// Leaves hold one identifier, number or text token. Operator nodes hold
/// exactly two children. Call nodes hold the callee token and one subtree
/// per argument.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Expression {
    Leaf(Token),
    Operator {
        token: Token,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        name: Token,
        arguments: Vec<Expression>,
    },
}

impl Expression {
    pub fn position(&self) -> usize {
        match self {
            Expression::Leaf(token) => token.position,
            Expression::Operator { token, .. } => token.position,
            Expression::Call { name, .. } => name.position,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Expression::Leaf(_))
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Leaf(token) => write!(f, "{token}"),
            Expression::Operator { token, left, right } => {
                write!(f, "({left} {token} {right})")
            }
            Expression::Call { name, arguments } => {
                write!(f, "{name}(")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Operator binding strength. Comparisons bind loosest, `*` and `/` tightest.
/// All operators are left-associative within a precedence class.
fn precedence(operator: &str) -> Option<u8> {
    match operator {
        "==" | "!=" | "<" | "<=" | ">" | ">=" => Some(1),
        "+" | "-" => Some(2),
        "*" | "/" => Some(3),
        _ => None,
    }
}

/// Builds an expression tree from the given token run.
pub fn from_tokens(tokens: &[Token]) -> Result<Expression, Error> {
    let mut parser = Parser { tokens, cursor: 0 };
    let expression = parser.parse_binary(0)?;

    match parser.peek() {
        None => Ok(expression),
        Some(token) => Err(Error::UnexpectedToken(token.clone())),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    cursor: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.cursor);
        self.cursor += 1;
        token
    }

    fn end_position(&self) -> usize {
        self.tokens.last().map(|t| t.position + 1).unwrap_or_default()
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, Error> {
        let mut left = self.parse_primary()?;

        while let Some(token) = self.peek() {
            if token.kind != Kind::Operator {
                break;
            }

            let Some(precedence) = precedence(&token.text) else {
                break;
            };

            if precedence < min_precedence {
                break;
            }

            let operator = token.clone();
            self.cursor += 1;
            let right = self.parse_binary(precedence + 1)?;

            left = Expression::Operator {
                token: operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        let Some(token) = self.advance() else {
            return Err(Error::MissingOperand(self.end_position()));
        };

        match token.kind {
            Kind::Number | Kind::Text => Ok(Expression::Leaf(token.clone())),
            Kind::Identifier => {
                if self.peek().is_some_and(|t| t.kind == Kind::GroupStart) {
                    self.parse_call(token.clone())
                } else {
                    Ok(Expression::Leaf(token.clone()))
                }
            }
            Kind::GroupStart => {
                let inner = self.parse_binary(0)?;

                match self.advance() {
                    Some(token) if token.kind == Kind::GroupEnd => Ok(inner),
                    _ => Err(Error::MissingCharacter(')', self.end_position())),
                }
            }
            _ => Err(Error::UnexpectedToken(token.clone())),
        }
    }

    fn parse_call(&mut self, name: Token) -> Result<Expression, Error> {
        // Consume '('.
        self.advance();

        let mut arguments = Vec::new();

        if self.peek().is_some_and(|t| t.kind == Kind::GroupEnd) {
            self.advance();
            return Ok(Expression::Call { name, arguments });
        }

        loop {
            arguments.push(self.parse_binary(0)?);

            match self.advance() {
                Some(token) if token.kind == Kind::Separator => continue,
                Some(token) if token.kind == Kind::GroupEnd => break,
                _ => return Err(Error::MissingCharacter(')', self.end_position())),
            }
        }

        Ok(Expression::Call { name, arguments })
    }
}
