//! Parser for the reference runtime
//!
//! Uses recursive descent for statements and Pratt parsing for binary
//! expressions.

use std::fmt;

use super::ast::*;
use super::lexer::{Lexer, Span, Token, TokenKind};
use super::value::JsString;

/// Syntax error with the position of the offending token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{})",
            self.message, self.span.line, self.span.column
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete script.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    Parser::new(source).parse_program()
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            previous: Token::eof(0, 1, 1),
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ============ STATEMENTS ============

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current.kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Statement::Empty)
            }
            TokenKind::Let => self.parse_variable_declaration(VariableKind::Let),
            TokenKind::Const => self.parse_variable_declaration(VariableKind::Const),
            TokenKind::Var => self.parse_variable_declaration(VariableKind::Var),
            TokenKind::Throw => self.parse_throw_statement(),
            _ => {
                let start = self.current.span;
                let expression = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Statement::Expression(ExpressionStatement {
                    expression,
                    span: self.span_from(start),
                }))
            }
        }
    }

    fn parse_variable_declaration(
        &mut self,
        kind: VariableKind,
    ) -> Result<Statement, ParseError> {
        let start = self.current.span;
        self.advance();

        let mut declarations = Vec::new();
        loop {
            let decl_start = self.current.span;
            let id = self.parse_identifier()?;
            let init = if self.match_token(&TokenKind::Eq) {
                Some(self.parse_assignment_expression()?)
            } else {
                None
            };
            if kind == VariableKind::Const && init.is_none() {
                return Err(self.error_at(
                    id.span,
                    "Missing initializer in const declaration".to_string(),
                ));
            }
            declarations.push(VariableDeclarator {
                id,
                init,
                span: self.span_from(decl_start),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume_semicolon()?;

        Ok(Statement::VariableDeclaration(VariableDeclaration {
            kind,
            declarations,
            span: self.span_from(start),
        }))
    }

    fn parse_throw_statement(&mut self) -> Result<Statement, ParseError> {
        let start = self.current.span;
        self.advance();
        if self.current.span.line != self.previous.span.line {
            return Err(self.error_at(
                self.current.span,
                "Illegal newline after throw".to_string(),
            ));
        }
        let argument = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Statement::Throw(ThrowStatement {
            argument,
            span: self.span_from(start),
        }))
    }

    /// Accept `;`, end of input, or a line break before the next token.
    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        if self.match_token(&TokenKind::Semicolon) || self.is_at_end() {
            return Ok(());
        }
        if self.current.span.line > self.previous.span.line {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // ============ EXPRESSIONS ============

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_assignment_expression()
    }

    fn parse_assignment_expression(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        let expr = self.parse_conditional_expression()?;

        if self.check(&TokenKind::Eq) {
            let eq_span = self.current.span;
            self.advance();
            let value = Box::new(self.parse_assignment_expression()?);
            let target = match expr {
                Expression::Identifier(id) => AssignmentTarget::Identifier(id),
                Expression::Member(member) => AssignmentTarget::Member(member),
                _ => {
                    return Err(self.error_at(
                        eq_span,
                        "Invalid left-hand side in assignment".to_string(),
                    ));
                }
            };
            return Ok(Expression::Assignment(AssignmentExpression {
                target,
                value,
                span: self.span_from(start),
            }));
        }

        Ok(expr)
    }

    fn parse_conditional_expression(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        let test = self.parse_binary_expression(0)?;

        if self.match_token(&TokenKind::Question) {
            let consequent = Box::new(self.parse_assignment_expression()?);
            self.require_token(&TokenKind::Colon)?;
            let alternate = Box::new(self.parse_assignment_expression()?);
            return Ok(Expression::Conditional(ConditionalExpression {
                test: Box::new(test),
                consequent,
                alternate,
                span: self.span_from(start),
            }));
        }

        Ok(test)
    }

    /// Pratt parser for binary and logical expressions
    fn parse_binary_expression(&mut self, min_prec: u8) -> Result<Expression, ParseError> {
        let start = self.current.span;
        let mut left = self.parse_unary_expression()?;

        while let Some((op, prec)) = self.current_binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = Box::new(self.parse_binary_expression(prec + 1)?);
            let span = self.span_from(start);
            left = match op {
                InfixOp::Logical(operator) => Expression::Logical(LogicalExpression {
                    operator,
                    left: Box::new(left),
                    right,
                    span,
                }),
                InfixOp::Binary(operator) => Expression::Binary(BinaryExpression {
                    operator,
                    left: Box::new(left),
                    right,
                    span,
                }),
            };
        }

        Ok(left)
    }

    fn current_binary_op(&self) -> Option<(InfixOp, u8)> {
        use InfixOp::{Binary, Logical};
        let op = match self.current.kind {
            TokenKind::PipePipe => (Logical(LogicalOp::Or), 1),
            TokenKind::AmpAmp => (Logical(LogicalOp::And), 2),
            TokenKind::EqEq => (Binary(BinaryOp::Eq), 3),
            TokenKind::BangEq => (Binary(BinaryOp::NotEq), 3),
            TokenKind::EqEqEq => (Binary(BinaryOp::StrictEq), 3),
            TokenKind::BangEqEq => (Binary(BinaryOp::StrictNotEq), 3),
            TokenKind::Lt => (Binary(BinaryOp::Lt), 4),
            TokenKind::LtEq => (Binary(BinaryOp::LtEq), 4),
            TokenKind::Gt => (Binary(BinaryOp::Gt), 4),
            TokenKind::GtEq => (Binary(BinaryOp::GtEq), 4),
            TokenKind::Plus => (Binary(BinaryOp::Add), 5),
            TokenKind::Minus => (Binary(BinaryOp::Sub), 5),
            TokenKind::Star => (Binary(BinaryOp::Mul), 6),
            TokenKind::Slash => (Binary(BinaryOp::Div), 6),
            TokenKind::Percent => (Binary(BinaryOp::Mod), 6),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary_expression(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        let operator = match self.current.kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Typeof => UnaryOp::Typeof,
            _ => return self.parse_call_expression(),
        };
        self.advance();
        let argument = Box::new(self.parse_unary_expression()?);
        Ok(Expression::Unary(UnaryExpression {
            operator,
            argument,
            span: self.span_from(start),
        }))
    }

    fn parse_call_expression(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        let is_new = self.match_token(&TokenKind::New);
        let mut expr = self.parse_primary_expression()?;

        loop {
            if self.match_token(&TokenKind::Dot) {
                let property = self.parse_property_name()?;
                expr = Expression::Member(MemberExpression {
                    object: Box::new(expr),
                    property: MemberProperty::Identifier(property),
                    span: self.span_from(start),
                });
            } else if self.match_token(&TokenKind::LBracket) {
                let property = self.parse_expression()?;
                self.require_token(&TokenKind::RBracket)?;
                expr = Expression::Member(MemberExpression {
                    object: Box::new(expr),
                    property: MemberProperty::Expression(Box::new(property)),
                    span: self.span_from(start),
                });
            } else if self.match_token(&TokenKind::LParen) {
                let arguments = self.parse_arguments()?;
                let call = CallExpression {
                    callee: Box::new(expr),
                    arguments,
                    span: self.span_from(start),
                };
                expr = if is_new && !matches!(call.callee.as_ref(), Expression::Call(_)) {
                    Expression::New(call)
                } else {
                    Expression::Call(call)
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut arguments = Vec::new();
        while !self.check(&TokenKind::RParen) {
            arguments.push(self.parse_assignment_expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.require_token(&TokenKind::RParen)?;
        Ok(arguments)
    }

    fn parse_primary_expression(&mut self) -> Result<Expression, ParseError> {
        let span = self.current.span;
        let value = match &self.current.kind {
            TokenKind::Number(n) => LiteralValue::Number(*n),
            TokenKind::String(s) => LiteralValue::String(s.clone()),
            TokenKind::True => LiteralValue::Boolean(true),
            TokenKind::False => LiteralValue::Boolean(false),
            TokenKind::Null => LiteralValue::Null,
            TokenKind::Identifier(_) => {
                return Ok(Expression::Identifier(self.parse_identifier()?));
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.require_token(&TokenKind::RParen)?;
                return Ok(expr);
            }
            TokenKind::LBracket => return self.parse_array_literal(),
            TokenKind::LBrace => return self.parse_object_literal(),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(Expression::Literal(Literal { value, span }))
    }

    fn parse_array_literal(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        self.require_token(&TokenKind::LBracket)?;
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            elements.push(self.parse_assignment_expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.require_token(&TokenKind::RBracket)?;
        Ok(Expression::Array(ArrayExpression {
            elements,
            span: self.span_from(start),
        }))
    }

    fn parse_object_literal(&mut self) -> Result<Expression, ParseError> {
        let start = self.current.span;
        self.require_token(&TokenKind::LBrace)?;
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let prop_start = self.current.span;
            let (key, shorthand) = match &self.current.kind {
                TokenKind::Identifier(name) => (name.clone(), true),
                TokenKind::String(s) => (s.clone(), false),
                TokenKind::Number(n) => (
                    JsString::from(super::value::number_to_string(*n)),
                    false,
                ),
                _ => match keyword_name(&self.current.kind) {
                    Some(name) => (JsString::from(name), false),
                    None => return Err(self.unexpected()),
                },
            };
            self.advance();

            let value = if self.match_token(&TokenKind::Colon) {
                self.parse_assignment_expression()?
            } else if shorthand {
                Expression::Identifier(Identifier {
                    name: key.clone(),
                    span: prop_start,
                })
            } else {
                return Err(self.unexpected());
            };

            properties.push(Property {
                key,
                value,
                span: self.span_from(prop_start),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.require_token(&TokenKind::RBrace)?;
        Ok(Expression::Object(ObjectExpression {
            properties,
            span: self.span_from(start),
        }))
    }

    fn parse_identifier(&mut self) -> Result<Identifier, ParseError> {
        let span = self.current.span;
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(Identifier { name, span })
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Identifier after `.`; keywords are valid property names.
    fn parse_property_name(&mut self) -> Result<Identifier, ParseError> {
        let span = self.current.span;
        if let Some(name) = keyword_name(&self.current.kind) {
            self.advance();
            return Ok(Identifier {
                name: JsString::from(name),
                span,
            });
        }
        self.parse_identifier()
    }

    // ============ TOKEN HELPERS ============

    fn advance(&mut self) {
        let next = self.lexer.next_token();
        self.previous = std::mem::replace(&mut self.current, next);
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn require_token(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.match_token(kind) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn is_at_end(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(
            start.start,
            self.previous.span.end.max(start.start),
            start.line,
            start.column,
        )
    }

    fn unexpected(&self) -> ParseError {
        let message = match &self.current.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Invalid(text) if text == "unterminated string" => {
                "Invalid or unexpected token".to_string()
            }
            TokenKind::Invalid(text) => format!("Invalid or unexpected token '{}'", text),
            TokenKind::Identifier(name) => format!("Unexpected identifier '{}'", name),
            TokenKind::Number(_) => "Unexpected number".to_string(),
            TokenKind::String(_) => "Unexpected string".to_string(),
            other => format!("Unexpected token '{}'", token_text(other)),
        };
        self.error_at(self.current.span, message)
    }

    fn error_at(&self, span: Span, message: String) -> ParseError {
        ParseError { message, span }
    }
}

enum InfixOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn keyword_name(kind: &TokenKind) -> Option<&'static str> {
    Some(match kind {
        TokenKind::Let => "let",
        TokenKind::Const => "const",
        TokenKind::Var => "var",
        TokenKind::Throw => "throw",
        TokenKind::Typeof => "typeof",
        TokenKind::New => "new",
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::Null => "null",
        _ => return None,
    })
}

fn token_text(kind: &TokenKind) -> &'static str {
    if let Some(keyword) = keyword_name(kind) {
        return keyword;
    }
    match kind {
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Eq => "=",
        TokenKind::EqEq => "==",
        TokenKind::EqEqEq => "===",
        TokenKind::BangEq => "!=",
        TokenKind::BangEqEq => "!==",
        TokenKind::Lt => "<",
        TokenKind::LtEq => "<=",
        TokenKind::Gt => ">",
        TokenKind::GtEq => ">=",
        TokenKind::AmpAmp => "&&",
        TokenKind::PipePipe => "||",
        TokenKind::Bang => "!",
        TokenKind::Question => "?",
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::Comma => ",",
        TokenKind::Semicolon => ";",
        TokenKind::Colon => ":",
        TokenKind::Dot => ".",
        _ => "?",
    }
}
