use compact_str::CompactString;

use crate::{
    engine::{
        lexer::{tokenize, Token, TokenKind},
        source::{SourceText, Span},
    },
    error::ScriptingDetails,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug)]
pub(crate) enum Stmt {
    Decl {
        kind: DeclKind,
        name: CompactString,
        name_span: Span,
        init: Option<Expr>,
    },

    Func {
        name: CompactString,
        name_span: Span,
        params: Vec<CompactString>,
        body: Vec<Stmt>,
    },

    Expr(Expr),

    Return {
        value: Option<Expr>,
    },

    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },

    While {
        condition: Expr,
        body: Vec<Stmt>,
    },

    Block(Vec<Stmt>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug)]
pub(crate) enum Expr {
    Number(f64, Span),
    Str(CompactString, Span),
    Bool(bool, Span),
    Null(Span),
    Undefined(Span),
    Ident(CompactString, Span),
    This(Span),

    Array(Vec<Expr>, Span),
    Object(Vec<(CompactString, Expr)>, Span),

    Member {
        object: Box<Expr>,
        name: CompactString,
        name_span: Span,
    },

    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },

    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        op_span: Span,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        op_span: Span,
    },

    Logical {
        and: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        op_span: Span,
    },

    Delete {
        target: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub(crate) fn span(&self) -> Span {
        match self {
            Self::Number(_, span)
            | Self::Str(_, span)
            | Self::Bool(_, span)
            | Self::Null(span)
            | Self::Undefined(span)
            | Self::Ident(_, span)
            | Self::This(span)
            | Self::Array(_, span)
            | Self::Object(_, span) => *span,

            Self::Member { object, name_span, .. } => {
                Span::new(object.span().start, name_span.end)
            }

            Self::Index { span, .. } | Self::Call { span, .. } | Self::Delete { span, .. } => {
                *span
            }

            Self::Assign { target, value, .. } => {
                Span::new(target.span().start, value.span().end)
            }

            Self::Binary { lhs, rhs, .. } | Self::Logical { lhs, rhs, .. } => {
                Span::new(lhs.span().start, rhs.span().end)
            }

            Self::Unary { op_span, operand, .. } => {
                Span::new(op_span.start, operand.span().end)
            }
        }
    }
}

/// Parses the source into a statement list, reporting rejected syntax before
/// anything executes.
pub(crate) fn parse(source: &SourceText) -> Result<Vec<Stmt>, ScriptingDetails> {
    let tokens = tokenize(source)?;

    let mut parser = Parser {
        source,
        tokens,
        cursor: 0,
        function_depth: 0,
    };

    let mut statements = Vec::new();

    while !parser.at(&TokenKind::Eof) {
        statements.push(parser.statement()?);
    }

    Ok(statements)
}

struct Parser<'a> {
    source: &'a SourceText,
    tokens: Vec<Token>,
    cursor: usize,
    function_depth: usize,
}

impl<'a> Parser<'a> {
    #[inline(always)]
    fn peek(&self) -> &Token {
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    #[inline(always)]
    fn previous(&self) -> &Token {
        &self.tokens[self.cursor.saturating_sub(1)]
    }

    #[inline(always)]
    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.cursor.min(self.tokens.len() - 1)].clone();

        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }

        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            return true;
        }

        false
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ScriptingDetails> {
        if self.at(kind) {
            return Ok(self.advance());
        }

        Err(self.unexpected())
    }

    /// The engine-surface wording for an unexpected token at the cursor.
    fn unexpected(&self) -> ScriptingDetails {
        let token = self.peek();

        let message = match &token.kind {
            TokenKind::Ident(_) => String::from("SyntaxError: Unexpected identifier"),
            TokenKind::Number(_) => String::from("SyntaxError: Unexpected number"),
            TokenKind::Str(_) => String::from("SyntaxError: Unexpected string"),
            TokenKind::Eof => String::from("SyntaxError: Unexpected end of input"),

            _ => {
                let text = &self.source.text()
                    [token.span.start as usize..token.span.end as usize];

                format!("SyntaxError: Unexpected token '{text}'")
            }
        };

        self.source.details(message, token.span)
    }

    /// Statement termination with minimal automatic semicolon insertion: an
    /// explicit `;`, a closing brace, the end of input, or a line break
    /// before the next token all terminate a statement.
    fn terminate(&mut self) -> Result<(), ScriptingDetails> {
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }

        if self.at(&TokenKind::RBrace) || self.at(&TokenKind::Eof) {
            return Ok(());
        }

        if self.peek().line > self.previous().line {
            return Ok(());
        }

        Err(self.unexpected())
    }

    fn statement(&mut self) -> Result<Stmt, ScriptingDetails> {
        match &self.peek().kind {
            TokenKind::Const => self.declaration(DeclKind::Const),
            TokenKind::Let => self.declaration(DeclKind::Let),
            TokenKind::Var => self.declaration(DeclKind::Var),
            TokenKind::Function => self.function(),
            TokenKind::Return => self.return_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),

            TokenKind::LBrace => {
                self.advance();

                let body = self.block_body()?;

                Ok(Stmt::Block(body))
            }

            _ => {
                let expression = self.expression()?;

                self.terminate()?;

                Ok(Stmt::Expr(expression))
            }
        }
    }

    fn declaration(&mut self, kind: DeclKind) -> Result<Stmt, ScriptingDetails> {
        self.advance();

        let (name, name_span) = self.ident()?;

        let init = match self.eat(&TokenKind::Assign) {
            true => Some(self.expression()?),
            false => None,
        };

        if kind == DeclKind::Const && init.is_none() {
            return Err(self.source.details(
                "SyntaxError: Missing initializer in const declaration",
                name_span,
            ));
        }

        self.terminate()?;

        Ok(Stmt::Decl {
            kind,
            name,
            name_span,
            init,
        })
    }

    fn function(&mut self) -> Result<Stmt, ScriptingDetails> {
        self.advance();

        let (name, name_span) = self.ident()?;

        self.expect(&TokenKind::LParen)?;

        let mut params = Vec::new();

        if !self.at(&TokenKind::RParen) {
            loop {
                let (param, _) = self.ident()?;

                params.push(param);

                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;

        self.function_depth += 1;

        let body = self.block_body();

        self.function_depth -= 1;

        Ok(Stmt::Func {
            name,
            name_span,
            params,
            body: body?,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, ScriptingDetails> {
        let keyword = self.advance();

        if self.function_depth == 0 {
            return Err(self
                .source
                .details("SyntaxError: Illegal return statement", keyword.span));
        }

        let value = match self.at(&TokenKind::Semicolon)
            || self.at(&TokenKind::RBrace)
            || self.at(&TokenKind::Eof)
            || self.peek().line > self.previous().line
        {
            true => None,
            false => Some(self.expression()?),
        };

        self.terminate()?;

        Ok(Stmt::Return { value })
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptingDetails> {
        self.advance();

        self.expect(&TokenKind::LParen)?;

        let condition = self.expression()?;

        self.expect(&TokenKind::RParen)?;

        let then_branch = self.branch()?;

        let else_branch = match self.eat(&TokenKind::Else) {
            true => Some(self.branch()?),
            false => None,
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ScriptingDetails> {
        self.advance();

        self.expect(&TokenKind::LParen)?;

        let condition = self.expression()?;

        self.expect(&TokenKind::RParen)?;

        let body = self.branch()?;

        Ok(Stmt::While { condition, body })
    }

    fn branch(&mut self) -> Result<Vec<Stmt>, ScriptingDetails> {
        if self.eat(&TokenKind::LBrace) {
            return self.block_body();
        }

        Ok(vec![self.statement()?])
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, ScriptingDetails> {
        let mut body = Vec::new();

        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.unexpected());
            }

            body.push(self.statement()?);
        }

        self.expect(&TokenKind::RBrace)?;

        Ok(body)
    }

    fn ident(&mut self) -> Result<(CompactString, Span), ScriptingDetails> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let token = self.advance();

                Ok((name, token.span))
            }

            _ => Err(self.unexpected()),
        }
    }

    fn expression(&mut self) -> Result<Expr, ScriptingDetails> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ScriptingDetails> {
        let target = self.logical_or()?;

        if self.at(&TokenKind::Assign) {
            let op_span = self.advance().span;

            if !matches!(
                target,
                Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. },
            ) {
                return Err(self.source.details(
                    "SyntaxError: Invalid left-hand side in assignment",
                    target.span(),
                ));
            }

            let value = self.assignment()?;

            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
                op_span,
            });
        }

        Ok(target)
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.logical_and()?;

        while self.eat(&TokenKind::OrOr) {
            let rhs = self.logical_and()?;

            lhs = Expr::Logical {
                and: false,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.equality()?;

        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.equality()?;

            lhs = Expr::Logical {
                and: true,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.relational()?;

        loop {
            let op = match &self.peek().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::StrictEq => BinaryOp::StrictEq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::StrictNotEq => BinaryOp::StrictNotEq,
                _ => break,
            };

            let op_span = self.advance().span;
            let rhs = self.relational()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                op_span,
            };
        }

        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.additive()?;

        loop {
            let op = match &self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };

            let op_span = self.advance().span;
            let rhs = self.additive()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                op_span,
            };
        }

        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.multiplicative()?;

        loop {
            let op = match &self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };

            let op_span = self.advance().span;
            let rhs = self.multiplicative()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                op_span,
            };
        }

        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut lhs = self.unary()?;

        loop {
            let op = match &self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };

            let op_span = self.advance().span;
            let rhs = self.unary()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                op_span,
            };
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ScriptingDetails> {
        match &self.peek().kind {
            TokenKind::Not => {
                let op_span = self.advance().span;
                let operand = self.unary()?;

                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    op_span,
                })
            }

            TokenKind::Minus => {
                let op_span = self.advance().span;
                let operand = self.unary()?;

                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    op_span,
                })
            }

            TokenKind::Delete => {
                let keyword = self.advance();
                let target = self.unary()?;

                let span = Span::new(keyword.span.start, target.span().end);

                if !matches!(target, Expr::Member { .. } | Expr::Index { .. } | Expr::Ident(..)) {
                    return Err(self.source.details(
                        "SyntaxError: Delete of an unqualified identifier in strict mode.",
                        span,
                    ));
                }

                Ok(Expr::Delete {
                    target: Box::new(target),
                    span,
                })
            }

            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ScriptingDetails> {
        let mut expression = self.primary()?;

        loop {
            if self.eat(&TokenKind::Dot) {
                let (name, name_span) = self.ident()?;

                expression = Expr::Member {
                    object: Box::new(expression),
                    name,
                    name_span,
                };

                continue;
            }

            if self.at(&TokenKind::LBracket) {
                let open = self.advance();
                let index = self.expression()?;
                let close = self.expect(&TokenKind::RBracket)?;

                let _ = open;

                expression = Expr::Index {
                    span: Span::new(expression.span().start, close.span.end),
                    object: Box::new(expression),
                    index: Box::new(index),
                };

                continue;
            }

            if self.at(&TokenKind::LParen) {
                self.advance();

                let mut args = Vec::new();

                if !self.at(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);

                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }

                let close = self.expect(&TokenKind::RParen)?;

                expression = Expr::Call {
                    span: Span::new(expression.span().start, close.span.end),
                    callee: Box::new(expression),
                    args,
                };

                continue;
            }

            break;
        }

        Ok(expression)
    }

    fn primary(&mut self) -> Result<Expr, ScriptingDetails> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::Number(value) => {
                self.advance();

                Ok(Expr::Number(*value, token.span))
            }

            TokenKind::Str(value) => {
                self.advance();

                Ok(Expr::Str(value.clone(), token.span))
            }

            TokenKind::True => {
                self.advance();

                Ok(Expr::Bool(true, token.span))
            }

            TokenKind::False => {
                self.advance();

                Ok(Expr::Bool(false, token.span))
            }

            TokenKind::Null => {
                self.advance();

                Ok(Expr::Null(token.span))
            }

            TokenKind::Undefined => {
                self.advance();

                Ok(Expr::Undefined(token.span))
            }

            TokenKind::This => {
                self.advance();

                Ok(Expr::This(token.span))
            }

            TokenKind::Ident(name) => {
                self.advance();

                Ok(Expr::Ident(name.clone(), token.span))
            }

            TokenKind::LParen => {
                self.advance();

                let expression = self.expression()?;

                self.expect(&TokenKind::RParen)?;

                Ok(expression)
            }

            TokenKind::LBracket => {
                self.advance();

                let mut items = Vec::new();

                if !self.at(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);

                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }

                let close = self.expect(&TokenKind::RBracket)?;

                Ok(Expr::Array(
                    items,
                    Span::new(token.span.start, close.span.end),
                ))
            }

            TokenKind::LBrace => {
                self.advance();

                let mut properties = Vec::new();

                if !self.at(&TokenKind::RBrace) {
                    loop {
                        let key = match &self.peek().kind {
                            TokenKind::Ident(name) => {
                                let name = name.clone();

                                self.advance();

                                name
                            }

                            TokenKind::Str(name) => {
                                let name = name.clone();

                                self.advance();

                                name
                            }

                            _ => return Err(self.unexpected()),
                        };

                        self.expect(&TokenKind::Colon)?;

                        let value = self.expression()?;

                        properties.push((key, value));

                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }

                let close = self.expect(&TokenKind::RBrace)?;

                Ok(Expr::Object(
                    properties,
                    Span::new(token.span.start, close.span.end),
                ))
            }

            _ => Err(self.unexpected()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(text: &str) -> ScriptingDetails {
        parse(&SourceText::new(text, None)).unwrap_err()
    }

    #[test]
    fn unexpected_token_after_strict_eq() {
        let details = parse_err("const a = 1;\na ==== 2;");

        assert_eq!(details.message, "SyntaxError: Unexpected token '='");
        assert_eq!(details.line_number, 2);
        assert_eq!(details.start_column, 5);
        assert_eq!(details.end_column, 6);
        assert_eq!(details.start_position, 18);
        assert_eq!(details.end_position, 19);
    }

    #[test]
    fn unexpected_identifier_without_separator() {
        let details = parse_err("const a = 1;\na a a a;");

        assert_eq!(details.message, "SyntaxError: Unexpected identifier");
        assert_eq!(details.line_number, 2);
        assert_eq!(details.start_column, 2);
        assert_eq!(details.end_column, 3);
        assert_eq!(details.start_position, 15);
        assert_eq!(details.end_position, 16);
    }

    #[test]
    fn newline_terminates_statements() {
        let program = parse(&SourceText::new("let a = 1\na = 2", None)).unwrap();

        assert_eq!(program.len(), 2);
    }

    #[test]
    fn const_requires_initializer() {
        let details = parse_err("const a;");

        assert_eq!(
            details.message,
            "SyntaxError: Missing initializer in const declaration",
        );
    }
}
