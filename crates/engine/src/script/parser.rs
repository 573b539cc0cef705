//! Recursive-descent parser for assertion scripts

use std::rc::Rc;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, LogicalOp, Pattern, Stmt,
    TemplatePart, UnaryOp,
};
use super::error::{ScriptError, ScriptResult};
use super::lexer::{Keyword, Lexer, Punct, Spanned, TemplateChunk, Token};
use super::value::number_to_string;

/// Deepest statement/expression nesting accepted
pub const MAX_NESTING: usize = 48;

static EOF: Token = Token::Eof;

/// Parse a whole script
pub fn parse_program(source: &str) -> ScriptResult<Vec<Stmt>> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens, 0).program()
}

enum OpKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).map(|s| &s.token).unwrap_or(&EOF)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn here(&self) -> (u32, u32) {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| (s.line, s.column))
            .unwrap_or((1, 1))
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let (line, column) = self.here();
        ScriptError::syntax(message, line, column)
    }

    fn unexpected(&self) -> ScriptError {
        self.error(format!("unexpected {}", describe(self.peek())))
    }

    fn is_punct(&self, punct: Punct) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> ScriptResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{}' but found {}",
                punct.as_str(),
                describe(self.peek())
            )))
        }
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == keyword)
    }

    fn is_contextual(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn newline_before(&self) -> bool {
        match (self.tokens.get(self.pos), self.pos.checked_sub(1).and_then(|i| self.tokens.get(i))) {
            (Some(current), Some(previous)) => current.line > previous.line,
            _ => false,
        }
    }

    /// Statement terminator with automatic semicolon insertion
    fn consume_semicolon(&mut self) -> ScriptResult<()> {
        if self.eat_punct(Punct::Semi)
            || self.is_punct(Punct::RBrace)
            || self.at_eof()
            || self.newline_before()
        {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn enter(&mut self) -> ScriptResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("script nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn program(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> ScriptResult<Stmt> {
        self.enter()?;
        let result = self.statement_inner();
        self.leave();
        result
    }

    fn statement_inner(&mut self) -> ScriptResult<Stmt> {
        match self.peek() {
            Token::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            Token::Punct(Punct::Semi) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Token::Keyword(Keyword::Let | Keyword::Const | Keyword::Var) => {
                let decl = self.var_decl()?;
                self.consume_semicolon()?;
                Ok(decl)
            }
            Token::Keyword(Keyword::Function) => {
                self.advance();
                let def = self.function_rest(true)?;
                Ok(Stmt::Function(Rc::new(def)))
            }
            Token::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.is_keyword(Keyword::Else) {
                    self.advance();
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    then,
                    otherwise,
                })
            }
            Token::Keyword(Keyword::For) => self.for_statement(),
            Token::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            Token::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.is_punct(Punct::Semi)
                    || self.is_punct(Punct::RBrace)
                    || self.at_eof()
                    || self.newline_before()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            Token::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            Token::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            Token::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.error("unexpected end of input"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn decl_kind(&self) -> Option<DeclKind> {
        match self.peek() {
            Token::Keyword(Keyword::Let) => Some(DeclKind::Let),
            Token::Keyword(Keyword::Const) => Some(DeclKind::Const),
            Token::Keyword(Keyword::Var) => Some(DeclKind::Var),
            _ => None,
        }
    }

    fn var_decl(&mut self) -> ScriptResult<Stmt> {
        let Some(kind) = self.decl_kind() else {
            return Err(self.unexpected());
        };
        self.advance();
        let mut declarations = Vec::new();
        loop {
            let pattern = self.pattern()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error("missing initializer in const declaration"));
            }
            declarations.push((pattern, init));
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Stmt::VarDecl { kind, declarations })
    }

    fn pattern(&mut self) -> ScriptResult<Pattern> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(Pattern::Ident(name))
            }
            Token::Punct(Punct::LBrace) => {
                self.advance();
                let mut props = Vec::new();
                loop {
                    if self.eat_punct(Punct::RBrace) {
                        break;
                    }
                    let key = self.property_name()?;
                    let target = if self.eat_punct(Punct::Colon) {
                        self.pattern()?
                    } else {
                        Pattern::Ident(key.clone())
                    };
                    props.push((key, target));
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBrace)?;
                        break;
                    }
                }
                Ok(Pattern::Object(props))
            }
            Token::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    if self.eat_punct(Punct::RBracket) {
                        break;
                    }
                    if self.eat_punct(Punct::Comma) {
                        items.push(None);
                        continue;
                    }
                    items.push(Some(self.pattern()?));
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBracket)?;
                        break;
                    }
                }
                Ok(Pattern::Array(items))
            }
            _ => Err(self.error(format!(
                "expected binding name but found {}",
                describe(self.peek())
            ))),
        }
    }

    /// Property key in an object literal, pattern or after a dot
    fn property_name(&mut self) -> ScriptResult<String> {
        let name = match self.peek() {
            Token::Ident(name) | Token::Str(name) => name.clone(),
            Token::Keyword(keyword) => keyword.as_str().to_string(),
            Token::Number(n) => number_to_string(*n),
            _ => {
                return Err(self.error(format!(
                    "expected property name but found {}",
                    describe(self.peek())
                )))
            }
        };
        self.advance();
        Ok(name)
    }

    fn for_statement(&mut self) -> ScriptResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen)?;

        let init = if self.decl_kind().is_some() {
            let start = self.pos;
            self.advance();
            let pattern = self.pattern()?;
            if let Some(stmt) = self.for_each_rest(pattern)? {
                return Ok(stmt);
            }
            self.pos = start;
            Some(Box::new(self.var_decl()?))
        } else if matches!(self.peek(), Token::Ident(_))
            && matches!(self.peek_nth(1), Token::Ident(w) if w == "of" || w == "in")
        {
            let pattern = self.pattern()?;
            if let Some(stmt) = self.for_each_rest(pattern)? {
                return Ok(stmt);
            }
            return Err(self.unexpected());
        } else if self.is_punct(Punct::Semi) {
            None
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };

        self.expect_punct(Punct::Semi)?;
        let test = if self.is_punct(Punct::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semi)?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    /// `of iterable) body` or `in object) body` after a loop binding
    fn for_each_rest(&mut self, pattern: Pattern) -> ScriptResult<Option<Stmt>> {
        let of = if self.is_contextual("of") {
            true
        } else if self.is_contextual("in") {
            false
        } else {
            return Ok(None);
        };
        self.advance();
        let subject = self.assignment()?;
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.statement()?);
        Ok(Some(if of {
            Stmt::ForOf {
                pattern,
                iterable: subject,
                body,
            }
        } else {
            Stmt::ForIn {
                pattern,
                object: subject,
                body,
            }
        }))
    }

    fn expression(&mut self) -> ScriptResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ScriptResult<Expr> {
        self.enter()?;
        let result = self.assignment_inner();
        self.leave();
        result
    }

    fn assignment_inner(&mut self) -> ScriptResult<Expr> {
        if self.arrow_ahead() {
            return self.arrow_function();
        }
        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct(Punct::Assign) => AssignOp::Assign,
            Token::Punct(Punct::PlusAssign) => AssignOp::Add,
            Token::Punct(Punct::MinusAssign) => AssignOp::Sub,
            _ => return Ok(target),
        };
        if !is_assignable(&target) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(_) => matches!(self.peek_nth(1), Token::Punct(Punct::Arrow)),
            Token::Punct(Punct::LParen) => {
                let mut depth = 0usize;
                let mut i = 0;
                loop {
                    match self.peek_nth(i) {
                        Token::Punct(Punct::LParen) => depth += 1,
                        Token::Punct(Punct::RParen) => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_nth(i + 1), Token::Punct(Punct::Arrow));
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> ScriptResult<Expr> {
        let params = if let Token::Ident(name) = self.peek().clone() {
            self.advance();
            vec![Pattern::Ident(name)]
        } else {
            self.params()?
        };
        self.expect_punct(Punct::Arrow)?;
        let body = if self.is_punct(Punct::LBrace) {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
        })))
    }

    fn params(&mut self) -> ScriptResult<Vec<Pattern>> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        loop {
            if self.eat_punct(Punct::RParen) {
                break;
            }
            params.push(self.pattern()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok(params)
    }

    /// Everything after the `function` keyword
    fn function_rest(&mut self, named: bool) -> ScriptResult<FunctionDef> {
        let name = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ if named => return Err(self.error("function statement requires a name")),
            _ => None,
        };
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(FunctionDef { name, params, body })
    }

    fn conditional(&mut self) -> ScriptResult<Expr> {
        let test = self.binary(1)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(Punct::Colon)?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary_op(&self) -> Option<(u8, OpKind)> {
        let op = match self.peek() {
            Token::Punct(Punct::Nullish) => (1, OpKind::Logical(LogicalOp::Nullish)),
            Token::Punct(Punct::OrOr) => (2, OpKind::Logical(LogicalOp::Or)),
            Token::Punct(Punct::AndAnd) => (3, OpKind::Logical(LogicalOp::And)),
            Token::Punct(Punct::Eq) => (4, OpKind::Binary(BinaryOp::Eq)),
            Token::Punct(Punct::NotEq) => (4, OpKind::Binary(BinaryOp::NotEq)),
            Token::Punct(Punct::StrictEq) => (4, OpKind::Binary(BinaryOp::StrictEq)),
            Token::Punct(Punct::StrictNotEq) => (4, OpKind::Binary(BinaryOp::StrictNotEq)),
            Token::Punct(Punct::Lt) => (5, OpKind::Binary(BinaryOp::Lt)),
            Token::Punct(Punct::Gt) => (5, OpKind::Binary(BinaryOp::Gt)),
            Token::Punct(Punct::Le) => (5, OpKind::Binary(BinaryOp::Le)),
            Token::Punct(Punct::Ge) => (5, OpKind::Binary(BinaryOp::Ge)),
            Token::Ident(word) if word == "in" => (5, OpKind::Binary(BinaryOp::In)),
            Token::Punct(Punct::Plus) => (6, OpKind::Binary(BinaryOp::Add)),
            Token::Punct(Punct::Minus) => (6, OpKind::Binary(BinaryOp::Sub)),
            Token::Punct(Punct::Star) => (7, OpKind::Binary(BinaryOp::Mul)),
            Token::Punct(Punct::Slash) => (7, OpKind::Binary(BinaryOp::Div)),
            Token::Punct(Punct::Percent) => (7, OpKind::Binary(BinaryOp::Rem)),
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over the left-associative binary operators
    fn binary(&mut self, min_prec: u8) -> ScriptResult<Expr> {
        let mut left = self.unary()?;
        while let Some((prec, kind)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = Box::new(self.binary(prec + 1)?);
            let lhs = Box::new(left);
            left = match kind {
                OpKind::Binary(op) => Expr::Binary {
                    op,
                    left: lhs,
                    right,
                },
                OpKind::Logical(op) => Expr::Logical {
                    op,
                    left: lhs,
                    right,
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> ScriptResult<Expr> {
        let op = match self.peek() {
            Token::Punct(Punct::Bang) => Some(UnaryOp::Not),
            Token::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            Token::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            Token::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand?),
            });
        }

        if self.is_punct(Punct::PlusPlus) || self.is_punct(Punct::MinusMinus) {
            let increment = self.is_punct(Punct::PlusPlus);
            self.advance();
            let target = self.unary()?;
            if !is_assignable(&target) {
                return Err(self.error("invalid update target"));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> ScriptResult<Expr> {
        let expr = self.call_member()?;
        let increment = match self.peek() {
            Token::Punct(Punct::PlusPlus) => true,
            Token::Punct(Punct::MinusMinus) => false,
            _ => return Ok(expr),
        };
        if self.newline_before() {
            return Ok(expr);
        }
        if !is_assignable(&expr) {
            return Err(self.error("invalid update target"));
        }
        self.advance();
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> ScriptResult<Expr> {
        let mut expr = if self.is_keyword(Keyword::New) {
            self.advance();
            let Token::Ident(constructor) = self.peek().clone() else {
                return Err(self.error("expected constructor name after 'new'"));
            };
            self.advance();
            let args = if self.is_punct(Punct::LParen) {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New { constructor, args }
        } else {
            self.primary()?
        };

        loop {
            match self.peek() {
                Token::Punct(Punct::Dot) => {
                    self.advance();
                    let property = self.member_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    };
                }
                Token::Punct(Punct::QuestionDot) => {
                    self.advance();
                    expr = if self.is_punct(Punct::LParen) {
                        Expr::Call {
                            callee: Box::new(expr),
                            args: self.arguments()?,
                            optional: true,
                        }
                    } else if self.eat_punct(Punct::LBracket) {
                        let index = self.expression()?;
                        self.expect_punct(Punct::RBracket)?;
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            optional: true,
                        }
                    } else {
                        Expr::Member {
                            object: Box::new(expr),
                            property: self.member_name()?,
                            optional: true,
                        }
                    };
                }
                Token::Punct(Punct::LBracket) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect_punct(Punct::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    };
                }
                Token::Punct(Punct::LParen) => {
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args: self.arguments()?,
                        optional: false,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn member_name(&mut self) -> ScriptResult<String> {
        let name = match self.peek() {
            Token::Ident(name) => name.clone(),
            Token::Keyword(keyword) => keyword.as_str().to_string(),
            _ => {
                return Err(self.error(format!(
                    "expected property name after '.' but found {}",
                    describe(self.peek())
                )))
            }
        };
        self.advance();
        Ok(name)
    }

    fn arguments(&mut self) -> ScriptResult<Vec<Expr>> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.eat_punct(Punct::RParen) {
                break;
            }
            args.push(self.assignment()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> ScriptResult<Expr> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expr::Number(n),
            Token::Str(s) => Expr::Str(s.into()),
            Token::Template(chunks) => {
                self.advance();
                return self.template(chunks);
            }
            Token::Regex { pattern, flags } => Expr::Regex { pattern, flags },
            Token::Ident(name) => Expr::Ident(name),
            Token::Keyword(Keyword::True) => Expr::Bool(true),
            Token::Keyword(Keyword::False) => Expr::Bool(false),
            Token::Keyword(Keyword::Null) => Expr::Null,
            Token::Keyword(Keyword::Undefined) => Expr::Undefined,
            Token::Keyword(Keyword::Function) => {
                self.advance();
                return Ok(Expr::Function(Rc::new(self.function_rest(false)?)));
            }
            Token::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                return Ok(inner);
            }
            Token::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    if self.eat_punct(Punct::RBracket) {
                        break;
                    }
                    items.push(self.assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBracket)?;
                        break;
                    }
                }
                return Ok(Expr::Array(items));
            }
            Token::Punct(Punct::LBrace) => {
                self.advance();
                let mut props = Vec::new();
                loop {
                    if self.eat_punct(Punct::RBrace) {
                        break;
                    }
                    let shorthand = matches!(self.peek(), Token::Ident(_));
                    let key = self.property_name()?;
                    let value = if self.eat_punct(Punct::Colon) {
                        self.assignment()?
                    } else if shorthand {
                        Expr::Ident(key.clone())
                    } else {
                        return Err(self.error("expected ':' after property name"));
                    };
                    props.push((key, value));
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBrace)?;
                        break;
                    }
                }
                return Ok(Expr::Object(props));
            }
            Token::Eof => return Err(self.error("unexpected end of input")),
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(expr)
    }

    fn template(&mut self, chunks: Vec<TemplateChunk>) -> ScriptResult<Expr> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Expr {
                    source,
                    line,
                    column,
                } => {
                    let tokens = Lexer::at(&source, line, column).tokenize()?;
                    let mut inner = Parser::new(tokens, self.depth);
                    let expr = inner.expression()?;
                    if !inner.at_eof() {
                        return Err(inner.unexpected());
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(_)
            | Expr::Member {
                optional: false,
                ..
            }
            | Expr::Index {
                optional: false,
                ..
            }
    )
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", number_to_string(*n)),
        Token::Str(_) => "string".to_string(),
        Token::Template(_) => "template literal".to_string(),
        Token::Regex { .. } => "regular expression".to_string(),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Keyword(keyword) => format!("'{}'", keyword.as_str()),
        Token::Punct(punct) => format!("'{}'", punct.as_str()),
        Token::Eof => "end of input".to_string(),
    }
}
