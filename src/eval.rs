//! The cursor machine.
//!
//! The single data structure is the flat token vector ([`Chunk`]). There is
//! no AST: every control construct scans forward for its brace-balanced body
//! span, then executes the span by repositioning the cursor. Function and
//! lambda calls swap in the callee's chunk and body span and restore the
//! caller's on exit, so bodies defined in imported modules or earlier
//! interactive lines stay callable.

use std::collections::HashMap;
use std::fmt;
use std::io::prelude::*;
use std::rc::Rc;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::builtins;
use crate::diag::{ParseError, Position, RuntimeError};
use crate::env::Environment;
use crate::gui::GuiHost;
use crate::lexer::Lexer;
use crate::modules::ModuleLoader;
use crate::token::{Token, TokenKind};
use crate::value::{Chunk, LambdaValue, Span, StructValue, Value};

/// How a statement finished: fell through, or requested an early exit.
/// Loops consume `Break`/`Continue`; calls consume `Return`.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Why evaluation is unwinding. `Thrown` is a user `throw` and is catchable
/// by `try`/`catch`; the other two abort the program.
#[derive(Debug)]
pub enum Unwind {
    Parse(ParseError),
    Fatal(RuntimeError),
    Thrown { message: String, pos: Position },
}

impl From<ParseError> for Unwind {
    fn from(e: ParseError) -> Unwind {
        Unwind::Parse(e)
    }
}

impl From<RuntimeError> for Unwind {
    fn from(e: RuntimeError) -> Unwind {
        Unwind::Fatal(e)
    }
}

/// A user function: parameters plus a body span into its defining chunk.
#[derive(Debug, Clone)]
pub struct Function {
    pub params: Vec<String>,
    pub chunk: Chunk,
    pub body: Span,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub fields: Vec<String>,
}

pub struct Machine<'o, W: Write> {
    chunk: Chunk,
    cursor: usize,
    env: Environment,
    functions: HashMap<String, Function>,
    structs: HashMap<String, StructDef>,
    in_function: bool,
    in_loop: bool,
    pub(crate) output: &'o mut W,
    loader: Box<dyn ModuleLoader>,
    pub(crate) gui: Box<dyn GuiHost>,
    pub(crate) rng: StdRng,
}

impl<W: Write> fmt::Debug for Machine<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("cursor", &self.cursor)
            .field("in_function", &self.in_function)
            .field("in_loop", &self.in_loop)
            .finish_non_exhaustive()
    }
}

impl<'o, W: Write> Machine<'o, W> {
    pub fn new(
        output: &'o mut W,
        loader: Box<dyn ModuleLoader>,
        gui: Box<dyn GuiHost>,
    ) -> Machine<'o, W> {
        Machine {
            chunk: Rc::new(vec![Token::eof(1)]),
            cursor: 0,
            env: Environment::new(),
            functions: HashMap::new(),
            structs: HashMap::new(),
            in_function: false,
            in_loop: false,
            output,
            loader,
            gui,
            rng: StdRng::from_entropy(),
        }
    }

    /// Executes a freshly lexed unit to EOF, then restores the previous chunk
    /// and cursor. Used for whole programs, interactive lines, and imports.
    pub fn run_chunk(&mut self, chunk: Chunk) -> Result<(), Unwind> {
        let saved_chunk = std::mem::replace(&mut self.chunk, chunk);
        let saved_cursor = std::mem::replace(&mut self.cursor, 0);
        let result = self.run_to_eof();
        self.chunk = saved_chunk;
        self.cursor = saved_cursor;
        result
    }

    fn run_to_eof(&mut self) -> Result<(), Unwind> {
        while !self.at_end() {
            if !matches!(self.statement()?, Flow::Normal) {
                break;
            }
        }
        Ok(())
    }

    /// Bindings of the outermost scope, printable form, sorted by name.
    pub fn global_bindings(&self) -> Vec<(String, String)> {
        let mut bindings: Vec<_> = self
            .env
            .base_bindings()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        bindings.sort();
        bindings
    }

    /// `name(p1, p2)` signatures of user functions, sorted by name.
    pub fn function_signatures(&self) -> Vec<String> {
        let mut signatures: Vec<_> = self
            .functions
            .iter()
            .map(|(name, func)| format!("{}({})", name, func.params.join(", ")))
            .collect();
        signatures.sort();
        signatures
    }

    // ----- cursor primitives -----

    fn at_end(&self) -> bool {
        match self.chunk.get(self.cursor) {
            Some(token) => token.kind == TokenKind::Eof,
            None => true,
        }
    }

    fn last_line(&self) -> Position {
        self.chunk.last().map(|t| t.line).unwrap_or(1)
    }

    fn peek_kind(&self) -> TokenKind {
        self.chunk
            .get(self.cursor)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_line(&self) -> Position {
        self.chunk
            .get(self.cursor)
            .map(|t| t.line)
            .unwrap_or_else(|| self.last_line())
    }

    fn prev_line(&self) -> Position {
        self.chunk
            .get(self.cursor.saturating_sub(1))
            .map(|t| t.line)
            .unwrap_or_else(|| self.last_line())
    }

    fn advance(&mut self) -> Token {
        match self.chunk.get(self.cursor) {
            Some(token) => {
                let token = token.clone();
                self.cursor += 1;
                token
            }
            None => Token::eof(self.last_line()),
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<(), Unwind> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(ParseError::new(message, self.peek_line()).into())
        }
    }

    fn identifier(&mut self, message: &str) -> Result<Token, Unwind> {
        if self.peek_kind() == TokenKind::Ident {
            Ok(self.advance())
        } else {
            Err(ParseError::new(message, self.peek_line()).into())
        }
    }

    /// With the cursor just past an opening brace, finds the matching closing
    /// brace. Returns the body span and leaves the cursor right after the
    /// closing brace.
    fn scan_block(&mut self) -> Result<Span, Unwind> {
        let start = self.cursor;
        let mut depth = 1usize;
        let mut end = self.cursor;
        while depth > 0 && end < self.chunk.len() {
            match self.chunk[end].kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => (),
            }
            if depth > 0 {
                end += 1;
            }
        }
        if depth > 0 {
            return Err(ParseError::new("Unclosed '{' before end of file", self.last_line()).into());
        }
        self.cursor = end + 1;
        Ok(Span { start, end })
    }

    /// Executes the statements of a recorded body span. Returns the first
    /// non-normal flow; the caller repositions the cursor afterwards.
    fn run_span(&mut self, span: Span) -> Result<Flow, Unwind> {
        self.cursor = span.start;
        while self.cursor < span.end && !self.at_end() {
            match self.statement()? {
                Flow::Normal => (),
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    // ----- statements -----

    fn statement(&mut self) -> Result<Flow, Unwind> {
        match self.peek_kind() {
            TokenKind::Let => {
                self.advance();
                self.let_statement()?;
                Ok(Flow::Normal)
            }
            TokenKind::Fn => {
                self.advance();
                self.function_declaration()?;
                Ok(Flow::Normal)
            }
            TokenKind::Struct => {
                self.advance();
                self.struct_declaration()?;
                Ok(Flow::Normal)
            }
            TokenKind::Import => {
                self.advance();
                self.import_statement()?;
                Ok(Flow::Normal)
            }
            TokenKind::Try => {
                self.advance();
                self.try_statement()
            }
            TokenKind::Throw => {
                self.advance();
                self.throw_statement()
            }
            TokenKind::Break => {
                let token = self.advance();
                if !self.in_loop {
                    return Err(RuntimeError::new(
                        "'break' can only be used inside loops",
                        token.line,
                    )
                    .into());
                }
                self.eat(TokenKind::Semicolon);
                Ok(Flow::Break)
            }
            TokenKind::Continue => {
                let token = self.advance();
                if !self.in_loop {
                    return Err(RuntimeError::new(
                        "'continue' can only be used inside loops",
                        token.line,
                    )
                    .into());
                }
                self.eat(TokenKind::Semicolon);
                Ok(Flow::Continue)
            }
            TokenKind::Puts => {
                self.advance();
                self.puts_statement()?;
                Ok(Flow::Normal)
            }
            TokenKind::If => {
                self.advance();
                self.if_statement()
            }
            TokenKind::While => {
                self.advance();
                self.while_statement()
            }
            TokenKind::For => {
                self.advance();
                self.for_statement()
            }
            TokenKind::Match => {
                self.advance();
                self.match_statement()
            }
            TokenKind::Return => {
                let token = self.advance();
                if !self.in_function {
                    return Err(RuntimeError::new(
                        "'return' can only be used inside functions",
                        token.line,
                    )
                    .into());
                }
                let value = self.expression()?;
                self.expect(TokenKind::Semicolon, "Expected ';' after return statement")?;
                Ok(Flow::Return(value))
            }
            TokenKind::Ident
                if self.chunk.get(self.cursor + 1).map(|t| t.kind) == Some(TokenKind::Equal) =>
            {
                let name = self.advance();
                self.advance(); // '='
                let value = self.expression()?;
                self.env.assign(&name.lexeme, value);
                self.expect(TokenKind::Semicolon, "Expected ';' after assignment")?;
                Ok(Flow::Normal)
            }
            _ => {
                self.expression()?;
                self.expect(TokenKind::Semicolon, "Expected ';' after expression")?;
                Ok(Flow::Normal)
            }
        }
    }

    fn let_statement(&mut self) -> Result<(), Unwind> {
        let name = self.identifier("Expected variable name after 'let'")?;
        self.expect(TokenKind::Equal, "Expected '=' after variable name")?;
        let value = self.expression()?;
        self.env.assign(&name.lexeme, value);
        self.expect(
            TokenKind::Semicolon,
            "Expected ';' after variable declaration",
        )?;
        Ok(())
    }

    fn function_declaration(&mut self) -> Result<(), Unwind> {
        let name = self.identifier("Expected function name after 'fn'")?;
        self.expect(TokenKind::LParen, "Expected '(' after function name")?;

        let mut params = Vec::new();
        while !self.eat(TokenKind::RParen) {
            let param = self.identifier("Expected parameter name")?;
            params.push(param.lexeme);
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RParen, "Expected ')' or ',' in parameter list")?;
                break;
            }
        }

        self.expect(TokenKind::LBrace, "Expected '{' before function body")?;
        let body = self.scan_block()?;

        self.functions.insert(
            name.lexeme.clone(),
            Function {
                params,
                chunk: self.chunk.clone(),
                body,
            },
        );
        // The name doubles as a first-class callable value.
        self.env
            .assign(&name.lexeme, Value::Str(name.lexeme.clone()));
        Ok(())
    }

    fn struct_declaration(&mut self) -> Result<(), Unwind> {
        let name = self.identifier("Expected struct name after 'struct'")?;
        self.expect(TokenKind::LBrace, "Expected '{' after struct name")?;

        let mut fields = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            let field = self.identifier("Expected field name in struct")?;
            fields.push(field.lexeme);
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RBrace, "Expected '}' or ',' in struct definition")?;
                break;
            }
        }

        self.structs.insert(name.lexeme, StructDef { fields });
        Ok(())
    }

    fn import_statement(&mut self) -> Result<(), Unwind> {
        let module = self.identifier("Expected module name after 'import'")?;
        self.expect(TokenKind::Semicolon, "Expected ';' after import statement")?;

        let name = &module.lexeme;
        let source = self.loader.load(name).map_err(|_| {
            RuntimeError::new(
                format!(
                    "Could not import module '{}'. File '{}.choco' not found",
                    name, name
                ),
                module.line,
            )
        })?;

        debug!(module = %name, "splicing imported module");
        let tokens = Lexer::new(&source).tokenize().map_err(|e| {
            RuntimeError::new(
                format!("Error while importing module '{}': {}", name, e),
                module.line,
            )
        })?;

        self.run_chunk(Rc::new(tokens)).map_err(|e| match e {
            Unwind::Parse(inner) => Unwind::Fatal(RuntimeError::new(
                format!("Error while importing module '{}': {}", name, inner),
                module.line,
            )),
            Unwind::Fatal(inner) => Unwind::Fatal(RuntimeError::new(
                format!("Error while importing module '{}': {}", name, inner),
                module.line,
            )),
            // A value thrown inside the module stays catchable by a try
            // around the import.
            thrown @ Unwind::Thrown { .. } => thrown,
        })
    }

    fn try_statement(&mut self) -> Result<Flow, Unwind> {
        self.expect(TokenKind::LBrace, "Expected '{' after 'try'")?;
        let try_span = self.scan_block()?;
        self.expect(TokenKind::Catch, "Expected 'catch' after try block")?;
        let error_var = self.identifier("Expected error variable name after 'catch'")?;
        self.expect(TokenKind::LBrace, "Expected '{' after catch variable")?;
        let catch_span = self.scan_block()?;
        let after = self.cursor;

        let mut thrown: Option<String> = None;
        let mut flow = Flow::Normal;
        self.cursor = try_span.start;
        while self.cursor < try_span.end && !self.at_end() {
            match self.statement() {
                Ok(Flow::Normal) => (),
                Ok(other) => {
                    flow = other;
                    break;
                }
                Err(Unwind::Thrown { message, .. }) => {
                    thrown = Some(message);
                    break;
                }
                Err(fatal) => {
                    self.cursor = after;
                    return Err(fatal);
                }
            }
        }

        if let Some(message) = thrown {
            self.env.push_scope();
            self.env.define(&error_var.lexeme, Value::Str(message));

            let mut result = Ok(Flow::Normal);
            self.cursor = catch_span.start;
            while self.cursor < catch_span.end && !self.at_end() {
                match self.statement() {
                    Ok(Flow::Normal) => (),
                    Ok(other) => {
                        result = Ok(other);
                        break;
                    }
                    // A throw in the catch block is a re-throw.
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }

            self.env.pop_scope();
            self.cursor = after;
            return result;
        }

        self.cursor = after;
        Ok(flow)
    }

    fn throw_statement(&mut self) -> Result<Flow, Unwind> {
        let pos = self.prev_line();
        let value = self.expression()?;
        self.expect(TokenKind::Semicolon, "Expected ';' after throw statement")?;
        Err(Unwind::Thrown {
            message: value.to_string(),
            pos,
        })
    }

    fn puts_statement(&mut self) -> Result<(), Unwind> {
        let line = self.peek_line();
        let value = self.expression()?;
        writeln!(self.output, "{}", value)
            .map_err(|e| RuntimeError::new(format!("I/O error: {}", e), line))?;
        self.expect(TokenKind::Semicolon, "Expected ';' after puts statement")?;
        Ok(())
    }

    fn if_statement(&mut self) -> Result<Flow, Unwind> {
        let condition = self.expression()?;
        self.expect(TokenKind::LBrace, "Expected '{' after if condition")?;
        let then_span = self.scan_block()?;

        let else_span = if self.eat(TokenKind::Else) {
            self.expect(TokenKind::LBrace, "Expected '{' after 'else'")?;
            Some(self.scan_block()?)
        } else {
            None
        };
        let after = self.cursor;

        let flow = if condition.is_truthy() {
            self.run_span(then_span)?
        } else if let Some(span) = else_span {
            self.run_span(span)?
        } else {
            Flow::Normal
        };

        self.cursor = after;
        Ok(flow)
    }

    fn while_statement(&mut self) -> Result<Flow, Unwind> {
        let condition_start = self.cursor;
        let condition = self.expression()?;
        self.expect(TokenKind::LBrace, "Expected '{' after while condition")?;
        let body = self.scan_block()?;
        let after = self.cursor;

        let was_in_loop = std::mem::replace(&mut self.in_loop, true);
        let result = self.while_iterations(condition, condition_start, body);
        self.in_loop = was_in_loop;
        self.cursor = after;
        result
    }

    fn while_iterations(
        &mut self,
        mut condition: Value,
        condition_start: usize,
        body: Span,
    ) -> Result<Flow, Unwind> {
        while condition.is_truthy() {
            match self.run_span(body)? {
                Flow::Normal | Flow::Continue => (),
                Flow::Break => return Ok(Flow::Normal),
                ret @ Flow::Return(_) => return Ok(ret),
            }
            self.cursor = condition_start;
            condition = self.expression()?;
            self.expect(TokenKind::LBrace, "Expected '{' after while condition")?;
        }
        Ok(Flow::Normal)
    }

    fn for_statement(&mut self) -> Result<Flow, Unwind> {
        let iter_var = self.identifier("Expected iterator variable name after 'for'")?;
        self.expect(TokenKind::In, "Expected 'in' after iterator variable")?;
        let start = self.expression()?;
        self.expect(TokenKind::DotDot, "Expected '..' in for loop range")?;
        let end = self.expression()?;

        let (from, to) = match (start, end) {
            (Value::Number(a), Value::Number(b)) => (a.trunc() as i64, b.trunc() as i64),
            _ => {
                return Err(
                    RuntimeError::new("For loop range must be numbers", iter_var.line).into(),
                );
            }
        };

        self.expect(TokenKind::LBrace, "Expected '{' after for range")?;
        let body = self.scan_block()?;
        let after = self.cursor;

        let was_in_loop = std::mem::replace(&mut self.in_loop, true);
        let result = self.for_iterations(&iter_var.lexeme, from, to, body);
        self.in_loop = was_in_loop;
        self.cursor = after;
        result
    }

    fn for_iterations(
        &mut self,
        var: &str,
        from: i64,
        to: i64,
        body: Span,
    ) -> Result<Flow, Unwind> {
        for i in from..to {
            self.env.assign(var, Value::Number(i as f64));
            match self.run_span(body)? {
                Flow::Normal | Flow::Continue => (),
                Flow::Break => return Ok(Flow::Normal),
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn match_statement(&mut self) -> Result<Flow, Unwind> {
        let subject = self.expression()?;
        self.expect(TokenKind::LBrace, "Expected '{' after match value")?;

        struct CaseArm {
            expr_start: usize,
            body: Span,
        }
        let mut arms: Vec<CaseArm> = Vec::new();
        let mut default_span: Option<Span> = None;

        while self.peek_kind() != TokenKind::RBrace && !self.at_end() {
            if self.eat(TokenKind::Case) {
                let expr_start = self.cursor;
                self.skip_case_expression()?;
                self.expect(TokenKind::FatArrow, "Expected '=>' after case value")?;
                self.expect(TokenKind::LBrace, "Expected '{' after '=>'")?;
                let body = self.scan_block()?;
                arms.push(CaseArm { expr_start, body });
            } else if self.eat(TokenKind::Default) {
                if default_span.is_some() {
                    return Err(ParseError::new(
                        "Match statement can only have one 'default' case",
                        self.prev_line(),
                    )
                    .into());
                }
                self.expect(TokenKind::FatArrow, "Expected '=>' after 'default'")?;
                self.expect(TokenKind::LBrace, "Expected '{' after '=>'")?;
                default_span = Some(self.scan_block()?);
            } else {
                self.advance();
            }
        }

        self.expect(TokenKind::RBrace, "Expected '}' at end of match statement")?;
        let after = self.cursor;

        let mut chosen: Option<Span> = None;
        for arm in &arms {
            self.cursor = arm.expr_start;
            let case_value = self.expression()?;
            if case_matches(&subject, &case_value) {
                chosen = Some(arm.body);
                break;
            }
        }

        let flow = match chosen.or(default_span) {
            Some(span) => self.run_span(span)?,
            None => Flow::Normal,
        };

        self.cursor = after;
        Ok(flow)
    }

    /// Advances past a case expression to its `=>`, tracking bracket depth so
    /// nested commas and arrows do not end the scan early.
    fn skip_case_expression(&mut self) -> Result<(), Unwind> {
        let mut depth = 0i32;
        loop {
            if self.at_end() {
                return Err(
                    ParseError::new("Expected '=>' after case value", self.peek_line()).into(),
                );
            }
            match self.peek_kind() {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth -= 1,
                TokenKind::FatArrow if depth == 0 => return Ok(()),
                _ => (),
            }
            self.cursor += 1;
        }
    }

    // ----- expressions -----

    fn expression(&mut self) -> Result<Value, Unwind> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<Value, Unwind> {
        let mut left = self.logical_and()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.logical_and()?;
            left = Value::Bool(left.is_truthy() || right.is_truthy());
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Value, Unwind> {
        let mut left = self.comparison()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.comparison()?;
            left = Value::Bool(left.is_truthy() && right.is_truthy());
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Value, Unwind> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                kind @ (TokenKind::EqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual) => kind,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Value::Bool(compare(&left, op, &right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Value, Unwind> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                kind @ (TokenKind::Plus | TokenKind::Minus) => kind,
                _ => break,
            };
            self.advance();
            let line = self.prev_line();
            let right = self.factor()?;
            left = match (left, op, right) {
                (Value::Number(a), TokenKind::Plus, Value::Number(b)) => Value::Number(a + b),
                (Value::Number(a), TokenKind::Minus, Value::Number(b)) => Value::Number(a - b),
                (Value::Str(a), TokenKind::Plus, Value::Str(b)) => Value::Str(a + &b),
                (l, TokenKind::Plus, r) => {
                    return Err(RuntimeError::new(
                        format!("Cannot add {} and {}", l.type_name(), r.type_name()),
                        line,
                    )
                    .into());
                }
                (l, _, r) => {
                    return Err(RuntimeError::new(
                        format!("Cannot subtract {} from {}", r.type_name(), l.type_name()),
                        line,
                    )
                    .into());
                }
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Value, Unwind> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                kind @ (TokenKind::Star | TokenKind::Slash | TokenKind::Percent) => kind,
                _ => break,
            };
            self.advance();
            let line = self.prev_line();
            let right = self.unary()?;
            left = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match op {
                    TokenKind::Star => Value::Number(a * b),
                    TokenKind::Slash => {
                        if b == 0.0 {
                            return Err(RuntimeError::new("Division by zero", line).into());
                        }
                        Value::Number(a / b)
                    }
                    _ => {
                        if b == 0.0 {
                            return Err(RuntimeError::new("Modulo by zero", line).into());
                        }
                        Value::Number(a % b)
                    }
                },
                (l, r) => {
                    let verb = match op {
                        TokenKind::Star => "multiply",
                        TokenKind::Slash => "divide",
                        _ => "modulo",
                    };
                    return Err(RuntimeError::new(
                        format!("Cannot {} {} and {}", verb, l.type_name(), r.type_name()),
                        line,
                    )
                    .into());
                }
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, Unwind> {
        if self.eat(TokenKind::Bang) {
            let value = self.unary()?;
            return Ok(match value {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Bool(false),
            });
        }
        if self.eat(TokenKind::Minus) {
            let line = self.prev_line();
            let value = self.unary()?;
            return match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(RuntimeError::new(
                    format!("Cannot negate {}", other.type_name()),
                    line,
                )
                .into()),
            };
        }
        self.call()
    }

    fn call(&mut self) -> Result<Value, Unwind> {
        let mut value = self.primary()?;

        loop {
            if self.eat(TokenKind::LParen) {
                let line = self.prev_line();
                let mut args = Vec::new();
                while !self.eat(TokenKind::RParen) {
                    args.push(self.expression()?);
                    if !self.eat(TokenKind::Comma) {
                        self.expect(TokenKind::RParen, "Expected ')' or ',' in function call")?;
                        break;
                    }
                }
                value = match value {
                    Value::Str(name) => self.call_function(&name, args, line)?,
                    Value::Lambda(lambda) => self.call_lambda(lambda, args, line)?,
                    other => {
                        return Err(RuntimeError::new(
                            format!("Cannot call {}", other.type_name()),
                            line,
                        )
                        .into());
                    }
                };
            } else if self.eat(TokenKind::LBracket) {
                let line = self.prev_line();
                let index = self.expression()?;
                self.expect(TokenKind::RBracket, "Expected ']' after array index")?;
                value = index_value(value, index, line)?;
            } else if self.eat(TokenKind::Dot) {
                let line = self.prev_line();
                let field = self.identifier("Expected field name after '.'")?;
                value = match value {
                    Value::Struct(s) => match s.fields.get(&field.lexeme) {
                        Some(v) => v.clone(),
                        None => {
                            return Err(RuntimeError::new(
                                format!("Struct '{}' has no field '{}'", s.name, field.lexeme),
                                line,
                            )
                            .into());
                        }
                    },
                    other => {
                        return Err(RuntimeError::new(
                            format!("Cannot access field on {}", other.type_name()),
                            line,
                        )
                        .into());
                    }
                };
            } else {
                break;
            }
        }

        Ok(value)
    }

    fn primary(&mut self) -> Result<Value, Unwind> {
        if self.peek_kind() == TokenKind::Number {
            let token = self.advance();
            let n: f64 = token.lexeme.parse().map_err(|_| {
                ParseError::new(
                    format!("Invalid number literal '{}'", token.lexeme),
                    token.line,
                )
            })?;
            return Ok(Value::Number(n));
        }
        if self.peek_kind() == TokenKind::Str {
            let token = self.advance();
            let text = self.interpolate(&token.lexeme, token.line)?;
            return Ok(Value::Str(text));
        }
        if self.eat(TokenKind::True) {
            return Ok(Value::Bool(true));
        }
        if self.eat(TokenKind::False) {
            return Ok(Value::Bool(false));
        }
        if self.eat(TokenKind::Pipe) {
            return self.lambda_literal(false);
        }
        // `||` right where a lambda may start is an empty parameter list, not
        // the logical-or operator.
        if self.eat(TokenKind::OrOr) {
            return self.lambda_literal(true);
        }
        if self.eat(TokenKind::LBracket) {
            let mut items = Vec::new();
            while !self.eat(TokenKind::RBracket) {
                items.push(self.expression()?);
                if !self.eat(TokenKind::Comma) {
                    self.expect(TokenKind::RBracket, "Expected ']' or ',' in array literal")?;
                    break;
                }
            }
            return Ok(Value::Array(items));
        }
        if self.peek_kind() == TokenKind::Ident {
            let token = self.advance();
            return self.identifier_primary(token);
        }
        if self.eat(TokenKind::LParen) {
            let value = self.expression()?;
            self.expect(TokenKind::RParen, "Expected ')' after expression")?;
            return Ok(value);
        }

        let token = self.advance();
        Err(ParseError::new(format!("Unexpected token: '{}'", token), token.line).into())
    }

    fn identifier_primary(&mut self, token: Token) -> Result<Value, Unwind> {
        let name = token.lexeme;

        if let Some(def) = self.structs.get(&name).cloned() {
            if self.peek_kind() == TokenKind::LBrace {
                self.advance();
                return self.struct_literal(name, def);
            }
        }

        if self.functions.contains_key(&name) || builtins::is_builtin(&name) {
            return Ok(Value::Str(name));
        }

        match self.env.lookup(&name) {
            Some(value) => Ok(value.clone()),
            None => {
                Err(RuntimeError::new(format!("Undefined variable '{}'", name), token.line).into())
            }
        }
    }

    fn struct_literal(&mut self, name: String, def: StructDef) -> Result<Value, Unwind> {
        let mut given: Vec<(String, Value)> = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            let field = self.identifier("Expected field name in struct literal")?;
            self.expect(TokenKind::Colon, "Expected ':' after field name")?;
            let value = self.expression()?;
            given.push((field.lexeme, value));
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RBrace, "Expected '}' or ',' in struct literal")?;
                break;
            }
        }

        // Declared fields come first, defaulting to nil; extra literal
        // fields follow in literal order.
        let mut fields = IndexMap::new();
        for declared in &def.fields {
            fields.insert(declared.clone(), Value::Nil);
        }
        for (field, value) in given {
            fields.insert(field, value);
        }

        Ok(Value::Struct(StructValue { name, fields }))
    }

    fn lambda_literal(&mut self, empty_params: bool) -> Result<Value, Unwind> {
        let mut params = Vec::new();
        if !empty_params {
            if self.peek_kind() == TokenKind::Pipe {
                self.advance();
            } else {
                while self.peek_kind() != TokenKind::Pipe && !self.at_end() {
                    let param = self.identifier("Expected parameter name in lambda")?;
                    params.push(param.lexeme);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Pipe, "Expected '|' after lambda parameters")?;
            }
        }

        self.expect(TokenKind::FatArrow, "Expected '=>' after lambda parameters")?;
        self.expect(TokenKind::LBrace, "Expected '{' after '=>'")?;
        let body = self.scan_block()?;

        // Snapshot every visible binding by value at the creation site.
        let captures = self.env.snapshot();

        Ok(Value::Lambda(Rc::new(LambdaValue {
            params,
            chunk: self.chunk.clone(),
            body,
            captures,
        })))
    }

    /// Replaces each `#{name}` in an evaluated string literal with the
    /// current string form of the variable. Only bare identifiers are
    /// resolved; a marker with no closing brace stays verbatim.
    fn interpolate(&self, raw: &str, line: Position) -> Result<String, Unwind> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(i) = rest.find("#{") {
            out.push_str(&rest[..i]);
            let tail = &rest[i + 2..];
            match tail.find('}') {
                Some(j) => {
                    let name = &tail[..j];
                    let value = self.env.lookup(name).ok_or_else(|| {
                        RuntimeError::new(format!("Undefined variable '{}'", name), line)
                    })?;
                    out.push_str(&value.to_string());
                    rest = &tail[j + 1..];
                }
                None => {
                    out.push_str("#{");
                    rest = tail;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    // ----- calls -----

    /// Calls by name: built-ins first, then user functions.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        line: Position,
    ) -> Result<Value, Unwind> {
        if let Some(result) = builtins::dispatch(self, name, &args, line) {
            return result;
        }

        let func = match self.functions.get(name) {
            Some(func) => func.clone(),
            None => {
                return Err(
                    RuntimeError::new(format!("Undefined function '{}'", name), line).into(),
                );
            }
        };

        if args.len() < func.params.len() {
            return Err(RuntimeError::new(
                format!(
                    "Function '{}' expects {} arguments, got {}",
                    name,
                    func.params.len(),
                    args.len()
                ),
                line,
            )
            .into());
        }

        // Extra arguments are ignored.
        let mut scope = HashMap::new();
        for (param, arg) in func.params.iter().zip(args) {
            scope.insert(param.clone(), arg);
        }

        self.run_body(func.chunk, func.body, scope)
    }

    pub(crate) fn call_lambda(
        &mut self,
        lambda: Rc<LambdaValue>,
        args: Vec<Value>,
        line: Position,
    ) -> Result<Value, Unwind> {
        if args.len() < lambda.params.len() {
            return Err(RuntimeError::new(
                format!(
                    "Lambda expects {} arguments, got {}",
                    lambda.params.len(),
                    args.len()
                ),
                line,
            )
            .into());
        }

        // The callee scope starts from the capture snapshot; parameters
        // shadow captures.
        let mut scope = lambda.captures.clone();
        for (param, arg) in lambda.params.iter().zip(args) {
            scope.insert(param.clone(), arg);
        }

        self.run_body(lambda.chunk.clone(), lambda.body, scope)
    }

    /// Executes a callee body with a prepared scope, restoring chunk, cursor,
    /// flags, and environment on every exit path. A body with no `return`
    /// yields nil.
    fn run_body(
        &mut self,
        chunk: Chunk,
        body: Span,
        scope: HashMap<String, Value>,
    ) -> Result<Value, Unwind> {
        self.env.push_scope_with(scope);
        let saved_chunk = std::mem::replace(&mut self.chunk, chunk);
        let saved_cursor = std::mem::replace(&mut self.cursor, body.start);
        let saved_in_function = std::mem::replace(&mut self.in_function, true);
        let saved_in_loop = std::mem::replace(&mut self.in_loop, false);

        let mut result = Ok(Value::Nil);
        while self.cursor < body.end && !self.at_end() {
            match self.statement() {
                Ok(Flow::Normal) => (),
                Ok(Flow::Return(value)) => {
                    result = Ok(value);
                    break;
                }
                // Loops consume break/continue and the loop context was
                // reset on entry, so no other flow can surface here.
                Ok(Flow::Break) | Ok(Flow::Continue) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.in_loop = saved_in_loop;
        self.in_function = saved_in_function;
        self.cursor = saved_cursor;
        self.chunk = saved_chunk;
        self.env.pop_scope();
        result
    }
}

/// `match` arm equality: numbers, strings, and booleans by value; every
/// other pairing, including mismatched kinds, never matches.
fn case_matches(subject: &Value, case: &Value) -> bool {
    match (subject, case) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

/// Comparison operator semantics: full ordering on numbers, equality on
/// strings and booleans, `false` for every other pairing.
fn compare(left: &Value, op: TokenKind, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match op {
            TokenKind::EqualEqual => a == b,
            TokenKind::BangEqual => a != b,
            TokenKind::Less => a < b,
            TokenKind::Greater => a > b,
            TokenKind::LessEqual => a <= b,
            TokenKind::GreaterEqual => a >= b,
            _ => false,
        },
        (Value::Str(a), Value::Str(b)) => match op {
            TokenKind::EqualEqual => a == b,
            TokenKind::BangEqual => a != b,
            _ => false,
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            TokenKind::EqualEqual => a == b,
            TokenKind::BangEqual => a != b,
            _ => false,
        },
        _ => false,
    }
}

fn index_value(value: Value, index: Value, line: Position) -> Result<Value, Unwind> {
    match value {
        Value::Array(items) => {
            let idx = match index {
                Value::Number(n) => n.trunc() as i64,
                other => {
                    return Err(RuntimeError::new(
                        format!("Array index must be a number, got {}", other.type_name()),
                        line,
                    )
                    .into());
                }
            };
            if idx < 0 || idx as usize >= items.len() {
                return Err(RuntimeError::new(
                    format!("Array index {} out of bounds (size: {})", idx, items.len()),
                    line,
                )
                .into());
            }
            Ok(items[idx as usize].clone())
        }
        Value::Str(s) => {
            let idx = match index {
                Value::Number(n) => n.trunc() as i64,
                other => {
                    return Err(RuntimeError::new(
                        format!("String index must be a number, got {}", other.type_name()),
                        line,
                    )
                    .into());
                }
            };
            let chars: Vec<char> = s.chars().collect();
            if idx < 0 || idx as usize >= chars.len() {
                return Err(RuntimeError::new(
                    format!("String index {} out of bounds (length: {})", idx, chars.len()),
                    line,
                )
                .into());
            }
            Ok(Value::Str(chars[idx as usize].to_string()))
        }
        other => Err(RuntimeError::new(
            format!("Cannot index {}", other.type_name()),
            line,
        )
        .into()),
    }
}
