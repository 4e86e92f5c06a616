//! Single-pass compiler: recursive descent over the token stream, emitting
//! instructions straight into blocks.
//!
//! Each `{ ... }` body is its own block one level below its parent. Before a
//! body is compiled its declarations are pre-scanned, so variables get their
//! slots up front and routines can be called before their definition.

use std::collections::HashMap;

use crate::bytecode::{Block, BlockId, BlockKind, Callback, Instruction, Program};
use crate::host::HostNative;
use crate::lexer::{self, LexError, SourceMap, Token};
use crate::ops;
use crate::types::{Type, TypeRegistry};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    pub code: &'static str,
    pub message: String,
    pub line: usize,
    pub suggestion: Option<String>,
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError {
            code: "FAE-L001",
            message: format!("unexpected '{}'", e.snippet),
            line: e.line,
            suggestion: Some(e.suggestion),
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Compiles a script. `natives` are host functions callable by name; they
/// take precedence over built-in operations of the same name.
pub fn compile(source: &str, natives: &[HostNative]) -> Result<Program> {
    let spanned = lexer::lex(source)?;
    let map = SourceMap::new(source);
    let (tokens, lines): (Vec<Token>, Vec<usize>) = spanned
        .into_iter()
        .map(|(token, span)| (token, map.line_of(span.start)))
        .unzip();
    let mut compiler = Compiler::new(tokens, lines, natives);
    compiler.program()?;
    tracing::debug!(blocks = compiler.blocks.len(), events = compiler.events.len(), "compiled");
    Ok(Program {
        blocks: compiler.blocks,
        root: BlockId(0),
        events: compiler.events,
        types: compiler.types,
    })
}

#[derive(Clone)]
enum Symbol {
    Variable(usize),
    Routine(BlockId),
    Type(Type),
}

struct Scope {
    block: BlockId,
    names: HashMap<String, Symbol>,
}

/// How an assignment statement combines the target with its operand.
#[derive(Clone, Copy)]
enum Update {
    Set,
    Binary(&'static str),
    Unary(&'static str),
}

/// Shape of an assignment target, decided by looking ahead over its suffixes.
enum Target {
    Variable,
    /// `x[i][j]...`: written in place through a writable element handle.
    Element,
    /// `....p`: the object is read, then `p` is set on it.
    Property,
    /// `....p[i]`: the array under `p` is rebuilt and stored back.
    PropertyElement,
}

#[derive(Clone, Copy, PartialEq)]
enum Suffix {
    Index,
    Property,
}

struct Compiler<'n> {
    tokens: Vec<Token>,
    lines: Vec<usize>,
    pos: usize,
    line: usize,
    blocks: Vec<Block>,
    events: HashMap<String, BlockId>,
    types: TypeRegistry,
    natives: &'n [HostNative],
    host_blocks: HashMap<&'static str, BlockId>,
    op_blocks: HashMap<&'static str, BlockId>,
    scopes: Vec<Scope>,
}

impl<'n> Compiler<'n> {
    fn new(tokens: Vec<Token>, lines: Vec<usize>, natives: &'n [HostNative]) -> Self {
        Compiler {
            tokens,
            lines,
            pos: 0,
            line: 1,
            blocks: vec![Block::new("main", 0, BlockKind::Normal)],
            events: HashMap::new(),
            types: TypeRegistry::new(),
            natives,
            host_blocks: HashMap::new(),
            op_blocks: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    // ── Tokens ───────────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.line = self.lines[self.pos];
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.peek() {
            Some(tok) if tok == expected => {
                self.advance();
                Ok(())
            }
            Some(tok) => Err(self.error("FAE-C001", format!("expected {expected:?}, got {tok:?}"))),
            None => Err(self.error("FAE-C002", format!("expected {expected:?}, got end of input"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("FAE-C001", format!("expected a name, got {tok:?}"))),
            None => Err(self.error("FAE-C002", "expected a name, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> CompileError {
        CompileError {
            code,
            message,
            line: self.lines.get(self.pos).copied().unwrap_or(self.line),
            suggestion: None,
        }
    }

    fn error_at(&self, index: usize, code: &'static str, message: String) -> CompileError {
        CompileError {
            code,
            message,
            line: self.lines.get(index).copied().unwrap_or(self.line),
            suggestion: None,
        }
    }

    // ── Blocks and scopes ────────────────────────────────────────────

    fn current(&self) -> BlockId {
        self.scopes.last().map_or(BlockId(0), |s| s.block)
    }

    fn level(&self) -> usize {
        self.blocks[self.current().0].level
    }

    fn emit(&mut self, op: Instruction) -> usize {
        let line = self.line;
        let block = self.current();
        self.blocks[block.0].emit(op, line)
    }

    fn here(&self) -> usize {
        self.blocks[self.current().0].len()
    }

    fn new_block(&mut self, name: impl Into<String>, kind: BlockKind) -> BlockId {
        let block = Block::new(name, self.level() + 1, kind);
        self.blocks.push(block);
        BlockId(self.blocks.len() - 1)
    }

    fn resolve(&self, name: &str) -> Option<(Symbol, usize)> {
        self.scopes.iter().rev().find_map(|scope| {
            let symbol = scope.names.get(name)?;
            Some((symbol.clone(), self.blocks[scope.block.0].level))
        })
    }

    fn declare(&mut self, name: String, symbol: Symbol, at: usize) -> Result<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };
        if scope.names.contains_key(&name) {
            return Err(self.error_at(at, "FAE-C006", format!("'{name}' is already declared in this block")));
        }
        scope.names.insert(name, symbol);
        Ok(())
    }

    fn enter(&mut self, block: BlockId) -> Result<()> {
        let names = self.blocks[block.0]
            .variables
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.clone(), Symbol::Variable(slot)))
            .collect();
        self.scopes.push(Scope { block, names });
        self.prescan()
    }

    fn leave(&mut self) -> Result<()> {
        let Some(scope) = self.scopes.pop() else {
            return Ok(());
        };
        let line = self.line;
        self.blocks[scope.block.0]
            .resolve_jumps()
            .map_err(|e| CompileError { code: "FAE-C010", message: e.to_string(), line, suggestion: None })
    }

    /// Registers the declarations at nesting depth zero of the body that
    /// starts at the current token.
    fn prescan(&mut self) -> Result<()> {
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some(token) = self.tokens.get(i).cloned() {
            match token {
                Token::LBrace | Token::LParen | Token::LBracket | Token::LAbs => depth += 1,
                Token::RBrace | Token::RParen | Token::RBracket | Token::RAbs => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Token::Let | Token::Var if depth == 0 => {
                    if let Some(Token::Ident(name)) = self.tokens.get(i + 1).cloned() {
                        let block = self.current();
                        let slot = self.blocks[block.0].variables.len();
                        self.declare(name.clone(), Symbol::Variable(slot), i + 1)?;
                        self.blocks[block.0].variables.push(name);
                    }
                }
                Token::Function | Token::Sub | Token::Task if depth == 0 => {
                    i = self.declare_routine(i)?;
                    continue;
                }
                Token::At if depth == 0 => self.declare_event(i)?,
                Token::Type if depth == 0 => self.declare_type(i)?,
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    /// Returns the index just past the parameter list.
    fn declare_routine(&mut self, at: usize) -> Result<usize> {
        let kind = match self.tokens[at] {
            Token::Function => BlockKind::Function,
            Token::Task => BlockKind::Task,
            _ => BlockKind::Sub,
        };
        let Some(Token::Ident(name)) = self.tokens.get(at + 1).cloned() else {
            return Err(self.error_at(at, "FAE-C001", "expected a routine name".into()));
        };
        let mut params = Vec::new();
        let mut i = at + 2;
        if self.tokens.get(i) == Some(&Token::LParen) {
            i += 1;
            loop {
                match self.tokens.get(i) {
                    Some(Token::RParen) => break,
                    Some(Token::Ident(param)) => params.push(param.clone()),
                    Some(Token::Comma) => {}
                    Some(tok) => {
                        return Err(self.error_at(i, "FAE-C001", format!("expected a parameter name, got {tok:?}")));
                    }
                    None => return Err(self.error_at(i, "FAE-C002", "unterminated parameter list".into())),
                }
                i += 1;
            }
            i += 1;
        }
        if kind == BlockKind::Sub && !params.is_empty() {
            return Err(self.error_at(at, "FAE-C005", format!("sub '{name}' cannot take parameters")));
        }

        if let Some(twice) = params.iter().enumerate().find_map(|(i, p)| params[..i].contains(p).then_some(p)) {
            return Err(self.error_at(at, "FAE-C006", format!("parameter '{twice}' is declared twice")));
        }

        let id = self.new_block(name.clone(), kind);
        let block = &mut self.blocks[id.0];
        block.argument_count = params.len();
        if kind == BlockKind::Function {
            block.variables.push("result".to_string());
        }
        block.variables.extend(params);
        self.declare(name, Symbol::Routine(id), at + 1)?;
        Ok(i)
    }

    fn declare_event(&mut self, at: usize) -> Result<()> {
        let Some(Token::Ident(name)) = self.tokens.get(at + 1).cloned() else {
            return Err(self.error_at(at, "FAE-C001", "expected an event name after '@'".into()));
        };
        if self.scopes.len() > 1 {
            return Err(self.error_at(at, "FAE-C005", format!("event '@{name}' must be declared at top level")));
        }
        if self.events.contains_key(&name) {
            return Err(self.error_at(at, "FAE-C006", format!("event '@{name}' is already declared")));
        }
        let id = self.new_block(format!("@{name}"), BlockKind::Sub);
        self.events.insert(name, id);
        Ok(())
    }

    fn declare_type(&mut self, at: usize) -> Result<()> {
        let Some(Token::Ident(name)) = self.tokens.get(at + 1).cloned() else {
            return Err(self.error_at(at, "FAE-C001", "expected a type name".into()));
        };
        let has_parent = self.tokens.get(at + 2) == Some(&Token::Colon);
        let ty = match (has_parent, self.tokens.get(at + 3).cloned()) {
            (true, Some(Token::Ident(parent))) => match self.resolve(&parent) {
                Some((Symbol::Type(parent), _)) => self.types.object_with_parent(&name, &parent),
                _ => {
                    return Err(self.error_at(at + 3, "FAE-C007", format!("unknown type '{parent}'")));
                }
            },
            _ => self.types.object_named(&name),
        };
        self.declare(name, Symbol::Type(ty), at + 1)
    }

    /// `{ statements }` compiled into `block`, including the parameter prologue.
    fn body(&mut self, block: BlockId) -> Result<()> {
        self.expect(&Token::LBrace)?;
        self.enter(block)?;
        let (kind, argc) = {
            let b = &self.blocks[block.0];
            (b.kind, b.argument_count)
        };
        let first = usize::from(kind == BlockKind::Function);
        let level = self.level();
        for slot in (first..first + argc).rev() {
            self.emit(Instruction::Assign { level, slot });
        }
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                None => return Err(self.error("FAE-C002", "missing '}' at end of input".into())),
                Some(_) => self.statement()?,
            }
        }
        self.advance();
        self.leave()
    }

    fn op_block(&mut self, name: &'static str) -> Result<BlockId> {
        if let Some(&id) = self.op_blocks.get(name) {
            return Ok(id);
        }
        let Some(op) = ops::lookup(name) else {
            return Err(self.error("FAE-C003", format!("unknown operation '{name}'")));
        };
        self.blocks.push(Block::native(op.name, op.arity, Callback::Operation(op.func)));
        let id = BlockId(self.blocks.len() - 1);
        self.op_blocks.insert(op.name, id);
        Ok(id)
    }

    /// A host native first, then a built-in operation.
    fn native_block(&mut self, name: &str) -> Option<BlockId> {
        let natives = self.natives;
        if let Some(native) = natives.iter().find(|n| n.name == name) {
            if let Some(&id) = self.host_blocks.get(native.name) {
                return Some(id);
            }
            self.blocks.push(Block::native(native.name, native.arity, Callback::Host(native.func)));
            let id = BlockId(self.blocks.len() - 1);
            self.host_blocks.insert(native.name, id);
            return Some(id);
        }
        let op = ops::lookup(name)?;
        self.op_block(op.name).ok()
    }

    fn call_op(&mut self, name: &'static str, argc: usize) -> Result<()> {
        let block = self.op_block(name)?;
        self.emit(Instruction::CallPush { block, argc });
        Ok(())
    }

    fn push_value(&mut self, value: Value) {
        self.emit(Instruction::PushVal { value });
    }

    fn push_string(&mut self, s: &str) {
        let value = Value::string(&self.types, s);
        self.push_value(value);
    }

    // ── Statements ───────────────────────────────────────────────────

    fn program(&mut self) -> Result<()> {
        self.enter(BlockId(0))?;
        while self.peek().is_some() {
            if self.check(&Token::RBrace) {
                return Err(self.error("FAE-C001", "unmatched '}'".into()));
            }
            self.statement()?;
        }
        self.leave()
    }

    fn statement(&mut self) -> Result<()> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("FAE-C002", "expected a statement, got end of input".into()));
        };
        match token {
            Token::Let | Token::Var => self.declaration(),
            Token::Local => {
                self.advance();
                let block = self.new_block("local", BlockKind::Normal);
                self.emit(Instruction::Call { block, argc: 0 });
                self.body(block)
            }
            Token::Loop => self.loop_statement(),
            Token::Times => {
                self.advance();
                self.parenthesized()?;
                self.eat(&Token::Loop);
                self.counted_loop()
            }
            Token::While => self.while_statement(),
            Token::For => self.for_statement(),
            Token::If => self.if_statement(),
            Token::Events => self.events_statement(),
            Token::Break => self.break_statement(),
            Token::Return => self.return_statement(),
            Token::Yield => {
                self.advance();
                self.emit(Instruction::Yield);
                self.expect(&Token::Semi)
            }
            Token::Exit => {
                self.advance();
                self.emit(Instruction::Exit);
                self.expect(&Token::Semi)
            }
            Token::Function | Token::Sub | Token::Task => self.routine(),
            Token::At => {
                self.advance();
                let name = self.expect_ident()?;
                let Some(&block) = self.events.get(&name) else {
                    return Err(self.error("FAE-C005", format!("event '@{name}' must be declared at top level")));
                };
                self.body(block)
            }
            Token::Type => {
                self.advance();
                self.expect_ident()?;
                if self.eat(&Token::Colon) {
                    self.expect_ident()?;
                }
                self.expect(&Token::Semi)
            }
            Token::Ident(name) => {
                self.advance();
                if self.check(&Token::LParen) {
                    self.call(&name, false)?;
                } else {
                    self.assignment(&name)?;
                }
                self.expect(&Token::Semi)
            }
            Token::Semi => {
                self.advance();
                Ok(())
            }
            other => Err(self.error("FAE-C001", format!("expected a statement, got {other:?}"))),
        }
    }

    fn declaration(&mut self) -> Result<()> {
        self.advance();
        let name = self.expect_ident()?;
        if self.eat(&Token::Assign) {
            let Some((Symbol::Variable(slot), level)) = self.resolve(&name) else {
                return Err(self.error("FAE-C003", format!("unknown variable '{name}'")));
            };
            self.expression()?;
            self.emit(Instruction::Assign { level, slot });
        }
        self.expect(&Token::Semi)
    }

    fn parenthesized(&mut self) -> Result<()> {
        self.expect(&Token::LParen)?;
        self.expression()?;
        self.expect(&Token::RParen)
    }

    fn loop_statement(&mut self) -> Result<()> {
        self.advance();
        if self.check(&Token::LParen) {
            self.parenthesized()?;
            return self.counted_loop();
        }
        let start = self.here();
        let block = self.new_block("loop", BlockKind::Loop);
        self.emit(Instruction::Call { block, argc: 0 });
        self.body(block)?;
        self.emit(Instruction::LoopBack { target: start });
        Ok(())
    }

    /// The count is already on the stack.
    fn counted_loop(&mut self) -> Result<()> {
        let start = self.emit(Instruction::LoopCount { exit: 0 });
        let block = self.new_block("loop", BlockKind::Loop);
        self.emit(Instruction::Call { block, argc: 0 });
        self.body(block)?;
        self.emit(Instruction::LoopBack { target: start });
        self.emit(Instruction::Pop);
        Ok(())
    }

    fn while_statement(&mut self) -> Result<()> {
        self.advance();
        let start = self.here();
        self.parenthesized()?;
        self.emit(Instruction::LoopIf { exit: 0 });
        self.eat(&Token::Loop);
        let block = self.new_block("while", BlockKind::Loop);
        self.emit(Instruction::Call { block, argc: 0 });
        self.body(block)?;
        self.emit(Instruction::LoopBack { target: start });
        Ok(())
    }

    /// `for reverse? (let? x in a..b)` counts over a half-open range;
    /// `for reverse? (x in list)` counts over the indices of `list`.
    ///
    /// Loop state is `[bound, counter]` with the counter on top. Descending
    /// loops start at the high end and stop at the low one.
    fn for_statement(&mut self) -> Result<()> {
        self.advance();
        let reverse = self.eat(&Token::Reverse);
        self.expect(&Token::LParen)?;
        if !self.eat(&Token::Let) {
            self.eat(&Token::Var);
        }
        let name = self.expect_ident()?;
        self.expect(&Token::In)?;
        self.expression()?;
        if self.eat(&Token::DotDot) {
            self.expression()?;
            if !reverse {
                self.emit(Instruction::Swap);
            }
        } else {
            self.call_op("length", 1)?;
            let zero = Value::number(&self.types, 0.0);
            self.push_value(zero);
            if reverse {
                self.emit(Instruction::Swap);
            }
        }
        self.expect(&Token::RParen)?;

        let start = self.emit(Instruction::Dup2);
        self.call_op("compare", 2)?;
        if reverse {
            self.emit(Instruction::LoopDesc { exit: 0 });
            self.call_op("predecessor", 1)?;
        } else {
            self.emit(Instruction::LoopAsc { exit: 0 });
        }
        self.emit(Instruction::Dup);
        let block = self.new_block("for", BlockKind::Loop);
        self.blocks[block.0].variables.push(name);
        self.blocks[block.0].argument_count = 1;
        self.emit(Instruction::Call { block, argc: 1 });
        self.body(block)?;
        if !reverse {
            self.call_op("successor", 1)?;
        }
        self.emit(Instruction::LoopBack { target: start });
        self.emit(Instruction::Pop);
        self.emit(Instruction::Pop);
        Ok(())
    }

    fn if_statement(&mut self) -> Result<()> {
        self.advance();
        self.emit(Instruction::CaseBegin);
        loop {
            self.parenthesized()?;
            self.emit(Instruction::CaseIfNot { skip: 0 });
            let block = self.new_block("if", BlockKind::Normal);
            self.emit(Instruction::Call { block, argc: 0 });
            self.body(block)?;
            self.emit(Instruction::CaseNext { skip: 0 });
            if !self.eat(&Token::Else) {
                break;
            }
            if self.eat(&Token::If) {
                continue;
            }
            let block = self.new_block("else", BlockKind::Normal);
            self.emit(Instruction::Call { block, argc: 0 });
            self.body(block)?;
            break;
        }
        self.emit(Instruction::CaseEnd);
        Ok(())
    }

    /// `events (e) => on (v, ...) { } ... else { }`. The key stays on the
    /// stack while the `on` values are tested against it.
    fn events_statement(&mut self) -> Result<()> {
        self.advance();
        self.parenthesized()?;
        self.expect(&Token::Arrow)?;
        if !self.check(&Token::On) {
            return Err(self.error("FAE-C001", "expected 'on' after '=>'".into()));
        }
        self.emit(Instruction::CaseBegin);
        while self.eat(&Token::On) {
            self.expect(&Token::LParen)?;
            self.emit(Instruction::Dup);
            self.expression()?;
            self.call_op("compare", 2)?;
            self.emit(Instruction::CmpEq);
            while self.eat(&Token::Comma) {
                self.emit(Instruction::Dup);
                self.emit(Instruction::CaseBegin);
                self.emit(Instruction::CaseIf { skip: 0 });
                self.emit(Instruction::Pop);
                self.emit(Instruction::Dup);
                self.expression()?;
                self.call_op("compare", 2)?;
                self.emit(Instruction::CmpEq);
                self.emit(Instruction::CaseEnd);
            }
            self.expect(&Token::RParen)?;
            self.emit(Instruction::CaseIfNot { skip: 0 });
            self.emit(Instruction::Pop);
            let block = self.new_block("on", BlockKind::Normal);
            self.emit(Instruction::Call { block, argc: 0 });
            self.body(block)?;
            self.emit(Instruction::CaseNext { skip: 0 });
        }
        self.emit(Instruction::Pop);
        if self.eat(&Token::Else) {
            let block = self.new_block("else", BlockKind::Normal);
            self.emit(Instruction::Call { block, argc: 0 });
            self.body(block)?;
        }
        self.emit(Instruction::CaseEnd);
        Ok(())
    }

    fn scope_kinds(&self) -> impl Iterator<Item = (BlockKind, usize)> + '_ {
        self.scopes.iter().rev().map(|s| {
            let block = &self.blocks[s.block.0];
            (block.kind, block.level)
        })
    }

    fn break_statement(&mut self) -> Result<()> {
        let in_loop = self
            .scope_kinds()
            .find(|(kind, _)| *kind == BlockKind::Loop || kind.is_routine())
            .is_some_and(|(kind, _)| kind == BlockKind::Loop);
        if !in_loop {
            return Err(self.error("FAE-C005", "'break' outside of a loop".into()));
        }
        self.advance();
        self.emit(Instruction::BreakLoop);
        self.expect(&Token::Semi)
    }

    fn return_statement(&mut self) -> Result<()> {
        let Some((kind, level)) = self.scope_kinds().find(|(kind, _)| kind.is_routine()) else {
            return Err(self.error("FAE-C005", "'return' outside of a function, sub or task".into()));
        };
        self.advance();
        if !self.check(&Token::Semi) {
            if kind != BlockKind::Function {
                return Err(self.error("FAE-C005", "only functions can return a value".into()));
            }
            self.expression()?;
            self.emit(Instruction::Assign { level, slot: 0 });
        }
        self.emit(Instruction::BreakRoutine);
        self.expect(&Token::Semi)
    }

    fn routine(&mut self) -> Result<()> {
        self.advance();
        let name = self.expect_ident()?;
        if self.eat(&Token::LParen) {
            while !self.eat(&Token::RParen) {
                if self.advance().is_none() {
                    return Err(self.error("FAE-C002", "unterminated parameter list".into()));
                }
            }
        }
        let Some((Symbol::Routine(block), _)) = self.resolve(&name) else {
            return Err(self.error("FAE-C003", format!("unknown routine '{name}'")));
        };
        self.body(block)
    }

    /// Compiles a call; the callee name has been consumed.
    fn call(&mut self, name: &str, push: bool) -> Result<()> {
        let block = match self.resolve(name) {
            Some((Symbol::Routine(id), _)) => id,
            Some(_) => return Err(self.error("FAE-C008", format!("'{name}' is not callable"))),
            None => self
                .native_block(name)
                .ok_or_else(|| self.error("FAE-C003", format!("unknown function '{name}'")))?,
        };
        let (kind, arity, is_native) = {
            let b = &self.blocks[block.0];
            (b.kind, b.argument_count, b.native.is_some())
        };
        if push && !is_native && kind != BlockKind::Function {
            return Err(self.error("FAE-C008", format!("'{name}' does not return a value")));
        }
        self.expect(&Token::LParen)?;
        let mut argc = 0;
        if !self.check(&Token::RParen) {
            loop {
                self.expression()?;
                argc += 1;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        if argc != arity {
            return Err(self.error(
                "FAE-C004",
                format!("'{name}' takes {arity} argument(s) but {argc} were given"),
            ));
        }
        if push {
            self.emit(Instruction::CallPush { block, argc });
        } else {
            self.emit(Instruction::Call { block, argc });
        }
        Ok(())
    }

    // ── Assignment ───────────────────────────────────────────────────

    /// Suffix kinds of the target starting at the current token.
    fn scan_suffixes(&self) -> Vec<Suffix> {
        let mut suffixes = Vec::new();
        let mut i = self.pos;
        loop {
            match self.tokens.get(i) {
                Some(Token::Dot) => {
                    suffixes.push(Suffix::Property);
                    i += 2;
                }
                Some(Token::LBracket) => {
                    suffixes.push(Suffix::Index);
                    let mut depth = 0usize;
                    while let Some(token) = self.tokens.get(i) {
                        match token {
                            Token::LBracket => depth += 1,
                            Token::RBracket => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                    i += 1;
                }
                _ => return suffixes,
            }
        }
    }

    fn update_operator(&mut self) -> Result<Update> {
        let update = match self.peek() {
            Some(Token::Assign) => Update::Set,
            Some(Token::PlusAssign) => Update::Binary("add"),
            Some(Token::MinusAssign) => Update::Binary("subtract"),
            Some(Token::StarAssign) => Update::Binary("multiply"),
            Some(Token::SlashAssign) => Update::Binary("divide"),
            Some(Token::PercentAssign) => Update::Binary("remainder"),
            Some(Token::CaretAssign) => Update::Binary("power"),
            Some(Token::TildeAssign) => Update::Binary("concatenate"),
            Some(Token::Increment) => Update::Unary("successor"),
            Some(Token::Decrement) => Update::Unary("predecessor"),
            Some(tok) => {
                return Err(self.error("FAE-C001", format!("expected an assignment, got {tok:?}")));
            }
            None => return Err(self.error("FAE-C002", "expected an assignment, got end of input".into())),
        };
        self.advance();
        Ok(update)
    }

    /// Emits the new value from the old one on top of the stack (for
    /// `Set`, the operand alone).
    fn updated_value(&mut self, update: Update) -> Result<()> {
        match update {
            Update::Set => self.expression(),
            Update::Binary(op) => {
                self.expression()?;
                self.call_op(op, 2)
            }
            Update::Unary(op) => self.call_op(op, 1),
        }
    }

    fn assignment(&mut self, name: &str) -> Result<()> {
        let (level, slot) = match self.resolve(name) {
            Some((Symbol::Variable(slot), level)) => (level, slot),
            Some(_) => return Err(self.error("FAE-C009", format!("cannot assign to '{name}'"))),
            None => {
                let mut e = self.error("FAE-C003", format!("unknown variable '{name}'"));
                e.suggestion = Some(format!("declare it first with 'let {name}'"));
                return Err(e);
            }
        };
        let suffixes = self.scan_suffixes();
        let target = match suffixes.iter().rposition(|s| *s == Suffix::Property) {
            None if suffixes.is_empty() => Target::Variable,
            None => Target::Element,
            Some(last) if last + 1 == suffixes.len() => Target::Property,
            Some(last) if last + 2 == suffixes.len() => Target::PropertyElement,
            Some(_) => {
                return Err(self.error(
                    "FAE-C009",
                    "only one index may follow a property in an assignment target".into(),
                ));
            }
        };

        match target {
            Target::Variable => {
                let update = self.update_operator()?;
                if !matches!(update, Update::Set) {
                    self.emit(Instruction::PushVar { level, slot });
                }
                self.updated_value(update)?;
                self.emit(Instruction::Assign { level, slot });
            }
            Target::Element => {
                self.emit(Instruction::PushVarWritable { level, slot });
                for _ in &suffixes {
                    self.expect(&Token::LBracket)?;
                    self.expression()?;
                    self.expect(&Token::RBracket)?;
                    self.call_op("index!", 2)?;
                }
                let update = self.update_operator()?;
                if !matches!(update, Update::Set) {
                    self.emit(Instruction::Dup);
                }
                self.updated_value(update)?;
                self.emit(Instruction::AssignWritable);
            }
            Target::Property => {
                self.emit(Instruction::PushVar { level, slot });
                for _ in 1..suffixes.len() {
                    self.suffix()?;
                }
                self.expect(&Token::Dot)?;
                let property = self.expect_ident()?;
                let update = self.update_operator()?;
                if matches!(update, Update::Set) {
                    self.push_string(&property);
                    self.expression()?;
                } else {
                    self.emit(Instruction::Dup);
                    self.push_string(&property);
                    self.call_op("obj_get_property", 2)?;
                    self.updated_value(update)?;
                    self.push_string(&property);
                    self.emit(Instruction::Swap);
                }
                let set = self.op_block("obj_set_property")?;
                self.emit(Instruction::Call { block: set, argc: 3 });
            }
            Target::PropertyElement => {
                self.emit(Instruction::PushVar { level, slot });
                for _ in 2..suffixes.len() {
                    self.suffix()?;
                }
                self.expect(&Token::Dot)?;
                let property = self.expect_ident()?;
                self.emit(Instruction::Dup);
                self.push_string(&property);
                self.call_op("obj_get_property", 2)?;
                self.expect(&Token::LBracket)?;
                self.expression()?;
                self.expect(&Token::RBracket)?;
                let update = self.update_operator()?;
                if !matches!(update, Update::Set) {
                    self.emit(Instruction::Dup2);
                    self.call_op("index", 2)?;
                }
                self.updated_value(update)?;
                self.call_op("write_index", 3)?;
                self.push_string(&property);
                self.emit(Instruction::Swap);
                let set = self.op_block("obj_set_property")?;
                self.emit(Instruction::Call { block: set, argc: 3 });
            }
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn expression(&mut self) -> Result<()> {
        self.logic()
    }

    /// `a && b` keeps `a` when it is false; `a || b` keeps `a` when true.
    fn logic(&mut self) -> Result<()> {
        self.comparison()?;
        loop {
            let test = match self.peek() {
                Some(Token::AndAnd) => Instruction::CaseIfNot { skip: 0 },
                Some(Token::OrOr) => Instruction::CaseIf { skip: 0 },
                _ => return Ok(()),
            };
            self.advance();
            self.emit(Instruction::Dup);
            self.emit(Instruction::CaseBegin);
            self.emit(test);
            self.emit(Instruction::Pop);
            self.comparison()?;
            self.emit(Instruction::CaseEnd);
        }
    }

    fn comparison(&mut self) -> Result<()> {
        self.sum()?;
        let test = match self.peek() {
            Some(Token::Eq) => Instruction::CmpEq,
            Some(Token::Ne) => Instruction::CmpNe,
            Some(Token::Lt) => Instruction::CmpLt,
            Some(Token::Le) => Instruction::CmpLe,
            Some(Token::Gt) => Instruction::CmpGt,
            Some(Token::Ge) => Instruction::CmpGe,
            _ => return Ok(()),
        };
        self.advance();
        self.sum()?;
        self.call_op("compare", 2)?;
        self.emit(test);
        Ok(())
    }

    fn sum(&mut self) -> Result<()> {
        self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => "add",
                Some(Token::Minus) => "subtract",
                Some(Token::Tilde) => "concatenate",
                _ => return Ok(()),
            };
            self.advance();
            self.product()?;
            self.call_op(op, 2)?;
        }
    }

    fn product(&mut self) -> Result<()> {
        self.prefix()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "multiply",
                Some(Token::Slash) => "divide",
                Some(Token::Percent) => "remainder",
                _ => return Ok(()),
            };
            self.advance();
            self.prefix()?;
            self.call_op(op, 2)?;
        }
    }

    fn prefix(&mut self) -> Result<()> {
        let op = match self.peek() {
            Some(Token::Minus) => "negative",
            Some(Token::Bang) => "not",
            _ => return self.power(),
        };
        self.advance();
        self.prefix()?;
        self.call_op(op, 1)
    }

    /// Right-associative; binds tighter than a prefix minus.
    fn power(&mut self) -> Result<()> {
        self.suffixed()?;
        if self.eat(&Token::Caret) {
            self.prefix()?;
            self.call_op("power", 2)?;
        }
        Ok(())
    }

    fn suffixed(&mut self) -> Result<()> {
        self.primary()?;
        while matches!(self.peek(), Some(Token::LBracket | Token::Dot)) {
            self.suffix()?;
        }
        Ok(())
    }

    /// One `[i]`, `[i..j]` or `.name` applied to the value on the stack.
    fn suffix(&mut self) -> Result<()> {
        if self.eat(&Token::Dot) {
            let property = self.expect_ident()?;
            self.push_string(&property);
            return self.call_op("obj_get_property", 2);
        }
        self.expect(&Token::LBracket)?;
        self.expression()?;
        if self.eat(&Token::DotDot) {
            self.expression()?;
            self.expect(&Token::RBracket)?;
            return self.call_op("slice", 3);
        }
        self.expect(&Token::RBracket)?;
        self.call_op("index", 2)
    }

    fn primary(&mut self) -> Result<()> {
        let Some(token) = self.advance() else {
            return Err(self.error("FAE-C002", "expected an expression, got end of input".into()));
        };
        match token {
            Token::Number(n) => {
                let value = Value::number(&self.types, n);
                self.push_value(value);
            }
            Token::Char(c) => {
                let value = Value::character(&self.types, c);
                self.push_value(value);
            }
            Token::Str(s) => self.push_string(&s),
            Token::LParen => {
                self.expression()?;
                self.expect(&Token::RParen)?;
            }
            Token::LAbs => {
                self.expression()?;
                self.expect(&Token::RAbs)?;
                self.call_op("absolute", 1)?;
            }
            Token::LBracket => self.array_literal()?,
            Token::LBrace => {
                let ty = self.types.object();
                self.object_literal(ty)?;
            }
            Token::Ident(name) => self.name(&name)?,
            other => {
                self.pos -= 1;
                return Err(self.error("FAE-C001", format!("expected an expression, got {other:?}")));
            }
        }
        Ok(())
    }

    fn name(&mut self, name: &str) -> Result<()> {
        if self.check(&Token::LParen) {
            return self.call(name, true);
        }
        match self.resolve(name) {
            Some((Symbol::Variable(slot), level)) => {
                self.emit(Instruction::PushVar { level, slot });
                Ok(())
            }
            Some((Symbol::Type(ty), _)) => {
                if !self.eat(&Token::LBrace) {
                    return Err(self.error("FAE-C008", format!("type '{name}' is not a value")));
                }
                self.object_literal(ty)
            }
            Some((Symbol::Routine(_), _)) => {
                let mut e = self.error("FAE-C008", format!("routine '{name}' is not a value"));
                e.suggestion = Some(format!("call it with '{name}(...)'"));
                Err(e)
            }
            None => match self.native_block(name) {
                Some(block) if self.blocks[block.0].argument_count == 0 => {
                    self.emit(Instruction::CallPush { block, argc: 0 });
                    Ok(())
                }
                _ => Err(self.error("FAE-C003", format!("unknown identifier '{name}'"))),
            },
        }
    }

    /// The opening `[` has been consumed.
    fn array_literal(&mut self) -> Result<()> {
        let empty = Value::array(self.types.void_array(), Vec::new());
        self.push_value(empty);
        while !self.eat(&Token::RBracket) {
            self.expression()?;
            self.call_op("append", 2)?;
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBracket)?;
                break;
            }
        }
        Ok(())
    }

    /// The opening `{` has been consumed.
    fn object_literal(&mut self, ty: Type) -> Result<()> {
        self.push_value(Value::object(ty));
        let register = self.op_block("obj_register_property")?;
        while !self.eat(&Token::RBrace) {
            let key = match self.advance() {
                Some(Token::Ident(key) | Token::Str(key)) => key,
                Some(tok) => {
                    self.pos -= 1;
                    return Err(self.error("FAE-C001", format!("expected a property name, got {tok:?}")));
                }
                None => return Err(self.error("FAE-C002", "missing '}' at end of input".into())),
            };
            self.expect(&Token::Colon)?;
            self.emit(Instruction::Dup);
            self.push_string(&key);
            self.expression()?;
            self.emit(Instruction::Call { block: register, argc: 3 });
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(())
    }
}
