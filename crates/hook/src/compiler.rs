//! The single-pass compiler.
//!
//! A recursive-descent parser with precedence climbing that consumes
//! tokens straight from the [`Scanner`] and emits bytecode as it goes —
//! there is no AST. One [`FunctionScope`] per nested function under
//! compilation tracks the local slots, the lexical scope depth, and the
//! non-local captures; name resolution walks local slots first, then
//! recurses into enclosing scopes (introducing capture entries on the
//! way), and finally falls back to the global registry the embedder
//! populated.
//!
//! Jumps use the placeholder/patch approach: a jump is emitted with a
//! zero operand and patched once the target offset is known. `break` and
//! `continue` record patch sites in the innermost [`LoopContext`] and are
//! backfilled when the loop closes.

use std::rc::Rc;

use crate::callable::{Closure, Function};
use crate::chunk::OpCode;
use crate::error::{Error, Result};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::string::Str;
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_CONSTANTS: usize = 256;
const MAX_NONLOCALS: usize = 256;
const MAX_GLOBALS: usize = 256;
const MAX_ARGS: usize = 255;

/// Compile `source` into a closure over the root function. The root takes
/// one implicit parameter, `args`, and returns whatever the script
/// returns. `globals` is the name table of the embedder's global
/// registry; unknown names fail at compile time.
pub fn compile(file: &str, source: &str, globals: &[String]) -> Result<Rc<Closure>> {
    let mut compiler = Compiler::new(file, source, globals)?;
    let function = compiler.compile_root()?;
    Ok(Rc::new(Closure::new(function, Vec::new())))
}

struct Local {
    name: String,
    depth: usize,
    mutable: bool,
}

struct NonLocal {
    /// Enclosing local slot (`is_local`) or enclosing capture index.
    index: u8,
    is_local: bool,
    mutable: bool,
}

struct LoopContext {
    scope_depth: usize,
    /// Backward target for `continue` when it is already known.
    start: Option<usize>,
    /// Operand offsets of `break` jumps, patched at loop end.
    break_jumps: Vec<usize>,
    /// Operand offsets of `continue` jumps when the target comes later.
    continue_jumps: Vec<usize>,
}

struct FunctionScope {
    function: Function,
    locals: Vec<Local>,
    scope_depth: usize,
    nonlocals: Vec<NonLocal>,
    loops: Vec<LoopContext>,
}

/// Where a name resolved to, with mutability where it applies.
#[derive(Debug, Clone, Copy)]
enum Binding {
    Local(u8, bool),
    NonLocal(u8, bool),
    Global(u8),
}

/// Kind of a pending write-back pair left on the stack by a fetch.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Element,
    Field,
}

struct Compiler<'a> {
    scanner: Scanner<'a>,
    globals: Vec<String>,
    scopes: Vec<FunctionScope>,
}

impl<'a> Compiler<'a> {
    fn new(file: &str, source: &'a str, globals: &[String]) -> Result<Self> {
        let scanner = Scanner::new(file, source)?;
        let file_str = Rc::new(Str::from_chars(file));
        let root = Function::new(1, Some(Rc::new(Str::from_chars("main"))), file_str);
        let mut scope = FunctionScope {
            function: root,
            locals: Vec::new(),
            scope_depth: 0,
            nonlocals: Vec::new(),
            loops: Vec::new(),
        };
        // Slot 0 holds the callee, slot 1 the implicit args array.
        scope.locals.push(Local {
            name: String::new(),
            depth: 0,
            mutable: false,
        });
        scope.locals.push(Local {
            name: "args".to_string(),
            depth: 0,
            mutable: false,
        });
        Ok(Self {
            scanner,
            globals: globals.to_vec(),
            scopes: vec![scope],
        })
    }

    fn compile_root(mut self) -> Result<Rc<Function>> {
        while !self.check(TokenKind::Eof) {
            self.statement()?;
        }
        let line = self.line();
        self.emit(OpCode::ReturnNil, line);
        let mut scope = self.scopes.pop().expect("root scope");
        scope.function.num_nonlocals = scope.nonlocals.len();
        Ok(Rc::new(scope.function))
    }

    // -----------------------------------------------------------------------
    // Token plumbing and error helpers
    // -----------------------------------------------------------------------

    fn advance(&mut self) -> Result<()> {
        self.scanner.next_token()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.scanner.token.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token> {
        if self.check(kind) {
            let token = self.scanner.token.clone();
            self.advance()?;
            return Ok(token);
        }
        Err(self.syntax_error(message))
    }

    fn line(&self) -> u32 {
        self.scanner.token.line
    }

    fn syntax_error(&self, message: impl Into<String>) -> Error {
        Error::Syntax {
            message: message.into(),
            file: self.scanner.file().to_string(),
            line: self.scanner.token.line,
            col: self.scanner.token.col,
        }
    }

    fn compile_error(&self, message: impl Into<String>) -> Error {
        Error::Compile {
            message: message.into(),
            file: self.scanner.file().to_string(),
            line: self.scanner.token.line,
            col: self.scanner.token.col,
        }
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn scope(&self) -> &FunctionScope {
        self.scopes.last().expect("function scope")
    }

    fn scope_mut(&mut self) -> &mut FunctionScope {
        self.scopes.last_mut().expect("function scope")
    }

    fn emit(&mut self, op: OpCode, line: u32) {
        self.scope_mut().function.chunk.emit_opcode(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        self.scope_mut().function.chunk.emit_byte(byte);
    }

    fn emit_word(&mut self, word: u16) {
        self.scope_mut().function.chunk.emit_word(word);
    }

    /// Emit a jump with a placeholder target; returns the operand offset
    /// for patching.
    fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit(op, line);
        let at = self.scope().function.chunk.len();
        self.emit_word(0);
        at
    }

    /// Patch a jump operand to the current code offset.
    fn patch_jump(&mut self, operand_at: usize) -> Result<()> {
        let target = self.scope().function.chunk.len();
        if target > u16::MAX as usize {
            return Err(self.compile_error("function body too large"));
        }
        self.scope_mut()
            .function
            .chunk
            .patch_word(operand_at, target as u16);
        Ok(())
    }

    fn code_offset(&self) -> usize {
        self.scope().function.chunk.len()
    }

    /// Add a constant, deduplicating numbers and strings already in the
    /// pool.
    fn add_const(&mut self, value: Value) -> Result<u8> {
        if let Some(index) = self.scope().function.chunk().consts().index_of(&value) {
            return Ok(index as u8);
        }
        if self.scope().function.chunk().consts().len() >= MAX_CONSTANTS {
            return Err(self.compile_error("too many constants in one function"));
        }
        let consts = self.scope_mut().function.chunk.consts_mut();
        let index = consts.len();
        consts.inplace_add(value);
        Ok(index as u8)
    }

    fn string_const(&mut self, text: &str) -> Result<u8> {
        self.add_const(Value::String(Rc::new(Str::from_chars(text))))
    }

    fn emit_number(&mut self, n: f64, line: u32) -> Result<()> {
        if n.trunc() == n && (0.0..=f64::from(u16::MAX)).contains(&n) {
            self.emit(OpCode::Int, line);
            self.emit_word(n as u16);
            return Ok(());
        }
        let index = self.add_const(Value::Number(n))?;
        self.emit(OpCode::Constant, line);
        self.emit_byte(index);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scopes, locals, and name resolution
    // -----------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        let depth = self.scope().scope_depth;
        while self
            .scope()
            .locals
            .last()
            .is_some_and(|local| local.depth == depth)
        {
            self.scope_mut().locals.pop();
            self.emit(OpCode::Pop, line);
        }
        self.scope_mut().scope_depth -= 1;
    }

    /// Bind the value on top of the stack as a named local in the current
    /// scope. Redeclaration within the same scope is a compile error.
    fn declare_local(&mut self, name: &str, mutable: bool) -> Result<u8> {
        let depth = self.scope().scope_depth;
        if !name.is_empty()
            && self
                .scope()
                .locals
                .iter()
                .any(|local| local.depth == depth && local.name == name)
        {
            return Err(self.compile_error(format!("variable `{name}` is already declared")));
        }
        if self.scope().locals.len() >= MAX_LOCALS {
            return Err(self.compile_error("too many local variables in one function"));
        }
        self.scope_mut().locals.push(Local {
            name: name.to_string(),
            depth,
            mutable,
        });
        Ok((self.scope().locals.len() - 1) as u8)
    }

    fn resolve_local(&self, scope_index: usize, name: &str) -> Option<(u8, bool)> {
        let scope = &self.scopes[scope_index];
        scope
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot as u8, local.mutable))
    }

    fn add_nonlocal(
        &mut self,
        scope_index: usize,
        index: u8,
        is_local: bool,
        mutable: bool,
    ) -> Result<u8> {
        if let Some(existing) = self.scopes[scope_index]
            .nonlocals
            .iter()
            .position(|nl| nl.index == index && nl.is_local == is_local)
        {
            return Ok(existing as u8);
        }
        if self.scopes[scope_index].nonlocals.len() >= MAX_NONLOCALS {
            return Err(self.compile_error("too many captured variables in one function"));
        }
        self.scopes[scope_index].nonlocals.push(NonLocal {
            index,
            is_local,
            mutable,
        });
        Ok((self.scopes[scope_index].nonlocals.len() - 1) as u8)
    }

    fn resolve_nonlocal(&mut self, scope_index: usize, name: &str) -> Result<Option<(u8, bool)>> {
        if scope_index == 0 {
            return Ok(None);
        }
        if let Some((slot, mutable)) = self.resolve_local(scope_index - 1, name) {
            let index = self.add_nonlocal(scope_index, slot, true, mutable)?;
            return Ok(Some((index, mutable)));
        }
        if let Some((index, mutable)) = self.resolve_nonlocal(scope_index - 1, name)? {
            let index = self.add_nonlocal(scope_index, index, false, mutable)?;
            return Ok(Some((index, mutable)));
        }
        Ok(None)
    }

    fn resolve(&mut self, name: &str) -> Result<Binding> {
        let scope_index = self.scopes.len() - 1;
        if let Some((slot, mutable)) = self.resolve_local(scope_index, name) {
            return Ok(Binding::Local(slot, mutable));
        }
        if let Some((index, mutable)) = self.resolve_nonlocal(scope_index, name)? {
            return Ok(Binding::NonLocal(index, mutable));
        }
        if let Some(index) = self.globals.iter().position(|global| global == name) {
            if index >= MAX_GLOBALS {
                return Err(self.compile_error("too many globals"));
            }
            return Ok(Binding::Global(index as u8));
        }
        Err(self.compile_error(format!("variable `{name}` is not defined")))
    }

    fn emit_load(&mut self, binding: Binding, line: u32) {
        match binding {
            Binding::Local(slot, _) => {
                self.emit(OpCode::GetLocal, line);
                self.emit_byte(slot);
            }
            Binding::NonLocal(index, _) => {
                self.emit(OpCode::NonLocal, line);
                self.emit_byte(index);
            }
            Binding::Global(index) => {
                self.emit(OpCode::Global, line);
                self.emit_byte(index);
            }
        }
    }

    fn emit_store(&mut self, binding: Binding, name: &str, line: u32) -> Result<()> {
        match binding {
            Binding::Local(slot, mutable) => {
                if !mutable {
                    return Err(
                        self.compile_error(format!("cannot assign to immutable variable `{name}`"))
                    );
                }
                self.emit(OpCode::SetLocal, line);
                self.emit_byte(slot);
                Ok(())
            }
            Binding::NonLocal(index, mutable) => {
                if !mutable {
                    return Err(
                        self.compile_error(format!("cannot assign to immutable variable `{name}`"))
                    );
                }
                self.emit(OpCode::SetNonLocal, line);
                self.emit_byte(index);
                Ok(())
            }
            Binding::Global(_) => {
                Err(self.compile_error(format!("cannot assign to global `{name}`")))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn statement(&mut self) -> Result<()> {
        match self.scanner.token.kind {
            TokenKind::LetKw => self.declaration_statement(false),
            TokenKind::MutKw => self.declaration_statement(true),
            TokenKind::Name => self.name_statement(true),
            TokenKind::FnKw => self.fn_statement(),
            TokenKind::StructKw => self.struct_statement(),
            TokenKind::IfKw => self.if_statement(false),
            TokenKind::IfBangKw => self.if_statement(true),
            TokenKind::MatchKw => {
                let line = self.line();
                self.match_expression()?;
                self.emit(OpCode::Pop, line);
                self.consume(TokenKind::Semicolon, "expected `;` after match statement")?;
                Ok(())
            }
            TokenKind::WhileKw => self.while_statement(false),
            TokenKind::WhileBangKw => self.while_statement(true),
            TokenKind::DoKw => self.do_statement(),
            TokenKind::LoopKw => self.loop_statement(),
            TokenKind::ForKw => self.for_statement(),
            TokenKind::ForeachKw => self.foreach_statement(),
            TokenKind::BreakKw => self.break_statement(),
            TokenKind::ContinueKw => self.continue_statement(),
            TokenKind::ReturnKw => self.return_statement(),
            TokenKind::DelKw => self.del_statement(),
            TokenKind::ImportKw => self.import_statement(),
            TokenKind::FromKw => self.from_statement(),
            TokenKind::LBrace => self.block_statement(),
            TokenKind::Semicolon => self.advance(),
            _ => Err(self.syntax_error("unexpected token")),
        }
    }

    fn block_statement(&mut self) -> Result<()> {
        self.consume(TokenKind::LBrace, "expected `{`")?;
        self.begin_scope();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.statement()?;
        }
        let line = self.line();
        self.consume(TokenKind::RBrace, "expected `}` after block")?;
        self.end_scope(line);
        Ok(())
    }

    fn declaration_statement(&mut self, mutable: bool) -> Result<()> {
        self.advance()?;
        match self.scanner.token.kind {
            TokenKind::Name => {
                let name = self.scanner.token.lexeme.clone();
                self.advance()?;
                self.consume(TokenKind::Eq, "expected `=` after variable name")?;
                self.expression()?;
                self.declare_local(&name, mutable)?;
            }
            TokenKind::LBracket => self.array_pattern(mutable)?,
            TokenKind::LBrace => self.struct_pattern(mutable)?,
            _ => return Err(self.syntax_error("expected variable name or pattern")),
        }
        self.consume(TokenKind::Semicolon, "expected `;` after declaration")?;
        Ok(())
    }

    /// `let [a, _, b] = expr;` — unpack by position into fresh locals.
    fn array_pattern(&mut self, mutable: bool) -> Result<()> {
        self.advance()?;
        let mut names = Vec::new();
        loop {
            match self.scanner.token.kind {
                TokenKind::Name => names.push(Some(self.scanner.token.lexeme.clone())),
                TokenKind::UnderscoreKw => names.push(None),
                _ => return Err(self.syntax_error("expected name or `_` in array pattern")),
            }
            self.advance()?;
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RBracket, "expected `]` after array pattern")?;
        self.consume(TokenKind::Eq, "expected `=` after pattern")?;
        let line = self.line();
        self.expression()?;
        self.emit(OpCode::UnpackArray, line);
        self.emit_byte(names.len() as u8);
        for name in &names {
            match name {
                Some(name) => self.declare_local(name, mutable)?,
                None => self.declare_local("", false)?,
            };
        }
        Ok(())
    }

    /// `let { x, y } = expr;` — unpack named fields into fresh locals.
    fn struct_pattern(&mut self, mutable: bool) -> Result<()> {
        self.advance()?;
        let mut names = Vec::new();
        loop {
            let token = self.consume(TokenKind::Name, "expected field name in struct pattern")?;
            names.push(token.lexeme);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after struct pattern")?;
        self.consume(TokenKind::Eq, "expected `=` after pattern")?;
        let line = self.line();
        self.expression()?;
        for name in &names {
            let index = self.string_const(name)?;
            self.emit(OpCode::Constant, line);
            self.emit_byte(index);
        }
        self.emit(OpCode::UnpackStruct, line);
        self.emit_byte(names.len() as u8);
        for name in &names {
            self.declare_local(name, mutable)?;
        }
        Ok(())
    }

    fn fn_statement(&mut self) -> Result<()> {
        self.advance()?;
        let name = self.consume(TokenKind::Name, "expected function name")?;
        self.function_literal(Some(name.lexeme.clone()))?;
        self.declare_local(&name.lexeme, false)?;
        Ok(())
    }

    fn struct_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let name = self.consume(TokenKind::Name, "expected struct name")?;
        let index = self.string_const(&name.lexeme)?;
        self.emit(OpCode::Constant, line);
        self.emit_byte(index);
        self.consume(TokenKind::LBrace, "expected `{` after struct name")?;
        let mut count = 0usize;
        if !self.check(TokenKind::RBrace) {
            loop {
                let field = self.consume(TokenKind::Name, "expected field name")?;
                let index = self.string_const(&field.lexeme)?;
                self.emit(OpCode::Constant, line);
                self.emit_byte(index);
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after struct fields")?;
        if count > MAX_ARGS {
            return Err(self.compile_error("too many struct fields"));
        }
        self.emit(OpCode::Struct, line);
        self.emit_byte(count as u8);
        self.declare_local(&name.lexeme, false)?;
        Ok(())
    }

    fn if_statement(&mut self, inverted: bool) -> Result<()> {
        let line = self.line();
        self.advance()?;
        self.consume(TokenKind::LParen, "expected `(` after `if`")?;
        self.expression()?;
        self.consume(TokenKind::RParen, "expected `)` after condition")?;
        let jump_op = if inverted {
            OpCode::JumpIfTrue
        } else {
            OpCode::JumpIfFalse
        };
        let skip = self.emit_jump(jump_op, line);
        self.statement()?;
        if self.check(TokenKind::ElseKw) {
            let line = self.line();
            self.advance()?;
            let done = self.emit_jump(OpCode::Jump, line);
            self.patch_jump(skip)?;
            self.statement()?;
            self.patch_jump(done)?;
        } else {
            self.patch_jump(skip)?;
        }
        Ok(())
    }

    fn while_statement(&mut self, inverted: bool) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let start = self.code_offset();
        self.consume(TokenKind::LParen, "expected `(` after `while`")?;
        self.expression()?;
        self.consume(TokenKind::RParen, "expected `)` after condition")?;
        let jump_op = if inverted {
            OpCode::JumpIfTrue
        } else {
            OpCode::JumpIfFalse
        };
        let exit = self.emit_jump(jump_op, line);
        self.push_loop(Some(start));
        self.statement()?;
        let line = self.line();
        self.emit(OpCode::Jump, line);
        self.emit_word(start as u16);
        self.patch_jump(exit)?;
        self.pop_loop(None)?;
        Ok(())
    }

    fn do_statement(&mut self) -> Result<()> {
        self.advance()?;
        let start = self.code_offset();
        self.push_loop(None);
        self.statement()?;
        let continue_target = self.code_offset();
        let inverted = if self.match_token(TokenKind::WhileBangKw)? {
            true
        } else {
            self.consume(TokenKind::WhileKw, "expected `while` after do body")?;
            false
        };
        let line = self.line();
        self.consume(TokenKind::LParen, "expected `(` after `while`")?;
        self.expression()?;
        self.consume(TokenKind::RParen, "expected `)` after condition")?;
        self.consume(TokenKind::Semicolon, "expected `;` after do..while")?;
        let jump_op = if inverted {
            OpCode::JumpIfFalse
        } else {
            OpCode::JumpIfTrue
        };
        self.emit(jump_op, line);
        self.emit_word(start as u16);
        self.pop_loop(Some(continue_target))?;
        Ok(())
    }

    fn loop_statement(&mut self) -> Result<()> {
        self.advance()?;
        let start = self.code_offset();
        self.push_loop(Some(start));
        self.statement()?;
        let line = self.line();
        self.emit(OpCode::Jump, line);
        self.emit_word(start as u16);
        self.pop_loop(None)?;
        Ok(())
    }

    fn for_statement(&mut self) -> Result<()> {
        self.advance()?;
        self.consume(TokenKind::LParen, "expected `(` after `for`")?;
        self.begin_scope();
        match self.scanner.token.kind {
            TokenKind::Semicolon => self.advance()?,
            TokenKind::LetKw => self.declaration_statement(false)?,
            TokenKind::MutKw => self.declaration_statement(true)?,
            TokenKind::Name => self.name_statement(true)?,
            _ => return Err(self.syntax_error("expected initializer in `for`")),
        }
        let start = self.code_offset();
        let exit = if self.match_token(TokenKind::Semicolon)? {
            None
        } else {
            let line = self.line();
            self.expression()?;
            self.consume(TokenKind::Semicolon, "expected `;` after loop condition")?;
            Some(self.emit_jump(OpCode::JumpIfFalse, line))
        };
        // The increment is compiled before the body; jump over it into the
        // body, and have each iteration jump back to it.
        let body_jump = self.emit_jump(OpCode::Jump, self.line());
        let increment_start = self.code_offset();
        if !self.check(TokenKind::RParen) {
            self.name_statement(false)?;
        }
        let line = self.line();
        self.emit(OpCode::Jump, line);
        self.emit_word(start as u16);
        self.consume(TokenKind::RParen, "expected `)` after `for` clauses")?;
        self.patch_jump(body_jump)?;
        self.push_loop(Some(increment_start));
        self.statement()?;
        let line = self.line();
        self.emit(OpCode::Jump, line);
        self.emit_word(increment_start as u16);
        if let Some(exit) = exit {
            self.patch_jump(exit)?;
        }
        self.pop_loop(None)?;
        self.end_scope(line);
        Ok(())
    }

    fn foreach_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        self.consume(TokenKind::LParen, "expected `(` after `foreach`")?;
        let name = self.consume(TokenKind::Name, "expected loop variable")?;
        self.consume(TokenKind::InKw, "expected `in` after loop variable")?;
        self.begin_scope();
        // The loop variable and the iterator occupy two hidden slots; the
        // iterator stays on top of the stack for the iteration opcodes.
        self.emit(OpCode::Nil, line);
        let slot = self.declare_local(&name.lexeme, false)?;
        self.expression()?;
        self.consume(TokenKind::RParen, "expected `)` after iterable")?;
        self.emit(OpCode::Iterator, line);
        self.declare_local("", false)?;
        let start = self.code_offset();
        let exit = self.emit_jump(OpCode::JumpIfNotValid, line);
        self.emit(OpCode::Current, line);
        self.emit(OpCode::SetLocal, line);
        self.emit_byte(slot);
        self.push_loop(None);
        self.statement()?;
        let continue_target = self.code_offset();
        let line = self.line();
        self.emit(OpCode::Next, line);
        self.emit(OpCode::Jump, line);
        self.emit_word(start as u16);
        self.patch_jump(exit)?;
        self.pop_loop(Some(continue_target))?;
        self.end_scope(line);
        Ok(())
    }

    fn push_loop(&mut self, start: Option<usize>) {
        let scope_depth = self.scope().scope_depth;
        self.scope_mut().loops.push(LoopContext {
            scope_depth,
            start,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });
    }

    /// Close the innermost loop: patch breaks to the current offset and
    /// pending continues to `continue_target`.
    fn pop_loop(&mut self, continue_target: Option<usize>) -> Result<()> {
        let context = self.scope_mut().loops.pop().expect("loop context");
        for operand_at in context.break_jumps {
            self.patch_jump(operand_at)?;
        }
        if let Some(target) = continue_target {
            for operand_at in context.continue_jumps {
                self.scope_mut()
                    .function
                    .chunk
                    .patch_word(operand_at, target as u16);
            }
        }
        Ok(())
    }

    /// Pop the locals a `break`/`continue` would leave behind without
    /// discarding their compile-time entries.
    fn emit_loop_unwind(&mut self, line: u32) -> Result<()> {
        let Some(context) = self.scope().loops.last() else {
            return Err(self.compile_error("`break`/`continue` outside of a loop"));
        };
        let depth = context.scope_depth;
        let count = self
            .scope()
            .locals
            .iter()
            .filter(|local| local.depth > depth)
            .count();
        for _ in 0..count {
            self.emit(OpCode::Pop, line);
        }
        Ok(())
    }

    fn break_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        self.consume(TokenKind::Semicolon, "expected `;` after `break`")?;
        self.emit_loop_unwind(line)?;
        let operand_at = self.emit_jump(OpCode::Jump, line);
        self.scope_mut()
            .loops
            .last_mut()
            .expect("loop context")
            .break_jumps
            .push(operand_at);
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        self.consume(TokenKind::Semicolon, "expected `;` after `continue`")?;
        self.emit_loop_unwind(line)?;
        let start = self.scope().loops.last().expect("loop context").start;
        match start {
            Some(target) => {
                self.emit(OpCode::Jump, line);
                self.emit_word(target as u16);
            }
            None => {
                let operand_at = self.emit_jump(OpCode::Jump, line);
                self.scope_mut()
                    .loops
                    .last_mut()
                    .expect("loop context")
                    .continue_jumps
                    .push(operand_at);
            }
        }
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        if self.match_token(TokenKind::Semicolon)? {
            self.emit(OpCode::ReturnNil, line);
            return Ok(());
        }
        self.expression()?;
        self.consume(TokenKind::Semicolon, "expected `;` after return value")?;
        self.emit(OpCode::Return, line);
        Ok(())
    }

    fn del_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let root = self.consume(TokenKind::Name, "expected variable after `del`")?;
        let binding = self.resolve(&root.lexeme)?;
        self.emit_load(binding, line);
        let mut pending: Vec<Pending> = Vec::new();
        loop {
            match self.scanner.token.kind {
                TokenKind::LBracket => {
                    self.advance()?;
                    self.expression()?;
                    let line = self.line();
                    self.consume(TokenKind::RBracket, "expected `]` after index")?;
                    if self.check(TokenKind::Semicolon) {
                        let op = if pending.is_empty() {
                            OpCode::InplaceDeleteElement
                        } else {
                            OpCode::DeleteElement
                        };
                        self.emit(op, line);
                        self.unwind_pending(&pending, line);
                        self.emit_store(binding, &root.lexeme, line)?;
                        self.advance()?;
                        return Ok(());
                    }
                    self.emit(OpCode::FetchElement, line);
                    pending.push(Pending::Element);
                }
                TokenKind::Dot => {
                    self.advance()?;
                    let field = self.consume(TokenKind::Name, "expected field name")?;
                    let line = self.line();
                    if self.check(TokenKind::Semicolon) {
                        return Err(self.syntax_error("cannot delete a field"));
                    }
                    let index = self.string_const(&field.lexeme)?;
                    self.emit(OpCode::FetchField, line);
                    self.emit_byte(index);
                    pending.push(Pending::Field);
                }
                _ => return Err(self.syntax_error("expected `[` after `del` target")),
            }
        }
    }

    fn import_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let name = self.module_name()?;
        let alias = if self.match_token(TokenKind::AsKw)? {
            self.consume(TokenKind::Name, "expected alias after `as`")?.lexeme
        } else {
            name.clone()
        };
        self.consume(TokenKind::Semicolon, "expected `;` after import")?;
        let index = self.string_const(&name)?;
        self.emit(OpCode::Constant, line);
        self.emit_byte(index);
        self.emit(OpCode::LoadModule, line);
        self.declare_local(&alias, false)?;
        Ok(())
    }

    fn from_statement(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let name = self.module_name()?;
        self.consume(TokenKind::ImportKw, "expected `import` after module name")?;
        self.consume(TokenKind::LBrace, "expected `{` after `import`")?;
        let mut imported = Vec::new();
        loop {
            let field = self.consume(TokenKind::Name, "expected imported name")?;
            imported.push(field.lexeme);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after imported names")?;
        self.consume(TokenKind::Semicolon, "expected `;` after import")?;
        let index = self.string_const(&name)?;
        self.emit(OpCode::Constant, line);
        self.emit_byte(index);
        self.emit(OpCode::LoadModule, line);
        for field in &imported {
            let index = self.string_const(field)?;
            self.emit(OpCode::Constant, line);
            self.emit_byte(index);
        }
        self.emit(OpCode::UnpackStruct, line);
        self.emit_byte(imported.len() as u8);
        for field in &imported {
            self.declare_local(field, false)?;
        }
        Ok(())
    }

    fn module_name(&mut self) -> Result<String> {
        match self.scanner.token.kind {
            TokenKind::Name | TokenKind::String => {
                let name = self.scanner.token.lexeme.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.syntax_error("expected module name")),
        }
    }

    // -----------------------------------------------------------------------
    // Assignment / call statements
    // -----------------------------------------------------------------------

    /// A statement that starts with an identifier: a (possibly chained)
    /// assignment or a call. With `terminated` false this is the bare
    /// increment clause of a `for` header, which has no trailing `;`.
    fn name_statement(&mut self, terminated: bool) -> Result<()> {
        let root = self.scanner.token.clone();
        let line = root.line;
        self.advance()?;
        let binding = self.resolve(&root.lexeme)?;
        match self.scanner.token.kind {
            TokenKind::Eq => {
                self.advance()?;
                self.expression()?;
                self.emit_store(binding, &root.lexeme, line)?;
            }
            TokenKind::PlusPlus => {
                self.advance()?;
                self.emit_load(binding, line);
                self.emit(OpCode::Increment, line);
                self.emit_store(binding, &root.lexeme, line)?;
            }
            TokenKind::DashDash => {
                self.advance()?;
                self.emit_load(binding, line);
                self.emit(OpCode::Decrement, line);
                self.emit_store(binding, &root.lexeme, line)?;
            }
            kind => {
                if let Some(op) = compound_op(kind) {
                    self.advance()?;
                    self.emit_load(binding, line);
                    self.expression()?;
                    self.emit(op, line);
                    self.emit_store(binding, &root.lexeme, line)?;
                } else {
                    self.chain_statement(binding, &root)?;
                }
            }
        }
        if terminated {
            self.consume(TokenKind::Semicolon, "expected `;` after statement")?;
        }
        Ok(())
    }

    /// Compile an element/field/call chain rooted at an already resolved
    /// variable. Intermediate links fetch (leaving write-back pairs on the
    /// stack); the final link either assigns — unwinding the pairs and
    /// storing the root — or is a call whose result is discarded.
    fn chain_statement(&mut self, binding: Binding, root: &Token) -> Result<()> {
        self.emit_load(binding, root.line);
        let mut pending: Vec<Pending> = Vec::new();
        let mut has_call = false;
        loop {
            match self.scanner.token.kind {
                TokenKind::LParen => {
                    let line = self.line();
                    self.advance()?;
                    let count = self.call_arguments()?;
                    self.emit(OpCode::Call, line);
                    self.emit_byte(count);
                    has_call = true;
                }
                TokenKind::LBracket => {
                    let line = self.line();
                    self.advance()?;
                    if self.match_token(TokenKind::RBracket)? {
                        // Append form: `a[] = expr`.
                        self.consume(TokenKind::Eq, "expected `=` after `[]`")?;
                        self.check_assignable(has_call)?;
                        self.expression()?;
                        let op = if pending.is_empty() {
                            OpCode::InplaceAddElement
                        } else {
                            OpCode::AddElement
                        };
                        self.emit(op, line);
                        self.unwind_pending(&pending, line);
                        self.emit_store(binding, &root.lexeme, line)?;
                        return Ok(());
                    }
                    self.expression()?;
                    self.consume(TokenKind::RBracket, "expected `]` after index")?;
                    match self.scanner.token.kind {
                        TokenKind::Eq => {
                            self.advance()?;
                            self.check_assignable(has_call)?;
                            self.expression()?;
                            let op = if pending.is_empty() {
                                OpCode::InplacePutElement
                            } else {
                                OpCode::PutElement
                            };
                            self.emit(op, line);
                            self.unwind_pending(&pending, line);
                            self.emit_store(binding, &root.lexeme, line)?;
                            return Ok(());
                        }
                        TokenKind::PlusPlus | TokenKind::DashDash => {
                            let incr = if self.check(TokenKind::PlusPlus) {
                                OpCode::Increment
                            } else {
                                OpCode::Decrement
                            };
                            self.advance()?;
                            self.check_assignable(has_call)?;
                            self.emit(OpCode::FetchElement, line);
                            self.emit(incr, line);
                            self.emit(OpCode::SetElement, line);
                            self.unwind_pending(&pending, line);
                            self.emit_store(binding, &root.lexeme, line)?;
                            return Ok(());
                        }
                        kind => {
                            if let Some(op) = compound_op(kind) {
                                self.advance()?;
                                self.check_assignable(has_call)?;
                                self.emit(OpCode::FetchElement, line);
                                self.expression()?;
                                self.emit(op, line);
                                self.emit(OpCode::SetElement, line);
                                self.unwind_pending(&pending, line);
                                self.emit_store(binding, &root.lexeme, line)?;
                                return Ok(());
                            }
                            self.emit(OpCode::FetchElement, line);
                            pending.push(Pending::Element);
                        }
                    }
                }
                TokenKind::Dot => {
                    let line = self.line();
                    self.advance()?;
                    let field = self.consume(TokenKind::Name, "expected field name")?;
                    let index = self.string_const(&field.lexeme)?;
                    match self.scanner.token.kind {
                        TokenKind::Eq => {
                            self.advance()?;
                            self.check_assignable(has_call)?;
                            self.expression()?;
                            let op = if pending.is_empty() {
                                OpCode::InplacePutField
                            } else {
                                OpCode::PutField
                            };
                            self.emit(op, line);
                            self.emit_byte(index);
                            self.unwind_pending(&pending, line);
                            self.emit_store(binding, &root.lexeme, line)?;
                            return Ok(());
                        }
                        TokenKind::PlusPlus | TokenKind::DashDash => {
                            let incr = if self.check(TokenKind::PlusPlus) {
                                OpCode::Increment
                            } else {
                                OpCode::Decrement
                            };
                            self.advance()?;
                            self.check_assignable(has_call)?;
                            self.emit(OpCode::FetchField, line);
                            self.emit_byte(index);
                            self.emit(incr, line);
                            self.emit(OpCode::SetField, line);
                            self.unwind_pending(&pending, line);
                            self.emit_store(binding, &root.lexeme, line)?;
                            return Ok(());
                        }
                        kind => {
                            if let Some(op) = compound_op(kind) {
                                self.advance()?;
                                self.check_assignable(has_call)?;
                                self.emit(OpCode::FetchField, line);
                                self.emit_byte(index);
                                self.expression()?;
                                self.emit(op, line);
                                self.emit(OpCode::SetField, line);
                                self.unwind_pending(&pending, line);
                                self.emit_store(binding, &root.lexeme, line)?;
                                return Ok(());
                            }
                            self.emit(OpCode::FetchField, line);
                            self.emit_byte(index);
                            pending.push(Pending::Field);
                        }
                    }
                }
                _ => break,
            }
        }
        if !has_call {
            return Err(self.syntax_error("expected assignment or call"));
        }
        // Discard the call result and any fetched write-back pairs.
        let line = self.line();
        self.emit(OpCode::Pop, line);
        for _ in 0..pending.len() * 2 {
            self.emit(OpCode::Pop, line);
        }
        Ok(())
    }

    fn check_assignable(&self, has_call: bool) -> Result<()> {
        if has_call {
            return Err(self.syntax_error("invalid assignment target"));
        }
        Ok(())
    }

    /// Emit the write-back steps for fetched pairs, innermost first.
    fn unwind_pending(&mut self, pending: &[Pending], line: u32) {
        for kind in pending.iter().rev() {
            match kind {
                Pending::Element => self.emit(OpCode::SetElement, line),
                Pending::Field => self.emit(OpCode::SetField, line),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expressions (precedence climbing)
    // -----------------------------------------------------------------------

    fn expression(&mut self) -> Result<()> {
        self.or_expression()
    }

    fn or_expression(&mut self) -> Result<()> {
        self.and_expression()?;
        while self.check(TokenKind::PipePipe) {
            let line = self.line();
            self.advance()?;
            let short = self.emit_jump(OpCode::JumpIfTrueOrPop, line);
            self.and_expression()?;
            self.patch_jump(short)?;
        }
        Ok(())
    }

    fn and_expression(&mut self) -> Result<()> {
        self.binary_expression(0)?;
        while self.check(TokenKind::AmpAmp) {
            let line = self.line();
            self.advance()?;
            let short = self.emit_jump(OpCode::JumpIfFalseOrPop, line);
            self.binary_expression(0)?;
            self.patch_jump(short)?;
        }
        Ok(())
    }

    /// Left-associative binary operators from `|` down to `* / ~/ %`,
    /// handled by precedence climbing over [`BINARY_LEVELS`].
    fn binary_expression(&mut self, level: usize) -> Result<()> {
        if level >= BINARY_LEVELS.len() {
            return self.unary_expression();
        }
        self.binary_expression(level + 1)?;
        loop {
            let Some(op) = BINARY_LEVELS[level]
                .iter()
                .find(|(kind, _)| self.check(*kind))
                .map(|(_, op)| *op)
            else {
                return Ok(());
            };
            let line = self.line();
            self.advance()?;
            self.binary_expression(level + 1)?;
            self.emit(op, line);
        }
    }

    fn unary_expression(&mut self) -> Result<()> {
        let line = self.line();
        match self.scanner.token.kind {
            TokenKind::Dash => {
                self.advance()?;
                self.unary_expression()?;
                self.emit(OpCode::Negate, line);
                Ok(())
            }
            TokenKind::Bang => {
                self.advance()?;
                self.unary_expression()?;
                self.emit(OpCode::Not, line);
                Ok(())
            }
            TokenKind::Tilde => {
                self.advance()?;
                self.unary_expression()?;
                self.emit(OpCode::BitwiseNot, line);
                Ok(())
            }
            TokenKind::PlusPlus => {
                self.advance()?;
                self.prefix_increment(OpCode::Increment, line)
            }
            TokenKind::DashDash => {
                self.advance()?;
                self.prefix_increment(OpCode::Decrement, line)
            }
            _ => self.postfix_expression(),
        }
    }

    /// `++x` / `--x` on a plain mutable variable; yields the new value.
    fn prefix_increment(&mut self, op: OpCode, line: u32) -> Result<()> {
        let name = self.consume(TokenKind::Name, "expected variable after `++`/`--`")?;
        let binding = self.resolve(&name.lexeme)?;
        self.emit_load(binding, line);
        self.emit(op, line);
        self.emit_store(binding, &name.lexeme, line)?;
        self.emit_load(binding, line);
        Ok(())
    }

    fn postfix_expression(&mut self) -> Result<()> {
        self.primary_expression()?;
        loop {
            match self.scanner.token.kind {
                TokenKind::LParen => {
                    let line = self.line();
                    self.advance()?;
                    let count = self.call_arguments()?;
                    self.emit(OpCode::Call, line);
                    self.emit_byte(count);
                }
                TokenKind::LBracket => {
                    let line = self.line();
                    self.advance()?;
                    self.expression()?;
                    self.consume(TokenKind::RBracket, "expected `]` after index")?;
                    self.emit(OpCode::GetElement, line);
                }
                TokenKind::Dot => {
                    let line = self.line();
                    self.advance()?;
                    let field = self.consume(TokenKind::Name, "expected field name")?;
                    let index = self.string_const(&field.lexeme)?;
                    self.emit(OpCode::GetField, line);
                    self.emit_byte(index);
                }
                TokenKind::LBrace => {
                    let line = self.line();
                    self.advance()?;
                    let mut count = 0usize;
                    if !self.check(TokenKind::RBrace) {
                        loop {
                            self.expression()?;
                            count += 1;
                            if !self.match_token(TokenKind::Comma)? {
                                break;
                            }
                        }
                    }
                    self.consume(TokenKind::RBrace, "expected `}` after instance values")?;
                    if count > MAX_ARGS {
                        return Err(self.compile_error("too many instance values"));
                    }
                    self.emit(OpCode::Instance, line);
                    self.emit_byte(count as u8);
                }
                TokenKind::DotDot => {
                    let line = self.line();
                    self.advance()?;
                    self.primary_expression()?;
                    self.emit(OpCode::Range, line);
                }
                _ => return Ok(()),
            }
        }
    }

    fn call_arguments(&mut self) -> Result<u8> {
        let mut count = 0usize;
        if !self.check(TokenKind::RParen) {
            loop {
                self.expression()?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after arguments")?;
        if count > MAX_ARGS {
            return Err(self.compile_error("too many arguments"));
        }
        Ok(count as u8)
    }

    fn primary_expression(&mut self) -> Result<()> {
        let line = self.line();
        match self.scanner.token.kind {
            TokenKind::NilKw => {
                self.advance()?;
                self.emit(OpCode::Nil, line);
                Ok(())
            }
            TokenKind::FalseKw => {
                self.advance()?;
                self.emit(OpCode::False, line);
                Ok(())
            }
            TokenKind::TrueKw => {
                self.advance()?;
                self.emit(OpCode::True, line);
                Ok(())
            }
            TokenKind::Int | TokenKind::Float => {
                let number: f64 = self
                    .scanner
                    .token
                    .lexeme
                    .parse()
                    .map_err(|_| self.syntax_error("invalid number literal"))?;
                self.advance()?;
                self.emit_number(number, line)
            }
            TokenKind::String => {
                let text = self.scanner.token.lexeme.clone();
                self.advance()?;
                let index = self.string_const(&text)?;
                self.emit(OpCode::Constant, line);
                self.emit_byte(index);
                Ok(())
            }
            TokenKind::LBracket => self.array_literal(),
            TokenKind::LBrace => self.construct_literal(),
            TokenKind::FnKw => {
                self.advance()?;
                self.function_literal(None)
            }
            TokenKind::MatchKw => self.match_expression(),
            TokenKind::LParen => {
                self.advance()?;
                self.expression()?;
                self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(())
            }
            TokenKind::Name => {
                let name = self.scanner.token.lexeme.clone();
                self.advance()?;
                let binding = self.resolve(&name)?;
                self.emit_load(binding, line);
                Ok(())
            }
            _ => Err(self.syntax_error("expected expression")),
        }
    }

    fn array_literal(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let mut count = 0usize;
        if !self.check(TokenKind::RBracket) {
            loop {
                self.expression()?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBracket, "expected `]` after array elements")?;
        if count > MAX_ARGS {
            return Err(self.compile_error("too many array elements"));
        }
        self.emit(OpCode::Array, line);
        self.emit_byte(count as u8);
        Ok(())
    }

    /// `{ a: 1, b: 2 }` — an instance of a fresh anonymous struct.
    fn construct_literal(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        let mut count = 0usize;
        if !self.check(TokenKind::RBrace) {
            loop {
                let field = self.consume(TokenKind::Name, "expected field name")?;
                self.consume(TokenKind::Colon, "expected `:` after field name")?;
                let index = self.string_const(&field.lexeme)?;
                self.emit(OpCode::Constant, line);
                self.emit_byte(index);
                self.expression()?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after fields")?;
        if count > MAX_ARGS {
            return Err(self.compile_error("too many fields"));
        }
        self.emit(OpCode::Construct, line);
        self.emit_byte(count as u8);
        Ok(())
    }

    fn match_expression(&mut self) -> Result<()> {
        let line = self.line();
        self.advance()?;
        self.consume(TokenKind::LParen, "expected `(` after `match`")?;
        self.expression()?;
        self.consume(TokenKind::RParen, "expected `)` after match subject")?;
        self.consume(TokenKind::LBrace, "expected `{` after match subject")?;
        let mut end_jumps = Vec::new();
        let mut has_default = false;
        while !self.check(TokenKind::RBrace) {
            if self.match_token(TokenKind::UnderscoreKw)? {
                self.consume(TokenKind::Arrow, "expected `=>` after `_`")?;
                let line = self.line();
                self.emit(OpCode::Pop, line);
                self.expression()?;
                self.match_token(TokenKind::Comma)?;
                has_default = true;
                break;
            }
            self.expression()?;
            let line = self.line();
            self.consume(TokenKind::Arrow, "expected `=>` after case value")?;
            let next = self.emit_jump(OpCode::JumpIfNotEqual, line);
            self.expression()?;
            end_jumps.push(self.emit_jump(OpCode::Jump, line));
            self.patch_jump(next)?;
            self.match_token(TokenKind::Comma)?;
        }
        self.consume(TokenKind::RBrace, "expected `}` after match arms")?;
        if !has_default {
            self.emit(OpCode::Pop, line);
            self.emit(OpCode::Nil, line);
        }
        for jump in end_jumps {
            self.patch_jump(jump)?;
        }
        Ok(())
    }

    /// Compile a function body into a nested prototype and emit the
    /// `Closure` opcode followed by one capture descriptor per non-local.
    /// The `fn` keyword has already been consumed.
    fn function_literal(&mut self, name: Option<String>) -> Result<()> {
        let line = self.line();
        self.consume(TokenKind::LParen, "expected `(` after `fn`")?;
        let mut params: Vec<(String, bool)> = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let mutable = self.match_token(TokenKind::MutKw)?;
                let param = self.consume(TokenKind::Name, "expected parameter name")?;
                params.push((param.lexeme, mutable));
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        if params.len() > MAX_ARGS {
            return Err(self.compile_error("too many parameters"));
        }

        let file = Rc::clone(self.scope().function.file());
        let fn_name = name
            .as_deref()
            .map(|n| Rc::new(Str::from_chars(n)));
        let function = Function::new(params.len(), fn_name, file);
        let mut scope = FunctionScope {
            function,
            locals: Vec::new(),
            scope_depth: 0,
            nonlocals: Vec::new(),
            loops: Vec::new(),
        };
        // Slot 0 names the callee itself, which is what makes plain
        // recursion resolve without a capture.
        scope.locals.push(Local {
            name: name.unwrap_or_default(),
            depth: 0,
            mutable: false,
        });
        for (param, mutable) in &params {
            scope.locals.push(Local {
                name: param.clone(),
                depth: 0,
                mutable: *mutable,
            });
        }
        self.scopes.push(scope);

        if self.match_token(TokenKind::Arrow)? {
            let line = self.line();
            self.expression()?;
            self.emit(OpCode::Return, line);
        } else {
            self.consume(TokenKind::LBrace, "expected `{` or `=>` before function body")?;
            while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
                self.statement()?;
            }
            let line = self.line();
            self.consume(TokenKind::RBrace, "expected `}` after function body")?;
            self.emit(OpCode::ReturnNil, line);
        }

        let mut scope = self.scopes.pop().expect("function scope");
        scope.function.num_nonlocals = scope.nonlocals.len();
        let nonlocals = scope.nonlocals;
        let function = Rc::new(scope.function);
        let index = self.scope_mut().function.add_child(function);
        if index > u8::MAX as usize {
            return Err(self.compile_error("too many nested functions"));
        }
        self.emit(OpCode::Closure, line);
        self.emit_byte(index as u8);
        for nonlocal in &nonlocals {
            let op = if nonlocal.is_local {
                OpCode::GetLocal
            } else {
                OpCode::NonLocal
            };
            self.emit(op, line);
            self.emit_byte(nonlocal.index);
        }
        Ok(())
    }
}

/// Binary operator levels from loosest (`|`) to tightest (`* / ~/ %`);
/// `||`/`&&` live above as short-circuit forms, unary and postfix below.
const BINARY_LEVELS: &[&[(TokenKind, OpCode)]] = &[
    &[(TokenKind::Pipe, OpCode::BitwiseOr)],
    &[(TokenKind::Caret, OpCode::BitwiseXor)],
    &[(TokenKind::Amp, OpCode::BitwiseAnd)],
    &[
        (TokenKind::EqEq, OpCode::Equal),
        (TokenKind::BangEq, OpCode::NotEqual),
    ],
    &[
        (TokenKind::Lt, OpCode::Less),
        (TokenKind::LtEq, OpCode::NotGreater),
        (TokenKind::Gt, OpCode::Greater),
        (TokenKind::GtEq, OpCode::NotLess),
    ],
    &[
        (TokenKind::LtLt, OpCode::LeftShift),
        (TokenKind::GtGt, OpCode::RightShift),
    ],
    &[
        (TokenKind::Plus, OpCode::Add),
        (TokenKind::Dash, OpCode::Subtract),
    ],
    &[
        (TokenKind::Star, OpCode::Multiply),
        (TokenKind::Slash, OpCode::Divide),
        (TokenKind::TildeSlash, OpCode::Quotient),
        (TokenKind::Percent, OpCode::Remainder),
    ],
];

fn compound_op(kind: TokenKind) -> Option<OpCode> {
    match kind {
        TokenKind::PlusEq => Some(OpCode::Add),
        TokenKind::DashEq => Some(OpCode::Subtract),
        TokenKind::StarEq => Some(OpCode::Multiply),
        TokenKind::SlashEq => Some(OpCode::Divide),
        TokenKind::TildeSlashEq => Some(OpCode::Quotient),
        TokenKind::PercentEq => Some(OpCode::Remainder),
        TokenKind::PipeEq => Some(OpCode::BitwiseOr),
        TokenKind::CaretEq => Some(OpCode::BitwiseXor),
        TokenKind::AmpEq => Some(OpCode::BitwiseAnd),
        TokenKind::LtLtEq => Some(OpCode::LeftShift),
        TokenKind::GtGtEq => Some(OpCode::RightShift),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OpCode;

    fn compile_ok(source: &str) -> Rc<Closure> {
        compile("test.hk", source, &["print".to_string()]).unwrap()
    }

    fn compile_err(source: &str) -> Error {
        compile("test.hk", source, &["print".to_string()]).unwrap_err()
    }

    #[test]
    fn root_function_shape() {
        let closure = compile_ok("return 1;");
        let function = &closure.function;
        assert_eq!(function.arity(), 1);
        assert_eq!(function.name().unwrap().to_string(), "main");
        assert_eq!(function.num_nonlocals(), 0);
    }

    #[test]
    fn empty_function_body_is_a_single_return_nil() {
        let closure = compile_ok("fn f() {}");
        let child = &closure.function.functions()[0];
        assert_eq!(child.chunk().code(), &[u8::from(OpCode::ReturnNil)]);
    }

    #[test]
    fn small_integers_are_inline() {
        let closure = compile_ok("return 7;");
        let code = closure.function.chunk().code();
        assert_eq!(code[0], u8::from(OpCode::Int));
        assert_eq!(u16::from_le_bytes([code[1], code[2]]), 7);
    }

    #[test]
    fn constants_deduplicate() {
        let closure = compile_ok("let a = \"x\"; let b = \"x\"; let c = 1.5; let d = 1.5;");
        assert_eq!(closure.function.chunk().consts().len(), 2);
    }

    #[test]
    fn duplicate_local_is_a_compile_error() {
        let err = compile_err("let x = 1; let x = 2;");
        assert!(err.to_string().contains("already declared"));
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        compile_ok("let x = 1; { let x = 2; print(x); }");
    }

    #[test]
    fn assignment_to_immutable_is_a_compile_error() {
        let err = compile_err("let x = 1; x = 2;");
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn assignment_to_mutable_compiles() {
        compile_ok("mut x = 1; x = 2; x += 3; x++;");
    }

    #[test]
    fn undefined_variable_is_a_compile_error() {
        let err = compile_err("return missing;");
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn assignment_to_global_is_a_compile_error() {
        let err = compile_err("print = 1;");
        assert!(err.to_string().contains("global"));
    }

    #[test]
    fn break_outside_loop_is_a_compile_error() {
        let err = compile_err("break;");
        assert!(err.to_string().contains("outside of a loop"));
    }

    #[test]
    fn closure_captures_are_recorded() {
        let closure = compile_ok(
            "fn outer() { mut i = 0; return fn() { i = i + 1; return i; }; }",
        );
        let outer = &closure.function.functions()[0];
        let inner = &outer.functions()[0];
        assert_eq!(inner.num_nonlocals(), 1);
        assert_eq!(outer.num_nonlocals(), 0);
    }

    #[test]
    fn capture_through_two_levels() {
        let closure = compile_ok(
            "fn a() { let x = 1; return fn() { return fn() { return x; }; }; }",
        );
        let a = &closure.function.functions()[0];
        let b = &a.functions()[0];
        let c = &b.functions()[0];
        assert_eq!(b.num_nonlocals(), 1);
        assert_eq!(c.num_nonlocals(), 1);
    }

    #[test]
    fn assigning_immutable_capture_is_a_compile_error() {
        let err = compile_err("fn f() { let x = 1; return fn() { x = 2; }; }");
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn statements_require_call_or_assignment() {
        let err = compile_err("let a = [1]; a[0];");
        assert!(err.to_string().contains("assignment or call"));
    }

    #[test]
    fn jump_offsets_stay_inside_the_chunk() {
        let closure = compile_ok(
            "mut i = 0; while (i < 10) { if (i % 2 == 0) { i += 1; continue; } i += 3; } return i;",
        );
        assert!(closure.function.chunk().validate(0));
    }

    #[test]
    fn loops_and_match_validate() {
        let closure = compile_ok(
            "mut total = 0;\n\
             for (mut i = 0; i < 5; i++) { total += i; }\n\
             foreach (x in [1, 2, 3]) { total += x; }\n\
             do { total += 1; } while (false);\n\
             let label = match (total) { 0 => \"zero\", _ => \"some\" };\n\
             return label;",
        );
        assert!(closure.function.chunk().validate(closure.function.functions().len()));
    }

    #[test]
    fn del_requires_an_index_chain() {
        compile_ok("mut a = [1, 2]; del a[0];");
        let err = compile_err("mut a = {x: 1}; del a.x;");
        assert!(err.to_string().contains("cannot delete a field"));
    }

    #[test]
    fn import_forms_compile() {
        compile_ok("import arrays; import \"math\" as m; from strings import { lower, upper };");
    }
}
