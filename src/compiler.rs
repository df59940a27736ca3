// File: src/compiler.rs
//
// Single-pass compiler for Lox: a Pratt parser that emits bytecode as it
// goes. There is no AST — each grammar rule writes instructions into the
// chunk of the function currently being compiled. Nested function
// declarations push a fresh context onto a stack, which is also what upvalue
// resolution walks.

use once_cell::sync::Lazy;

use crate::bytecode::OpCode;
use crate::debug;
use crate::errors::{CompileError, ErrorLocation};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::memory::Heap;
use crate::object::{Function, Obj, ObjRef};
use crate::value::Value;

static PRINT_CODE: Lazy<bool> = Lazy::new(|| std::env::var("LOX_PRINT_CODE").is_ok());

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

/// Compiles a source string into the top-level script function. On failure
/// returns every error collected while panicking and resynchronizing.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

/// Binding strength, weakest first. Each infix rule parses its right operand
/// at one level higher, which is what makes the operators left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star => Precedence::Factor,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Lesser
        | TokenKind::LesserEqual => Precedence::Comparison,
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    /// -1 while the initializer is still being compiled; reading the
    /// variable then is an error.
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CompilerUpvalue {
    index: u8,
    is_local: bool,
}

struct LoopContext {
    /// Where `continue` jumps back to (the increment clause for `for`).
    start: usize,
    /// Scope depth at loop entry; break/continue discard locals deeper than
    /// this before jumping.
    scope_depth: i32,
    breaks: Vec<usize>,
}

/// Per-function compilation state. The stack of these mirrors lexical
/// function nesting; index 0 is the script.
struct FnContext<'src> {
    kind: FunctionKind,
    name: Option<ObjRef>,
    arity: usize,
    chunk: crate::bytecode::Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: i32,
    loops: Vec<LoopContext>,
}

impl<'src> FnContext<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> FnContext<'src> {
        // Slot zero belongs to the callee. Methods and initializers name it
        // `this` so member access in the body resolves like any local.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        FnContext {
            kind,
            name,
            arity: 0,
            chunk: crate::bytecode::Chunk::new(),
            locals: vec![Local { name: slot_zero, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

struct ClassContext {
    has_superclass: bool,
}

struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
}

pub struct Compiler<'src, 'heap> {
    parser: Parser<'src>,
    heap: &'heap mut Heap,
    contexts: Vec<FnContext<'src>>,
    classes: Vec<ClassContext>,
}

fn synthetic_token(text: &'static str) -> Token<'static> {
    Token { kind: TokenKind::Identifier, lexeme: text, line: 0 }
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    fn new(source: &'src str, heap: &'heap mut Heap) -> Compiler<'src, 'heap> {
        Compiler {
            parser: Parser {
                scanner: Scanner::new(source),
                current: Token::sentinel(),
                previous: Token::sentinel(),
                had_error: false,
                panic_mode: false,
                errors: Vec::new(),
            },
            heap,
            contexts: vec![FnContext::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    fn finish(mut self) -> Result<ObjRef, Vec<CompileError>> {
        let (script, _) = self.end_context();
        if self.parser.had_error {
            Err(self.parser.errors)
        } else {
            Ok(script)
        }
    }

    // ---- Token plumbing ----

    fn advance(&mut self) {
        self.parser.previous = self.parser.current;
        loop {
            self.parser.current = self.parser.scanner.scan_token();
            if self.parser.current.kind != TokenKind::Error {
                break;
            }
            let message = self.parser.current.lexeme.to_string();
            self.error_at(self.parser.current, &message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.parser.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.parser.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ---- Error reporting ----

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // Panic mode swallows the cascade that usually follows a syntax
        // error; synchronize() clears it at the next statement boundary.
        if self.parser.panic_mode {
            return;
        }
        self.parser.panic_mode = true;
        self.parser.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::Eof,
            TokenKind::Error => ErrorLocation::None,
            _ => ErrorLocation::Lexeme(token.lexeme.to_string()),
        };
        self.parser.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.parser.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.parser.current, message);
    }

    fn synchronize(&mut self) {
        self.parser.panic_mode = false;

        while self.parser.current.kind != TokenKind::Eof {
            if self.parser.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.parser.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- Emission ----

    fn ctx(&mut self) -> &mut FnContext<'src> {
        self.contexts.last_mut().expect("no active function context")
    }

    fn ctx_ref(&self) -> &FnContext<'src> {
        self.contexts.last().expect("no active function context")
    }

    fn code_len(&self) -> usize {
        self.ctx_ref().chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.ctx().chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        // An initializer's implicit return hands back the instance in slot 0.
        if self.ctx_ref().kind == FunctionKind::Initializer {
            self.emit_ops(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.ctx().chunk.add_constant(value);
        if index > u8::MAX as usize {
            self.error("too many constants in one chunk");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_ops(OpCode::Constant, constant);
    }

    /// Emits a jump with a placeholder offset and returns where to patch.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.code_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.code_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("too much code to jump over");
        }
        let chunk = &mut self.ctx().chunk;
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        // +2 covers the operand of the Loop instruction itself.
        let offset = self.code_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("loop body too large");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn end_context(&mut self) -> (ObjRef, Vec<CompilerUpvalue>) {
        self.emit_return();
        let ctx = self.contexts.pop().expect("no active function context");
        let function = Function {
            arity: ctx.arity.min(255) as u8,
            upvalue_count: ctx.upvalues.len(),
            chunk: ctx.chunk,
            name: ctx.name,
        };

        if *PRINT_CODE && !self.parser.had_error {
            let display = match function.name {
                Some(name) => self.heap.string(name).chars.clone(),
                None => "<script>".to_string(),
            };
            debug::disassemble_chunk(self.heap, &function.chunk, &display);
        }

        let function = self.heap.alloc(Obj::Function(function));
        (function, ctx.upvalues)
    }

    // ---- Scopes and variables ----

    fn begin_scope(&mut self) {
        self.ctx().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.ctx().scope_depth -= 1;

        loop {
            let discard = {
                let ctx = self.ctx_ref();
                match ctx.locals.last() {
                    Some(local) if local.depth > ctx.scope_depth => Some(local.is_captured),
                    _ => None,
                }
            };
            match discard {
                Some(true) => self.emit_op(OpCode::CloseUpvalue),
                Some(false) => self.emit_op(OpCode::Pop),
                None => break,
            }
            self.ctx().locals.pop();
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.ctx_ref().locals.len() == MAX_LOCALS {
            self.error("too many local variables in function");
            return;
        }
        self.ctx().locals.push(Local { name: name.lexeme, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        // Globals are late-bound; only locals are tracked at compile time.
        if self.ctx_ref().scope_depth == 0 {
            return;
        }

        let name = self.parser.previous;
        let duplicate = {
            let ctx = self.ctx_ref();
            ctx.locals
                .iter()
                .rev()
                .take_while(|local| local.depth == -1 || local.depth >= ctx.scope_depth)
                .any(|local| local.name == name.lexeme)
        };
        if duplicate {
            self.error("a variable with this name already exists within this scope");
        }

        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.ctx_ref().scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.parser.previous)
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let string = self.heap.intern(name.lexeme.to_string());
        self.make_constant(Value::Obj(string))
    }

    fn mark_initialized(&mut self) {
        let ctx = self.ctx();
        if ctx.scope_depth == 0 {
            return;
        }
        let depth = ctx.scope_depth;
        if let Some(local) = ctx.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx_ref().scope_depth > 0 {
            // Locals live on the stack already; defining is just flipping
            // them readable.
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, ctx_index: usize, name: &str) -> Option<u8> {
        let mut result = None;
        let mut uninitialized = false;
        for (i, local) in self.contexts[ctx_index].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    uninitialized = true;
                }
                result = Some(i as u8);
                break;
            }
        }
        if uninitialized {
            self.error("cannot read local variable in its own initializer");
        }
        result
    }

    /// Looks for `name` in the enclosing function, capturing it as an
    /// upvalue chain if found.
    fn resolve_upvalue(&mut self, ctx_index: usize, name: &str) -> Option<u8> {
        if ctx_index == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(ctx_index - 1, name) {
            self.contexts[ctx_index - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(ctx_index, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(ctx_index - 1, name) {
            return Some(self.add_upvalue(ctx_index, upvalue, false));
        }

        None
    }

    fn add_upvalue(&mut self, ctx_index: usize, index: u8, is_local: bool) -> u8 {
        for (i, upvalue) in self.contexts[ctx_index].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }

        if self.contexts[ctx_index].upvalues.len() == MAX_UPVALUES {
            self.error("too many closure variables in function");
            return 0;
        }

        self.contexts[ctx_index].upvalues.push(CompilerUpvalue { index, is_local });
        (self.contexts[ctx_index].upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let top = self.contexts.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, name.lexeme) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(index) = self.resolve_upvalue(top, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }

    /// Emits the Pop/CloseUpvalue run that unwinds locals deeper than
    /// `depth` without forgetting them — break and continue leave the scope
    /// structure intact for the code after the jump.
    fn discard_locals(&mut self, depth: i32) {
        let discards: Vec<bool> = self
            .ctx_ref()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > depth)
            .map(|local| local.is_captured)
            .collect();
        for captured in discards {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    // ---- Declarations and statements ----

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Continue) {
            self.continue_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "expect '}' after block");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("expect variable name");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "expect ';' after variable declaration");

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("expect function name");
        // A function may refer to itself recursively, so it is usable from
        // the first line of its own body.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.parser.previous.lexeme.to_string());
        self.contexts.push(FnContext::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "expect '(' after function name");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.ctx().arity += 1;
                if self.ctx_ref().arity > 255 {
                    self.error_at_current("cannot have more than 255 parameters");
                }
                let constant = self.parse_variable("expect parameter name");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after parameters");
        self.consume(TokenKind::LeftBrace, "expect '{' before function body");
        self.block();

        // No end_scope(): returning discards the whole frame at runtime.
        let (function, upvalues) = self.end_context();
        let constant = self.make_constant(Value::Obj(function));
        self.emit_ops(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "expect class name");
        let class_name = self.parser.previous;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_ops(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassContext { has_superclass: false });

        if self.matches(TokenKind::Lesser) {
            self.consume(TokenKind::Identifier, "expect superclass name");
            self.variable(false);

            if class_name.lexeme == self.parser.previous.lexeme {
                self.error("a class cannot inherit from itself");
            }

            // The superclass lives in a hidden local named `super`, scoped to
            // the class body so every method closes over the same cell.
            self.begin_scope();
            self.add_local(synthetic_token("super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "expect '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "expect '}' after class body");
        self.emit_op(OpCode::Pop);

        let has_superclass = self.classes.last().map_or(false, |c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "expect method name");
        let constant = self.identifier_constant(self.parser.previous);

        let kind = if self.parser.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_ops(OpCode::Method, constant);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after value");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after expression");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "expect '(' after 'if'");
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.ctx_ref().kind == FunctionKind::Script {
            self.error("cannot return from top-level code");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx_ref().kind == FunctionKind::Initializer {
                self.error("cannot return a value from an initializer");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "expect ';' after return value");
            self.emit_op(OpCode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.code_len();
        let scope_depth = self.ctx_ref().scope_depth;
        self.ctx().loops.push(LoopContext { start: loop_start, scope_depth, breaks: Vec::new() });

        self.consume(TokenKind::LeftParen, "expect '(' after 'while'");
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        // Breaks land here, past the condition pop: the condition value is
        // not on the stack when jumping out of the body.
        if let Some(finished) = self.ctx().loops.pop() {
            for break_jump in finished.breaks {
                self.patch_jump(break_jump);
            }
        }
    }

    fn for_statement(&mut self) {
        // The whole loop gets a scope so an initializer variable is local to it.
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "expect '(' after 'for'");
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.code_len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "expect ';' after loop condition");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            // The increment clause textually precedes the body but runs
            // after it: jump over it now, loop back to it later.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.code_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "expect ')' after for clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let scope_depth = self.ctx_ref().scope_depth;
        self.ctx().loops.push(LoopContext { start: loop_start, scope_depth, breaks: Vec::new() });

        self.statement();
        self.emit_loop(loop_start);

        let finished = self.ctx().loops.pop();
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        if let Some(finished) = finished {
            for break_jump in finished.breaks {
                self.patch_jump(break_jump);
            }
        }

        self.end_scope();
    }

    fn break_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "expect ';' after 'break'");
        if self.ctx_ref().loops.is_empty() {
            self.error("cannot use 'break' outside of a loop");
            return;
        }

        let depth = self.ctx_ref().loops.last().map(|l| l.scope_depth).unwrap_or(0);
        self.discard_locals(depth);
        let jump = self.emit_jump(OpCode::Jump);
        if let Some(current) = self.ctx().loops.last_mut() {
            current.breaks.push(jump);
        }
    }

    fn continue_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "expect ';' after 'continue'");
        if self.ctx_ref().loops.is_empty() {
            self.error("cannot use 'continue' outside of a loop");
            return;
        }

        let (start, depth) =
            self.ctx_ref().loops.last().map(|l| (l.start, l.scope_depth)).unwrap_or((0, 0));
        self.discard_locals(depth);
        self.emit_loop(start);
    }

    // ---- Expressions ----

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix_rule(self.parser.previous.kind, can_assign) {
            self.error("expect expression");
            return;
        }

        while precedence <= precedence_of(self.parser.current.kind) {
            self.advance();
            self.infix_rule(self.parser.previous.kind, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("invalid assignment target");
        }
    }

    /// Dispatches the prefix rule for `kind`; false means the token cannot
    /// start an expression.
    fn prefix_rule(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::True | TokenKind::False | TokenKind::Nil => self.literal(),
            TokenKind::This => self.this_(),
            TokenKind::Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Lesser
            | TokenKind::LesserEqual => self.binary(),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after expression");
    }

    fn number(&mut self) {
        let value: f64 = self.parser.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        // Strip the surrounding quotation marks.
        let lexeme = self.parser.previous.lexeme;
        let chars = lexeme[1..lexeme.len() - 1].to_string();
        let string = self.heap.intern(chars);
        self.emit_constant(Value::Obj(string));
    }

    fn literal(&mut self) {
        match self.parser.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.parser.previous, can_assign);
    }

    fn this_(&mut self) {
        if self.classes.is_empty() {
            self.error("cannot use 'this' outside of a class");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self) {
        if self.classes.is_empty() {
            self.error("cannot use 'super' outside of a class");
        } else if !self.classes.last().map_or(false, |c| c.has_superclass) {
            self.error("cannot use 'super' in a class with no superclass");
        }

        self.consume(TokenKind::Dot, "expect '.' after 'super'");
        self.consume(TokenKind::Identifier, "expect superclass method name");
        let name = self.identifier_constant(self.parser.previous);

        self.named_variable(synthetic_token("this"), false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(synthetic_token("super"), false);
            self.emit_ops(OpCode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable(synthetic_token("super"), false);
            self.emit_ops(OpCode::GetSuper, name);
        }
    }

    fn unary(&mut self) {
        let operator = self.parser.previous.kind;

        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.parser.previous.kind;
        self.parse_precedence(precedence_of(operator).next());

        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Lesser);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Lesser => self.emit_op(OpCode::Lesser),
            TokenKind::LesserEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);

        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_ops(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "expect property name after '.'");
        let name = self.identifier_constant(self.parser.previous);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_ops(OpCode::SetProperty, name);
        } else if self.matches(TokenKind::LeftParen) {
            // Property access immediately followed by a call fuses into one
            // invoke instruction.
            let argc = self.argument_list();
            self.emit_ops(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_ops(OpCode::GetProperty, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("cannot have more than 255 arguments");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after arguments");
        count.min(255) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorLocation;

    fn compile_ok(source: &str) -> (Heap, ObjRef) {
        let mut heap = Heap::new();
        let function = compile(source, &mut heap).expect("expected source to compile");
        (heap, function)
    }

    fn compile_err(source: &str) -> Vec<CompileError> {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect_err("expected a compile error")
    }

    #[test]
    fn test_compiling_twice_yields_identical_chunks() {
        let source = r#"
            fun adder(a) {
                fun add(b) { return a + b; }
                return add;
            }
            print adder(1)(2);
        "#;

        let (heap_a, fn_a) = compile_ok(source);
        let (heap_b, fn_b) = compile_ok(source);
        let chunk_a = &heap_a.function(fn_a).chunk;
        let chunk_b = &heap_b.function(fn_b).chunk;

        assert_eq!(chunk_a.code, chunk_b.code);
        assert_eq!(chunk_a.lines, chunk_b.lines);
        assert_eq!(chunk_a.constants.len(), chunk_b.constants.len());
    }

    #[test]
    fn test_recompiling_in_one_heap_reuses_interned_constants() {
        let mut heap = Heap::new();
        let first = compile("print \"s\" + \"t\";", &mut heap).expect("compiles");
        let second = compile("print \"s\" + \"t\";", &mut heap).expect("compiles");
        // Interning makes the string constants identical objects, not just
        // equal text.
        assert_eq!(heap.function(first).chunk.constants, heap.function(second).chunk.constants);
    }

    #[test]
    fn test_script_chunk_ends_with_nil_return() {
        let (heap, function) = compile_ok("1 + 2;");
        let code = &heap.function(function).chunk.code;
        assert_eq!(code[code.len() - 2], OpCode::Nil as u8);
        assert_eq!(code[code.len() - 1], OpCode::Return as u8);
    }

    #[test]
    fn test_comparison_operators_lower_to_negated_pairs() {
        let (heap, function) = compile_ok("1 >= 2;");
        let code = &heap.function(function).chunk.code;
        // ... Lesser Not Pop Nil Return
        assert_eq!(code[code.len() - 5], OpCode::Lesser as u8);
        assert_eq!(code[code.len() - 4], OpCode::Not as u8);
    }

    #[test]
    fn test_too_many_constants_in_one_chunk() {
        // 257 distinct number literals: the 257th cannot be indexed by one byte.
        let mut source = String::new();
        for i in 0..257 {
            source.push_str(&format!("print {}.5;\n", i));
        }
        let errors = compile_err(&source);
        assert!(errors.iter().any(|e| e.message == "too many constants in one chunk"));
    }

    #[test]
    fn test_local_read_in_own_initializer() {
        let errors = compile_err("{ var a = 1; { var a = a; } }");
        assert_eq!(errors[0].message, "cannot read local variable in its own initializer");
    }

    #[test]
    fn test_duplicate_local_declaration() {
        let errors = compile_err("{ var a = 1; var a = 2; }");
        assert_eq!(errors[0].message, "a variable with this name already exists within this scope");
    }

    #[test]
    fn test_return_outside_function() {
        let errors = compile_err("return 1;");
        assert_eq!(errors[0].message, "cannot return from top-level code");
    }

    #[test]
    fn test_return_value_from_initializer() {
        let errors = compile_err("class A { init() { return 5; } }");
        assert_eq!(errors[0].message, "cannot return a value from an initializer");
    }

    #[test]
    fn test_this_outside_class() {
        let errors = compile_err("print this;");
        assert_eq!(errors[0].message, "cannot use 'this' outside of a class");
    }

    #[test]
    fn test_super_without_superclass() {
        let errors = compile_err("class A { f() { super.f(); } }");
        assert_eq!(errors[0].message, "cannot use 'super' in a class with no superclass");
    }

    #[test]
    fn test_self_inheritance() {
        let errors = compile_err("class A < A {}");
        assert_eq!(errors[0].message, "a class cannot inherit from itself");
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = compile_err("break;");
        assert_eq!(errors[0].message, "cannot use 'break' outside of a loop");
    }

    #[test]
    fn test_invalid_assignment_target() {
        let errors = compile_err("1 + 2 = 3;");
        assert_eq!(errors[0].message, "invalid assignment target");
        assert_eq!(errors[0].location, ErrorLocation::Lexeme("=".to_string()));
    }

    #[test]
    fn test_error_at_end_of_input() {
        let errors = compile_err("print 1");
        assert_eq!(errors[0].location, ErrorLocation::Eof);
        assert_eq!(errors[0].message, "expect ';' after value");
    }

    #[test]
    fn test_panic_mode_reports_one_error_per_statement() {
        let errors = compile_err("var = 1;\nvar = 2;");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_classes_with_methods_compile() {
        compile_ok(
            r#"
            class Point {
                init(x, y) { this.x = x; this.y = y; }
                length() { return this.x * this.x + this.y * this.y; }
            }
            class Point3 < Point {
                init(x, y, z) { super.init(x, y); this.z = z; }
            }
            var p = Point3(1, 2, 3);
            "#,
        );
    }
}
