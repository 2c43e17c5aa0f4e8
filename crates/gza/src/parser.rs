//! Recursive-descent parser with precedence climbing (spec §4.2, §9).
//!
//! Grounded on the teacher's hand-written parser shape (a flat token buffer, a cursor, and
//! one method per grammar production) though the grammar itself is entirely different.
//! Emits directly into a [`CodeBuilder`] as it goes — there is no intermediate AST.

use crate::{
    bytecode::{
        builder::{CodeBuilder, JumpPatch},
        code::{Code, ConstValue, FunctionProto},
        op::{NO_REGISTER, Opcode},
    },
    error::{CodeLoc, ParseError},
    lexer::{Lexer, Token, TokenKind},
};

/// Parses `source` into a finished [`Code`] object.
pub fn parse(source: &str, source_name: impl Into<String>) -> Result<Code, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()?;
    Ok(parser.builder.build(source_name.into()))
}

/// Which delimiter style an `if`/`while` construct committed to, once its condition was
/// parsed (spec §9: "Style selection is made by the first delimiter after the condition").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Brace,
    Keyword,
}

/// The shape of the final postfix step in a chain, deferred until we know whether an `=`
/// follows (in which case it's an lvalue) or not (in which case it's a read).
enum PendingStep {
    Field { container: u32, name_const: u32 },
    Index { container: u32, key: u32 },
}

/// Tracks a loop's break/continue jump sites so they can be patched once the loop's start
/// and end positions are known.
#[derive(Default)]
struct LoopCtx {
    break_patches: Vec<JumpPatch>,
    continue_patches: Vec<JumpPatch>,
}

/// Per-function compilation state: lexical scopes of local-name-to-register bindings, and
/// the stack of enclosing loops (for `break`/`continue`). Reset for every nested function
/// body, since script functions don't capture outer locals.
struct FunctionCtx {
    scopes: Vec<Vec<(String, u32)>>,
    loops: Vec<LoopCtx>,
}

impl FunctionCtx {
    fn new() -> Self {
        Self {
            scopes: vec![Vec::new()],
            loops: Vec::new(),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    builder: CodeBuilder,
    ctx_stack: Vec<FunctionCtx>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            builder: CodeBuilder::new(),
            ctx_stack: vec![FunctionCtx::new()],
        }
    }

    // ---- token helpers ----------------------------------------------------------

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_loc(&self) -> CodeLoc {
        self.tokens[self.pos].loc
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        self.builder.set_location(tok.loc);
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                format!("expected {kind}, found {}", self.peek_kind()),
                self.peek_loc(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::new(format!("expected an identifier, found {other}"), self.peek_loc())),
        }
    }

    /// `then`/`{`/`end`/`}` and other block-closing keywords are also accepted as
    /// statement-list terminators; this is the common "keep parsing statements until one
    /// of these shows up" loop condition.
    fn at_block_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::End
                | TokenKind::RBrace
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
                | TokenKind::Eof
        )
    }

    // ---- scopes and locals --------------------------------------------------------

    fn ctx(&mut self) -> &mut FunctionCtx {
        self.ctx_stack.last_mut().expect("at least one function context")
    }

    fn enter_block_scope(&mut self) {
        self.builder.enter_scope();
        self.ctx().scopes.push(Vec::new());
    }

    fn leave_block_scope(&mut self) {
        self.ctx().scopes.pop();
        self.builder.leave_scope();
    }

    fn bind_local(&mut self, name: String, reg: u32) {
        self.ctx().scopes.last_mut().expect("a scope is always active").push((name, reg));
    }

    fn lookup_local(&self, name: &str) -> Option<u32> {
        let ctx = self.ctx_stack.last().expect("at least one function context");
        for scope in ctx.scopes.iter().rev() {
            if let Some((_, reg)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Some(*reg);
            }
        }
        None
    }

    fn load_name(&mut self, name: &str) -> u32 {
        if let Some(reg) = self.lookup_local(name) {
            return reg;
        }
        let name_const = self.builder.add_const(ConstValue::Str(name.to_owned()));
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::LoadGlobal, dest, name_const, 0);
        dest
    }

    fn store_name(&mut self, name: &str, value_reg: u32) {
        if let Some(local_reg) = self.lookup_local(name) {
            self.builder.emit(Opcode::Move, local_reg, value_reg, 0);
        } else {
            let name_const = self.builder.add_const(ConstValue::Str(name.to_owned()));
            self.builder.emit(Opcode::StoreGlobal, name_const, value_reg, 0);
        }
    }

    // ---- program entry -------------------------------------------------------------

    /// Parses the whole token stream as a sequence of statements. Register 0 is reserved
    /// up front and never reused, so it survives the body's scope; at the end, the last
    /// bare-expression statement's value (if there was one) is moved into it before the
    /// scope's temporaries are released, giving `Halt` the "last expression" result the
    /// spec's worked examples expect (spec §3 "register 0 ... returned to the host").
    fn parse_program(&mut self) -> Result<(), ParseError> {
        let result_reg = self.builder.alloc_register();
        debug_assert_eq!(result_reg, 0);
        self.enter_block_scope();
        let mut last_expr: Option<u32> = None;
        while !self.check(&TokenKind::Eof) {
            last_expr = self.parse_statement()?;
        }
        match last_expr {
            Some(r) if r != result_reg => {
                self.builder.emit(Opcode::Move, result_reg, r, 0);
            }
            Some(_) => {}
            None => {
                self.builder.emit(Opcode::LoadNil, result_reg, 0, 0);
            }
        }
        self.leave_block_scope();
        Ok(())
    }

    // ---- statements -------------------------------------------------------------

    /// Parses one statement. Returns `Some(register)` when the statement was a bare
    /// expression whose value is available there (used only by the top-level program to
    /// find its final result); every other statement form evaluates to nil.
    fn parse_statement(&mut self) -> Result<Option<u32>, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(None)
            }
            TokenKind::Var => self.parse_var_decl(),
            TokenKind::Local => self.parse_local_decl(),
            TokenKind::Function => self.parse_function_decl(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Repeat => self.parse_repeat(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            TokenKind::Do => self.parse_do_block(),
            TokenKind::LBrace => self.parse_brace_block(),
            _ => self.parse_expr_or_assignment_statement(),
        }
    }

    fn parse_statements_until(&mut self, terminators: &[TokenKind]) -> Result<(), ParseError> {
        while !terminators.contains(self.peek_kind()) && !self.check(&TokenKind::Eof) {
            self.parse_statement()?;
        }
        Ok(())
    }

    fn parse_do_block(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Do)?;
        self.enter_block_scope();
        self.parse_statements_until(&[TokenKind::End])?;
        self.leave_block_scope();
        self.expect(TokenKind::End)?;
        Ok(None)
    }

    fn parse_brace_block(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        self.enter_block_scope();
        self.parse_statements_until(&[TokenKind::RBrace])?;
        self.leave_block_scope();
        self.expect(TokenKind::RBrace)?;
        Ok(None)
    }

    fn parse_var_decl(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Var)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let value_reg = self.parse_expr()?;
        let name_const = self.builder.add_const(ConstValue::Str(name));
        self.builder.emit(Opcode::StoreGlobal, name_const, value_reg, 0);
        Ok(None)
    }

    fn parse_local_decl(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Local)?;
        if self.check(&TokenKind::Function) {
            self.advance();
            let name = self.expect_ident()?;
            let func_idx = self.compile_function_body(Some(name.clone()))?;
            let local_reg = self.builder.alloc_register();
            self.builder.emit(Opcode::LoadFunction, local_reg, func_idx, 0);
            self.bind_local(name, local_reg);
            return Ok(None);
        }
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let value_reg = self.parse_expr()?;
        // A fresh, dedicated register: reusing `value_reg` directly would alias another
        // local when the initializer is a bare local reference (reads return the local's
        // own register rather than a copy).
        let local_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, local_reg, value_reg, 0);
        self.bind_local(name, local_reg);
        Ok(None)
    }

    fn parse_function_decl(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Function)?;
        let name = self.expect_ident()?;
        let func_idx = self.compile_function_body(Some(name.clone()))?;
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::LoadFunction, dest, func_idx, 0);
        let name_const = self.builder.add_const(ConstValue::Str(name));
        self.builder.emit(Opcode::StoreGlobal, name_const, dest, 0);
        Ok(None)
    }

    /// Compiles a function literal/declaration's parameter list and body into its own
    /// register namespace inline in the shared instruction stream, skipped over by an
    /// unconditional jump so normal control flow never falls into it (spec §3: a function
    /// value is "a closure over a bytecode range, parameter count...").
    fn compile_function_body(&mut self, name: Option<String>) -> Result<u32, ParseError> {
        let skip = self.builder.emit_jump(Opcode::Jump, 0);
        let entry = self.builder.position();
        let saved = self.builder.begin_function_frame();
        self.ctx_stack.push(FunctionCtx::new());

        self.expect(TokenKind::LParen)?;
        let mut param_count = 0u32;
        if !self.check(&TokenKind::RParen) {
            loop {
                let pname = self.expect_ident()?;
                let reg = self.builder.alloc_register();
                self.bind_local(pname, reg);
                param_count += 1;
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        if self.eat(&TokenKind::LBrace) {
            self.parse_statements_until(&[TokenKind::RBrace])?;
            self.expect(TokenKind::RBrace)?;
        } else {
            self.parse_statements_until(&[TokenKind::End])?;
            self.expect(TokenKind::End)?;
        }
        self.builder.emit(Opcode::Return, NO_REGISTER, 0, 0);

        self.ctx_stack.pop();
        let register_count = self.builder.end_function_frame(saved);
        self.builder.patch_jump(skip);

        let proto = FunctionProto {
            name,
            entry,
            param_count,
            register_count,
        };
        Ok(self.builder.add_function(proto))
    }

    fn parse_return(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Return)?;
        if self.at_block_end() || self.check(&TokenKind::Semicolon) {
            self.builder.emit(Opcode::Return, NO_REGISTER, 0, 0);
        } else {
            // Only the first expression is carried out (the runtime's calling convention
            // returns a single `ScriptValue`, see DESIGN.md); additional comma-separated
            // expressions are still parsed (and their side effects still run) so a script
            // written against a multi-value-return host isn't silently truncated mid-list.
            let first = self.parse_expr()?;
            while self.eat(&TokenKind::Comma) {
                self.parse_expr()?;
            }
            self.builder.emit(Opcode::Return, first, 0, 0);
        }
        Ok(None)
    }

    fn parse_break(&mut self) -> Result<Option<u32>, ParseError> {
        let loc = self.peek_loc();
        self.expect(TokenKind::Break)?;
        let patch = self.builder.emit_jump(Opcode::Jump, 0);
        let ctx = self.ctx();
        let Some(loop_ctx) = ctx.loops.last_mut() else {
            return Err(ParseError::new("'break' outside a loop", loc));
        };
        loop_ctx.break_patches.push(patch);
        Ok(None)
    }

    fn parse_continue(&mut self) -> Result<Option<u32>, ParseError> {
        let loc = self.peek_loc();
        self.expect(TokenKind::Continue)?;
        let patch = self.builder.emit_jump(Opcode::Jump, 0);
        let ctx = self.ctx();
        let Some(loop_ctx) = ctx.loops.last_mut() else {
            return Err(ParseError::new("'continue' outside a loop", loc));
        };
        loop_ctx.continue_patches.push(patch);
        Ok(None)
    }

    /// Parses either a parenthesized or bare condition, then determines (and returns) the
    /// delimiter style from whatever follows — `{` for brace style, `then`/`do` for
    /// keyword style — per spec §9.
    fn parse_condition(&mut self, keyword_opener: &TokenKind) -> Result<(u32, Style), ParseError> {
        let paren = self.eat(&TokenKind::LParen);
        let cond = self.parse_expr()?;
        if paren {
            self.expect(TokenKind::RParen)?;
        }
        if self.check(&TokenKind::LBrace) {
            Ok((cond, Style::Brace))
        } else if self.check(keyword_opener) {
            Ok((cond, Style::Keyword))
        } else {
            Err(ParseError::new(
                format!("expected '{{' or '{keyword_opener}' after condition, found {}", self.peek_kind()),
                self.peek_loc(),
            ))
        }
    }

    fn parse_if(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::If)?;
        let mut end_patches = Vec::new();
        let style = self.parse_if_branch(&mut end_patches)?;
        loop {
            match style {
                Style::Brace => {
                    if self.eat(&TokenKind::Else) {
                        if self.eat(&TokenKind::If) {
                            self.parse_if_branch_styled(Style::Brace, &mut end_patches)?;
                            continue;
                        }
                        self.expect(TokenKind::LBrace)?;
                        self.enter_block_scope();
                        self.parse_statements_until(&[TokenKind::RBrace])?;
                        self.leave_block_scope();
                        self.expect(TokenKind::RBrace)?;
                    }
                    break;
                }
                Style::Keyword => {
                    if self.eat(&TokenKind::Elseif) {
                        self.parse_if_branch_styled(Style::Keyword, &mut end_patches)?;
                        continue;
                    }
                    if self.eat(&TokenKind::Else) {
                        self.enter_block_scope();
                        self.parse_statements_until(&[TokenKind::End])?;
                        self.leave_block_scope();
                    }
                    self.expect(TokenKind::End)?;
                    break;
                }
            }
        }
        for p in end_patches {
            self.builder.patch_jump(p);
        }
        Ok(None)
    }

    /// Parses the `if`'s own condition/branch and returns the chosen style.
    fn parse_if_branch(&mut self, end_patches: &mut Vec<JumpPatch>) -> Result<Style, ParseError> {
        let (cond, style) = self.parse_condition(&TokenKind::Then)?;
        self.compile_if_branch_body(cond, style, end_patches)?;
        Ok(style)
    }

    /// Parses an `elseif`/brace-`else if` branch, enforcing the style the construct
    /// already committed to (spec §9: mixing styles within one construct is a parse error).
    fn parse_if_branch_styled(&mut self, style: Style, end_patches: &mut Vec<JumpPatch>) -> Result<(), ParseError> {
        let loc = self.peek_loc();
        let paren = self.eat(&TokenKind::LParen);
        let cond = self.parse_expr()?;
        if paren {
            self.expect(TokenKind::RParen)?;
        }
        let found = if self.check(&TokenKind::LBrace) {
            Style::Brace
        } else if self.check(&TokenKind::Then) {
            Style::Keyword
        } else {
            return Err(ParseError::new(format!("expected '{{' or 'then', found {}", self.peek_kind()), loc));
        };
        if found != style {
            return Err(ParseError::new("cannot mix brace-style and keyword-style branches in one if", loc));
        }
        self.compile_if_branch_body(cond, style, end_patches)
    }

    fn compile_if_branch_body(&mut self, cond: u32, style: Style, end_patches: &mut Vec<JumpPatch>) -> Result<(), ParseError> {
        let skip_patch = self.builder.emit_jump(Opcode::JumpIfFalse, cond);
        match style {
            Style::Brace => {
                self.expect(TokenKind::LBrace)?;
                self.enter_block_scope();
                self.parse_statements_until(&[TokenKind::RBrace])?;
                self.leave_block_scope();
                self.expect(TokenKind::RBrace)?;
            }
            Style::Keyword => {
                self.expect(TokenKind::Then)?;
                self.enter_block_scope();
                self.parse_statements_until(&[TokenKind::Elseif, TokenKind::Else, TokenKind::End])?;
                self.leave_block_scope();
            }
        }
        end_patches.push(self.builder.emit_jump(Opcode::Jump, 0));
        self.builder.patch_jump(skip_patch);
        Ok(())
    }

    fn parse_while(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::While)?;
        let loop_start = self.builder.position();
        let (cond, style) = self.parse_condition(&TokenKind::Do)?;
        let exit_patch = self.builder.emit_jump(Opcode::JumpIfFalse, cond);

        self.ctx().loops.push(LoopCtx::default());
        self.enter_block_scope();
        match style {
            Style::Brace => {
                self.expect(TokenKind::LBrace)?;
                self.parse_statements_until(&[TokenKind::RBrace])?;
                self.expect(TokenKind::RBrace)?;
            }
            Style::Keyword => {
                self.expect(TokenKind::Do)?;
                self.parse_statements_until(&[TokenKind::End])?;
                self.expect(TokenKind::End)?;
            }
        }
        self.leave_block_scope();
        self.builder.emit(Opcode::Jump, loop_start, 0, 0);
        let end_pos = self.builder.position();
        self.builder.patch_jump(exit_patch);

        let loop_ctx = self.ctx().loops.pop().expect("loop context pushed above");
        for p in loop_ctx.continue_patches {
            self.builder.patch_jump_to(p, loop_start);
        }
        for p in loop_ctx.break_patches {
            self.builder.patch_jump_to(p, end_pos);
        }
        Ok(None)
    }

    fn parse_repeat(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::Repeat)?;
        let loop_start = self.builder.position();
        self.ctx().loops.push(LoopCtx::default());
        self.enter_block_scope();
        self.parse_statements_until(&[TokenKind::Until])?;
        self.expect(TokenKind::Until)?;
        // Continue lands here: the until-condition must still run before deciding whether
        // to loop again.
        let continue_target = self.builder.position();
        let cond = self.parse_expr()?;
        self.leave_block_scope();
        // Loop again while the condition is false (repeat...until loops until it's true).
        self.builder.emit(Opcode::JumpIfFalse, loop_start, cond, 0);
        let end_pos = self.builder.position();

        let loop_ctx = self.ctx().loops.pop().expect("loop context pushed above");
        for p in loop_ctx.continue_patches {
            self.builder.patch_jump_to(p, continue_target);
        }
        for p in loop_ctx.break_patches {
            self.builder.patch_jump_to(p, end_pos);
        }
        Ok(None)
    }

    fn parse_for(&mut self) -> Result<Option<u32>, ParseError> {
        self.expect(TokenKind::For)?;
        let first_name = self.expect_ident()?;
        if self.eat(&TokenKind::Eq) {
            return self.compile_numeric_for(first_name);
        }
        let mut second_name: Option<String> = None;
        if self.eat(&TokenKind::Comma) {
            second_name = Some(self.expect_ident()?);
        }
        self.expect(TokenKind::In)?;

        // Disambiguate range-for (`A .. B`) from generic-for (an iterator expression
        // list) purely by whether `..` follows the first expression.
        let start_reg = self.parse_additive()?;
        if self.eat(&TokenKind::DotDot) {
            let stop_reg = self.parse_additive()?;
            return self.compile_range_for(first_name, start_reg, stop_reg);
        }
        self.compile_generic_for(first_name, second_name, start_reg)
    }

    /// `for i = start, stop [, step] do ... end` (spec §4.2). Step defaults to 1;
    /// negative steps invert the termination test, which is resolved at runtime since
    /// `step` may be a variable expression: each iteration picks `i <= stop` or
    /// `i >= stop` depending on the sign of `step`, computed once per check but without
    /// duplicating the loop body.
    fn compile_numeric_for(&mut self, var_name: String) -> Result<Option<u32>, ParseError> {
        let start_reg = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let stop_reg = self.parse_expr()?;
        let step_reg = if self.eat(&TokenKind::Comma) {
            self.parse_expr()?
        } else {
            let one_const = self.builder.add_const(ConstValue::Number(1.0));
            let r = self.builder.alloc_register();
            self.builder.emit(Opcode::LoadConst, r, one_const, 0);
            r
        };
        self.expect(TokenKind::Do)?;

        self.enter_block_scope();
        let i_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, i_reg, start_reg, 0);
        let stop_persist = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, stop_persist, stop_reg, 0);
        let step_persist = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, step_persist, step_reg, 0);
        let zero_const = self.builder.add_const(ConstValue::Number(0.0));
        let zero_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::LoadConst, zero_reg, zero_const, 0);
        self.bind_local(var_name, i_reg);

        let loop_start = self.builder.position();
        let keep_reg = self.builder.alloc_register();
        let asc_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Ge, asc_reg, step_persist, zero_reg);
        let desc_patch = self.builder.emit_jump(Opcode::JumpIfFalse, asc_reg);
        self.builder.emit(Opcode::Le, keep_reg, i_reg, stop_persist);
        let skip_desc_patch = self.builder.emit_jump(Opcode::Jump, 0);
        self.builder.patch_jump(desc_patch);
        self.builder.emit(Opcode::Ge, keep_reg, i_reg, stop_persist);
        self.builder.patch_jump(skip_desc_patch);
        let exit_patch = self.builder.emit_jump(Opcode::JumpIfFalse, keep_reg);

        self.ctx().loops.push(LoopCtx::default());
        self.parse_statements_until(&[TokenKind::End])?;
        self.expect(TokenKind::End)?;

        let continue_target = self.builder.position();
        self.builder.emit(Opcode::Add, i_reg, i_reg, step_persist);
        self.builder.emit(Opcode::Jump, loop_start, 0, 0);
        let end_pos = self.builder.position();
        self.builder.patch_jump(exit_patch);

        let loop_ctx = self.ctx().loops.pop().expect("loop context pushed above");
        for p in loop_ctx.continue_patches {
            self.builder.patch_jump_to(p, continue_target);
        }
        for p in loop_ctx.break_patches {
            self.builder.patch_jump_to(p, end_pos);
        }
        self.leave_block_scope();
        Ok(None)
    }

    /// `for i in A .. B { ... }`: half-open ascending integer range (spec §4.2).
    fn compile_range_for(&mut self, var_name: String, start_reg: u32, stop_reg_raw: u32) -> Result<Option<u32>, ParseError> {
        let style_brace = self.check(&TokenKind::LBrace);
        if !style_brace && !self.check(&TokenKind::Do) {
            return Err(ParseError::new(format!("expected '{{' or 'do', found {}", self.peek_kind()), self.peek_loc()));
        }

        self.enter_block_scope();
        let i_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, i_reg, start_reg, 0);
        let stop_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, stop_reg, stop_reg_raw, 0);
        let one_const = self.builder.add_const(ConstValue::Number(1.0));
        let one_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::LoadConst, one_reg, one_const, 0);

        self.bind_local(var_name, i_reg);

        let loop_start = self.builder.position();
        let cond_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Lt, cond_reg, i_reg, stop_reg);
        let exit_patch = self.builder.emit_jump(Opcode::JumpIfFalse, cond_reg);

        self.ctx().loops.push(LoopCtx::default());
        if style_brace {
            self.expect(TokenKind::LBrace)?;
            self.parse_statements_until(&[TokenKind::RBrace])?;
            self.expect(TokenKind::RBrace)?;
        } else {
            self.expect(TokenKind::Do)?;
            self.parse_statements_until(&[TokenKind::End])?;
            self.expect(TokenKind::End)?;
        }
        let continue_target = self.builder.position();
        self.builder.emit(Opcode::Add, i_reg, i_reg, one_reg);
        self.builder.emit(Opcode::Jump, loop_start, 0, 0);
        let end_pos = self.builder.position();
        self.builder.patch_jump(exit_patch);

        let loop_ctx = self.ctx().loops.pop().expect("loop context pushed above");
        for p in loop_ctx.continue_patches {
            self.builder.patch_jump_to(p, continue_target);
        }
        for p in loop_ctx.break_patches {
            self.builder.patch_jump_to(p, end_pos);
        }
        self.leave_block_scope();
        Ok(None)
    }

    /// Generic for: `for k[, v] in fn[, state[, control]] { ... }` (Lua-style
    /// function/state/control triple, spec §9's resolved ambiguity). `fn` is required;
    /// `state`/`control` default to nil. With two loop variables, the single value the
    /// iterator returns (the runtime's calls return exactly one `ScriptValue`) is expected
    /// to be a two-element array, destructured via `IndexGet`; see DESIGN.md.
    fn compile_generic_for(&mut self, first_name: String, second_name: Option<String>, fn_expr_reg: u32) -> Result<Option<u32>, ParseError> {
        self.enter_block_scope();
        let fn_reg = self.builder.alloc_register();
        self.builder.emit(Opcode::Move, fn_reg, fn_expr_reg, 0);
        let state_reg = self.builder.alloc_register();
        if self.eat(&TokenKind::Comma) {
            let v = self.parse_expr()?;
            self.builder.emit(Opcode::Move, state_reg, v, 0);
        } else {
            self.builder.emit(Opcode::LoadNil, state_reg, 0, 0);
        }
        let ctrl_reg = self.builder.alloc_register();
        if self.eat(&TokenKind::Comma) {
            let v = self.parse_expr()?;
            self.builder.emit(Opcode::Move, ctrl_reg, v, 0);
        } else {
            self.builder.emit(Opcode::LoadNil, ctrl_reg, 0, 0);
        }

        let style_brace = self.check(&TokenKind::LBrace);
        if !style_brace && !self.check(&TokenKind::Do) {
            return Err(ParseError::new(format!("expected '{{' or 'do', found {}", self.peek_kind()), self.peek_loc()));
        }

        let persist_base = self.builder.alloc_register();
        self.builder.alloc_register();
        self.builder.alloc_register();
        self.builder.emit(Opcode::IterInit, persist_base, fn_reg, 0);

        let loop_start = self.builder.position();
        let dest_reg = self.builder.alloc_register();
        let iter_next_idx = self.builder.emit(Opcode::IterNext, persist_base, dest_reg, 0);

        self.enter_block_scope();
        if let Some(second) = second_name {
            let k_reg = self.builder.alloc_register();
            self.builder.emit(Opcode::LoadConst, k_reg, self.builder_const_zero(), 0);
            self.builder.emit(Opcode::IndexGet, k_reg, dest_reg, k_reg);
            let v_reg = self.builder.alloc_register();
            self.builder.emit(Opcode::LoadConst, v_reg, self.builder_const_one(), 0);
            self.builder.emit(Opcode::IndexGet, v_reg, dest_reg, v_reg);
            self.bind_local(first_name, k_reg);
            self.bind_local(second, v_reg);
        } else {
            self.bind_local(first_name, dest_reg);
        }

        self.ctx().loops.push(LoopCtx::default());
        if style_brace {
            self.expect(TokenKind::LBrace)?;
            self.parse_statements_until(&[TokenKind::RBrace])?;
            self.expect(TokenKind::RBrace)?;
        } else {
            self.expect(TokenKind::Do)?;
            self.parse_statements_until(&[TokenKind::End])?;
            self.expect(TokenKind::End)?;
        }
        self.leave_block_scope();
        self.builder.emit(Opcode::Jump, loop_start, 0, 0);
        let end_pos = self.builder.position();
        self.builder.patch_c(iter_next_idx, end_pos);

        let loop_ctx = self.ctx().loops.pop().expect("loop context pushed above");
        for p in loop_ctx.continue_patches {
            self.builder.patch_jump_to(p, loop_start);
        }
        for p in loop_ctx.break_patches {
            self.builder.patch_jump_to(p, end_pos);
        }
        self.leave_block_scope();
        Ok(None)
    }

    fn builder_const_zero(&mut self) -> u32 {
        self.builder.add_const(ConstValue::Number(0.0))
    }

    fn builder_const_one(&mut self) -> u32 {
        self.builder.add_const(ConstValue::Number(1.0))
    }

    /// An identifier-led statement: either an assignment (`NAME = E`, `NAME.f = E`,
    /// `NAME[E] = E`) or an expression evaluated for its side effects (almost always a
    /// call). The chain's final postfix step is deferred (see [`PendingStep`]) so it's
    /// compiled as a `Get` only when it turns out not to be followed by `=`.
    fn parse_expr_or_assignment_statement(&mut self) -> Result<Option<u32>, ParseError> {
        let TokenKind::Ident(name) = self.peek_kind().clone() else {
            let result = self.parse_expr()?;
            return Ok(Some(result));
        };
        self.advance();
        let mut reg = self.load_name(&name);
        let mut pending: Option<PendingStep> = None;

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    if let Some(step) = pending.take() {
                        reg = self.emit_get(step);
                    }
                    self.advance();
                    let field = self.expect_ident()?;
                    let name_const = self.builder.add_const(ConstValue::Str(field));
                    pending = Some(PendingStep::Field { container: reg, name_const });
                }
                TokenKind::LBracket => {
                    if let Some(step) = pending.take() {
                        reg = self.emit_get(step);
                    }
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    pending = Some(PendingStep::Index { container: reg, key });
                }
                TokenKind::LParen => {
                    if let Some(step) = pending.take() {
                        reg = self.emit_get(step);
                    }
                    reg = self.parse_call_args(reg)?;
                }
                _ => break,
            }
        }

        if self.eat(&TokenKind::Eq) {
            let value_reg = self.parse_expr()?;
            match pending {
                None => self.store_name(&name, value_reg),
                Some(PendingStep::Field { container, name_const }) => {
                    self.builder.emit(Opcode::FieldSet, container, name_const, value_reg);
                }
                Some(PendingStep::Index { container, key }) => {
                    self.builder.emit(Opcode::IndexSet, container, key, value_reg);
                }
            }
            Ok(None)
        } else {
            if let Some(step) = pending.take() {
                reg = self.emit_get(step);
            }
            Ok(Some(reg))
        }
    }

    fn emit_get(&mut self, step: PendingStep) -> u32 {
        let dest = self.builder.alloc_register();
        match step {
            PendingStep::Field { container, name_const } => {
                self.builder.emit(Opcode::FieldGet, dest, container, name_const);
            }
            PendingStep::Index { container, key } => {
                self.builder.emit(Opcode::IndexGet, dest, container, key);
            }
        }
        dest
    }

    // ---- expressions (spec §4.2 precedence ladder, lowest to highest) ---------------

    fn parse_expr(&mut self) -> Result<u32, ParseError> {
        self.parse_or()
    }

    fn emit_move(&mut self, dest: u32, src: u32) {
        if dest != src {
            self.builder.emit(Opcode::Move, dest, src, 0);
        }
    }

    fn parse_or(&mut self) -> Result<u32, ParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek_kind(), TokenKind::Or | TokenKind::OrOr) {
            self.advance();
            let end = self.builder.emit_jump(Opcode::JumpIfTrue, left);
            let right = self.parse_and()?;
            self.emit_move(left, right);
            self.builder.patch_jump(end);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<u32, ParseError> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek_kind(), TokenKind::And | TokenKind::AndAnd) {
            self.advance();
            let end = self.builder.emit_jump(Opcode::JumpIfFalse, left);
            let right = self.parse_comparison()?;
            self.emit_move(left, right);
            self.builder.patch_jump(end);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<u32, ParseError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => Opcode::Eq,
                TokenKind::NotEq => Opcode::Neq,
                TokenKind::Lt => Opcode::Lt,
                TokenKind::Gt => Opcode::Gt,
                TokenKind::Le => Opcode::Le,
                TokenKind::Ge => Opcode::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_concat()?;
            let dest = self.builder.alloc_register();
            self.builder.emit(op, dest, left, right);
            left = dest;
        }
        Ok(left)
    }

    /// Right-associative: `a .. b .. c` concatenates as `a .. (b .. c)`.
    fn parse_concat(&mut self) -> Result<u32, ParseError> {
        let left = self.parse_additive()?;
        if self.eat(&TokenKind::DotDot) {
            let right = self.parse_concat()?;
            let dest = self.builder.alloc_register();
            self.builder.emit(Opcode::Concat, dest, left, right);
            Ok(dest)
        } else {
            Ok(left)
        }
    }

    fn parse_additive(&mut self) -> Result<u32, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => Opcode::Add,
                TokenKind::Minus => Opcode::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let dest = self.builder.alloc_register();
            self.builder.emit(op, dest, left, right);
            left = dest;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<u32, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => Opcode::Mul,
                TokenKind::Slash => Opcode::Div,
                TokenKind::Percent => Opcode::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let dest = self.builder.alloc_register();
            self.builder.emit(op, dest, left, right);
            left = dest;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<u32, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(Opcode::Neg),
            TokenKind::Bang | TokenKind::Not => Some(Opcode::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let dest = self.builder.alloc_register();
            self.builder.emit(op, dest, operand, 0);
            Ok(dest)
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<u32, ParseError> {
        let mut reg = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    let name_const = self.builder.add_const(ConstValue::Str(field));
                    let dest = self.builder.alloc_register();
                    self.builder.emit(Opcode::FieldGet, dest, reg, name_const);
                    reg = dest;
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let dest = self.builder.alloc_register();
                    self.builder.emit(Opcode::IndexGet, dest, reg, key);
                    reg = dest;
                }
                TokenKind::LParen => {
                    reg = self.parse_call_args(reg)?;
                }
                _ => break,
            }
        }
        Ok(reg)
    }

    /// Compiles a call's argument list into consecutive registers right after the
    /// callee, per the `Call` opcode's fixed layout (spec §4.2 "arguments occupy
    /// registers `b+1..=b+c`"). Arguments are evaluated first (into whatever scratch
    /// registers their own expressions need), *then* the callee and a contiguous block of
    /// argument slots are allocated back-to-back and everything is moved into place — the
    /// only way to land a fresh callee register and `argc` fresh registers consecutively
    /// without knowing the argument count before parsing them.
    fn parse_call_args(&mut self, callee_reg: u32) -> Result<u32, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut arg_values = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                arg_values.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let fresh_callee = self.builder.alloc_register();
        self.emit_move(fresh_callee, callee_reg);
        let argc = u32::try_from(arg_values.len()).expect("argument list too large");
        for (i, val_reg) in arg_values.into_iter().enumerate() {
            let slot = self.builder.alloc_register();
            self.emit_move(slot, val_reg);
            debug_assert_eq!(slot, fresh_callee + 1 + i as u32);
        }
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::Call, dest, fresh_callee, argc);
        Ok(dest)
    }

    fn parse_primary(&mut self) -> Result<u32, ParseError> {
        let loc = self.peek_loc();
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                let idx = self.builder.add_const(ConstValue::Number(n));
                let dest = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadConst, dest, idx, 0);
                Ok(dest)
            }
            TokenKind::Str(s) => {
                self.advance();
                let idx = self.builder.add_const(ConstValue::Str(s));
                let dest = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadConst, dest, idx, 0);
                Ok(dest)
            }
            TokenKind::True => {
                self.advance();
                let dest = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadTrue, dest, 0, 0);
                Ok(dest)
            }
            TokenKind::False => {
                self.advance();
                let dest = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadFalse, dest, 0, 0);
                Ok(dest)
            }
            TokenKind::Nil => {
                self.advance();
                let dest = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadNil, dest, 0, 0);
                Ok(dest)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(self.load_name(&name))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_table_literal(),
            TokenKind::Function => self.parse_function_literal(),
            other => Err(ParseError::new(format!("unexpected token {other}"), loc)),
        }
    }

    /// `[e1, e2, ...]` (spec §4.2 "array/table literals"): built incrementally at
    /// runtime with `NewArray` sized to the literal's element count, then one `ArrayPush`
    /// per element.
    fn parse_array_literal(&mut self) -> Result<u32, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                elements.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        let cap = u32::try_from(elements.len()).expect("array literal too large");
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::NewArray, dest, cap, 0);
        for elem in elements {
            self.builder.emit(Opcode::ArrayPush, dest, elem, 0);
        }
        Ok(dest)
    }

    /// `{ k = v, ... }`: a plain table literal with identifier keys (spec §4.2).
    fn parse_table_literal(&mut self) -> Result<u32, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::NewTable, dest, 0, 0);
        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = self.expect_ident()?;
                self.expect(TokenKind::Eq)?;
                let value_reg = self.parse_expr()?;
                let key_const = self.builder.add_const(ConstValue::Str(key));
                let key_reg = self.builder.alloc_register();
                self.builder.emit(Opcode::LoadConst, key_reg, key_const, 0);
                self.builder.emit(Opcode::TableSet, dest, key_reg, value_reg);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(dest)
    }

    /// Anonymous `function(params) body` expression (spec §4.2 "function literal").
    fn parse_function_literal(&mut self) -> Result<u32, ParseError> {
        self.expect(TokenKind::Function)?;
        let func_idx = self.compile_function_body(None)?;
        let dest = self.builder.alloc_register();
        self.builder.emit(Opcode::LoadFunction, dest, func_idx, 0);
        Ok(dest)
    }
}
