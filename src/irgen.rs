//! IR generation: the [`Visitor`] implementation that turns parse events
//! into blocks, chunks, symbols, and operand fixups.
//!
//! Two evaluation modes exist, and they stay separate on purpose:
//!
//! * **Single-pass absolute** — directive arguments. Values fold
//!   immediately on a stack typed to the directive's element width, and a
//!   symbol must already be defined when it is referenced. This is what
//!   lets `.locate` and `.defvar` see fully resolved values.
//! * **Double-pass relative** — instruction operands. Expressions build a
//!   tree in a flat arena; nothing is evaluated until the whole input has
//!   parsed, so forward references work. In this mode label references
//!   and `.` produce offsets from the instruction's own address (what a
//!   branch encodes), while inside a back-tick group symbols evaluate
//!   absolute and the group result is converted to an offset on close.
//!   `@ha`/`@l` always operate on the absolute symbol value.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::vec::Vec;

use crate::error::{AssemblerError, Interval};
use crate::ir::{Chunk, IrBlock, IrInstruction, IrProgram};
use crate::lexer::{self, Token};
use crate::parser::{AsmOp, ParenKind, ParseState, Terminal, Visitor};
use crate::tables::{Directive, ParseInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalMode {
    RelDoublePass,
    AbsSinglePass,
}

/// Typed value stack for single-pass directive evaluation.
#[derive(Debug, Clone)]
enum EvalStack {
    Inactive,
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Node of the deferred-expression arena used for instruction operands.
#[derive(Debug, Clone, Copy)]
enum ExprNode<'src> {
    Lit(u32),
    Sym {
        name: &'src str,
        /// Address of the instruction the operand belongs to.
        inst_addr: u32,
        /// Absolute value (inside back-ticks, `@ha`/`@l`) vs offset.
        absolute: bool,
        line: usize,
        col: usize,
    },
    Unary(AsmOp, usize),
    Binary(AsmOp, usize, usize),
    PcRel {
        child: usize,
        inst_addr: u32,
    },
}

/// Per-operand fixup: the expression root plus enough context to report
/// evaluation errors against the operand's source.
#[derive(Debug, Clone, Copy)]
struct OperandFixup<'src> {
    root: usize,
    line: usize,
    source_line: &'src str,
}

/// The IR-building visitor.
#[derive(Debug)]
pub struct IrGenerator<'src> {
    program: IrProgram<'src>,

    labels: BTreeMap<&'src str, u32>,
    constants: BTreeMap<&'src str, u64>,
    defined: BTreeSet<&'src str>,

    mode: EvalMode,
    active_directive: Option<Directive>,
    active_var: Option<&'src str>,
    string_lit: &'src str,
    eval_stack: EvalStack,

    build_key: usize,
    build_extended: bool,
    build_line: &'src str,
    build_line_number: usize,
    operand_scan_begin: usize,
    operand_col_start: usize,

    nodes: Vec<ExprNode<'src>>,
    expr_stack: Vec<usize>,
    fixups: Vec<OperandFixup<'src>>,
    grave_depth: usize,
}

impl<'src> IrGenerator<'src> {
    /// Create a generator whose first block starts at `base_address`.
    #[must_use]
    pub fn new(base_address: u32) -> Self {
        let mut program = IrProgram::default();
        program.blocks.push(IrBlock::new(base_address));
        Self {
            program,
            labels: BTreeMap::new(),
            constants: BTreeMap::new(),
            defined: BTreeSet::new(),
            mode: EvalMode::AbsSinglePass,
            active_directive: None,
            active_var: None,
            string_lit: "",
            eval_stack: EvalStack::Inactive,
            build_key: 0,
            build_extended: false,
            build_line: "",
            build_line_number: 0,
            operand_scan_begin: 0,
            operand_col_start: 0,
            nodes: Vec::new(),
            expr_stack: Vec::new(),
            fixups: Vec::new(),
            grave_depth: 0,
        }
    }

    /// Take the finished program out of the generator.
    #[must_use]
    pub fn into_program(self) -> IrProgram<'src> {
        self.program
    }

    // ── Block and chunk plumbing ────────────────────────────────────────

    fn active_block(&self) -> &IrBlock<'src> {
        let idx = self.program.blocks.len() - 1;
        &self.program.blocks[idx]
    }

    fn active_block_mut(&mut self) -> &mut IrBlock<'src> {
        let idx = self.program.blocks.len() - 1;
        &mut self.program.blocks[idx]
    }

    fn current_address(&self) -> u32 {
        self.active_block().end_address()
    }

    fn byte_chunk(&mut self) -> &mut Vec<u8> {
        let chunks = &mut self.active_block_mut().chunks;
        if !matches!(chunks.last(), Some(Chunk::Bytes(_))) {
            chunks.push(Chunk::Bytes(Vec::new()));
        }
        match chunks.last_mut() {
            Some(Chunk::Bytes(bytes)) => bytes,
            _ => unreachable!("a byte chunk was just ensured"),
        }
    }

    fn inst_chunk(&mut self) -> &mut Vec<IrInstruction<'src>> {
        let chunks = &mut self.active_block_mut().chunks;
        if !matches!(chunks.last(), Some(Chunk::Instructions(_))) {
            chunks.push(Chunk::Instructions(Vec::new()));
        }
        match chunks.last_mut() {
            Some(Chunk::Instructions(insts)) => insts,
            _ => unreachable!("an instruction chunk was just ensured"),
        }
    }

    fn pad_chunk(&mut self) -> &mut usize {
        let chunks = &mut self.active_block_mut().chunks;
        if !matches!(chunks.last(), Some(Chunk::Pad(_))) {
            chunks.push(Chunk::Pad(0));
        }
        match chunks.last_mut() {
            Some(Chunk::Pad(size)) => size,
            _ => unreachable!("a pad chunk was just ensured"),
        }
    }

    fn start_block(&mut self, address: u32) {
        self.program.blocks.push(IrBlock::new(address));
    }

    fn start_block_align(&mut self, bits: u32) {
        let align_mask = (1u32 << bits) - 1;
        let current = self.current_address();
        if current & align_mask != 0 {
            self.start_block((current & !align_mask).wrapping_add(1 << bits));
        }
    }

    fn pad_align(&mut self, bits: u32) {
        let align_mask = (1u32 << bits) - 1;
        let current = self.current_address();
        if current & align_mask != 0 {
            *self.pad_chunk() += ((1u32 << bits) - (current & align_mask)) as usize;
        }
    }

    fn pad_space(&mut self, space: usize) {
        *self.pad_chunk() += space;
    }

    fn add_string_bytes(&mut self, null_terminated: bool) {
        let literal = self.string_lit;
        let bytes = self.byte_chunk();
        lexer::convert_string_literal(literal, bytes);
        if null_terminated {
            bytes.push(0);
        }
    }

    // ── Single-pass (directive) evaluation ──────────────────────────────

    fn push_cast(&mut self, val: u64) {
        match &mut self.eval_stack {
            EvalStack::Inactive => {}
            EvalStack::U8(v) => v.push(val as u8),
            EvalStack::U16(v) => v.push(val as u16),
            EvalStack::U32(v) => v.push(val as u32),
            EvalStack::U64(v) => v.push(val),
            EvalStack::F32(v) => v.push(val as f32),
            EvalStack::F64(v) => v.push(val as f64),
        }
    }

    fn eval_operator_abs(&mut self, state: &mut ParseState<'src>, op: AsmOp) {
        fn fold<T: IntArith>(stack: &mut Vec<T>, op: AsmOp) -> Result<(), &'static str> {
            if matches!(op, AsmOp::Neg | AsmOp::Not) {
                let Some(val) = stack.last_mut() else {
                    return Err("operator without operand");
                };
                *val = match op {
                    AsmOp::Neg => val.arith_neg(),
                    _ => val.arith_not(),
                };
                return Ok(());
            }
            let Some(rhs) = stack.pop() else {
                return Err("operator without operands");
            };
            let Some(lhs) = stack.last_mut() else {
                return Err("operator without operands");
            };
            *lhs = match op {
                AsmOp::Or => lhs.arith_or(rhs),
                AsmOp::Xor => lhs.arith_xor(rhs),
                AsmOp::And => lhs.arith_and(rhs),
                AsmOp::Lsh => lhs.arith_shl(rhs),
                AsmOp::Rsh => lhs.arith_shr(rhs),
                AsmOp::Add => lhs.arith_add(rhs),
                AsmOp::Sub => lhs.arith_sub(rhs),
                AsmOp::Mul => lhs.arith_mul(rhs),
                AsmOp::Div => lhs.arith_div(rhs).ok_or("Division by zero")?,
                AsmOp::Neg | AsmOp::Not => return Err("unreachable"),
            };
            Ok(())
        }

        let result = match &mut self.eval_stack {
            EvalStack::U8(v) => fold(v, op),
            EvalStack::U16(v) => fold(v, op),
            EvalStack::U32(v) => fold(v, op),
            EvalStack::U64(v) => fold(v, op),
            EvalStack::F32(_) | EvalStack::F64(_) | EvalStack::Inactive => {
                Err("operators are not valid here")
            }
        };
        if let Err(reason) = result {
            if reason == "Division by zero" {
                state.emit_error_here("Division by zero".into());
            } else {
                state.emit_error_here(format!("Internal error: {reason}"));
            }
        }
    }

    fn eval_terminal_abs(
        &mut self,
        state: &mut ParseState<'src>,
        terminal: Terminal,
        tok: Token<'src>,
    ) {
        match terminal {
            Terminal::Flt => {
                let ok = match &mut self.eval_stack {
                    EvalStack::F32(v) => match tok.eval_f32() {
                        Some(f) => {
                            v.push(f);
                            true
                        }
                        None => false,
                    },
                    EvalStack::F64(v) => match tok.eval_f64() {
                        Some(f) => {
                            v.push(f);
                            true
                        }
                        None => false,
                    },
                    _ => false,
                };
                if !ok {
                    state.emit_error_here(format!(
                        "Invalid float literal '{}'",
                        tok.val_str()
                    ));
                }
            }

            Terminal::Dot => {
                let addr = self.current_address();
                self.push_cast(u64::from(addr));
            }

            Terminal::Id => {
                if let Some(&addr) = self.labels.get(tok.text) {
                    self.push_cast(u64::from(addr));
                } else if let Some(&val) = self.constants.get(tok.text) {
                    self.push_cast(val);
                } else {
                    state.emit_error_here(format!(
                        "Undefined reference to Label/Constant '{}'",
                        tok.val_str()
                    ));
                }
            }

            _ => {
                // Integer literals and register/CR/SPR builtins. The value
                // must fit the directive's element width.
                let pushed = match &mut self.eval_stack {
                    EvalStack::U8(v) => tok.eval_u8().map(|x| v.push(x)),
                    EvalStack::U16(v) => tok.eval_u16().map(|x| v.push(x)),
                    EvalStack::U32(v) => tok.eval_u32().map(|x| v.push(x)),
                    EvalStack::U64(v) => tok.eval_u64().map(|x| v.push(x)),
                    _ => None,
                };
                if pushed.is_none() {
                    state.emit_error_here(format!(
                        "Value '{}' is too large for this directive",
                        tok.val_str()
                    ));
                }
            }
        }
    }

    /// Flush the evaluated expression value as big-endian bytes.
    fn flush_data_values(&mut self) {
        // Detach the stack so the chunk can be borrowed mutably.
        let mut stack = core::mem::replace(&mut self.eval_stack, EvalStack::Inactive);
        {
            let bytes = self.byte_chunk();
            match &mut stack {
                EvalStack::Inactive => {}
                EvalStack::U8(v) => bytes.extend(v.drain(..)),
                EvalStack::U16(v) => {
                    for val in v.drain(..) {
                        bytes.extend_from_slice(&val.to_be_bytes());
                    }
                }
                EvalStack::U32(v) => {
                    for val in v.drain(..) {
                        bytes.extend_from_slice(&val.to_be_bytes());
                    }
                }
                EvalStack::U64(v) => {
                    for val in v.drain(..) {
                        bytes.extend_from_slice(&val.to_be_bytes());
                    }
                }
                EvalStack::F32(v) => {
                    for val in v.drain(..) {
                        bytes.extend_from_slice(&val.to_bits().to_be_bytes());
                    }
                }
                EvalStack::F64(v) => {
                    for val in v.drain(..) {
                        bytes.extend_from_slice(&val.to_bits().to_be_bytes());
                    }
                }
            }
        }
        self.eval_stack = stack;
    }

    fn take_u32_arg(&mut self) -> Option<u32> {
        match &self.eval_stack {
            EvalStack::U32(v) => v.last().copied(),
            _ => None,
        }
    }

    // ── Double-pass (instruction) evaluation ────────────────────────────

    fn push_node(&mut self, node: ExprNode<'src>) {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.expr_stack.push(idx);
    }

    fn eval_operator_rel(&mut self, state: &mut ParseState<'src>, op: AsmOp) {
        if matches!(op, AsmOp::Neg | AsmOp::Not) {
            let Some(sub) = self.expr_stack.pop() else {
                state.emit_error_here("Internal error: operator without operand".into());
                return;
            };
            self.push_node(ExprNode::Unary(op, sub));
            return;
        }
        let (Some(rhs), Some(lhs)) = (self.expr_stack.pop(), self.expr_stack.pop()) else {
            state.emit_error_here("Internal error: operator without operands".into());
            return;
        };
        self.push_node(ExprNode::Binary(op, lhs, rhs));
    }

    fn eval_terminal_rel(
        &mut self,
        state: &mut ParseState<'src>,
        terminal: Terminal,
        tok: Token<'src>,
    ) {
        match terminal {
            Terminal::Dot => {
                // `.` is the current instruction's own address: absolute
                // inside a back-tick group, offset zero otherwise.
                let node = if self.grave_depth > 0 {
                    ExprNode::Lit(self.current_address())
                } else {
                    ExprNode::Lit(0)
                };
                self.push_node(node);
            }

            Terminal::Id => {
                let node = ExprNode::Sym {
                    name: tok.text,
                    inst_addr: self.current_address(),
                    absolute: self.grave_depth > 0,
                    line: state.lexer.line_number(),
                    col: state.lexer.col_number(),
                };
                self.push_node(node);
            }

            _ => match tok.eval_u32() {
                Some(val) => self.push_node(ExprNode::Lit(val)),
                None => {
                    state.emit_error_here(format!(
                        "Invalid integer literal '{}'",
                        tok.val_str()
                    ));
                }
            },
        }
    }

    fn push_sym_abs(&mut self, state: &mut ParseState<'src>, id: &'src str) {
        let node = ExprNode::Sym {
            name: id,
            inst_addr: self.current_address(),
            absolute: true,
            line: state.lexer.line_number(),
            col: state.lexer.col_number(),
        };
        self.push_node(node);
    }

    fn apply_binary_lit(&mut self, op: AsmOp, lit: u32) {
        let Some(lhs) = self.expr_stack.pop() else {
            return;
        };
        let rhs = self.nodes.len();
        self.nodes.push(ExprNode::Lit(lit));
        let idx = self.nodes.len();
        self.nodes.push(ExprNode::Binary(op, lhs, rhs));
        self.expr_stack.push(idx);
    }

    fn abs_lookup(
        &self,
        state: &mut ParseState<'src>,
        id: &str,
    ) -> Option<u64> {
        if let Some(&addr) = self.labels.get(id) {
            Some(u64::from(addr))
        } else if let Some(&val) = self.constants.get(id) {
            Some(val)
        } else {
            state.emit_error_here(format!(
                "Undefined reference to Label/Constant '{id}'"
            ));
            None
        }
    }

    // ── Instruction assembly ────────────────────────────────────────────

    fn finish_instruction(&mut self) {
        let inst = IrInstruction {
            key: self.build_key,
            op_index: self.operand_scan_begin,
            op_count: self.program.operand_pool.len() - self.operand_scan_begin,
            raw_line: self.build_line,
            line_number: self.build_line_number,
            is_extended: self.build_extended,
        };
        self.inst_chunk().push(inst);
        self.operand_scan_begin = 0;
    }

    // ── Fixup phase ─────────────────────────────────────────────────────

    fn eval_node(
        &self,
        idx: usize,
        ctx: &OperandFixup<'src>,
        span: Interval,
    ) -> Result<u32, AssemblerError> {
        match self.nodes[idx] {
            ExprNode::Lit(val) => Ok(val),

            ExprNode::Sym {
                name,
                inst_addr,
                absolute,
                line,
                col,
            } => {
                if let Some(&addr) = self.labels.get(name) {
                    if absolute {
                        Ok(addr)
                    } else {
                        Ok(addr.wrapping_sub(inst_addr))
                    }
                } else if let Some(&val) = self.constants.get(name) {
                    Ok(val as u32)
                } else {
                    Err(AssemblerError {
                        message: format!("Unresolved symbol '{name}'"),
                        source_line: ctx.source_line.into(),
                        line,
                        col,
                        len: name.len(),
                    })
                }
            }

            ExprNode::Unary(op, sub) => {
                let val = self.eval_node(sub, ctx, span)?;
                Ok(match op {
                    AsmOp::Neg => val.wrapping_neg(),
                    _ => !val,
                })
            }

            ExprNode::Binary(op, lhs, rhs) => {
                let lhs = self.eval_node(lhs, ctx, span)?;
                let rhs = self.eval_node(rhs, ctx, span)?;
                Ok(match op {
                    AsmOp::Or => lhs | rhs,
                    AsmOp::Xor => lhs ^ rhs,
                    AsmOp::And => lhs & rhs,
                    AsmOp::Lsh => {
                        if rhs >= 32 {
                            0
                        } else {
                            lhs << rhs
                        }
                    }
                    AsmOp::Rsh => {
                        if rhs >= 32 {
                            0
                        } else {
                            lhs >> rhs
                        }
                    }
                    AsmOp::Add => lhs.wrapping_add(rhs),
                    AsmOp::Sub => lhs.wrapping_sub(rhs),
                    AsmOp::Mul => lhs.wrapping_mul(rhs),
                    AsmOp::Div => lhs.checked_div(rhs).ok_or_else(|| AssemblerError {
                        message: "Division by zero in operand".into(),
                        source_line: ctx.source_line.into(),
                        line: ctx.line,
                        col: span.begin,
                        len: span.len,
                    })?,
                    AsmOp::Neg | AsmOp::Not => 0,
                })
            }

            ExprNode::PcRel { child, inst_addr } => {
                let val = self.eval_node(child, ctx, span)?;
                Ok(val.wrapping_sub(inst_addr))
            }
        }
    }

    fn run_fixups(&mut self, state: &mut ParseState<'src>) {
        for i in 0..self.fixups.len() {
            let fixup = self.fixups[i];
            let span = self.program.operand_pool[i].0;
            match self.eval_node(fixup.root, &fixup, span) {
                Ok(val) => self.program.operand_pool[i].1 = val,
                Err(err) => {
                    state.error = Some(err);
                    return;
                }
            }
        }
    }
}

impl<'src> Visitor<'src> for IrGenerator<'src> {
    fn on_directive_pre(&mut self, _state: &mut ParseState<'src>, directive: Directive) {
        self.mode = EvalMode::AbsSinglePass;
        self.active_directive = Some(directive);

        self.eval_stack = match directive {
            Directive::Byte => EvalStack::U8(Vec::new()),
            Directive::TwoByte => EvalStack::U16(Vec::new()),
            Directive::FourByte
            | Directive::Locate
            | Directive::PadAlign
            | Directive::Align
            | Directive::Zeros
            | Directive::Skip => EvalStack::U32(Vec::new()),
            Directive::EightByte | Directive::DefVar => EvalStack::U64(Vec::new()),
            Directive::Float => EvalStack::F32(Vec::new()),
            Directive::Double => EvalStack::F64(Vec::new()),
            Directive::Ascii | Directive::Asciz => EvalStack::Inactive,
        };
    }

    fn on_directive_post(&mut self, state: &mut ParseState<'src>, directive: Directive) {
        match directive {
            // Integer data is emitted expression by expression in
            // on_resolved_expr_post.
            Directive::Byte
            | Directive::TwoByte
            | Directive::FourByte
            | Directive::EightByte => {}

            // Float lists have no resolved-expression wrapper; the parsed
            // values are all on the stack at this point.
            Directive::Float | Directive::Double => self.flush_data_values(),

            Directive::DefVar => {
                let value = match &self.eval_stack {
                    EvalStack::U64(v) => v.last().copied(),
                    _ => None,
                };
                match (self.active_var.take(), value) {
                    (Some(name), Some(value)) => {
                        self.constants.insert(name, value);
                    }
                    _ => {
                        state.emit_error_here("Internal error: malformed .defvar".into());
                    }
                }
            }

            Directive::Locate => {
                if let Some(addr) = self.take_u32_arg() {
                    self.start_block(addr);
                }
            }

            Directive::Zeros => {
                if let Some(count) = self.take_u32_arg() {
                    self.pad_space(count as usize);
                }
            }

            Directive::Skip => {
                if let Some(count) = self.take_u32_arg() {
                    let next = self.current_address().wrapping_add(count);
                    self.start_block(next);
                }
            }

            Directive::PadAlign | Directive::Align => {
                let Some(bits) = self.take_u32_arg() else {
                    return;
                };
                if bits >= 32 {
                    state.emit_error_here(format!("Invalid alignment '{bits}'"));
                    return;
                }
                if directive == Directive::PadAlign {
                    self.pad_align(bits);
                } else {
                    self.start_block_align(bits);
                }
            }

            Directive::Ascii => self.add_string_bytes(false),
            Directive::Asciz => self.add_string_bytes(true),
        }
        self.eval_stack = EvalStack::Inactive;
        self.active_directive = None;
    }

    fn on_instruction_pre(
        &mut self,
        state: &mut ParseState<'src>,
        info: ParseInfo,
        extended: bool,
    ) {
        self.mode = EvalMode::RelDoublePass;
        self.build_key = info.key;
        self.build_extended = extended;
        self.build_line = state.lexer.current_line();
        self.build_line_number = state.lexer.line_number();
        self.operand_scan_begin = self.program.operand_pool.len();
    }

    fn on_instruction_post(
        &mut self,
        _state: &mut ParseState<'src>,
        _info: ParseInfo,
        _extended: bool,
    ) {
        self.finish_instruction();
    }

    fn on_operand_pre(&mut self, state: &mut ParseState<'src>) {
        self.operand_col_start = state.lexer.col_number();
    }

    fn on_operand_post(&mut self, state: &mut ParseState<'src>) {
        let Some(root) = self.expr_stack.pop() else {
            state.emit_error_here("Internal error: operand produced no expression".into());
            return;
        };
        let end = state.lexer.col_number();
        let span = Interval::new(
            self.operand_col_start,
            end.saturating_sub(self.operand_col_start),
        );
        self.fixups.push(OperandFixup {
            root,
            line: self.build_line_number,
            source_line: self.build_line,
        });
        self.program.operand_pool.push((span, 0));
    }

    fn on_resolved_expr_post(&mut self, _state: &mut ParseState<'src>) {
        if matches!(
            self.active_directive,
            Some(
                Directive::Byte
                    | Directive::TwoByte
                    | Directive::FourByte
                    | Directive::EightByte
                    | Directive::Float
                    | Directive::Double
            )
        ) {
            self.flush_data_values();
        }
    }

    fn on_operator(&mut self, state: &mut ParseState<'src>, op: AsmOp) {
        if self.mode == EvalMode::RelDoublePass {
            self.eval_operator_rel(state, op);
        } else {
            self.eval_operator_abs(state, op);
        }
    }

    fn on_terminal(&mut self, state: &mut ParseState<'src>, terminal: Terminal, tok: Token<'src>) {
        if terminal == Terminal::Str {
            self.string_lit = tok.text;
        } else if self.mode == EvalMode::RelDoublePass {
            self.eval_terminal_rel(state, terminal, tok);
        } else {
            self.eval_terminal_abs(state, terminal, tok);
        }
    }

    fn on_hi_addr(&mut self, state: &mut ParseState<'src>, id: &'src str) {
        // High-adjusted half: ((sym + 0x8000) >> 16) & 0xFFFF, chosen so
        // the low half sign-extends back to the full value.
        if self.mode == EvalMode::RelDoublePass {
            self.push_sym_abs(state, id);
            self.apply_binary_lit(AsmOp::Add, 0x8000);
            self.apply_binary_lit(AsmOp::Rsh, 16);
            self.apply_binary_lit(AsmOp::And, 0xFFFF);
        } else {
            let Some(val) = self.abs_lookup(state, id) else {
                return;
            };
            self.push_cast(val);
            self.push_cast(0x8000);
            self.eval_operator_abs(state, AsmOp::Add);
            self.push_cast(16);
            self.eval_operator_abs(state, AsmOp::Rsh);
            self.push_cast(0xFFFF);
            self.eval_operator_abs(state, AsmOp::And);
        }
    }

    fn on_lo_addr(&mut self, state: &mut ParseState<'src>, id: &'src str) {
        if self.mode == EvalMode::RelDoublePass {
            self.push_sym_abs(state, id);
            self.apply_binary_lit(AsmOp::And, 0xFFFF);
        } else {
            let Some(val) = self.abs_lookup(state, id) else {
                return;
            };
            self.push_cast(val);
            self.push_cast(0xFFFF);
            self.eval_operator_abs(state, AsmOp::And);
        }
    }

    fn on_open_paren(&mut self, _state: &mut ParseState<'src>, kind: ParenKind) {
        if kind == ParenKind::RelConv && self.mode == EvalMode::RelDoublePass {
            self.grave_depth += 1;
        }
    }

    fn on_close_paren(&mut self, state: &mut ParseState<'src>, kind: ParenKind) {
        if kind != ParenKind::RelConv {
            return;
        }
        if self.mode == EvalMode::RelDoublePass {
            self.grave_depth = self.grave_depth.saturating_sub(1);
            let Some(child) = self.expr_stack.pop() else {
                state.emit_error_here("Internal error: empty relative group".into());
                return;
            };
            let inst_addr = self.current_address();
            let idx = self.nodes.len();
            self.nodes.push(ExprNode::PcRel { child, inst_addr });
            self.expr_stack.push(idx);
        } else {
            let addr = self.current_address();
            self.push_cast(u64::from(addr));
            self.eval_operator_abs(state, AsmOp::Sub);
        }
    }

    fn on_label_decl(&mut self, state: &mut ParseState<'src>, name: &'src str) {
        if self.defined.contains(name) {
            state.emit_error_here(format!("Label/Constant {name} is already defined"));
            return;
        }
        let addr = self.current_address();
        self.labels.insert(name, addr);
        self.defined.insert(name);
    }

    fn on_var_decl(&mut self, state: &mut ParseState<'src>, name: &'src str) {
        if self.defined.contains(name) {
            state.emit_error_here(format!("Label/Constant {name} is already defined"));
            return;
        }
        self.active_var = Some(name);
        self.defined.insert(name);
    }

    fn on_parse_complete(&mut self, state: &mut ParseState<'src>) {
        self.run_fixups(state);
    }
}

/// Parse `source` into IR with all operand fixups resolved.
///
/// # Errors
///
/// Returns the first parse, symbol-resolution, or evaluation error.
pub fn build_ir(source: &str, base_address: u32) -> Result<IrProgram<'_>, AssemblerError> {
    let mut generator = IrGenerator::new(base_address);
    match crate::parser::parse_with_visitor(&mut generator, source) {
        Some(err) => Err(err),
        None => Ok(generator.into_program()),
    }
}

// Wrapping integer arithmetic over the directive element widths.
trait IntArith: Copy {
    fn arith_add(self, o: Self) -> Self;
    fn arith_sub(self, o: Self) -> Self;
    fn arith_mul(self, o: Self) -> Self;
    fn arith_div(self, o: Self) -> Option<Self>
    where
        Self: Sized;
    fn arith_and(self, o: Self) -> Self;
    fn arith_or(self, o: Self) -> Self;
    fn arith_xor(self, o: Self) -> Self;
    fn arith_shl(self, o: Self) -> Self;
    fn arith_shr(self, o: Self) -> Self;
    fn arith_neg(self) -> Self;
    fn arith_not(self) -> Self;
}

macro_rules! impl_int_arith {
    ($($ty:ty),*) => {$(
        impl IntArith for $ty {
            fn arith_add(self, o: Self) -> Self { self.wrapping_add(o) }
            fn arith_sub(self, o: Self) -> Self { self.wrapping_sub(o) }
            fn arith_mul(self, o: Self) -> Self { self.wrapping_mul(o) }
            fn arith_div(self, o: Self) -> Option<Self> { self.checked_div(o) }
            fn arith_and(self, o: Self) -> Self { self & o }
            fn arith_or(self, o: Self) -> Self { self | o }
            fn arith_xor(self, o: Self) -> Self { self ^ o }
            fn arith_shl(self, o: Self) -> Self {
                u32::try_from(o).ok().and_then(|s| self.checked_shl(s)).unwrap_or(0)
            }
            fn arith_shr(self, o: Self) -> Self {
                u32::try_from(o).ok().and_then(|s| self.checked_shr(s)).unwrap_or(0)
            }
            fn arith_neg(self) -> Self { self.wrapping_neg() }
            fn arith_not(self) -> Self { !self }
        }
    )*};
}

impl_int_arith!(u8, u16, u32, u64);
