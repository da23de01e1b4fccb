//! Recursive-descent parser for the Gekko assembly grammar.
//!
//! The parser never builds IR itself; it issues callouts to a [`Visitor`]
//! at every point of interest (terminals, operators, operand boundaries,
//! directives, label declarations). The IR generator is one visitor; a
//! syntax highlighter consuming the same grammar is another. Any callout
//! may record an error into the shared [`ParseState`], and the parser
//! checks for one after every callout and every production: the first
//! error aborts the parse.
//!
//! ```text
//! program  := (label? line)? ( EOL label? line )* EOF
//! line     := '.' directive | instruction | ε
//! operand  := bitor ; bitor := bitxor ('|' bitxor)* ; … ; unary := ('-'|'~') unary | paren
//! paren    := '(' bitor ')' | '`' bitor '`' | base
//! base     := integer | id ('@' ('ha'|'l'))? | ppc-builtin | '.'
//! ```

use alloc::format;
use alloc::string::String;

use crate::error::AssemblerError;
use crate::lexer::{IdentifierMatchRule, Lexer, Token, TokenKind};
use crate::tables::{self, Directive, ParseAlg, ParseInfo};

/// Expression operators, reported after their operands have been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AsmOp {
    Or,
    Xor,
    And,
    Lsh,
    Rsh,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Not,
}

/// Terminal classification for [`Visitor::on_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Terminal {
    Hex,
    Dec,
    Oct,
    Bin,
    Flt,
    Str,
    Id,
    Gpr,
    Fpr,
    Spr,
    CrField,
    Lt,
    Gt,
    Eq,
    So,
    Dot,
}

/// The two grouping constructs: round parens group; back-ticks convert the
/// enclosed absolute value to an offset from the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenKind {
    /// `( … )`
    Normal,
    /// `` ` … ` ``
    RelConv,
}

/// Shared parse state: the lexer plus the single-cell error slot.
#[derive(Debug)]
pub struct ParseState<'src> {
    /// The lexer; visitors may inspect positions for span bookkeeping.
    pub lexer: Lexer<'src>,
    /// First error encountered, if any. Set once; never overwritten.
    pub error: Option<AssemblerError>,
    eof: bool,
}

impl<'src> ParseState<'src> {
    fn new(input: &'src str) -> Self {
        Self {
            lexer: Lexer::new(input),
            error: None,
            eof: false,
        }
    }

    /// Whether the next token has the given kind.
    pub fn has_token(&mut self, kind: TokenKind) -> bool {
        self.lexer.lookahead_kind() == kind
    }

    /// Consume a token of the given kind, or record an error.
    pub fn parse_token(&mut self, kind: TokenKind) {
        let tok = self.lexer.lookahead();
        if tok.kind == kind {
            self.lexer.eat();
        } else {
            self.emit_error_here(format!(
                "Expected '{}' but found '{}'",
                kind.type_str(),
                tok.val_str()
            ));
        }
    }

    /// Record an error at the position of the next unconsumed token.
    ///
    /// If that token is lexically invalid its own reason and sub-span win
    /// over the caller's message.
    pub fn emit_error_here(&mut self, message: String) {
        let tok = self.lexer.lookahead();
        let error = if tok.kind == TokenKind::Invalid {
            AssemblerError {
                message: tok.invalid_reason.into(),
                source_line: self.lexer.current_line().into(),
                line: self.lexer.line_number(),
                col: self.lexer.col_number() + tok.invalid_region.begin,
                len: tok.invalid_region.len,
            }
        } else {
            AssemblerError {
                message,
                source_line: self.lexer.current_line().into(),
                line: self.lexer.line_number(),
                col: self.lexer.col_number(),
                len: tok.text.len(),
            }
        };
        self.error = Some(error);
    }
}

/// Parser callouts. Every method has a no-op default so collaborators only
/// implement the events they care about.
///
/// `Pre` callouts fire before the construct is parsed, `Post` callouts
/// after it has been fully parsed; operator callouts fire after their
/// operands. A callout may abort the parse by recording an error through
/// [`ParseState::emit_error_here`] (or by setting `state.error` directly).
#[allow(unused_variables)]
pub trait Visitor<'src> {
    /// A directive name was recognized.
    fn on_directive_pre(&mut self, state: &mut ParseState<'src>, directive: Directive) {}
    /// A directive's argument list has been parsed.
    fn on_directive_post(&mut self, state: &mut ParseState<'src>, directive: Directive) {}
    /// A mnemonic was recognized.
    fn on_instruction_pre(
        &mut self,
        state: &mut ParseState<'src>,
        info: ParseInfo,
        extended: bool,
    ) {
    }
    /// An instruction's operand list has been parsed.
    fn on_instruction_post(
        &mut self,
        state: &mut ParseState<'src>,
        info: ParseInfo,
        extended: bool,
    ) {
    }
    /// An instruction operand is about to be parsed.
    fn on_operand_pre(&mut self, state: &mut ParseState<'src>) {}
    /// An instruction operand has been parsed.
    fn on_operand_post(&mut self, state: &mut ParseState<'src>) {}
    /// A directive expression (single-pass context) is about to be parsed.
    fn on_resolved_expr_pre(&mut self, state: &mut ParseState<'src>) {}
    /// A directive expression has been parsed.
    fn on_resolved_expr_post(&mut self, state: &mut ParseState<'src>) {}
    /// An operator, after both of its operands (or its single operand).
    fn on_operator(&mut self, state: &mut ParseState<'src>, op: AsmOp) {}
    /// A terminal, before it is consumed.
    fn on_terminal(&mut self, state: &mut ParseState<'src>, terminal: Terminal, tok: Token<'src>) {
    }
    /// `id@ha`, before the tokens are consumed.
    fn on_hi_addr(&mut self, state: &mut ParseState<'src>, id: &'src str) {}
    /// `id@l`, before the tokens are consumed.
    fn on_lo_addr(&mut self, state: &mut ParseState<'src>, id: &'src str) {}
    /// An opening paren or back-tick.
    fn on_open_paren(&mut self, state: &mut ParseState<'src>, kind: ParenKind) {}
    /// A closing paren or back-tick, before it is consumed.
    fn on_close_paren(&mut self, state: &mut ParseState<'src>, kind: ParenKind) {}
    /// `name:` at statement start, before the tokens are consumed.
    fn on_label_decl(&mut self, state: &mut ParseState<'src>, name: &'src str) {}
    /// `.defvar name`, before the name is consumed.
    fn on_var_decl(&mut self, state: &mut ParseState<'src>, name: &'src str) {}
    /// The parse is aborting with an error.
    fn on_error(&mut self, state: &mut ParseState<'src>) {}
    /// The whole input parsed without error.
    fn on_parse_complete(&mut self, state: &mut ParseState<'src>) {}
}

/// A visitor that does nothing; useful for grammar-only consumers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisitor;

impl<'src> Visitor<'src> for NullVisitor {}

/// Parse `input`, routing events into `visitor`. Returns the first error.
pub fn parse_with_visitor<'src, V: Visitor<'src>>(
    visitor: &mut V,
    input: &'src str,
) -> Option<AssemblerError> {
    let mut state = ParseState::new(input);
    parse_program(&mut state, visitor);

    if state.error.is_none() {
        visitor.on_parse_complete(&mut state);
    }
    if state.error.is_some() {
        visitor.on_error(&mut state);
    }
    state.error
}

// ── Expression grammar ──────────────────────────────────────────────────

fn match_operand_first(tok: Token<'_>) -> bool {
    matches!(
        tok.kind,
        TokenKind::Minus
            | TokenKind::Tilde
            | TokenKind::Lparen
            | TokenKind::Grave
            | TokenKind::Identifier
            | TokenKind::DecLit
            | TokenKind::OctLit
            | TokenKind::HexLit
            | TokenKind::BinLit
            | TokenKind::Dot
            | TokenKind::Gpr
            | TokenKind::Fpr
            | TokenKind::Spr
            | TokenKind::CrField
            | TokenKind::Lt
            | TokenKind::Gt
            | TokenKind::Eq
            | TokenKind::So
    )
}

fn parse_imm<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead();
    let terminal = match tok.kind {
        TokenKind::HexLit => Terminal::Hex,
        TokenKind::DecLit => Terminal::Dec,
        TokenKind::OctLit => Terminal::Oct,
        TokenKind::BinLit => Terminal::Bin,
        _ => {
            state.emit_error_here(format!(
                "Invalid {} with value '{}'",
                tok.kind.type_str(),
                tok.val_str()
            ));
            return;
        }
    };
    visitor.on_terminal(state, terminal, tok);
    if state.error.is_some() {
        return;
    }
    state.lexer.eat();
}

fn parse_id<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead();
    if tok.kind == TokenKind::Identifier {
        visitor.on_terminal(state, Terminal::Id, tok);
        if state.error.is_some() {
            return;
        }
        state.lexer.eat();
    } else {
        state.emit_error_here(format!(
            "Expected an identifier, but found '{}'",
            tok.val_str()
        ));
    }
}

fn parse_id_location<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let toks = state.lexer.lookahead_n::<3>();

    if toks[1].kind == TokenKind::At {
        if toks[2].text == "ha" {
            visitor.on_hi_addr(state, toks[0].text);
            if state.error.is_some() {
                return;
            }
            state.lexer.eat_n(3);
            return;
        } else if toks[2].text == "l" {
            visitor.on_lo_addr(state, toks[0].text);
            if state.error.is_some() {
                return;
            }
            state.lexer.eat_n(3);
            return;
        }
    }

    parse_id(state, visitor);
}

fn parse_ppc_builtin<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead();
    let terminal = match tok.kind {
        TokenKind::Gpr => Terminal::Gpr,
        TokenKind::Fpr => Terminal::Fpr,
        TokenKind::Spr => Terminal::Spr,
        TokenKind::CrField => Terminal::CrField,
        TokenKind::Lt => Terminal::Lt,
        TokenKind::Gt => Terminal::Gt,
        TokenKind::Eq => Terminal::Eq,
        TokenKind::So => Terminal::So,
        _ => {
            state.emit_error_here(format!(
                "Unexpected token '{}' in ppc builtin",
                tok.val_str()
            ));
            return;
        }
    };
    visitor.on_terminal(state, terminal, tok);
    if state.error.is_some() {
        return;
    }
    state.lexer.eat();
}

fn parse_baseexpr<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    match state.lexer.lookahead_kind() {
        TokenKind::HexLit | TokenKind::DecLit | TokenKind::OctLit | TokenKind::BinLit => {
            parse_imm(state, visitor);
        }

        TokenKind::Identifier => parse_id_location(state, visitor),

        TokenKind::Gpr
        | TokenKind::Fpr
        | TokenKind::Spr
        | TokenKind::CrField
        | TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::Eq
        | TokenKind::So => parse_ppc_builtin(state, visitor),

        TokenKind::Dot => {
            let tok = state.lexer.lookahead();
            visitor.on_terminal(state, Terminal::Dot, tok);
            if state.error.is_some() {
                return;
            }
            state.lexer.eat();
        }

        _ => {
            let tok = state.lexer.lookahead().val_str().to_string();
            state.emit_error_here(format!(
                "Unexpected token '{}' in expression",
                tok
            ));
        }
    }
}

fn parse_paren<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    if state.has_token(TokenKind::Lparen) {
        visitor.on_open_paren(state, ParenKind::Normal);
        if state.error.is_some() {
            return;
        }

        state.lexer.eat();
        parse_bitor(state, visitor);
        if state.error.is_some() {
            return;
        }

        if state.has_token(TokenKind::Rparen) {
            visitor.on_close_paren(state, ParenKind::Normal);
        }
        state.parse_token(TokenKind::Rparen);
    } else if state.has_token(TokenKind::Grave) {
        visitor.on_open_paren(state, ParenKind::RelConv);

        state.lexer.eat();
        parse_bitor(state, visitor);
        if state.error.is_some() {
            return;
        }

        if state.has_token(TokenKind::Grave) {
            visitor.on_close_paren(state, ParenKind::RelConv);
        }
        state.parse_token(TokenKind::Grave);
    } else {
        parse_baseexpr(state, visitor);
    }
}

fn parse_unary<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let kind = state.lexer.lookahead_kind();
    if kind == TokenKind::Minus || kind == TokenKind::Tilde {
        state.lexer.eat();
        parse_unary(state, visitor);
        if state.error.is_some() {
            return;
        }

        let op = if kind == TokenKind::Minus {
            AsmOp::Neg
        } else {
            AsmOp::Not
        };
        visitor.on_operator(state, op);
    } else {
        parse_paren(state, visitor);
    }
}

macro_rules! binary_level {
    ($name:ident, $next:ident, $( $tok:ident => $op:ident ),+) => {
        fn $name<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
            $next(state, visitor);
            if state.error.is_some() {
                return;
            }

            loop {
                let op = match state.lexer.lookahead_kind() {
                    $( TokenKind::$tok => AsmOp::$op, )+
                    _ => break,
                };
                state.lexer.eat();
                $next(state, visitor);
                if state.error.is_some() {
                    return;
                }
                visitor.on_operator(state, op);
            }
        }
    };
}

binary_level!(parse_multiplication, parse_unary, Star => Mul, Slash => Div);
binary_level!(parse_addition, parse_multiplication, Plus => Add, Minus => Sub);
binary_level!(parse_shift, parse_addition, Lsh => Lsh, Rsh => Rsh);
binary_level!(parse_bitand, parse_shift, Ampersand => And);
binary_level!(parse_bitxor, parse_bitand, Caret => Xor);
binary_level!(parse_bitor, parse_bitxor, Pipe => Or);

// ── Statements ──────────────────────────────────────────────────────────

fn parse_operand<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    visitor.on_operand_pre(state);
    parse_bitor(state, visitor);
    if state.error.is_some() {
        return;
    }
    visitor.on_operand_post(state);
}

#[derive(Clone, Copy)]
enum Step {
    Operand,
    Comma,
    Lparen,
    Rparen,
    OptComma,
}

fn parse_operand_list<'src, V: Visitor<'src>>(
    state: &mut ParseState<'src>,
    visitor: &mut V,
    alg: ParseAlg,
) {
    use Step::{Comma, Lparen, OptComma, Operand, Rparen};

    let steps: &[Step] = match alg {
        ParseAlg::None => return,
        ParseAlg::NoneOrOp1 => {
            if match_operand_first(state.lexer.lookahead()) {
                parse_operand(state, visitor);
            }
            return;
        }
        ParseAlg::Op1 => &[Operand],
        ParseAlg::Op1Or2 => &[Operand, OptComma, Operand],
        ParseAlg::Op2Or3 => &[Operand, Comma, Operand, OptComma, Operand],
        ParseAlg::Op1Off1 => &[Operand, Comma, Operand, Lparen, Operand, Rparen],
        ParseAlg::Op2 => &[Operand, Comma, Operand],
        ParseAlg::Op3 => &[Operand, Comma, Operand, Comma, Operand],
        ParseAlg::Op4 => &[Operand, Comma, Operand, Comma, Operand, Comma, Operand],
        ParseAlg::Op5 => &[
            Operand, Comma, Operand, Comma, Operand, Comma, Operand, Comma, Operand,
        ],
        ParseAlg::Op1Off1Op2 => &[
            Operand, Comma, Operand, Lparen, Operand, Rparen, Comma, Operand, Comma, Operand,
        ],
    };

    for step in steps {
        match step {
            Operand => parse_operand(state, visitor),
            Comma => state.parse_token(TokenKind::Comma),
            Lparen => state.parse_token(TokenKind::Lparen),
            Rparen => state.parse_token(TokenKind::Rparen),
            OptComma => {
                if state.has_token(TokenKind::Comma) {
                    state.parse_token(TokenKind::Comma);
                } else {
                    return;
                }
            }
        }
        if state.error.is_some() {
            return;
        }
    }
}

fn parse_instruction<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    state.lexer.set_match_rule(IdentifierMatchRule::Mnemonic);

    let mnemonic_token = state.lexer.lookahead();
    if mnemonic_token.kind != TokenKind::Identifier {
        // Empty line; nothing to do.
        state.lexer.set_match_rule(IdentifierMatchRule::Typical);
        return;
    }

    let (info, extended) = match tables::find_base(mnemonic_token.text) {
        Some(info) => (info, false),
        None => match tables::find_extended(mnemonic_token.text) {
            Some(info) => (info, true),
            None => {
                state.emit_error_here(format!(
                    "Unknown or unsupported mnemonic '{}'",
                    mnemonic_token.val_str()
                ));
                return;
            }
        },
    };

    visitor.on_instruction_pre(state, info, extended);
    if state.error.is_some() {
        return;
    }

    state.lexer.eat_and_reset();

    parse_operand_list(state, visitor, info.alg);
    if state.error.is_some() {
        return;
    }

    visitor.on_instruction_post(state, info, extended);
}

fn parse_label<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let toks = state.lexer.lookahead_n::<2>();

    if toks[0].kind == TokenKind::Identifier && toks[1].kind == TokenKind::Colon {
        visitor.on_label_decl(state, toks[0].text);
        if state.error.is_some() {
            return;
        }
        state.lexer.eat_n(2);
    }
}

fn parse_resolved_expr<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    visitor.on_resolved_expr_pre(state);
    parse_bitor(state, visitor);
    if state.error.is_some() {
        return;
    }
    visitor.on_resolved_expr_post(state);
}

fn parse_expression_list<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    parse_resolved_expr(state, visitor);
    if state.error.is_some() {
        return;
    }

    while state.has_token(TokenKind::Comma) {
        state.lexer.eat();
        parse_resolved_expr(state, visitor);
        if state.error.is_some() {
            return;
        }
    }
}

fn parse_float<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead_float();
    if tok.kind != TokenKind::FloatLit {
        state.emit_error_here("Invalid floating point literal".into());
        return;
    }
    visitor.on_terminal(state, Terminal::Flt, tok);
    if state.error.is_some() {
        return;
    }
    state.lexer.eat();
}

fn parse_float_list<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    parse_float(state, visitor);
    if state.error.is_some() {
        return;
    }

    while state.has_token(TokenKind::Comma) {
        state.lexer.eat();
        parse_float(state, visitor);
        if state.error.is_some() {
            return;
        }
    }
}

fn parse_defvar<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead();
    if tok.kind == TokenKind::Identifier {
        visitor.on_var_decl(state, tok.text);
        if state.error.is_some() {
            return;
        }
        state.lexer.eat();

        state.parse_token(TokenKind::Comma);
        if state.error.is_some() {
            return;
        }

        parse_resolved_expr(state, visitor);
    } else {
        state.emit_error_here(format!(
            "Expected an identifier, but found '{}'",
            tok.val_str()
        ));
    }
}

fn parse_string<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    let tok = state.lexer.lookahead();
    if tok.kind == TokenKind::StringLit {
        visitor.on_terminal(state, Terminal::Str, tok);
        if state.error.is_some() {
            return;
        }
        state.lexer.eat();
    } else {
        state.emit_error_here(format!(
            "Expected a string literal, but found '{}'",
            tok.val_str()
        ));
    }
}

fn parse_directive<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    state.lexer.set_match_rule(IdentifierMatchRule::Directive);

    let tok = state.lexer.lookahead();
    if tok.kind != TokenKind::Identifier {
        state.emit_error_here(format!(
            "Unexpected token '{}' in directive type",
            tok.val_str()
        ));
        return;
    }

    let Some(directive) = tables::find_directive(tok.text) else {
        state.emit_error_here(format!("Unknown assembler directive '{}'", tok.val_str()));
        return;
    };

    visitor.on_directive_pre(state, directive);
    if state.error.is_some() {
        return;
    }

    state.lexer.eat_and_reset();

    match directive {
        Directive::Byte | Directive::TwoByte | Directive::FourByte | Directive::EightByte => {
            parse_expression_list(state, visitor);
        }

        Directive::Float | Directive::Double => parse_float_list(state, visitor),

        Directive::Locate | Directive::Zeros | Directive::Skip => {
            parse_resolved_expr(state, visitor);
        }

        Directive::PadAlign | Directive::Align => parse_imm(state, visitor),

        Directive::DefVar => parse_defvar(state, visitor),

        Directive::Ascii | Directive::Asciz => parse_string(state, visitor),
    }

    if state.error.is_some() {
        return;
    }

    visitor.on_directive_post(state, directive);
}

fn parse_line<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    if state.has_token(TokenKind::Dot) {
        state.parse_token(TokenKind::Dot);
        parse_directive(state, visitor);
    } else {
        parse_instruction(state, visitor);
    }
}

fn parse_program<'src, V: Visitor<'src>>(state: &mut ParseState<'src>, visitor: &mut V) {
    if state.lexer.lookahead_kind() == TokenKind::Eof {
        state.eof = true;
        return;
    }
    parse_label(state, visitor);
    if state.error.is_some() {
        return;
    }
    parse_line(state, visitor);
    if state.error.is_some() {
        return;
    }

    while !state.eof && state.error.is_none() {
        match state.lexer.lookahead_kind() {
            TokenKind::Eof => state.eof = true,
            TokenKind::Eol => {
                state.lexer.eat();
                parse_label(state, visitor);
                if state.error.is_some() {
                    return;
                }
                parse_line(state, visitor);
            }
            _ => {
                let tok = state.lexer.lookahead().val_str().to_string();
                state.emit_error_here(format!(
                    "Unexpected token '{}' where line should have ended",
                    tok
                ));
            }
        }
    }
}
