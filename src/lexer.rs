//! Lexer for Gekko assembly source text.
//!
//! Tokens borrow their text from the source string; no per-token heap
//! allocation happens while scanning. The lexer is restartable within a
//! line: the active [`IdentifierMatchRule`] can change while tokens are
//! buffered, in which case the buffered tokens are fed back and re-lexed
//! from their starting position under the new rule. This is what lets
//! `bne+` lex as one identifier in mnemonic position while `1+2` stays
//! three tokens in operand position.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::error::Interval;
use crate::tables::{self, DfaNode, FLOAT_DFA, STRING_DFA};

/// The type of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Lexically malformed input; the token carries a reason.
    Invalid,
    /// An identifier: label, constant, or mnemonic.
    Identifier,
    /// A double-quoted string literal (quotes included in the text).
    StringLit,
    /// `0x…` integer literal.
    HexLit,
    /// Decimal integer literal.
    DecLit,
    /// `0…` octal integer literal.
    OctLit,
    /// `0b…` binary integer literal.
    BinLit,
    /// Floating-point literal (only produced by [`Lexer::lookahead_float`]).
    FloatLit,
    /// General-purpose register `r0`..`r31`.
    Gpr,
    /// Floating-point register `f0`..`f31`.
    Fpr,
    /// Condition register field `cr0`..`cr7`.
    CrField,
    /// Named special-purpose register.
    Spr,
    /// CR bit `lt`.
    Lt,
    /// CR bit `gt`.
    Gt,
    /// CR bit `eq`.
    Eq,
    /// CR bit `so`.
    So,
    /// End of line; separates statements.
    Eol,
    /// End of input.
    Eof,
    /// `.`
    Dot,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `(`
    Lparen,
    /// `)`
    Rparen,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `&`
    Ampersand,
    /// `<<`
    Lsh,
    /// `>>`
    Rsh,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `~`
    Tilde,
    /// `` ` ``
    Grave,
    /// `@`
    At,
}

impl TokenKind {
    /// Display name used in diagnostics.
    #[must_use]
    pub fn type_str(self) -> &'static str {
        match self {
            TokenKind::Invalid => "Invalid",
            TokenKind::Identifier => "Identifier",
            TokenKind::StringLit => "String Literal",
            TokenKind::HexLit => "Hexadecimal Literal",
            TokenKind::DecLit => "Decimal Literal",
            TokenKind::OctLit => "Octal Literal",
            TokenKind::BinLit => "Binary Literal",
            TokenKind::FloatLit => "Float Literal",
            TokenKind::Gpr => "GPR",
            TokenKind::Fpr => "FPR",
            TokenKind::CrField => "CR Field",
            TokenKind::Spr => "SPR",
            TokenKind::Lt | TokenKind::Gt | TokenKind::Eq | TokenKind::So => "CR Bit",
            TokenKind::Eol => "End of Line",
            TokenKind::Eof => "End of File",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::Lparen => "(",
            TokenKind::Rparen => ")",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Ampersand => "&",
            TokenKind::Lsh => "<<",
            TokenKind::Rsh => ">>",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Tilde => "~",
            TokenKind::Grave => "`",
            TokenKind::At => "@",
        }
    }
}

/// A token produced by the lexer. Text is a slice of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    /// Token classification.
    pub kind: TokenKind,
    /// Source text of the token.
    pub text: &'src str,
    /// Reason the token is invalid; empty for valid tokens.
    pub invalid_reason: &'static str,
    /// Erroneous sub-region, relative to the token start.
    pub invalid_region: Interval,
}

macro_rules! impl_eval_int {
    ($(#[$doc:meta])* $fn_name:ident, $ty:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $fn_name(&self) -> Option<$ty> {
            match self.kind {
                TokenKind::HexLit => <$ty>::from_str_radix(self.text.get(2..)?, 16).ok(),
                TokenKind::DecLit => self.text.parse().ok(),
                TokenKind::OctLit => <$ty>::from_str_radix(self.text.get(1..)?, 8).ok(),
                TokenKind::BinLit => <$ty>::from_str_radix(self.text.get(2..)?, 2).ok(),
                TokenKind::Gpr | TokenKind::Fpr => self.text.get(1..)?.parse().ok(),
                TokenKind::CrField => self.text.get(2..)?.parse().ok(),
                TokenKind::Spr => {
                    tables::spr_value(self.text).and_then(|v| <$ty>::try_from(v).ok())
                }
                TokenKind::Lt => Some(0),
                TokenKind::Gt => Some(1),
                TokenKind::Eq => Some(2),
                TokenKind::So => Some(3),
                _ => None,
            }
        }
    };
}

impl<'src> Token<'src> {
    /// Token text for diagnostics, with placeholders for EOL/EOF.
    #[must_use]
    pub fn val_str(&self) -> &str {
        match self.kind {
            TokenKind::Eol => "<EOL>",
            TokenKind::Eof => "<EOF>",
            _ => self.text,
        }
    }

    impl_eval_int!(
        /// Evaluate an integer-valued token as `u8`. `None` if the token is
        /// not integer-valued or the literal overflows the width.
        eval_u8, u8
    );
    impl_eval_int!(
        /// Evaluate an integer-valued token as `u16`.
        eval_u16, u16
    );
    impl_eval_int!(
        /// Evaluate an integer-valued token as `u32`.
        eval_u32, u32
    );
    impl_eval_int!(
        /// Evaluate an integer-valued token as `u64`.
        eval_u64, u64
    );

    /// Evaluate a float literal as `f32`.
    #[must_use]
    pub fn eval_f32(&self) -> Option<f32> {
        if self.kind == TokenKind::FloatLit {
            self.text.parse().ok()
        } else {
            None
        }
    }

    /// Evaluate a float literal as `f64`.
    #[must_use]
    pub fn eval_f64(&self) -> Option<f64> {
        if self.kind == TokenKind::FloatLit {
            self.text.parse().ok()
        } else {
            None
        }
    }
}

/// Decode the escape sequences of a quoted string literal into raw bytes.
///
/// `literal` includes the surrounding quotes and must have passed the
/// string DFA. Octal escapes take at most three digits; hex escapes take
/// every following hex digit and truncate to a byte.
pub fn convert_string_literal(literal: &str, out: &mut Vec<u8>) {
    let bytes = literal.as_bytes();
    let end = bytes.len().saturating_sub(1);
    let mut i = 1;
    while i < end {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        match bytes[i] {
            b'0'..=b'7' => {
                let mut octal: u8 = 0;
                let mut digits = 0;
                while i < end && digits < 3 && (b'0'..=b'7').contains(&bytes[i]) {
                    octal = (octal << 3).wrapping_add(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push(octal);
            }
            b'x' => {
                i += 1;
                let mut hex: u8 = 0;
                while i < end && bytes[i].is_ascii_hexdigit() {
                    let nib = match bytes[i] {
                        b'a'..=b'f' => bytes[i] - b'a' + 10,
                        b'A'..=b'F' => bytes[i] - b'A' + 10,
                        digit => digit - b'0',
                    };
                    hex = (hex << 4).wrapping_add(nib);
                    i += 1;
                }
                out.push(hex);
            }
            simple => {
                out.push(match simple {
                    b'\'' => 0x27,
                    b'"' => 0x22,
                    b'?' => 0x3f,
                    b'\\' => 0x5c,
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => 0x0a,
                    b'r' => 0x0d,
                    b't' => 0x09,
                    b'v' => 0x0b,
                    other => other,
                });
                i += 1;
            }
        }
    }
}

/// Which characters may appear in an identifier, selected by the parser
/// for the position being lexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierMatchRule {
    /// `[A-Za-z_][A-Za-z0-9_]*`.
    Typical,
    /// Additionally allows `+`, `-`, `.` inside, for variant suffixes and
    /// branch-prediction hints.
    Mnemonic,
    /// Additionally allows a leading digit, for `.2byte` and friends.
    Directive,
}

#[derive(Debug, Clone, Copy, Default)]
struct CursorPos {
    index: usize,
    line: usize,
    col: usize,
}

/// The lexer. Tokens are produced on demand into a lookahead buffer.
#[derive(Debug)]
pub struct Lexer<'src> {
    src: &'src str,
    pos: CursorPos,
    scan: CursorPos,
    buffer: VecDeque<(CursorPos, Token<'src>)>,
    match_rule: IdentifierMatchRule,
}

impl<'src> Lexer<'src> {
    /// Create a lexer over `src`.
    #[must_use]
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            pos: CursorPos::default(),
            scan: CursorPos::default(),
            buffer: VecDeque::new(),
            match_rule: IdentifierMatchRule::Typical,
        }
    }

    /// 0-based line of the next unconsumed token.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.buffer.front().map_or(self.pos.line, |(p, _)| p.line)
    }

    /// 0-based column of the next unconsumed token.
    #[must_use]
    pub fn col_number(&self) -> usize {
        self.buffer.front().map_or(self.pos.col, |(p, _)| p.col)
    }

    /// The full source line containing the next unconsumed token, without
    /// its trailing newline.
    #[must_use]
    pub fn current_line(&self) -> &'src str {
        let index = self.buffer.front().map_or(self.pos.index, |(p, _)| p.index);
        let index = index.min(self.src.len());
        let begin = self.src[..index].rfind('\n').map_or(0, |i| i + 1);
        let end = self.src[index..]
            .find('\n')
            .map_or(self.src.len(), |i| index + i);
        &self.src[begin..end]
    }

    /// Change the identifier match rule. Buffered tokens are fed back and
    /// will be re-lexed under the new rule.
    pub fn set_match_rule(&mut self, rule: IdentifierMatchRule) {
        self.feedback();
        self.match_rule = rule;
    }

    /// Peek at the next token without consuming it.
    pub fn lookahead(&mut self) -> Token<'src> {
        if self.buffer.is_empty() {
            let pre = self.pos;
            let tok = self.lex_single();
            self.buffer.push_back((pre, tok));
        }
        self.buffer[0].1
    }

    /// Peek at the next token's kind.
    pub fn lookahead_kind(&mut self) -> TokenKind {
        self.lookahead().kind
    }

    /// Peek at the next `N` tokens.
    pub fn lookahead_n<const N: usize>(&mut self) -> [Token<'src>; N] {
        while self.buffer.len() < N {
            let pre = self.pos;
            let tok = self.lex_single();
            self.buffer.push_back((pre, tok));
        }
        let mut out = [self.buffer[0].1; N];
        for (slot, (_, tok)) in out.iter_mut().zip(self.buffer.iter()) {
            *slot = *tok;
        }
        out
    }

    /// Lex a float literal at the current position.
    ///
    /// Floats are only recognized on request because `1.0` is otherwise
    /// ambiguous with `1` `.` `0`. Any buffered tokens are fed back first.
    pub fn lookahead_float(&mut self) -> Token<'src> {
        self.feedback();
        self.skip_ws();

        let pre = self.pos;
        self.scan = self.pos;
        let failure = self.run_dfa(FLOAT_DFA);

        // Take at least one character on total mismatch so the error has
        // something to point at.
        if self.scan.index == pre.index {
            self.step();
        }

        let text = self.scan_finish_out();
        let tok = match failure {
            None => Token {
                kind: TokenKind::FloatLit,
                text,
                invalid_reason: "",
                invalid_region: Interval::empty(),
            },
            Some(reason) => Token {
                kind: TokenKind::Invalid,
                text,
                invalid_reason: reason,
                invalid_region: Interval::new(0, text.len()),
            },
        };
        self.buffer.push_back((pre, tok));
        tok
    }

    /// Consume the next token.
    pub fn eat(&mut self) {
        if self.buffer.is_empty() {
            self.lex_single();
        } else {
            self.buffer.pop_front();
        }
    }

    /// Consume the next `n` tokens.
    pub fn eat_n(&mut self, n: usize) {
        let mut consumed = 0;
        while !self.buffer.is_empty() && consumed < n {
            self.buffer.pop_front();
            consumed += 1;
        }
        for _ in consumed..n {
            self.lex_single();
        }
    }

    /// Consume the next token and restore the typical match rule.
    pub fn eat_and_reset(&mut self) {
        self.eat();
        self.set_match_rule(IdentifierMatchRule::Typical);
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn feedback(&mut self) {
        if let Some(&(pos, _)) = self.buffer.front() {
            self.pos = pos;
            self.scan = pos;
            self.buffer.clear();
        }
    }

    fn peek(&self) -> char {
        self.src[self.scan.index..].chars().next().unwrap_or('\0')
    }

    fn step(&mut self) -> char {
        let Some(c) = self.src[self.scan.index..].chars().next() else {
            return '\0';
        };
        if c == '\n' {
            self.scan.line += 1;
            self.scan.col = 0;
        } else {
            self.scan.col += 1;
        }
        self.scan.index += c.len_utf8();
        self.peek()
    }

    fn skip_ws(&mut self) {
        self.scan = self.pos;
        let mut c = self.peek();
        while c.is_whitespace() && c != '\n' {
            c = self.step();
        }
        // Comments run to end of line and are elided entirely.
        if c == '#' {
            while c != '\n' && c != '\0' {
                c = self.step();
            }
        }
        self.pos = self.scan;
    }

    fn scan_finish_out(&mut self) -> &'src str {
        let start = self.pos.index;
        self.pos = self.scan;
        &self.src[start..self.scan.index]
    }

    fn run_dfa(&mut self, dfa: &[DfaNode]) -> Option<&'static str> {
        let mut node = 0;
        loop {
            let c = self.peek();
            if c == '\0' {
                break;
            }
            let mut found = false;
            for &(pred, next) in dfa[node].edges {
                if pred(c) {
                    node = next;
                    found = true;
                    break;
                }
            }
            if !found {
                break;
            }
            self.step();
        }
        dfa[node].match_failure_reason
    }

    fn ident_head_extra(&self, h: char) -> bool {
        match self.match_rule {
            IdentifierMatchRule::Typical | IdentifierMatchRule::Mnemonic => false,
            IdentifierMatchRule::Directive => h.is_ascii_digit(),
        }
    }

    fn ident_extra(&self, c: char) -> bool {
        match self.match_rule {
            IdentifierMatchRule::Typical | IdentifierMatchRule::Directive => false,
            IdentifierMatchRule::Mnemonic => c == '+' || c == '-' || c == '.',
        }
    }

    fn classify_alnum(&self) -> TokenKind {
        let alnum = &self.src[self.pos.index..self.scan.index];

        fn valid_regnum(rn: &str) -> bool {
            let b = rn.as_bytes();
            match b {
                [d] => d.is_ascii_digit(),
                [hi, lo] if hi.is_ascii_digit() && lo.is_ascii_digit() => match hi {
                    b'1' | b'2' => true,
                    b'3' => *lo <= b'1',
                    _ => false,
                },
                _ => false,
            }
        }

        let bytes = alnum.as_bytes();
        if bytes[0] == b'r' && valid_regnum(&alnum[1..]) {
            TokenKind::Gpr
        } else if bytes[0] == b'f' && valid_regnum(&alnum[1..]) {
            TokenKind::Fpr
        } else if alnum.len() == 3
            && alnum.starts_with("cr")
            && (b'0'..=b'7').contains(&bytes[2])
        {
            TokenKind::CrField
        } else if alnum == "lt" {
            TokenKind::Lt
        } else if alnum == "gt" {
            TokenKind::Gt
        } else if alnum == "eq" {
            TokenKind::Eq
        } else if alnum == "so" {
            TokenKind::So
        } else if tables::spr_value(alnum).is_some() {
            TokenKind::Spr
        } else {
            TokenKind::Identifier
        }
    }

    fn lex_string_lit(
        &mut self,
        invalid_reason: &mut &'static str,
        invalid_region: &mut Interval,
    ) -> TokenKind {
        // The open quote has already been consumed.
        let string_start = self.scan.index - 1;
        match self.run_dfa(STRING_DFA) {
            None => TokenKind::StringLit,
            Some(reason) => {
                *invalid_reason = reason;
                *invalid_region = Interval::new(0, self.scan.index - string_start);
                TokenKind::Invalid
            }
        }
    }

    fn lex_single(&mut self) -> Token<'src> {
        self.skip_ws();

        self.scan = self.pos;
        let h = self.peek();

        let mut invalid_reason: &'static str = "";
        let mut invalid_region = Interval::empty();

        self.step();

        let kind = if h.is_ascii_alphabetic() || h == '_' || self.ident_head_extra(h) {
            let mut c = self.peek();
            while c.is_ascii_alphanumeric() || c == '_' || self.ident_extra(c) {
                c = self.step();
            }
            self.classify_alnum()
        } else if h == '"' {
            self.lex_string_lit(&mut invalid_reason, &mut invalid_region)
        } else if h == '0' {
            let imm_type = self.peek();
            if imm_type == 'x' {
                self.step();
                while self.peek().is_ascii_hexdigit() {
                    self.step();
                }
                TokenKind::HexLit
            } else if imm_type == 'b' {
                self.step();
                while matches!(self.peek(), '0' | '1') {
                    self.step();
                }
                TokenKind::BinLit
            } else if ('0'..='7').contains(&imm_type) {
                while ('0'..='7').contains(&self.peek()) {
                    self.step();
                }
                TokenKind::OctLit
            } else {
                TokenKind::DecLit
            }
        } else if h.is_ascii_digit() {
            while self.peek().is_ascii_digit() {
                self.step();
            }
            TokenKind::DecLit
        } else if h == '<' || h == '>' {
            if self.peek() == h {
                self.step();
                if h == '<' {
                    TokenKind::Lsh
                } else {
                    TokenKind::Rsh
                }
            } else {
                invalid_reason = "Unrecognized character";
                invalid_region = Interval::new(0, 1);
                TokenKind::Invalid
            }
        } else {
            let kind = match h {
                ',' => TokenKind::Comma,
                '(' => TokenKind::Lparen,
                ')' => TokenKind::Rparen,
                '|' => TokenKind::Pipe,
                '^' => TokenKind::Caret,
                '&' => TokenKind::Ampersand,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '~' => TokenKind::Tilde,
                '@' => TokenKind::At,
                ':' => TokenKind::Colon,
                '`' => TokenKind::Grave,
                '.' => TokenKind::Dot,
                '\0' => TokenKind::Eof,
                '\n' => TokenKind::Eol,
                _ => TokenKind::Invalid,
            };
            if kind == TokenKind::Invalid {
                invalid_reason = "Unrecognized character";
                invalid_region = Interval::new(0, 1);
            }
            kind
        };

        let tok = Token {
            kind,
            text: self.scan_finish_out(),
            invalid_reason,
            invalid_region,
        };
        self.skip_ws();
        tok
    }
}
