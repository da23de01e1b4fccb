//! # gekko-asm — Gekko/Broadway PowerPC assembler
//!
//! `gekko-asm` assembles the GNU-assembler-like dialect used for the
//! Gekko/Broadway CPUs (GameCube/Wii) into *code blocks*: contiguous
//! big-endian byte runs pinned to virtual addresses, ready to patch into
//! emulated memory or serialize as cheat-code payloads.
//!
//! ## Quick Start
//!
//! ```rust
//! use gekko_asm::assemble;
//!
//! let blocks = assemble("nop", 0x8000_0000).unwrap();
//! assert_eq!(blocks[0].instructions, vec![0x60, 0x00, 0x00, 0x00]);
//! ```
//!
//! ## Features
//!
//! - **Pure Rust, pure function** — no IO, no process state; each call to
//!   [`assemble`] is independent.
//! - **Full Gekko surface** — the base instruction set including
//!   paired-single SIMD, plus the extended (simplified) mnemonics with
//!   their operand rewrites and branch-prediction hints.
//! - **Labels, constants, expressions** — forward references, `.defvar`,
//!   C-precedence bitwise/arithmetic operators, `sym@ha`/`sym@l` halves,
//!   and the back-tick PC-relative conversion operator.
//! - **Placement directives** — `.locate`, `.skip`, `.align`, `.padalign`
//!   split output into independently addressed blocks.
//! - **`no_std` + `alloc`** — embeddable; `std` only adds `Error` impls.
//!
//! ## Collaborators
//!
//! The parser is visitor-driven: the IR generator is one [`Visitor`]
//! implementation, and grammar consumers that produce no code (for
//! example a syntax highlighter) implement the same trait and receive the
//! identical token, format, and paren-pair events. See [`parse_with_visitor`].

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
// ── Lint policy ──────────────────────────────────────────────────────────
// An assembler necessarily juggles narrowing casts between integer widths
// and dense bit-layout literals (0x03FFFFFC, 0b11111_00000). The lints
// below are expected and acceptable in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::many_single_char_names
)]

extern crate alloc;

/// Top-level driver producing [`CodeBlock`]s.
pub mod assembler;
/// Table-driven machine-word emission and operand validation.
pub mod encoder;
/// Error type and source-span plumbing.
pub mod error;
/// Intermediate representation: blocks, chunks, operand pool.
pub mod ir;
/// The IR-building parser visitor and fixup evaluation.
pub mod irgen;
/// Zero-copy lexer with caller-selected identifier match rules.
pub mod lexer;
/// Recursive-descent grammar with visitor callouts.
pub mod parser;
/// Static instruction-set tables: mnemonics, operands, SPRs, DFAs.
pub mod tables;

// Re-exports
pub use assembler::{assemble, CodeBlock};
pub use error::{AssemblerError, Interval};
pub use ir::{Chunk, IrBlock, IrInstruction, IrProgram};
pub use irgen::{build_ir, IrGenerator};
pub use lexer::{IdentifierMatchRule, Lexer, Token, TokenKind};
pub use parser::{
    parse_with_visitor, AsmOp, NullVisitor, ParenKind, ParseState, Terminal, Visitor,
};
pub use tables::{Directive, ParseAlg, ParseInfo};
