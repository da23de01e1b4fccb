//! Error type and source-span tracking for diagnostics.

#[allow(unused_imports)]
use alloc::format;
use alloc::string::String;
use core::fmt;

/// A region of source text, as `(begin, len)` byte offsets.
///
/// Used both for the erroneous sub-region of an invalid token (relative to
/// the token start) and for operand spans (relative to the line start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// 0-based starting offset.
    pub begin: usize,
    /// Byte length of the region.
    pub len: usize,
}

impl Interval {
    /// Create a new interval.
    #[must_use]
    pub const fn new(begin: usize, len: usize) -> Self {
        Self { begin, len }
    }

    /// An empty interval for generated/internal constructs.
    #[must_use]
    pub const fn empty() -> Self {
        Self { begin: 0, len: 0 }
    }
}

/// Assembly error with a descriptive message and one pinpointed source span.
///
/// `line` and `col` are 0-based; presentation layers typically add one for
/// display. `source_line` carries the raw text of the offending line so a
/// caller can render a caret underline without re-reading the source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssemblerError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Raw text of the source line the error occurred on (no trailing newline).
    pub source_line: String,
    /// 0-based line number.
    pub line: usize,
    /// 0-based column number.
    pub col: usize,
    /// Byte length of the offending region.
    pub len: usize,
}

impl fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line + 1, self.col + 1, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AssemblerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_one_based() {
        let err = AssemblerError {
            message: "Unknown or unsupported mnemonic 'frob'".into(),
            source_line: "frob r3".into(),
            line: 2,
            col: 0,
            len: 4,
        };
        assert_eq!(
            format!("{}", err),
            "3:1: Unknown or unsupported mnemonic 'frob'"
        );
    }

    #[test]
    fn interval_empty() {
        let iv = Interval::empty();
        assert_eq!(iv.begin, 0);
        assert_eq!(iv.len, 0);
    }
}
