//! Intermediate representation: blocks, chunks, instructions, operand pool.
//!
//! The IR mirrors the output structure: a sequence of blocks, each pinned
//! to a base virtual address and holding an ordered run of chunks. Operand
//! values live in one flat pool shared by all instructions; during parsing
//! the pool holds placeholders, and the fixup phase writes the final
//! values in once every label and constant is known.

use alloc::vec::Vec;

use crate::error::Interval;

/// One instruction as recorded by the IR generator.
#[derive(Debug, Clone, Copy)]
pub struct IrInstruction<'src> {
    /// Packed mnemonic key: `table row · 4 + variant bits`. Indexes the
    /// base table, or the extended table when `is_extended` is set.
    pub key: usize,
    /// Start of this instruction's operands in the operand pool.
    pub op_index: usize,
    /// Number of operands in the pool.
    pub op_count: usize,
    /// Source line the instruction came from, for diagnostics.
    pub raw_line: &'src str,
    /// 0-based line number.
    pub line_number: usize,
    /// Whether `key` refers to the extended-mnemonic table.
    pub is_extended: bool,
}

/// A contiguous run of output with one representation.
#[derive(Debug, Clone)]
pub enum Chunk<'src> {
    /// Machine instructions, four bytes each.
    Instructions(Vec<IrInstruction<'src>>),
    /// Raw bytes from data directives.
    Bytes(Vec<u8>),
    /// A run of zero bytes.
    Pad(usize),
}

impl Chunk<'_> {
    /// Size of the chunk in output bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Chunk::Instructions(insts) => insts.len() * 4,
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Pad(size) => *size,
        }
    }
}

/// A run of chunks at a fixed base address.
#[derive(Debug, Clone)]
pub struct IrBlock<'src> {
    /// Base virtual address of the block.
    pub base_address: u32,
    /// Chunks in emission order. Adjacent chunks of the same kind are
    /// coalesced as they are appended.
    pub chunks: Vec<Chunk<'src>>,
}

impl<'src> IrBlock<'src> {
    /// Create an empty block at `base_address`.
    #[must_use]
    pub fn new(base_address: u32) -> Self {
        Self {
            base_address,
            chunks: Vec::new(),
        }
    }

    /// Address one past the last byte of the block.
    #[must_use]
    pub fn end_address(&self) -> u32 {
        self.chunks
            .iter()
            .fold(self.base_address, |acc, chunk| {
                acc.wrapping_add(chunk.size() as u32)
            })
    }
}

/// The parse product: blocks plus the shared operand pool.
#[derive(Debug, Clone, Default)]
pub struct IrProgram<'src> {
    /// Blocks in source order.
    pub blocks: Vec<IrBlock<'src>>,
    /// `(source span, value)` per operand; spans are relative to the line
    /// the operand appeared on.
    pub operand_pool: Vec<(Interval, u32)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn end_address_sums_chunk_sizes() {
        let mut block = IrBlock::new(0x8000_0000);
        assert_eq!(block.end_address(), 0x8000_0000);

        block.chunks.push(Chunk::Bytes(vec![1, 2, 3]));
        block.chunks.push(Chunk::Pad(5));
        block.chunks.push(Chunk::Instructions(vec![IrInstruction {
            key: 0,
            op_index: 0,
            op_count: 0,
            raw_line: "",
            line_number: 0,
            is_extended: false,
        }]));
        assert_eq!(block.end_address(), 0x8000_0000 + 3 + 5 + 4);
    }
}
