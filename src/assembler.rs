//! Top-level driver: parse → fixups → encode → code blocks.

use alloc::vec::Vec;

use crate::encoder;
use crate::error::AssemblerError;
use crate::ir::Chunk;
use crate::irgen;

/// A contiguous byte range at a fixed start address; the unit of the
/// assembler's output.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodeBlock {
    /// Base virtual address the bytes belong at.
    pub base_address: u32,
    /// Output bytes, big-endian, in emission order.
    pub instructions: Vec<u8>,
}

impl CodeBlock {
    /// Address one past the last byte of the block.
    #[must_use]
    pub fn end_address(&self) -> u32 {
        self.base_address
            .wrapping_add(self.instructions.len() as u32)
    }
}

/// Assemble Gekko assembly source into code blocks.
///
/// `base_address` is where the first byte of output lands; `.locate`,
/// `.skip`, and `.align` start further blocks. Empty blocks are dropped
/// from the result.
///
/// # Errors
///
/// Returns the first error encountered — lexical, syntactic, or semantic —
/// with the line, column, and source text needed to render a caret
/// diagnostic.
///
/// # Examples
///
/// ```
/// use gekko_asm::assemble;
///
/// let blocks = assemble("addi r3, r0, 1", 0x8000_0000)?;
/// assert_eq!(blocks.len(), 1);
/// assert_eq!(blocks[0].base_address, 0x8000_0000);
/// assert_eq!(blocks[0].instructions, vec![0x38, 0x60, 0x00, 0x01]);
/// # Ok::<(), gekko_asm::AssemblerError>(())
/// ```
pub fn assemble(source: &str, base_address: u32) -> Result<Vec<CodeBlock>, AssemblerError> {
    let program = irgen::build_ir(source, base_address)?;

    let mut blocks = Vec::new();
    for ir_block in &program.blocks {
        let mut bytes = Vec::new();
        for chunk in &ir_block.chunks {
            match chunk {
                Chunk::Instructions(insts) => {
                    for inst in insts {
                        let operands =
                            &program.operand_pool[inst.op_index..inst.op_index + inst.op_count];
                        let word = encoder::encode_instruction(inst, operands)?;
                        bytes.extend_from_slice(&word.to_be_bytes());
                    }
                }
                Chunk::Bytes(data) => bytes.extend_from_slice(data),
                Chunk::Pad(size) => bytes.resize(bytes.len() + size, 0),
            }
        }

        if !bytes.is_empty() {
            blocks.push(CodeBlock {
                base_address: ir_block.base_address,
                instructions: bytes,
            });
        }
    }

    Ok(blocks)
}
