//! Machine-word emission.
//!
//! Encoding is entirely table-driven: the instruction's packed key selects
//! a [`MnemonicDesc`] (directly for base mnemonics, via the extended table
//! and its operand rewrite for pseudo mnemonics), each operand value is
//! validated against its field descriptor, and the fitted fields are OR'd
//! into the descriptor's initial value.

use alloc::format;
use alloc::string::String;

use crate::error::{AssemblerError, Interval};
use crate::ir::IrInstruction;
use crate::tables::{
    MnemonicDesc, OperandList, EXTENDED, MNEMONICS, VARIANT_PERMUTATIONS,
};

fn instruction_error(inst: &IrInstruction<'_>, span: Interval, message: String) -> AssemblerError {
    AssemblerError {
        message,
        source_line: inst.raw_line.into(),
        line: inst.line_number,
        col: span.begin,
        len: span.len,
    }
}

fn internal_error(inst: &IrInstruction<'_>, what: &str) -> AssemblerError {
    instruction_error(
        inst,
        Interval::empty(),
        format!("Internal error: {what}"),
    )
}

fn base_desc(
    inst: &IrInstruction<'_>,
    key: usize,
) -> Result<&'static MnemonicDesc, AssemblerError> {
    MNEMONICS
        .get(key / VARIANT_PERMUTATIONS)
        .and_then(|row| row[key % VARIANT_PERMUTATIONS].as_ref())
        .ok_or_else(|| internal_error(inst, "mnemonic variant has no encoding"))
}

/// Encode one IR instruction into its 32-bit machine word.
///
/// `operands` is the instruction's slice of the operand pool, with fixups
/// already applied.
///
/// # Errors
///
/// Returns an error when the operand count does not match the encoding, or
/// when an operand value does not fit its field (out of range, or violating
/// the field's implicit alignment). The error points at the operand's
/// source span.
pub fn encode_instruction(
    inst: &IrInstruction<'_>,
    operands: &[(Interval, u32)],
) -> Result<u32, AssemblerError> {
    let mut list = OperandList::from_slice(operands);

    let desc = if inst.is_extended {
        let ext = EXTENDED
            .get(inst.key / VARIANT_PERMUTATIONS)
            .and_then(|row| row[inst.key % VARIANT_PERMUTATIONS].as_ref())
            .ok_or_else(|| internal_error(inst, "extended mnemonic variant has no encoding"))?;
        (ext.transform)(&mut list);
        base_desc(inst, ext.base_key)?
    } else {
        base_desc(inst, inst.key)?
    };

    if list.overfill || list.count != desc.operands.len() {
        return Err(instruction_error(
            inst,
            Interval::empty(),
            format!(
                "Wrong number of operands: expected {}, found {}",
                desc.operands.len(),
                list.count
            ),
        ));
    }

    let mut word = desc.initial_value;
    for i in 0..list.count {
        let field = desc.operands[i];
        let val = list.vals[i];
        let span = list.spans[i];

        if !field.fits(val) {
            let trunc = field.trunc_bits();
            let message = if trunc != 0 && val & trunc != 0 {
                format!("Operand must be {}-aligned", trunc + 1)
            } else if field.is_signed {
                format!(
                    "Operand out of range (valid range [{}, {}])",
                    field.min_val() as i32,
                    field.max_val() as i32
                )
            } else {
                format!(
                    "Operand out of range (valid range [0, {}])",
                    field.max_val()
                )
            };
            return Err(instruction_error(inst, span, message));
        }

        word |= field.fit(val);
    }

    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables;

    fn inst(name: &str, operands_len: usize) -> IrInstruction<'static> {
        let (info, extended) = match tables::find_base(name) {
            Some(info) => (info, false),
            None => (tables::find_extended(name).unwrap(), true),
        };
        IrInstruction {
            key: info.key,
            op_index: 0,
            op_count: operands_len,
            raw_line: "",
            line_number: 0,
            is_extended: extended,
        }
    }

    fn encode(name: &str, vals: &[u32]) -> Result<u32, AssemblerError> {
        let operands: alloc::vec::Vec<(Interval, u32)> =
            vals.iter().map(|&v| (Interval::empty(), v)).collect();
        encode_instruction(&inst(name, vals.len()), &operands)
    }

    #[test]
    fn base_arithmetic() {
        assert_eq!(encode("addi", &[3, 0, 1]).unwrap(), 0x3860_0001);
        assert_eq!(encode("add", &[3, 4, 5]).unwrap(), 0x7C64_2A14);
        assert_eq!(encode("add.", &[3, 4, 5]).unwrap(), 0x7C64_2A15);
        assert_eq!(encode("addo", &[3, 4, 5]).unwrap(), 0x7C64_2E14);
        assert_eq!(encode("addo.", &[3, 4, 5]).unwrap(), 0x7C64_2E15);
    }

    #[test]
    fn negative_immediates() {
        assert_eq!(encode("addi", &[3, 0, 0xFFFF_8000]).unwrap(), 0x3860_8000);
        assert_eq!(encode("addi", &[1, 1, 0xFFFF_FFFF]).unwrap(), 0x3821_FFFF);
    }

    #[test]
    fn branch_variants() {
        assert_eq!(encode("b", &[8]).unwrap(), 0x4800_0008);
        assert_eq!(encode("bl", &[8]).unwrap(), 0x4800_0009);
        assert_eq!(encode("ba", &[8]).unwrap(), 0x4800_000A);
        assert_eq!(encode("bla", &[8]).unwrap(), 0x4800_000B);
        assert_eq!(encode("b", &[0xFFFF_FFFC]).unwrap(), 0x4BFF_FFFC);
    }

    #[test]
    fn extended_branches() {
        assert_eq!(encode("blr", &[]).unwrap(), 0x4E80_0020);
        assert_eq!(encode("blrl", &[]).unwrap(), 0x4E80_0021);
        assert_eq!(encode("bctr", &[]).unwrap(), 0x4E80_0420);
        assert_eq!(encode("beq", &[8]).unwrap(), 0x4182_0008);
        assert_eq!(encode("beq", &[1, 8]).unwrap(), 0x4186_0008);
        assert_eq!(encode("bne", &[8]).unwrap(), 0x4082_0008);
        assert_eq!(encode("bdnz", &[0xFFFF_FFF8]).unwrap(), 0x4200_FFF8);
        assert_eq!(encode("beqlr", &[]).unwrap(), 0x4D82_0020);
    }

    #[test]
    fn extended_simplified() {
        assert_eq!(encode("nop", &[]).unwrap(), 0x6000_0000);
        assert_eq!(encode("li", &[3, 1]).unwrap(), 0x3860_0001);
        assert_eq!(encode("lis", &[4, 0x7FFF]).unwrap(), 0x3C80_7FFF);
        assert_eq!(encode("mr", &[3, 4]).unwrap(), 0x7C83_2378);
        assert_eq!(encode("subi", &[3, 3, 1]).unwrap(), 0x3863_FFFF);
        assert_eq!(encode("sub", &[3, 4, 5]).unwrap(), 0x7C65_2050);
    }

    #[test]
    fn rotate_aliases() {
        // srwi r3, r4, 4 == rlwinm r3, r4, 28, 4, 31
        assert_eq!(encode("srwi", &[3, 4, 4]).unwrap(), 0x5483_E13E);
        // slwi r3, r4, 4 == rlwinm r3, r4, 4, 0, 27
        assert_eq!(encode("slwi", &[3, 4, 4]).unwrap(), 0x5483_2036);
        // clrlwi r3, r4, 8 == rlwinm r3, r4, 0, 8, 31
        assert_eq!(encode("clrlwi", &[3, 4, 8]).unwrap(), 0x5483_023E);
    }

    #[test]
    fn spr_moves() {
        assert_eq!(encode("mflr", &[0]).unwrap(), 0x7C08_02A6);
        assert_eq!(encode("mtlr", &[0]).unwrap(), 0x7C08_03A6);
        assert_eq!(encode("mtctr", &[12]).unwrap(), 0x7D89_03A6);
        assert_eq!(encode("mfspr", &[3, 8]).unwrap(), 0x7C68_02A6);
        assert_eq!(encode("mtsprg", &[0, 3]).unwrap(), 0x7C70_43A6);
        assert_eq!(encode("mtibatu", &[1, 3]).unwrap(), 0x7C72_83A6);
    }

    #[test]
    fn load_store_offsets() {
        assert_eq!(encode("lwz", &[3, 8, 1]).unwrap(), 0x8061_0008);
        assert_eq!(encode("stw", &[3, 0, 1]).unwrap(), 0x9061_0000);
        assert_eq!(encode("lwz", &[3, 0xFFFF_FFFC, 1]).unwrap(), 0x8061_FFFC);
    }

    #[test]
    fn paired_single() {
        // psq_l f1, 0(r3), 0, 1
        assert_eq!(encode("psq_l", &[1, 0, 3, 0, 1]).unwrap(), 0xE023_1000);
        assert_eq!(encode("ps_add", &[1, 2, 3]).unwrap(), 0x1022_182A);
    }

    #[test]
    fn wrong_operand_count() {
        let err = encode("addi", &[3, 0]).unwrap_err();
        assert!(err.message.contains("Wrong number of operands"));
        let err = encode("blr", &[1]).unwrap_err();
        assert!(err.message.contains("Wrong number of operands"));
    }

    #[test]
    fn operand_out_of_range() {
        let err = encode("addi", &[3, 0, 0x10000]).unwrap_err();
        assert!(err.message.contains("out of range"));
        let err = encode("addi", &[3, 0, 0x8000]).unwrap_err();
        assert!(err.message.contains("out of range"));
        let err = encode("add", &[32, 0, 0]).unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn branch_alignment() {
        let err = encode("b", &[2]).unwrap_err();
        assert!(err.message.contains("4-aligned"));
        let err = encode("bc", &[12, 2, 6]).unwrap_err();
        assert!(err.message.contains("4-aligned"));
    }

    #[test]
    fn compare_word_forms() {
        // cmpwi r3, 0 == cmpi 0, 0, r3, 0
        assert_eq!(encode("cmpwi", &[3, 0]).unwrap(), 0x2C03_0000);
        // cmpwi cr7, r3, 5
        assert_eq!(encode("cmpwi", &[7, 3, 5]).unwrap(), 0x2F83_0005);
        // cmplw r4, r5
        assert_eq!(encode("cmplw", &[4, 5]).unwrap(), 0x7C04_2840);
    }

    #[test]
    fn trap_aliases() {
        assert_eq!(encode("trap", &[]).unwrap(), 0x7FE0_0008);
        // twlti r3, 4 == twi 16, r3, 4
        assert_eq!(encode("twlti", &[3, 4]).unwrap(), 0x0E03_0004);
    }

    #[test]
    fn cr_aliases() {
        // crset 2 == creqv 2, 2, 2
        assert_eq!(encode("crset", &[2]).unwrap(), 0x4C42_1242);
        // crclr 2 == crxor 2, 2, 2
        assert_eq!(encode("crclr", &[2]).unwrap(), 0x4C42_1182);
        // crmove 1, 2 == cror 1, 2, 2
        assert_eq!(encode("crmove", &[1, 2]).unwrap(), 0x4C22_1382);
    }
}
