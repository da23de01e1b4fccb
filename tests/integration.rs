//! Integration tests for gekko_asm.
//!
//! These tests exercise the public API end-to-end, verifying that assembly
//! source text is correctly translated into expected machine code bytes.

use gekko_asm::{assemble, AssemblerError, CodeBlock};

fn bytes_at(source: &str, base: u32) -> Vec<u8> {
    let blocks = assemble(source, base).unwrap();
    assert_eq!(blocks.len(), 1, "expected a single block for {source:?}");
    blocks[0].instructions.clone()
}

fn words_at(source: &str, base: u32) -> Vec<u32> {
    bytes_at(source, base)
        .chunks(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn err_of(source: &str) -> AssemblerError {
    assemble(source, 0x8000_0000).unwrap_err()
}

// ============================================================================
// Basic shapes
// ============================================================================

#[test]
fn empty_input_produces_no_blocks() {
    assert_eq!(assemble("", 0x8000_0000).unwrap(), vec![]);
    assert_eq!(assemble("\n\n", 0x8000_0000).unwrap(), vec![]);
    assert_eq!(assemble("  # only a comment\n", 0x8000_0000).unwrap(), vec![]);
}

#[test]
fn single_addi() {
    assert_eq!(
        bytes_at("addi r3, r0, 1", 0x8000_0000),
        [0x38, 0x60, 0x00, 0x01]
    );
}

#[test]
fn negative_immediate() {
    assert_eq!(
        bytes_at("addi r3, r0, -0x8000", 0x8000_0000),
        [0x38, 0x60, 0x80, 0x00]
    );
}

#[test]
fn self_branch_via_dot() {
    assert_eq!(bytes_at("b .", 0x8000_3000), [0x48, 0x00, 0x00, 0x00]);
}

#[test]
fn extended_blr() {
    assert_eq!(bytes_at("blr", 0x8000_0000), [0x4E, 0x80, 0x00, 0x20]);
}

#[test]
fn labels_comments_and_blank_lines() {
    let words = words_at("start:\n\n# prologue\nnop # aligned\nb start", 0x8000_0000);
    assert_eq!(words, [0x6000_0000, 0x4BFF_FFFC]);
}

// ============================================================================
// Branches and labels
// ============================================================================

#[test]
fn backward_branch() {
    let words = words_at("lbl: nop\nb lbl", 0x8000_0000);
    assert_eq!(words, [0x6000_0000, 0x4BFF_FFFC]);
}

#[test]
fn forward_branch() {
    let words = words_at("b skip\nnop\nskip: blr", 0x8000_0000);
    assert_eq!(words, [0x4800_0008, 0x6000_0000, 0x4E80_0020]);
}

#[test]
fn grave_converts_absolute_target() {
    assert_eq!(
        bytes_at("b `0x80003000`", 0x8000_3000),
        [0x48, 0x00, 0x00, 0x00]
    );
    let words = words_at("target: nop\nb `target`", 0x8000_0000);
    assert_eq!(words[1], 0x4BFF_FFFC);
}

#[test]
fn conditional_loop() {
    let words = words_at(
        "loop: cmpwi r3, 0\nbeq done\naddi r3, r3, -1\nb loop\ndone: blr",
        0x8000_0000,
    );
    assert_eq!(
        words,
        [0x2C03_0000, 0x4182_000C, 0x3863_FFFF, 0x4BFF_FFF4, 0x4E80_0020]
    );
}

#[test]
fn branch_hints_and_cr_fields() {
    let words = words_at("beq+ 8\nbne- 8\nblt cr1, 8", 0x8000_0000);
    assert_eq!(words, [0x41A2_0008, 0x4082_0008, 0x4184_0008]);
}

#[test]
fn link_and_absolute_variants() {
    let words = words_at("bl 8\nba 8\nbla 8\nblrl", 0x8000_0000);
    assert_eq!(words, [0x4800_0009, 0x4800_000A, 0x4800_000B, 0x4E80_0021]);
}

#[test]
fn count_register_branches() {
    let words = words_at("bdnz .\nbctr\nbeqlr", 0x8000_0000);
    assert_eq!(words, [0x4200_0000, 0x4E80_0420, 0x4D82_0020]);
}

// ============================================================================
// Extended mnemonics
// ============================================================================

#[test]
fn simplified_mnemonics() {
    let words = words_at("nop\nli r3, 1\nlis r4, 0x7FFF\nmr r3, r4", 0x8000_0000);
    assert_eq!(words, [0x6000_0000, 0x3860_0001, 0x3C80_7FFF, 0x7C83_2378]);
}

#[test]
fn record_variant_of_extended() {
    assert_eq!(words_at("mr. r3, r4", 0x8000_0000), [0x7C83_2379]);
}

#[test]
fn subtract_aliases() {
    let words = words_at("subi r3, r3, 1\nsub r3, r4, r5", 0x8000_0000);
    assert_eq!(words, [0x3863_FFFF, 0x7C65_2050]);
}

#[test]
fn rotate_shift_aliases() {
    let words = words_at(
        "srwi r3, r4, 4\nslwi r3, r4, 4\nclrlwi r3, r4, 8",
        0x8000_0000,
    );
    assert_eq!(words, [0x5483_E13E, 0x5483_2036, 0x5483_023E]);
}

#[test]
fn spr_move_aliases() {
    let words = words_at("mflr r0\nmtlr r0\nmtctr r12\nmtsprg 0, r3", 0x8000_0000);
    assert_eq!(words, [0x7C08_02A6, 0x7C08_03A6, 0x7D89_03A6, 0x7C70_43A6]);
}

#[test]
fn spr_names_in_raw_moves() {
    // mtspr with a named SPR matches the dedicated alias.
    let with_name = words_at("mtspr ctr, r3", 0x8000_0000);
    let with_alias = words_at("mtctr r3", 0x8000_0000);
    assert_eq!(with_name, with_alias);
    assert_eq!(with_name, [0x7C69_03A6]);
}

#[test]
fn cr_bit_aliases() {
    let words = words_at("crset eq\ncrclr eq\ncrmove 1, 2", 0x8000_0000);
    assert_eq!(words, [0x4C42_1242, 0x4C42_1182, 0x4C22_1382]);
}

#[test]
fn trap_aliases() {
    let words = words_at("trap\ntwlti r3, 4", 0x8000_0000);
    assert_eq!(words, [0x7FE0_0008, 0x0E03_0004]);
}

// ============================================================================
// Loads, stores, paired singles
// ============================================================================

#[test]
fn offset_addressing() {
    let words = words_at(
        "lwz r3, 8(r1)\nstw r3, -4(r1)\nstwu r1, -8(r1)",
        0x8000_0000,
    );
    assert_eq!(words, [0x8061_0008, 0x9061_FFFC, 0x9421_FFF8]);
}

#[test]
fn function_prologue() {
    let words = words_at("mflr r0\nstw r0, 4(r1)", 0x8000_0000);
    assert_eq!(words, [0x7C08_02A6, 0x9001_0004]);
}

#[test]
fn paired_single_forms() {
    let words = words_at("psq_l f1, 0(r3), 0, 1\nps_add f1, f2, f3", 0x8000_0000);
    assert_eq!(words, [0xE023_1000, 0x1022_182A]);
}

// ============================================================================
// Data directives
// ============================================================================

#[test]
fn four_byte_data() {
    assert_eq!(
        bytes_at(".4byte 0xdeadbeef, 0x12345678", 0x8000_0000),
        [0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34, 0x56, 0x78]
    );
}

#[test]
fn mixed_width_data() {
    assert_eq!(
        bytes_at(".byte 0x10, 0b101, 017, 9\n.2byte 0x1234\n.8byte 1", 0x8000_0000),
        [0x10, 5, 0x0F, 9, 0x12, 0x34, 0, 0, 0, 0, 0, 0, 0, 1]
    );
}

#[test]
fn float_data() {
    let mut expected = 1.5f32.to_be_bytes().to_vec();
    expected.extend_from_slice(&(-2.5f64).to_be_bytes());
    assert_eq!(bytes_at(".float 1.5\n.double -2.5", 0x8000_0000), expected);
}

#[test]
fn strings_and_padding() {
    assert_eq!(
        bytes_at(".ascii \"Hi!\"\n.padalign 2\n.byte 1", 0x8000_0000),
        [b'H', b'i', b'!', 0, 1]
    );
    assert_eq!(bytes_at(".asciz \"A\\n\"", 0x8000_0000), [b'A', b'\n', 0]);
}

#[test]
fn zeros_directive() {
    assert_eq!(
        bytes_at(".byte 1\n.zeros 3\n.byte 2", 0x8000_0000),
        [1, 0, 0, 0, 2]
    );
}

#[test]
fn data_expressions_fold() {
    assert_eq!(
        bytes_at(".4byte (1 + 2) * 3, 1 << 4 | 0xF", 0x8000_0000),
        [0, 0, 0, 9, 0, 0, 0, 0x1F]
    );
}

#[test]
fn defvar_feeds_instructions_and_data() {
    assert_eq!(
        bytes_at(".defvar X, 0x10\naddi r1, r1, X", 0x8000_0000),
        [0x38, 0x21, 0x00, 0x10]
    );
    assert_eq!(
        bytes_at(".defvar W, 0x8100\n.2byte W", 0x8000_0000),
        [0x81, 0x00]
    );
}

#[test]
fn high_adjusted_halves_in_data() {
    // @ha rounds up when the low half has its sign bit set, so that
    // (ha << 16) + sign_extend(l) reconstitutes the value.
    let bytes = bytes_at(".defvar addr, 0x18FFF\n.4byte addr@ha, addr@l", 0x8000_0000);
    assert_eq!(bytes, [0, 0, 0, 2, 0, 0, 0x8F, 0xFF]);
}

#[test]
fn address_materialization_pair() {
    let words = words_at(
        ".defvar addr, 0x1234\nlis r3, addr@ha\naddi r3, r3, addr@l",
        0x8000_0000,
    );
    assert_eq!(words, [0x3C60_0000, 0x3863_1234]);
}

// ============================================================================
// Block placement
// ============================================================================

#[test]
fn locate_splits_blocks() {
    let blocks = assemble(
        ".locate 0x80001000\n.byte 1\n.locate 0x80002000\n.byte 2",
        0x8000_0000,
    )
    .unwrap();
    assert_eq!(
        blocks,
        vec![
            CodeBlock {
                base_address: 0x8000_1000,
                instructions: vec![1]
            },
            CodeBlock {
                base_address: 0x8000_2000,
                instructions: vec![2]
            },
        ]
    );
}

#[test]
fn skip_leaves_a_gap() {
    let blocks = assemble(".byte 1\n.skip 3\n.byte 2", 0x8000_0000).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].base_address, 0x8000_0000);
    assert_eq!(blocks[1].base_address, 0x8000_0004);
    assert_eq!(blocks[1].instructions, [2]);
}

#[test]
fn align_starts_an_aligned_block() {
    let blocks = assemble(".byte 1\n.align 2\n.4byte 0xCAFEBABE", 0x8000_0000).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].base_address, 0x8000_0004);
    assert_eq!(blocks[1].instructions, [0xCA, 0xFE, 0xBA, 0xBE]);
}

#[test]
fn block_addresses_are_monotonic() {
    let blocks = assemble(
        "nop\n.skip 8\nnop\n.align 5\nnop\n.locate 0x80010000\nnop",
        0x8000_0000,
    )
    .unwrap();
    for pair in blocks.windows(2) {
        assert!(pair[0].end_address() <= pair[1].base_address);
    }
}

#[test]
fn labels_see_block_placement() {
    // A label after .locate captures the new block's address.
    let blocks = assemble(
        ".locate 0x80003000\nentry: nop\n.locate 0x80004000\n.4byte entry",
        0x8000_0000,
    )
    .unwrap();
    assert_eq!(blocks[1].instructions, 0x8000_3000u32.to_be_bytes());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn operand_out_of_range_points_at_operand() {
    let err = err_of("addi r3, r0, 0x10000");
    assert!(err.message.contains("out of range"), "got: {}", err.message);
    assert_eq!(err.line, 0);
    assert_eq!(err.col, 13);
    assert_eq!(err.len, 7);
    assert_eq!(err.source_line, "addi r3, r0, 0x10000");
}

#[test]
fn simm_rejects_unsigned_bit_patterns() {
    assert!(err_of("addi r3, r0, 0x8000")
        .message
        .contains("out of range"));
}

#[test]
fn misaligned_branch_offset() {
    let err = err_of("b 2");
    assert!(err.message.contains("4-aligned"), "got: {}", err.message);
}

#[test]
fn unknown_mnemonic() {
    let err = err_of("nop\nfrobnicate r3");
    assert!(err
        .message
        .contains("Unknown or unsupported mnemonic 'frobnicate'"));
    assert_eq!(err.line, 1);
    assert_eq!(err.col, 0);
}

#[test]
fn unresolved_symbol() {
    let err = err_of("b nowhere");
    assert!(err.message.contains("Unresolved symbol 'nowhere'"));
    assert_eq!(err.col, 2);
    assert_eq!(err.len, 7);
}

#[test]
fn duplicate_definitions() {
    assert!(err_of("x: nop\nx: nop")
        .message
        .contains("Label/Constant x is already defined"));
    assert!(err_of(".defvar x, 1\n.defvar x, 2")
        .message
        .contains("already defined"));
    assert!(err_of("x: nop\n.defvar x, 1")
        .message
        .contains("already defined"));
}

#[test]
fn directive_symbols_must_be_defined_before_use() {
    let err = err_of(".4byte later\nlater: nop");
    assert!(err
        .message
        .contains("Undefined reference to Label/Constant 'later'"));
}

#[test]
fn unterminated_string() {
    let err = err_of(".ascii \"oops");
    assert!(err.message.contains("No terminating"));
}

#[test]
fn division_by_zero_in_operand() {
    let err = err_of("li r3, 1/0");
    assert!(err.message.contains("Division by zero"));
}

#[test]
fn missing_operand_is_a_parse_error() {
    let err = err_of("li r3");
    assert!(err.message.contains("Expected ','"), "got: {}", err.message);
}

#[test]
fn first_error_wins() {
    // Both lines are bad; only the first is reported.
    let err = err_of("frob r1\nfrob r2");
    assert_eq!(err.line, 0);
}

#[test]
fn error_display_is_one_based() {
    let err = err_of("nop\naddi r3, r0, 0x10000");
    assert_eq!(format!("{err}"), format!("2:14: {}", err.message));
}
