use miette::{miette, Report};

use crate::symbol::{Symbol, SymbolKind};

// Lexer errors

pub fn invalid_character(byte: u8) -> Report {
    miette!(
        code = "lex::invalid_char",
        help = "only printable ascii is allowed outside comments",
        "invalid character '{byte:02x}'",
    )
}

// Assembler errors

pub fn expected_kind(expected: SymbolKind, found: &Symbol) -> Report {
    miette!(
        code = "asm::unexpected_symbol",
        help = "check the operands for this instruction",
        "expected {expected} got '{}'",
        found.val,
    )
}

pub fn bad_instruction(name: &str) -> Report {
    miette!(code = "asm::bad_instruction", "bad instruction '{name}'")
}

pub fn bad_register(val: &str) -> Report {
    miette!(
        code = "asm::bad_register",
        help = "registers are written as %N with N in decimal",
        "bad register '{val}'",
    )
}

pub fn bad_address(val: &str) -> Report {
    miette!(
        code = "asm::bad_address",
        help = "addresses are written as $H with H in hex, up to 32 bits",
        "bad address '{val}'",
    )
}

pub fn redefining_label(name: &str) -> Report {
    miette!(
        code = "asm::duplicate_label",
        help = "labels are only allowed once per file",
        "redefining label '{name}'",
    )
}

pub fn no_such_label(name: &str) -> Report {
    miette!(code = "asm::unresolved_label", "{name}: no such label")
}

pub fn bad_argument_count() -> Report {
    miette!(code = "asm::bad_argument_count", "bad argument count")
}

pub fn invalid_file() -> Report {
    miette!(code = "asm::invalid_file", "invalid file")
}

pub fn error_summary(count: usize, shown: usize) -> Report {
    if count > shown {
        miette!("{count} errors ({shown} shown)")
    } else {
        miette!("{count} errors")
    }
}

// VM errors

pub fn short_header() -> Report {
    miette!(code = "vm::short_header", "could not read header")
}

pub fn bad_header() -> Report {
    miette!(
        code = "vm::bad_header",
        help = "object files start with the 4-byte magic 48 59 50 00",
        "bad header",
    )
}

pub fn bad_read() -> Report {
    miette!(code = "vm::bad_read", "bad read")
}

pub fn invalid_opcode(byte: u8) -> Report {
    miette!(code = "vm::invalid_opcode", "invalid opcode: {byte:02x}")
}

pub fn invalid_register(reg: u8) -> Report {
    miette!(code = "vm::invalid_register", "invalid register {reg:02x}")
}

pub fn illegal_read(addr: u32) -> Report {
    miette!(code = "vm::illegal_read", "illegal read {addr:08x}")
}

pub fn illegal_write(imm: u32, addr: u32) -> Report {
    miette!(
        code = "vm::illegal_write",
        "illegal write {imm:08x} (at {addr:08x})",
    )
}
