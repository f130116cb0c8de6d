use fxhash::FxHashMap;
use lazy_static::lazy_static;

/// Object files start with "HYP" and a terminating null.
pub const MAGIC: [u8; 4] = [0x48, 0x59, 0x50, 0x00];

/// Number of general-purpose registers.
pub const REG_COUNT: usize = 8;

/// Byte-addressable memory available to a program.
pub const MEMORY_SIZE: usize = 8192;

/// Register that `call` stores its return address in.
pub const LINK_REG: u8 = 3;

/// Machine opcodes, numbered contiguously from zero.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Ld,
    Lr,
    St,
    Add,
    Sub,
    Addi,
    Subi,
    P,
    Beq,
    Bne,
    Bgt,
    Blt,
    J,
    Jr,
    Call,
    Exit,
}

impl Opcode {
    /// Decode a raw opcode byte. Returns `None` for bytes past the table.
    pub fn decode(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0 => Opcode::Nop,
            1 => Opcode::Ld,
            2 => Opcode::Lr,
            3 => Opcode::St,
            4 => Opcode::Add,
            5 => Opcode::Sub,
            6 => Opcode::Addi,
            7 => Opcode::Subi,
            8 => Opcode::P,
            9 => Opcode::Beq,
            10 => Opcode::Bne,
            11 => Opcode::Bgt,
            12 => Opcode::Blt,
            13 => Opcode::J,
            14 => Opcode::Jr,
            15 => Opcode::Call,
            16 => Opcode::Exit,
            _ => return None,
        };
        Some(op)
    }
}

/// Shape of a single operand in the instruction stream.
///
/// Registers encode as one byte, addresses as a 32-bit little-endian word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    Reg,
    Addr,
}

impl OperandKind {
    /// Encoded width in bytes.
    pub fn width(&self) -> u32 {
        match self {
            OperandKind::Reg => 1,
            OperandKind::Addr => 4,
        }
    }
}

/// Descriptor tying a mnemonic to its opcode and operand shapes.
#[derive(Clone, Copy, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub params: &'static [OperandKind],
}

impl Instruction {
    /// Total encoded size: opcode byte plus operand widths.
    pub fn size(&self) -> u32 {
        1 + self.params.iter().map(OperandKind::width).sum::<u32>()
    }
}

use OperandKind::{Addr, Reg};

/// Mnemonic table; single source of truth for both the assembler and the VM.
const TABLE: [(&str, Opcode, &[OperandKind]); 17] = [
    ("nop", Opcode::Nop, &[]),
    ("ld", Opcode::Ld, &[Reg, Reg]),
    ("lr", Opcode::Lr, &[Addr, Reg]),
    ("st", Opcode::St, &[Reg, Reg]),
    ("add", Opcode::Add, &[Reg, Reg, Reg]),
    ("sub", Opcode::Sub, &[Reg, Reg, Reg]),
    ("addi", Opcode::Addi, &[Reg, Addr, Reg]),
    ("subi", Opcode::Subi, &[Reg, Addr, Reg]),
    ("p", Opcode::P, &[Reg]),
    ("beq", Opcode::Beq, &[Reg, Reg, Addr]),
    ("bne", Opcode::Bne, &[Reg, Reg, Addr]),
    ("bgt", Opcode::Bgt, &[Reg, Reg, Addr]),
    ("blt", Opcode::Blt, &[Reg, Reg, Addr]),
    ("j", Opcode::J, &[Addr]),
    ("jr", Opcode::Jr, &[Reg]),
    ("call", Opcode::Call, &[Addr]),
    ("exit", Opcode::Exit, &[]),
];

lazy_static! {
    static ref INSTRUCTIONS: FxHashMap<&'static str, Instruction> = TABLE
        .iter()
        .map(|&(name, op, params)| (name, Instruction { op, params }))
        .collect();
}

/// Look up the descriptor for a mnemonic.
pub fn lookup(mnemonic: &str) -> Option<&'static Instruction> {
    INSTRUCTIONS.get(mnemonic)
}
