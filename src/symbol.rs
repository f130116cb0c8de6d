use std::fmt::{self, Display};

/// Classification of a lexed symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    /// Instruction mnemonic, or a label reference in operand position.
    Ident,
    /// Label definition; trailing colon already stripped.
    Label,
    /// Register literal, sans `%` sigil.
    Reg,
    /// Address literal, sans `$` sigil. Value is unparsed hex.
    Addr,
    Eof,
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Ident => "identifier",
            SymbolKind::Label => "label",
            SymbolKind::Reg => "register",
            // Address operands are reported as immediates in diagnostics
            SymbolKind::Addr => "immediate",
            SymbolKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// A single lexed symbol: kind, raw text minus sigils, and source line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub val: String,
    pub line: u32,
}

impl Symbol {
    pub fn new(kind: SymbolKind, val: impl Into<String>, line: u32) -> Self {
        Symbol {
            kind,
            val: val.into(),
            line,
        }
    }

    pub fn eof(line: u32) -> Self {
        Symbol::new(SymbolKind::Eof, "", line)
    }
}
