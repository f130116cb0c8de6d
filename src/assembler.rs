use std::io::Write;

use fxhash::FxHashMap;
use miette::{IntoDiagnostic, Report, Result};

use crate::error;
use crate::isa::{self, Opcode, OperandKind, MAGIC};
use crate::lexer::Lexer;
use crate::symbol::{Symbol, SymbolKind};

/// Errors tolerated before the assembler gives up on a file.
pub const ERR_THRESHOLD: usize = 8;

/// One-symbol-lookahead consumer over the lexed symbol stream.
pub struct SymbolReader {
    syms: Vec<Symbol>,
    pos: usize,
    line: u32,
}

impl SymbolReader {
    pub fn new(syms: Vec<Symbol>) -> SymbolReader {
        SymbolReader {
            syms,
            pos: 0,
            line: 1,
        }
    }

    /// Line of the most recently read symbol, for diagnostics.
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn exhausted(&self) -> bool {
        self.pos >= self.syms.len()
    }

    /// Advance to the next symbol, failing once the stream runs dry.
    pub fn read(&mut self) -> Result<Symbol> {
        let Some(sym) = self.syms.get(self.pos) else {
            return Err(error::bad_argument_count());
        };
        self.pos += 1;
        self.line = sym.line;
        Ok(sym.clone())
    }

    /// Advance and validate the symbol kind.
    ///
    /// Two deliberate loosenings: an identifier satisfies an address
    /// expectation (it becomes a label reference), and a label satisfies an
    /// identifier expectation (labels appear in statement position). `Eof`
    /// passes an identifier expectation so the driver can see it and stop.
    pub fn expect(&mut self, expected: SymbolKind) -> Result<Symbol> {
        let sym = self.read()?;
        let accepted = match expected {
            SymbolKind::Ident => matches!(
                sym.kind,
                SymbolKind::Ident | SymbolKind::Label | SymbolKind::Eof
            ),
            SymbolKind::Addr => matches!(sym.kind, SymbolKind::Addr | SymbolKind::Ident),
            kind => sym.kind == kind,
        };
        if accepted {
            Ok(sym)
        } else {
            Err(error::expected_kind(expected, &sym))
        }
    }
}

/// Emits the flat code stream and resolves labels.
///
/// `pc` counts bytes of emitted code only; the magic header is prepended at
/// [`ObjectWriter::finish`] and never shifts label arithmetic.
pub struct ObjectWriter {
    buf: Vec<u8>,
    pc: u32,
    labels: FxHashMap<String, u32>,
    patches: FxHashMap<u32, String>,
}

impl ObjectWriter {
    pub fn new() -> ObjectWriter {
        ObjectWriter {
            buf: Vec::new(),
            pc: 0,
            labels: FxHashMap::default(),
            patches: FxHashMap::default(),
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        self.buf.push(byte);
        self.pc += 1;
    }

    fn emit_addr(&mut self, addr: u32) {
        self.buf.extend_from_slice(&addr.to_le_bytes());
        self.pc += 4;
    }

    pub fn opcode(&mut self, op: Opcode) {
        self.emit_byte(op as u8);
    }

    /// Map `name` to the current pc. No bytes are emitted.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(error::redefining_label(name));
        }
        self.labels.insert(name.to_string(), self.pc);
        Ok(())
    }

    /// Emit one validated operand symbol.
    ///
    /// An identifier here is a label reference: a 4-byte slot is reserved
    /// and recorded for patching at finish.
    pub fn operand(&mut self, sym: &Symbol) -> Result<()> {
        match sym.kind {
            SymbolKind::Reg => {
                let reg = sym
                    .val
                    .parse::<u8>()
                    .map_err(|_| error::bad_register(&sym.val))?;
                self.emit_byte(reg);
            }
            SymbolKind::Addr => {
                let addr = u32::from_str_radix(&sym.val, 16)
                    .map_err(|_| error::bad_address(&sym.val))?;
                self.emit_addr(addr);
            }
            SymbolKind::Ident => {
                self.patches.insert(self.pc, sym.val.clone());
                self.emit_addr(0);
            }
            // expect() never passes other kinds through
            _ => unreachable!("operand symbol of kind {:?}", sym.kind),
        }
        Ok(())
    }

    /// Patch recorded label slots, then write header and code to the sink.
    pub fn finish(mut self, out: &mut impl Write) -> Result<()> {
        for (&offset, name) in &self.patches {
            let Some(&addr) = self.labels.get(name) else {
                return Err(error::no_such_label(name));
            };
            let slot = offset as usize;
            self.buf[slot..slot + 4].copy_from_slice(&addr.to_le_bytes());
        }

        out.write_all(&MAGIC).into_diagnostic()?;
        out.write_all(&self.buf).into_diagnostic()?;
        Ok(())
    }
}

/// Per-line diagnostics, capped at [`ERR_THRESHOLD`] printed entries but
/// counting every error.
struct Diagnostics<'a, W: Write> {
    sink: &'a mut W,
    count: usize,
}

impl<W: Write> Diagnostics<'_, W> {
    fn report(&mut self, line: u32, err: &Report) {
        if self.count < ERR_THRESHOLD {
            let _ = writeln!(self.sink, "{line}: {err}");
        }
        self.count += 1;
    }
}

/// Assemble `src` into an object written to `out`.
///
/// Diagnostics stream to `diag_sink` as `LINE: MESSAGE`. The emit loop keeps
/// going past individual errors to report as many as possible; the final
/// result is an error if any were seen.
pub fn assemble(src: &[u8], out: &mut impl Write, diag_sink: &mut impl Write) -> Result<()> {
    let mut diag = Diagnostics {
        sink: diag_sink,
        count: 0,
    };

    // Lex everything up front; past the threshold the file is rejected
    // outright without attempting to parse.
    let mut lexer = Lexer::new(src);
    let mut syms = Vec::new();
    loop {
        match lexer.next_symbol() {
            Err(e) => {
                diag.report(lexer.line(), &e);
                if diag.count > ERR_THRESHOLD {
                    return Err(error::invalid_file());
                }
            }
            Ok(None) => {}
            Ok(Some(sym)) => {
                let done = sym.kind == SymbolKind::Eof;
                syms.push(sym);
                if done {
                    break;
                }
            }
        }
    }

    let mut reader = SymbolReader::new(syms);
    let mut writer = ObjectWriter::new();

    loop {
        let sym = match reader.expect(SymbolKind::Ident) {
            Ok(sym) => sym,
            Err(e) => {
                diag.report(reader.line(), &e);
                if reader.exhausted() {
                    break;
                }
                continue;
            }
        };

        match sym.kind {
            SymbolKind::Eof => break,
            SymbolKind::Label => {
                if let Err(e) = writer.define_label(&sym.val) {
                    diag.report(sym.line, &e);
                }
            }
            _ => {
                let Some(instr) = isa::lookup(&sym.val) else {
                    diag.report(sym.line, &error::bad_instruction(&sym.val));
                    continue;
                };
                writer.opcode(instr.op);
                for &kind in instr.params {
                    let expected = match kind {
                        OperandKind::Reg => SymbolKind::Reg,
                        OperandKind::Addr => SymbolKind::Addr,
                    };
                    match reader.expect(expected) {
                        Err(e) => diag.report(reader.line(), &e),
                        Ok(operand) => {
                            if let Err(e) = writer.operand(&operand) {
                                diag.report(operand.line, &e);
                            }
                        }
                    }
                }
            }
        }
    }

    if diag.count > 0 {
        return Err(error::error_summary(diag.count, ERR_THRESHOLD));
    }

    writer.finish(out)
}
