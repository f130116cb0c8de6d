use miette::Result;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::symbol::{Symbol, SymbolKind};

mod cursor;

/// Turns source bytes into [`Symbol`]s.
///
/// Free-form grammar: tokens are whitespace-delimited, `#` comments run to
/// end of line, `%`/`$` sigils start register/address literals, and a bare
/// identifier ending in `:` defines a label.
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
    /// 1-based source line of the next byte.
    line: u32,
}

fn sigil_kind(byte: u8) -> Option<SymbolKind> {
    match byte {
        b'%' => Some(SymbolKind::Reg),
        b'$' => Some(SymbolKind::Addr),
        _ => None,
    }
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src [u8]) -> Lexer<'src> {
        Lexer {
            cursor: Cursor::new(src),
            line: 1,
        }
    }

    /// Line the lexer is currently on, for diagnostics.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Lex one symbol. Returns `None` when the round consumed only a
    /// comment; the caller just calls again. End of input yields an
    /// `Eof` symbol rather than `None`.
    pub fn next_symbol(&mut self) -> Result<Option<Symbol>> {
        loop {
            let Some(c) = self.cursor.bump() else {
                return Ok(Some(Symbol::eof(self.line)));
            };

            match c {
                b'\n' => {
                    self.line += 1;
                    continue;
                }
                b'#' => {
                    // Comment runs up to and including the newline
                    while let Some(b) = self.cursor.bump() {
                        if b == b'\n' {
                            self.line += 1;
                            break;
                        }
                    }
                    return Ok(None);
                }
                _ => {}
            }

            if c.is_ascii_whitespace() {
                continue;
            }
            if !c.is_ascii_graphic() {
                return Err(error::invalid_character(c));
            }

            if let Some(kind) = sigil_kind(c) {
                // Sigil is not part of the token's value
                let line = self.line;
                let val = self.read_token();
                if val.is_empty() && self.cursor.is_eof() {
                    return Ok(Some(Symbol::eof(self.line)));
                }
                return Ok(Some(Symbol::new(kind, val, line)));
            }

            if c.is_ascii_alphabetic() {
                self.cursor.unbump();
                let line = self.line;
                let val = self.read_token();
                if let Some(name) = val.strip_suffix(':') {
                    let sym = Symbol::new(SymbolKind::Label, name, line);
                    // A label definition ends its logical line
                    self.line += 1;
                    return Ok(Some(sym));
                }
                return Ok(Some(Symbol::new(SymbolKind::Ident, val, line)));
            }

            // Stray graphic bytes outside a token are skipped
        }
    }

    /// Accumulate bytes until whitespace or end of input. The terminating
    /// whitespace byte is consumed; a terminating newline counts a line.
    fn read_token(&mut self) -> String {
        let mut buf = Vec::new();
        while let Some(c) = self.cursor.bump() {
            if c == b'\n' {
                self.line += 1;
            }
            if c.is_ascii_whitespace() {
                break;
            }
            buf.push(c);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex_all(src: &str) -> Vec<Symbol> {
        let mut lexer = Lexer::new(src.as_bytes());
        let mut syms = Vec::new();
        loop {
            match lexer.next_symbol().unwrap() {
                Some(sym) if sym.kind == SymbolKind::Eof => {
                    syms.push(sym);
                    return syms;
                }
                Some(sym) => syms.push(sym),
                None => continue,
            }
        }
    }

    #[test]
    fn lex_instruction_line() {
        let syms = lex_all("lr $41 %0\n");
        assert_eq!(
            syms,
            vec![
                Symbol::new(SymbolKind::Ident, "lr", 1),
                Symbol::new(SymbolKind::Addr, "41", 1),
                Symbol::new(SymbolKind::Reg, "0", 1),
                Symbol::eof(2),
            ]
        );
    }

    #[test]
    fn lex_label_definition() {
        let syms = lex_all("loop:\nexit\n");
        assert_eq!(syms[0], Symbol::new(SymbolKind::Label, "loop", 1));
        // Label advances the line counter on top of its newline
        assert_eq!(syms[1], Symbol::new(SymbolKind::Ident, "exit", 3));
    }

    #[test]
    fn lex_comment_consumed() {
        let syms = lex_all("# a comment\nnop\n");
        assert_eq!(syms[0], Symbol::new(SymbolKind::Ident, "nop", 2));
        assert_eq!(syms.len(), 2);
    }

    #[test]
    fn lex_line_counting() {
        let syms = lex_all("\n\nnop\n\np %1\n");
        assert_eq!(syms[0].line, 3);
        assert_eq!(syms[1].line, 5);
        assert_eq!(syms[2].line, 5);
    }

    #[test]
    fn lex_invalid_byte() {
        let mut lexer = Lexer::new(b"nop \x01");
        assert_eq!(
            lexer.next_symbol().unwrap().unwrap().kind,
            SymbolKind::Ident
        );
        let err = lexer.next_symbol().unwrap_err();
        assert_eq!(err.to_string(), "invalid character '01'");
    }

    #[test]
    fn lex_final_token_without_newline() {
        let syms = lex_all("exit");
        assert_eq!(syms[0], Symbol::new(SymbolKind::Ident, "exit", 1));
        assert_eq!(syms[1].kind, SymbolKind::Eof);
    }

    #[test]
    fn lex_empty_source() {
        let syms = lex_all("");
        assert_eq!(syms, vec![Symbol::eof(1)]);
    }

    #[test]
    fn lex_comment_at_eof() {
        let syms = lex_all("exit # trailing");
        assert_eq!(syms[0], Symbol::new(SymbolKind::Ident, "exit", 1));
        assert_eq!(syms[1].kind, SymbolKind::Eof);
    }
}
