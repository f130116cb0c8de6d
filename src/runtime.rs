use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use miette::{IntoDiagnostic, Result};

use crate::error;
use crate::isa::{Opcode, LINK_REG, MAGIC, MEMORY_SIZE, REG_COUNT};

/// Complete machine state plus a cursor over the loaded object.
#[derive(Debug)]
pub struct Cpu {
    /// General-purpose registers.
    reg: [u32; REG_COUNT],
    /// Byte-addressable memory, 32-bit accesses little-endian.
    mem: [u8; MEMORY_SIZE],
    /// Offset of the next instruction from the start of the code stream.
    pc: u32,
    /// Bit 0 set means halted.
    flags: u32,
    code: Cursor<Vec<u8>>,
}

impl Cpu {
    /// Validate the object header and position the cursor at the first
    /// instruction.
    pub fn new(obj: Vec<u8>) -> Result<Cpu> {
        let mut code = Cursor::new(obj);
        let mut hdr = [0u8; MAGIC.len()];
        code.read_exact(&mut hdr)
            .map_err(|_| error::short_header())?;
        if hdr != MAGIC {
            return Err(error::bad_header());
        }

        Ok(Cpu {
            reg: [0; REG_COUNT],
            mem: [0; MEMORY_SIZE],
            pc: 0,
            flags: 0,
            code,
        })
    }

    /// True until the halt bit is the only flag set.
    pub fn running(&self) -> bool {
        self.flags != 1
    }

    /// One fetch-decode-execute cycle. Codepoints printed by `p` go to
    /// `out`.
    ///
    /// `pc` always equals the cursor position minus the header length at the
    /// start of a cycle; handlers keep it that way by returning how many
    /// operand bytes they consumed, or 0 after resynchronizing with `jump`.
    pub fn step(&mut self, out: &mut impl Write) -> Result<()> {
        let byte = self.fetch_u8()?;
        self.pc += 1;

        let Some(op) = Opcode::decode(byte) else {
            self.pc -= 1;
            return Err(error::invalid_opcode(byte));
        };

        let consumed = self.exec(op, out)?;
        self.pc += consumed;
        Ok(())
    }

    fn exec(&mut self, op: Opcode, out: &mut impl Write) -> Result<u32> {
        match op {
            Opcode::Nop => Ok(0),
            Opcode::Ld => {
                let r1 = self.fetch_u8()?;
                let r2 = self.fetch_u8()?;
                let addr = self.read_reg(r2)?;
                let val = self.load_u32(addr)?;
                self.write_reg(r1, val)?;
                Ok(2)
            }
            Opcode::Lr => {
                let imm = self.fetch_u32()?;
                let r = self.fetch_u8()?;
                self.write_reg(r, imm)?;
                Ok(5)
            }
            Opcode::St => {
                let r1 = self.fetch_u8()?;
                let r2 = self.fetch_u8()?;
                let addr = self.read_reg(r1)?;
                let val = self.read_reg(r2)?;
                self.store_u32(addr, val)?;
                Ok(2)
            }
            Opcode::Add => {
                let (r1, r2, r3) = (self.fetch_u8()?, self.fetch_u8()?, self.fetch_u8()?);
                let sum = self.read_reg(r1)?.wrapping_add(self.read_reg(r2)?);
                self.write_reg(r3, sum)?;
                Ok(3)
            }
            Opcode::Sub => {
                let (r1, r2, r3) = (self.fetch_u8()?, self.fetch_u8()?, self.fetch_u8()?);
                let diff = self.read_reg(r1)?.wrapping_sub(self.read_reg(r2)?);
                self.write_reg(r3, diff)?;
                Ok(3)
            }
            Opcode::Addi => {
                let r1 = self.fetch_u8()?;
                let imm = self.fetch_u32()?;
                let r2 = self.fetch_u8()?;
                let sum = self.read_reg(r1)?.wrapping_add(imm);
                self.write_reg(r2, sum)?;
                Ok(6)
            }
            Opcode::Subi => {
                let r1 = self.fetch_u8()?;
                let imm = self.fetch_u32()?;
                let r2 = self.fetch_u8()?;
                let diff = self.read_reg(r1)?.wrapping_sub(imm);
                self.write_reg(r2, diff)?;
                Ok(6)
            }
            Opcode::P => {
                let r = self.fetch_u8()?;
                let val = self.read_reg(r)?;
                let c = char::from_u32(val).unwrap_or(char::REPLACEMENT_CHARACTER);
                write!(out, "{c}").into_diagnostic()?;
                Ok(1)
            }
            Opcode::Beq => self.branch(|a, b| a == b),
            Opcode::Bne => self.branch(|a, b| a != b),
            Opcode::Bgt => self.branch(|a, b| a > b),
            Opcode::Blt => self.branch(|a, b| a < b),
            Opcode::J => {
                let target = self.fetch_u32()?;
                self.jump(target)?;
                Ok(0)
            }
            Opcode::Jr => {
                let r = self.fetch_u8()?;
                let target = self.read_reg(r)?;
                self.jump(target)?;
                Ok(0)
            }
            Opcode::Call => {
                let target = self.fetch_u32()?;
                // Return address: past this 5-byte instruction
                self.write_reg(LINK_REG, self.pc + 4)?;
                self.jump(target)?;
                Ok(0)
            }
            Opcode::Exit => {
                self.flags |= 1;
                Ok(0)
            }
        }
    }

    /// Shared shape of the four conditional branches. Comparisons are
    /// unsigned.
    fn branch(&mut self, taken: impl Fn(u32, u32) -> bool) -> Result<u32> {
        let r1 = self.fetch_u8()?;
        let r2 = self.fetch_u8()?;
        let target = self.fetch_u32()?;
        if taken(self.read_reg(r1)?, self.read_reg(r2)?) {
            self.jump(target)?;
            Ok(0)
        } else {
            Ok(6)
        }
    }

    /// Move both the cursor and `pc` to `target`.
    fn jump(&mut self, target: u32) -> Result<()> {
        self.code
            .seek(SeekFrom::Start(u64::from(target) + MAGIC.len() as u64))
            .into_diagnostic()?;
        self.pc = target;
        Ok(())
    }

    fn fetch_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.code
            .read_exact(&mut buf)
            .map_err(|_| error::bad_read())?;
        Ok(buf[0])
    }

    fn fetch_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.code
            .read_exact(&mut buf)
            .map_err(|_| error::bad_read())?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_reg(&mut self, r: u8) -> Result<u32> {
        self.check_reg(r)?;
        Ok(self.reg[r as usize])
    }

    fn write_reg(&mut self, r: u8, val: u32) -> Result<()> {
        self.check_reg(r)?;
        self.reg[r as usize] = val;
        Ok(())
    }

    /// A bad register index is a fault: it latches the halt bit.
    fn check_reg(&mut self, r: u8) -> Result<()> {
        if r as usize >= REG_COUNT {
            self.flags |= 1;
            return Err(error::invalid_register(r));
        }
        Ok(())
    }

    fn load_u32(&self, addr: u32) -> Result<u32> {
        let addr = addr as usize;
        // 32-bit access must fit entirely below the top of memory
        if addr > MEMORY_SIZE - 4 {
            return Err(error::illegal_read(addr as u32));
        }
        let bytes = [
            self.mem[addr],
            self.mem[addr + 1],
            self.mem[addr + 2],
            self.mem[addr + 3],
        ];
        Ok(u32::from_le_bytes(bytes))
    }

    fn store_u32(&mut self, addr: u32, val: u32) -> Result<()> {
        let idx = addr as usize;
        if idx > MEMORY_SIZE - 4 {
            return Err(error::illegal_write(val, addr));
        }
        self.mem[idx..idx + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Post-mortem register and memory dump.
    pub fn write_trace(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "register trace:")?;
        for (i, val) in self.reg.iter().enumerate() {
            writeln!(w, "{i:02x}: {val:08x}")?;
        }
        writeln!(w, "pc: {:08x}", self.pc)?;

        writeln!(w, "memory trace:")?;
        for (i, byte) in self.mem[..0x100].iter().enumerate() {
            if i > 0 && i % 16 == 0 {
                writeln!(w)?;
            }
            write!(w, "{byte:02x} ")?;
        }
        writeln!(w)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assembler::assemble;

    fn load(src: &str) -> Cpu {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        assemble(src.as_bytes(), &mut out, &mut diag)
            .unwrap_or_else(|e| panic!("assembly failed: {e}\n{}", String::from_utf8_lossy(&diag)));
        Cpu::new(out).unwrap()
    }

    fn run(cpu: &mut Cpu) -> Result<()> {
        let mut out = Vec::new();
        while cpu.running() {
            cpu.step(&mut out)?;
        }
        Ok(())
    }

    fn run_src(src: &str) -> Cpu {
        let mut cpu = load(src);
        run(&mut cpu).unwrap();
        cpu
    }

    /// Run to halt and also return everything `p` printed.
    fn run_src_capture(src: &str) -> (Cpu, Vec<u8>) {
        let mut cpu = load(src);
        let mut out = Vec::new();
        while cpu.running() {
            cpu.step(&mut out).unwrap();
        }
        (cpu, out)
    }

    #[test]
    fn load_rejects_bad_header() {
        let err = Cpu::new(vec![0x48, 0x59, 0x50, 0x01, 0x10]).unwrap_err();
        assert_eq!(err.to_string(), "bad header");
    }

    #[test]
    fn load_rejects_short_file() {
        let err = Cpu::new(vec![0x48, 0x59]).unwrap_err();
        assert_eq!(err.to_string(), "could not read header");
    }

    #[test]
    fn exit_halts_after_one_step() {
        let cpu = run_src("exit\n");
        assert!(!cpu.running());
        assert_eq!(cpu.pc, 1);
    }

    #[test]
    fn lr_loads_immediate() {
        let cpu = run_src("lr $41 %0\nlr $ffffffff %7\nexit\n");
        assert_eq!(cpu.reg[0], 0x41);
        assert_eq!(cpu.reg[7], u32::MAX);
    }

    #[test]
    fn add_and_sub_wrap() {
        let cpu = run_src("lr $ffffffff %0\nlr $01 %1\nadd %0 %1 %2\nsub %2 %1 %3\nexit\n");
        assert_eq!(cpu.reg[2], 0);
        assert_eq!(cpu.reg[3], u32::MAX);
    }

    #[test]
    fn addi_subi_immediates() {
        let cpu = run_src("lr $05 %0\naddi %0 $03 %1\nsubi %1 $02 %2\nexit\n");
        assert_eq!(cpu.reg[1], 8);
        assert_eq!(cpu.reg[2], 6);
    }

    #[test]
    fn store_then_load_round_trips() {
        let cpu = run_src("lr $10 %0\nlr $deadbeef %1\nst %0 %1\nld %2 %0\nexit\n");
        assert_eq!(cpu.reg[2], 0xdeadbeef);
        assert_eq!(&cpu.mem[0x10..0x14], &[0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn counting_loop_reaches_ten() {
        let cpu = run_src(
            "lr $00 %0\n\
             lr $01 %1\n\
             lr $0a %2\n\
             loop:\n\
             add %0 %1 %0\n\
             sub %2 %1 %2\n\
             bne %2 %3 loop\n\
             exit\n",
        );
        assert_eq!(cpu.reg[0], 10);
        assert_eq!(cpu.reg[2], 0);
    }

    #[test]
    fn branch_comparisons_are_unsigned() {
        let cpu = run_src(
            "lr $ffffffff %0\n\
             lr $01 %1\n\
             bgt %0 %1 big\n\
             exit\n\
             big:\n\
             lr $01 %5\n\
             exit\n",
        );
        assert_eq!(cpu.reg[5], 1);

        let cpu = run_src(
            "lr $01 %0\n\
             lr $ffffffff %1\n\
             blt %0 %1 small\n\
             exit\n\
             small:\n\
             lr $02 %5\n\
             exit\n",
        );
        assert_eq!(cpu.reg[5], 2);
    }

    #[test]
    fn branch_not_taken_falls_through() {
        let cpu = run_src("lr $01 %0\nbeq %0 %1 never\nexit\nnever:\nlr $ff %5\nexit\n");
        assert_eq!(cpu.reg[5], 0);
    }

    #[test]
    fn call_links_and_jr_returns() {
        // call is at offset 0 and 5 bytes long, so the return address is 5
        let cpu = run_src("call f\nexit\nf:\njr %3\n");
        assert_eq!(cpu.reg[LINK_REG as usize], 5);
        assert_eq!(cpu.pc, 6);
    }

    #[test]
    fn p_prints_codepoint() {
        let (_, out) = run_src_capture("lr $41 %0\np %0\nexit\n");
        assert_eq!(out, b"A");
    }

    #[test]
    fn p_prints_replacement_for_non_scalar() {
        // 0xd800 is a surrogate, not a unicode scalar value
        let (_, out) = run_src_capture("lr $d800 %0\np %0\nexit\n");
        assert_eq!(String::from_utf8(out).unwrap(), "\u{fffd}");
    }

    #[test]
    fn register_index_eight_faults() {
        let mut cpu = load("p %8\nexit\n");
        let err = run(&mut cpu).unwrap_err();
        assert_eq!(err.to_string(), "invalid register 08");
        assert!(!cpu.running());
    }

    #[test]
    fn register_write_out_of_range_faults() {
        let mut cpu = load("lr $01 %11\nexit\n");
        let err = run(&mut cpu).unwrap_err();
        assert_eq!(err.to_string(), "invalid register 0b");
    }

    #[test]
    fn store_at_last_legal_address() {
        let cpu = run_src("lr $1ffc %0\nlr $aa %1\nst %0 %1\nexit\n");
        assert_eq!(cpu.mem[0x1ffc], 0xaa);
    }

    #[test]
    fn store_past_the_end_faults() {
        let mut cpu = load("lr $1ffd %0\nlr $01 %1\nst %0 %1\nexit\n");
        let err = run(&mut cpu).unwrap_err();
        assert_eq!(err.to_string(), "illegal write 00000001 (at 00001ffd)");
    }

    #[test]
    fn load_past_the_end_faults() {
        let mut cpu = load("lr $1ffd %0\nld %1 %0\nexit\n");
        let err = run(&mut cpu).unwrap_err();
        assert_eq!(err.to_string(), "illegal read 00001ffd");
    }

    #[test]
    fn failed_load_leaves_destination_untouched() {
        let mut cpu = load("lr $29a %2\nlr $1ffd %0\nld %2 %0\nexit\n");
        assert!(run(&mut cpu).is_err());
        assert_eq!(cpu.reg[2], 0x29a);
    }

    #[test]
    fn invalid_opcode_rolls_pc_back() {
        let mut obj = MAGIC.to_vec();
        obj.push(0x11);
        let mut cpu = Cpu::new(obj).unwrap();
        let err = cpu.step(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "invalid opcode: 11");
        assert_eq!(cpu.pc, 0);
    }

    #[test]
    fn running_off_the_end_is_a_bad_read() {
        let mut cpu = Cpu::new(MAGIC.to_vec()).unwrap();
        let err = cpu.step(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "bad read");
    }

    #[test]
    fn trace_format() {
        let cpu = run_src("lr $41 %0\nexit\n");
        let mut out = Vec::new();
        cpu.write_trace(&mut out).unwrap();
        let trace = String::from_utf8(out).unwrap();

        let mut expected = String::from("register trace:\n");
        expected.push_str("00: 00000041\n");
        for i in 1..8 {
            expected.push_str(&format!("{i:02x}: 00000000\n"));
        }
        expected.push_str("pc: 00000007\n");
        expected.push_str("memory trace:\n");
        let row = "00 ".repeat(16);
        let rows: Vec<&str> = std::iter::repeat(row.as_str()).take(16).collect();
        expected.push_str(&rows.join("\n"));
        expected.push('\n');

        assert_eq!(trace, expected);
    }
}
