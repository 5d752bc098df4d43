//! Register read/write CLI commands, mirroring `regreg_acyclic.c`'s
//! `reg read[16|32|64]` and `reg write` handlers.
//!
//! Tokenizing a raw command line into `reg`, a subcommand, and its
//! arguments is out of scope here (see [`crate::line_io`]); [`dispatch`]
//! takes the subcommand name and its already-split arguments directly.

use core::fmt::Write as _;

use crate::line_io::LineIo;
use crate::regreg::AccessResult;

/// A register space a CLI command can read from and write to. Implemented
/// by [`crate::Gateway`] over its own `reg_access`.
pub trait RegisterAccess {
    /// Read `buf.len()` bytes starting at `addr`. `true` on success.
    fn reg_read(&mut self, addr: u16, buf: &mut [u8]) -> bool;

    /// Write `buf` starting at `addr`. `true` on success.
    fn reg_write(&mut self, addr: u16, buf: &[u8]) -> bool;
}

impl<SPI, CLK, NVS, SENS> RegisterAccess for crate::Gateway<SPI, CLK, NVS, SENS>
where
    SPI: embedded_hal::spi::SpiDevice,
    CLK: crate::Clock + Clone,
    NVS: crate::NvStorage,
    SENS: crate::LocalSensors,
{
    fn reg_read(&mut self, addr: u16, buf: &mut [u8]) -> bool {
        matches!(self.read_register(addr, buf), Ok(AccessResult::Ok))
    }

    fn reg_write(&mut self, addr: u16, buf: &[u8]) -> bool {
        matches!(self.write_register(addr, buf), Ok(AccessResult::Ok))
    }
}

/// The data width a `reg read*` command operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    /// Resolve from a subcommand name, defaulting to `U8` for anything
    /// other than `read16`/`read32`/`read64` — matching `cmd_func_reg_read`
    /// falling through to `sizeof(uint8_t)`.
    fn from_subcommand(name: &str) -> Self {
        match name {
            "read16" => Width::U16,
            "read32" => Width::U32,
            "read64" => Width::U64,
            _ => Width::U8,
        }
    }
}

/// Parse a decimal address/count argument the way `str_to_u16` does:
/// digits only, at most 5 of them, anything else yields `0`.
fn parse_u16(s: &str) -> u16 {
    if s.is_empty() || s.len() > 5 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    s.parse().unwrap_or(0)
}

struct Out<'a, L>(&'a mut L);

impl<'a, L: LineIo> core::fmt::Write for Out<'a, L> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

fn print_denied(out: &mut impl LineIo, addr: u16) {
    let _ = writeln!(Out(out), "{addr}: denied");
}

fn print_write_failed(out: &mut impl LineIo, addr: u16) {
    let _ = writeln!(Out(out), "{addr}: write failed");
}

fn print_value(out: &mut impl LineIo, addr: u16, width: Width, buf: &[u8]) {
    match width {
        Width::U8 => {
            let v = buf[0];
            let _ = writeln!(Out(out), "{addr}: 0x{v:02x} (u: {v}, i: {})", v as i8);
        }
        Width::U16 => {
            let v = u16::from_le_bytes([buf[0], buf[1]]);
            let _ = writeln!(Out(out), "{addr}: 0x{v:04x} (u: {v}, i: {})", v as i16);
        }
        Width::U32 => {
            let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
            let _ = writeln!(Out(out), "{addr}: 0x{v:08x} (u: {v}, i: {})", v as i32);
        }
        Width::U64 => {
            let v = u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]]);
            let _ = writeln!(Out(out), "{addr}: 0x{v:016x} (u: {v}, i: {})", v as i64);
        }
    }
}

/// `reg read[16|32|64] <addr> [count] [s]`.
///
/// Reads `count` (default 1) consecutive values of `width` starting at
/// `addr`. A denied access advances the address by one and continues to
/// the next value (mirroring `cmd_func_reg_read`'s `continue` inside its
/// `for (; range--; reg_acc.addr++)` loop). With the trailing `s` flag,
/// every value's low byte is emitted as a raw character instead, followed
/// by a newline once the whole run completes.
pub fn read(dev: &mut impl RegisterAccess, out: &mut impl LineIo, subcommand: &str, args: &[&str]) {
    let width = Width::from_subcommand(subcommand);
    let addr0 = args.first().map(|s| parse_u16(s)).unwrap_or(0);
    let count = args.get(1).map(|s| parse_u16(s)).unwrap_or(1);
    let as_string = args.get(2).is_some_and(|s| s.starts_with('s'));

    let mut addr = addr0;
    let mut buf = [0u8; 8];
    for _ in 0..count {
        if !dev.reg_read(addr, &mut buf[..width.bytes()]) {
            print_denied(out, addr);
            addr = addr.wrapping_add(1);
            continue;
        }

        if as_string {
            out.putc(buf[0]);
            addr = addr.wrapping_add(1);
        } else {
            print_value(out, addr, width, &buf[..width.bytes()]);
            addr = addr.wrapping_add(width.bytes() as u16);
        }
    }

    if as_string {
        out.putc(b'\n');
    }
}

/// One `reg write` data argument: a single byte, or a quoted string
/// written as one multi-byte span.
pub enum WriteArg<'a> {
    Byte(u8),
    Str(&'a [u8]),
}

/// Parse one already-tokenized write argument: a leading `"` marks the
/// rest (up to an optional closing `"`) as a string span, anything else
/// is a decimal byte value.
pub fn parse_write_arg(token: &str) -> WriteArg<'_> {
    if let Some(rest) = token.strip_prefix('"') {
        let content = rest.split('"').next().unwrap_or(rest);
        WriteArg::Str(content.as_bytes())
    } else {
        WriteArg::Byte(parse_u16(token) as u8)
    }
}

/// `reg write <addr> <byte|"string"> ...`.
///
/// Each plain byte argument is written at the current address and
/// advances it by one; a single quoted string argument is written as one
/// multi-byte span and ends the command, matching `cmd_func_reg_write`'s
/// `cnt_arg = a->arg_cnt` early exit after its one supported string.
pub fn write(dev: &mut impl RegisterAccess, out: &mut impl LineIo, args: &[&str]) {
    let Some(&addr_arg) = args.first() else { return };
    let mut addr = parse_u16(addr_arg);

    for token in &args[1..] {
        match parse_write_arg(token) {
            WriteArg::Byte(b) => {
                if !dev.reg_write(addr, &[b]) {
                    print_write_failed(out, addr);
                    return;
                }
                addr = addr.wrapping_add(1);
            }
            WriteArg::Str(s) => {
                if !dev.reg_write(addr, s) {
                    print_write_failed(out, addr);
                }
                return;
            }
        }
    }
}

/// Dispatch one `reg <subcommand> ...` invocation.
pub fn dispatch(dev: &mut impl RegisterAccess, out: &mut impl LineIo, subcommand: &str, args: &[&str]) {
    match subcommand {
        "read" | "read16" | "read32" | "read64" => read(dev, out, subcommand, args),
        "write" => write(dev, out, args),
        _ => {}
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::line_io::RecordingLineIo;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeRegs {
        bytes: std::collections::BTreeMap<u16, u8>,
        deny: Vec<u16>,
    }

    impl RegisterAccess for FakeRegs {
        fn reg_read(&mut self, addr: u16, buf: &mut [u8]) -> bool {
            for (i, b) in buf.iter_mut().enumerate() {
                let a = addr.wrapping_add(i as u16);
                if self.deny.contains(&a) {
                    return false;
                }
                *b = *self.bytes.get(&a).unwrap_or(&0);
            }
            true
        }

        fn reg_write(&mut self, addr: u16, buf: &[u8]) -> bool {
            for (i, b) in buf.iter().enumerate() {
                let a = addr.wrapping_add(i as u16);
                if self.deny.contains(&a) {
                    return false;
                }
                self.bytes.insert(a, *b);
            }
            true
        }
    }

    #[test]
    fn read_u8_formats_hex_unsigned_and_signed() {
        let mut regs = FakeRegs::default();
        regs.bytes.insert(10, 0xFF);
        let mut out = RecordingLineIo::new();

        read(&mut regs, &mut out, "read", &["10"]);
        assert_eq!(out.as_str(), "10: 0xff (u: 255, i: -1)\n");
    }

    #[test]
    fn read16_walks_addresses_by_width_and_skips_denied_by_one() {
        let mut regs = FakeRegs::default();
        regs.bytes.insert(0, 0x34);
        regs.bytes.insert(1, 0x12);
        regs.deny.push(2);
        let mut out = RecordingLineIo::new();

        read(&mut regs, &mut out, "read16", &["0", "2"]);
        assert_eq!(out.as_str(), "0: 0x1234 (u: 4660, i: 4660)\n2: denied\n");
    }

    #[test]
    fn read_with_string_flag_emits_raw_bytes_then_newline() {
        let mut regs = FakeRegs::default();
        regs.bytes.insert(0, b'h');
        regs.bytes.insert(1, b'i');
        let mut out = RecordingLineIo::new();

        read(&mut regs, &mut out, "read", &["0", "2", "s"]);
        assert_eq!(out.as_str(), "hi\n");
    }

    #[test]
    fn write_sequential_bytes_advances_address_each_time() {
        let mut regs = FakeRegs::default();
        let mut out = RecordingLineIo::new();

        write(&mut regs, &mut out, &["5", "1", "2", "3"]);
        assert_eq!(regs.bytes[&5], 1);
        assert_eq!(regs.bytes[&6], 2);
        assert_eq!(regs.bytes[&7], 3);
        assert_eq!(out.as_str(), "");
    }

    #[test]
    fn write_string_argument_writes_one_multi_byte_span() {
        let mut regs = FakeRegs::default();
        let mut out = RecordingLineIo::new();

        write(&mut regs, &mut out, &["0", "\"hi\""]);
        assert_eq!(regs.bytes[&0], b'h');
        assert_eq!(regs.bytes[&1], b'i');
    }

    #[test]
    fn write_failure_reports_and_stops() {
        let mut regs = FakeRegs::default();
        regs.deny.push(5);
        let mut out = RecordingLineIo::new();

        write(&mut regs, &mut out, &["5", "1", "2"]);
        assert_eq!(out.as_str(), "5: write failed\n");
        assert!(regs.bytes.is_empty());
    }
}
