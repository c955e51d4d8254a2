//! Classic BPF synthesis from template chains.
//!
//! Every discriminator field that is compared by equality, is 8, 16 or 32 bits wide
//! and starts on a byte boundary becomes a load plus a compare. Anything else is left
//! to the software matcher.

use std::fmt;

use byteorder::{NativeEndian, WriteBytesExt};
use tracing::debug;

use crate::chain::Chain;
use crate::error::Error;

// Instruction classes
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;

// LD sizes
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

// LD modes
pub const BPF_IMM: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MSH: u16 = 0xa0;

// JMP operations
pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;

// Operand source
pub const BPF_K: u16 = 0x00;
pub const BPF_A: u16 = 0x10;

pub const DEFAULT_SNAPLEN: u32 = 65535;

/// One instruction, laid out like the kernel's `struct bpf_insn`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInsn {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const _: () = assert!(std::mem::size_of::<BpfInsn>() == 8);

impl BpfInsn {
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        BpfInsn { code, jt, jf, k }
    }

    pub const fn stmt(code: u16, k: u32) -> Self {
        BpfInsn::new(code, 0, 0, k)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BpfProgram {
    insns: Vec<BpfInsn>,
}

impl BpfProgram {
    pub fn new(insns: Vec<BpfInsn>) -> Self {
        BpfProgram { insns }
    }

    pub fn accept_all(snaplen: u32) -> Self {
        BpfProgram::new(vec![BpfInsn::stmt(BPF_RET | BPF_K, snaplen)])
    }

    pub fn insns(&self) -> &[BpfInsn] {
        &self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Instructions in the host's `struct bpf_insn` representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.insns.len() * 8);
        for i in &self.insns {
            // Writes to a Vec cannot fail.
            let _ = out.write_u16::<NativeEndian>(i.code);
            out.push(i.jt);
            out.push(i.jf);
            let _ = out.write_u32::<NativeEndian>(i.k);
        }
        out
    }

    /// Run the program over `packet` and return the accepted length (0 rejects).
    /// Loads past the end of the packet reject, as in the kernel.
    pub fn run(&self, packet: &[u8]) -> u32 {
        let mut a: u32 = 0;
        let mut x: u32 = 0;
        let mut pc = 0usize;
        while let Some(insn) = self.insns.get(pc) {
            pc += 1;
            let class = insn.code & 0x07;
            match class {
                BPF_LD => {
                    let base = match insn.code & 0xe0 {
                        BPF_ABS => 0,
                        BPF_IND => x,
                        BPF_IMM => {
                            a = insn.k;
                            continue;
                        }
                        _ => return 0,
                    };
                    let off = base.wrapping_add(insn.k) as usize;
                    match load(packet, off, insn.code & 0x18) {
                        Some(v) => a = v,
                        None => return 0,
                    }
                }
                BPF_LDX => match insn.code & 0xe0 {
                    BPF_IMM => x = insn.k,
                    BPF_MSH => match packet.get(insn.k as usize) {
                        Some(b) => x = 4 * (*b as u32 & 0x0f),
                        None => return 0,
                    },
                    _ => return 0,
                },
                BPF_JMP => {
                    let op = insn.code & 0xf0;
                    if op == BPF_JA {
                        pc += insn.k as usize;
                        continue;
                    }
                    let taken = match op {
                        BPF_JEQ => a == insn.k,
                        BPF_JGT => a > insn.k,
                        BPF_JGE => a >= insn.k,
                        BPF_JSET => a & insn.k != 0,
                        _ => return 0,
                    };
                    pc += if taken { insn.jt } else { insn.jf } as usize;
                }
                BPF_RET => {
                    return if insn.code & 0x18 == BPF_A { a } else { insn.k };
                }
                _ => return 0,
            }
        }
        0
    }

    pub fn accepts(&self, packet: &[u8]) -> bool {
        self.run(packet) > 0
    }
}

fn load(packet: &[u8], off: usize, size: u16) -> Option<u32> {
    let n = match size {
        BPF_W => 4,
        BPF_H => 2,
        BPF_B => 1,
        _ => return None,
    };
    let bytes = packet.get(off..off.checked_add(n)?)?;
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}

/// Build a filter accepting packets whose discriminators equal the template's.
pub fn compile(template: &Chain, snaplen: u32) -> Result<BpfProgram, Error> {
    let mut insns = Vec::new();
    let mut jumps = Vec::new();
    let mut bit_offset: u64 = 0;
    for packet in template {
        for field in packet.fields() {
            let width = field.width() as u64;
            let size = match field.int_width() {
                Some(8) => Some(BPF_B),
                Some(16) => Some(BPF_H),
                Some(32) => Some(BPF_W),
                _ => None,
            };
            if let (Some(size), Some(value)) = (size, field.as_u64()) {
                if field.is_discriminator() && field.comparator().is_equal() && bit_offset % 8 == 0 {
                    insns.push(BpfInsn::stmt(BPF_LD | size | BPF_ABS, (bit_offset / 8) as u32));
                    jumps.push(insns.len());
                    insns.push(BpfInsn::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 0, value as u32));
                }
            }
            bit_offset += width;
        }
    }
    insns.push(BpfInsn::stmt(BPF_RET | BPF_K, snaplen));
    let reject = insns.len();
    insns.push(BpfInsn::stmt(BPF_RET | BPF_K, 0));

    for index in jumps {
        let displacement = reject - (index + 1);
        insns[index].jf = u8::try_from(displacement)
            .map_err(|_| Error::BpfBranchOverflow { index, displacement })?;
    }
    debug!(instructions = insns.len(), "compiled BPF filter");
    Ok(BpfProgram::new(insns))
}

fn mnemonic(code: u16) -> &'static str {
    match code {
        c if c == BPF_LD | BPF_W | BPF_ABS => "ld",
        c if c == BPF_LD | BPF_H | BPF_ABS => "ldh",
        c if c == BPF_LD | BPF_B | BPF_ABS => "ldb",
        c if c == BPF_LD | BPF_W | BPF_IND => "ld",
        c if c == BPF_LD | BPF_H | BPF_IND => "ldh",
        c if c == BPF_LD | BPF_B | BPF_IND => "ldb",
        c if c == BPF_LD | BPF_IMM => "ld",
        c if c == BPF_LDX | BPF_IMM => "ldx",
        c if c == BPF_LDX | BPF_B | BPF_MSH => "ldxb",
        c if c == BPF_JMP | BPF_JA => "ja",
        c if c == BPF_JMP | BPF_JEQ | BPF_K => "jeq",
        c if c == BPF_JMP | BPF_JGT | BPF_K => "jgt",
        c if c == BPF_JMP | BPF_JGE | BPF_K => "jge",
        c if c == BPF_JMP | BPF_JSET | BPF_K => "jset",
        c if c == BPF_RET | BPF_K || c == BPF_RET | BPF_A => "ret",
        _ => "unimp",
    }
}

/// `tcpdump -d` style listing.
impl fmt::Display for BpfProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, insn) in self.insns.iter().enumerate() {
            let op = mnemonic(insn.code);
            match insn.code & 0x07 {
                BPF_LD if insn.code & 0xe0 == BPF_ABS => {
                    writeln!(f, "({:03}) {:<8} [{}]", i, op, insn.k)?
                }
                BPF_LD if insn.code & 0xe0 == BPF_IND => {
                    writeln!(f, "({:03}) {:<8} [x + {}]", i, op, insn.k)?
                }
                BPF_LDX if insn.code & 0xe0 == BPF_MSH => {
                    writeln!(f, "({:03}) {:<8} 4*([{}]&0xf)", i, op, insn.k)?
                }
                BPF_JMP if insn.code & 0xf0 == BPF_JA => {
                    writeln!(f, "({:03}) {:<8} {}", i, op, i + 1 + insn.k as usize)?
                }
                BPF_JMP => writeln!(
                    f,
                    "({:03}) {:<8} #{:<#14x} jt {}\tjf {}",
                    i,
                    op,
                    insn.k,
                    i + 1 + insn.jt as usize,
                    i + 1 + insn.jf as usize
                )?,
                BPF_RET if insn.code & 0x18 == BPF_A => writeln!(f, "({:03}) {:<8} a", i, op)?,
                _ => writeln!(f, "({:03}) {:<8} #{}", i, op, insn.k)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::layout::Layout;
    use crate::protocol::Protocol;
    use crate::registry::ProtocolRegistry;
    use std::sync::Arc;

    fn eth_ip_tcp(registry: &ProtocolRegistry) -> Chain {
        let eth = registry.packet("ethernet").unwrap();
        let ip = registry.packet("ipv4").unwrap();
        let tcp = registry.packet("tcp").unwrap();
        eth / ip / tcp
    }

    #[test]
    fn discriminators_become_loads_and_compares() {
        let registry = ProtocolRegistry::builtin();
        let prog = compile(&eth_ip_tcp(&registry), DEFAULT_SNAPLEN).unwrap();
        assert_eq!(
            prog.insns(),
            &[
                BpfInsn::stmt(BPF_LD | BPF_H | BPF_ABS, 12),
                BpfInsn::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 3, 0x0800),
                BpfInsn::stmt(BPF_LD | BPF_B | BPF_ABS, 23),
                BpfInsn::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 6),
                BpfInsn::stmt(BPF_RET | BPF_K, DEFAULT_SNAPLEN),
                BpfInsn::stmt(BPF_RET | BPF_K, 0),
            ]
        );
        assert!(prog.to_string().starts_with("(000) ldh      [12]\n"));
        assert_eq!(prog.to_bytes().len(), 6 * 8);
    }

    #[test]
    fn wildcarded_discriminators_are_skipped() {
        let registry = ProtocolRegistry::builtin();
        let mut chain = eth_ip_tcp(&registry);
        chain.get_mut(1).unwrap().wildcard(&["protocol"]).unwrap();
        let prog = compile(&chain, 96).unwrap();
        assert_eq!(prog.len(), 4);
        assert_eq!(prog.insns()[1].jf, 1);
    }

    #[test]
    fn interpreter_applies_the_filter() {
        let registry = ProtocolRegistry::builtin();
        let mut tcp = eth_ip_tcp(&registry);
        let prog = compile(&tcp, 1500).unwrap();
        let frame = tcp.fixup().unwrap().to_vec();
        assert_eq!(prog.run(&frame), 1500);

        let eth = registry.packet("ethernet").unwrap();
        let ip = registry.packet("ipv4").unwrap();
        let udp = registry.packet("udp").unwrap();
        let mut other = eth / ip / udp;
        assert_eq!(prog.run(&other.fixup().unwrap().to_vec()), 0);
        assert_eq!(prog.run(&frame[..13]), 0);
    }

    #[test]
    fn interpreter_handles_indirect_loads() {
        // x = ip header length; load the TCP destination port after it
        let prog = BpfProgram::new(vec![
            BpfInsn::stmt(BPF_LDX | BPF_B | BPF_MSH, 0),
            BpfInsn::stmt(BPF_LD | BPF_H | BPF_IND, 2),
            BpfInsn::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 80),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
            BpfInsn::stmt(BPF_RET | BPF_K, 0),
        ]);
        let mut pkt = vec![0u8; 24];
        pkt[0] = 0x45;
        pkt[22] = 0;
        pkt[23] = 80;
        assert_eq!(prog.run(&pkt), 80);
        pkt[23] = 81;
        assert_eq!(prog.run(&pkt), 0);
    }

    #[test]
    fn too_many_compares_overflow_the_branch() {
        let hop = Arc::new(Protocol::new(
            Layout::new("hop", vec![Field::int("next", 8).discriminator()]).unwrap(),
        ));
        let chain = Chain::from_packets((0..130).map(|_| hop.packet()).collect());
        match compile(&chain, DEFAULT_SNAPLEN) {
            Err(Error::BpfBranchOverflow { index, displacement }) => {
                assert_eq!(index, 1);
                assert_eq!(displacement, 259);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
    }
}
