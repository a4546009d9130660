//! The RV64IMA hart: fetch, decode/execute, Sv39 translation, interrupt
//! polling and trap delivery.
//!
//! One step is fetch, advance the PC by 4, execute, then poll for device
//! interrupts. Execution therefore always sees a PC that already points
//! past the current instruction; branch and jump immediates compensate
//! with `imm - 4`, and trap delivery records `pc - 4` as the exception
//! PC.

use crate::bus::SystemBus;
use crate::csr::*;
use crate::dev::{RAM_BASE, RAM_SIZE};
use crate::isa::*;
use crate::plic::{DISK_IRQ, UART_IRQ};
use crate::trap::{Exception, Fatal, Interrupt};
use log::debug;

const PAGE_SIZE: u64 = 4096;

pub struct Hart {
    pub regs: [u64; 32],
    pub pc: u64,
    pub mode: PrivMode,
    pub csrs: CsrFile,
    paging_on: bool,
    page_table: u64,
}

#[derive(Clone, Debug)]
pub struct HartSnapshot {
    pub regs: [u64; 32],
    pub pc: u64,
    pub mode: PrivMode,
    pub csrs: CsrSnapshot,
}

impl Hart {
    pub fn new() -> Self {
        let mut regs = [0u64; 32];
        regs[2] = RAM_BASE + RAM_SIZE as u64; // sp
        Self {
            regs,
            pc: RAM_BASE,
            mode: PrivMode::Machine,
            csrs: CsrFile::new(),
            paging_on: false,
            page_table: 0,
        }
    }

    pub fn paging_enabled(&self) -> bool {
        self.paging_on
    }

    pub fn page_table_root(&self) -> u64 {
        self.page_table
    }

    /// Execute one instruction and poll for interrupts. A fatal
    /// exception is delivered as a trap first (the kernel gets one look
    /// at it) and then returned so the outer loop can shut the machine
    /// down.
    pub fn step(&mut self, bus: &mut SystemBus) -> Result<(), Fatal> {
        match self.fetch(bus) {
            Ok(insn) => {
                self.pc = self.pc.wrapping_add(4);
                if let Err(e) = self.execute(bus, insn) {
                    self.take_trap(e.code(), self.pc.wrapping_sub(4));
                    if e.is_fatal() {
                        return Err(Fatal::Execute(e));
                    }
                }
            }
            Err(e) => {
                self.take_trap(e.code(), self.pc);
                if e.is_fatal() {
                    return Err(Fatal::Fetch(e));
                }
                // The trap redirected the PC; the step ends here.
                return Ok(());
            }
        }

        match self.poll_interrupts(bus) {
            Ok(Some(intr)) => self.take_trap(intr.cause(), self.pc.wrapping_sub(4)),
            Ok(None) => {}
            Err(e) => return Err(Fatal::DiskDma(e)),
        }
        Ok(())
    }

    fn fetch(&mut self, bus: &mut SystemBus) -> Result<u32, Exception> {
        if self.pc & 0x3 != 0 {
            return Err(Exception::InstructionAddressMisaligned);
        }
        let ppc = self.translate(bus, self.pc, Exception::InstructionPageFault)?;
        match bus.load(ppc, 4) {
            Ok(word) => Ok(word as u32),
            Err(_) => Err(Exception::InstructionAccessFault),
        }
    }

    /// Sv39 walk. `fault` is the page-fault flavor of the access being
    /// translated; access faults from the walk itself pass through
    /// unchanged.
    fn translate(
        &mut self,
        bus: &mut SystemBus,
        addr: u64,
        fault: Exception,
    ) -> Result<u64, Exception> {
        if !self.paging_on {
            return Ok(addr);
        }

        let vpn = [
            (addr >> 12) & 0x1FF,
            (addr >> 21) & 0x1FF,
            (addr >> 30) & 0x1FF,
        ];

        let mut a = self.page_table;
        let mut level = 2i64;
        let pte = loop {
            let pte = bus.load(a + vpn[level as usize] * 8, 8)?;
            let valid = pte & 1 != 0;
            let read = (pte >> 1) & 1 != 0;
            let write = (pte >> 2) & 1 != 0;
            let exec = (pte >> 3) & 1 != 0;
            if !valid || (!read && write) {
                return Err(fault);
            }
            if read || exec {
                break pte;
            }
            a = ((pte >> 10) & 0x0FFF_FFFF_FFFF) * PAGE_SIZE;
            level -= 1;
            if level < 0 {
                return Err(fault);
            }
        };

        let ppn = [
            (pte >> 10) & 0x1FF,
            (pte >> 19) & 0x1FF,
            (pte >> 28) & 0x03FF_FFFF,
        ];
        let offset = addr & 0xFFF;
        match level {
            // 4 KiB page.
            0 => Ok((((pte >> 10) & 0x0FFF_FFFF_FFFF) << 12) | offset),
            // 2 MiB superpage: VPN[0] comes from the virtual address.
            1 => Ok((ppn[2] << 30) | (ppn[1] << 21) | (vpn[0] << 12) | offset),
            // 1 GiB superpage: VPN[1..0] come from the virtual address.
            2 => Ok((ppn[2] << 30) | (vpn[1] << 21) | (vpn[0] << 12) | offset),
            _ => Err(fault),
        }
    }

    fn load(&mut self, bus: &mut SystemBus, addr: u64, size: usize) -> Result<u64, Exception> {
        let pa = self.translate(bus, addr, Exception::LoadPageFault)?;
        bus.load(pa, size)
    }

    fn store(
        &mut self,
        bus: &mut SystemBus,
        addr: u64,
        size: usize,
        value: u64,
    ) -> Result<(), Exception> {
        let pa = self.translate(bus, addr, Exception::StoreAmoPageFault)?;
        bus.store(pa, size, value)
    }

    #[inline]
    fn sign_extend(val: u64, bits: u32) -> i64 {
        let shift = 64 - bits;
        ((val << shift) as i64) >> shift
    }

    #[inline]
    fn imm_i(insn: u32) -> i64 {
        Self::sign_extend((insn >> 20) as u64, 12)
    }

    #[inline]
    fn imm_s(insn: u32) -> i64 {
        let imm = ((insn >> 25) << 5) | ((insn >> 7) & 0x1F);
        Self::sign_extend(imm as u64, 12)
    }

    #[inline]
    fn imm_b(insn: u32) -> i64 {
        let imm = (((insn >> 31) & 0x1) << 12)
            | (((insn >> 7) & 0x1) << 11)
            | (((insn >> 25) & 0x3F) << 5)
            | (((insn >> 8) & 0xF) << 1);
        Self::sign_extend(imm as u64, 13)
    }

    #[inline]
    fn imm_u(insn: u32) -> i64 {
        Self::sign_extend((insn & 0xFFFF_F000) as u64, 32)
    }

    #[inline]
    fn imm_j(insn: u32) -> i64 {
        let imm = (((insn >> 31) & 0x1) << 20)
            | (((insn >> 12) & 0xFF) << 12)
            | (((insn >> 20) & 0x1) << 11)
            | (((insn >> 21) & 0x3FF) << 1);
        Self::sign_extend(imm as u64, 21)
    }

    fn execute(&mut self, bus: &mut SystemBus, insn: u32) -> Result<(), Exception> {
        let opcode = insn & 0x7F;
        let rd = ((insn >> 7) & 0x1F) as usize;
        let funct3 = (insn >> 12) & 0x7;
        let rs1 = ((insn >> 15) & 0x1F) as usize;
        let rs2 = ((insn >> 20) & 0x1F) as usize;
        let funct7 = (insn >> 25) & 0x7F;

        self.regs[0] = 0;

        match opcode {
            OPCODE_LOAD => {
                let addr = self.regs[rs1].wrapping_add(Self::imm_i(insn) as u64);
                let val = match funct3 {
                    F3_LB => self.load(bus, addr, 1)? as i8 as i64 as u64,
                    F3_LH => self.load(bus, addr, 2)? as i16 as i64 as u64,
                    F3_LW => self.load(bus, addr, 4)? as i32 as i64 as u64,
                    F3_LD => self.load(bus, addr, 8)?,
                    F3_LBU => self.load(bus, addr, 1)?,
                    F3_LHU => self.load(bus, addr, 2)?,
                    F3_LWU => self.load(bus, addr, 4)?,
                    _ => return Err(Exception::IllegalInstruction),
                };
                self.regs[rd] = val;
            }
            OPCODE_MISC_MEM => {
                // fence: the hart has no caches to order.
                if funct3 != 0 {
                    return Err(Exception::IllegalInstruction);
                }
            }
            OPCODE_OP_IMM => {
                let imm = Self::imm_i(insn) as u64;
                let shamt = (imm & 0x3F) as u32;
                let a = self.regs[rs1];
                self.regs[rd] = match funct3 {
                    F3_ADD_SUB => a.wrapping_add(imm),
                    F3_SLL => a << shamt,
                    F3_SLT => ((a as i64) < (imm as i64)) as u64,
                    F3_SLTU => (a < imm) as u64,
                    F3_XOR => a ^ imm,
                    F3_SRL_SRA => match insn >> 26 {
                        0x00 => a >> shamt,
                        0x10 => ((a as i64) >> shamt) as u64,
                        _ => return Err(Exception::IllegalInstruction),
                    },
                    F3_OR => a | imm,
                    F3_AND => a & imm,
                    _ => return Err(Exception::IllegalInstruction),
                };
            }
            OPCODE_AUIPC => {
                self.regs[rd] = self
                    .pc
                    .wrapping_add(Self::imm_u(insn) as u64)
                    .wrapping_sub(4);
            }
            OPCODE_OP_IMM_32 => {
                let imm = Self::imm_i(insn) as u64;
                let shamt = (imm & 0x1F) as u32;
                let a = self.regs[rs1];
                self.regs[rd] = match funct3 {
                    F3_ADD_SUB => a.wrapping_add(imm) as i32 as i64 as u64,
                    F3_SLL => (a << shamt) as i32 as i64 as u64,
                    F3_SRL_SRA => match funct7 {
                        F7_BASE => ((a as u32) >> shamt) as i32 as i64 as u64,
                        F7_SUB_SRA => (((a as i32) >> shamt) as i64) as u64,
                        _ => return Err(Exception::IllegalInstruction),
                    },
                    _ => return Err(Exception::IllegalInstruction),
                };
            }
            OPCODE_STORE => {
                let addr = self.regs[rs1].wrapping_add(Self::imm_s(insn) as u64);
                let val = self.regs[rs2];
                match funct3 {
                    F3_SB => self.store(bus, addr, 1, val)?,
                    F3_SH => self.store(bus, addr, 2, val)?,
                    F3_SW => self.store(bus, addr, 4, val)?,
                    F3_SD => self.store(bus, addr, 8, val)?,
                    _ => return Err(Exception::IllegalInstruction),
                }
            }
            OPCODE_AMO => self.execute_amo(bus, insn, funct3, rd, rs1, rs2)?,
            OPCODE_OP => {
                let a = self.regs[rs1];
                let b = self.regs[rs2];
                let shamt = (b & 0x3F) as u32;
                self.regs[rd] = match (funct7, funct3) {
                    (F7_BASE, F3_ADD_SUB) => a.wrapping_add(b),
                    (F7_SUB_SRA, F3_ADD_SUB) => a.wrapping_sub(b),
                    (F7_BASE, F3_SLL) => a << shamt,
                    (F7_BASE, F3_SLT) => ((a as i64) < (b as i64)) as u64,
                    (F7_BASE, F3_SLTU) => (a < b) as u64,
                    (F7_BASE, F3_XOR) => a ^ b,
                    (F7_BASE, F3_SRL_SRA) => a >> shamt,
                    (F7_SUB_SRA, F3_SRL_SRA) => ((a as i64) >> shamt) as u64,
                    (F7_BASE, F3_OR) => a | b,
                    (F7_BASE, F3_AND) => a & b,
                    (F7_MULDIV, F3_MUL) => a.wrapping_mul(b),
                    (F7_MULDIV, F3_MULH) => {
                        let prod = (a as i64 as i128).wrapping_mul(b as i64 as i128);
                        (prod >> 64) as u64
                    }
                    (F7_MULDIV, F3_MULHSU) => {
                        let prod = (a as i64 as i128).wrapping_mul(b as i128);
                        (prod >> 64) as u64
                    }
                    (F7_MULDIV, F3_MULHU) => {
                        let prod = (a as u128).wrapping_mul(b as u128);
                        (prod >> 64) as u64
                    }
                    (F7_MULDIV, F3_DIV) => {
                        let x = a as i64;
                        let y = b as i64;
                        if y == 0 {
                            u64::MAX
                        } else if x == i64::MIN && y == -1 {
                            x as u64
                        } else {
                            x.wrapping_div(y) as u64
                        }
                    }
                    (F7_MULDIV, F3_DIVU) => {
                        if b == 0 {
                            u64::MAX
                        } else {
                            a / b
                        }
                    }
                    (F7_MULDIV, F3_REM) => {
                        let x = a as i64;
                        let y = b as i64;
                        if y == 0 {
                            a
                        } else if x == i64::MIN && y == -1 {
                            0
                        } else {
                            x.wrapping_rem(y) as u64
                        }
                    }
                    (F7_MULDIV, F3_REMU) => {
                        if b == 0 {
                            a
                        } else {
                            a % b
                        }
                    }
                    _ => return Err(Exception::IllegalInstruction),
                };
            }
            OPCODE_LUI => {
                self.regs[rd] = Self::imm_u(insn) as u64;
            }
            OPCODE_OP_32 => {
                let a = self.regs[rs1];
                let b = self.regs[rs2];
                let shamt = (b & 0x1F) as u32;
                self.regs[rd] = match (funct7, funct3) {
                    (F7_BASE, F3_ADD_SUB) => a.wrapping_add(b) as i32 as i64 as u64,
                    (F7_SUB_SRA, F3_ADD_SUB) => a.wrapping_sub(b) as i32 as i64 as u64,
                    (F7_BASE, F3_SLL) => (((a as u32) << shamt) as i32 as i64) as u64,
                    (F7_BASE, F3_SRL_SRA) => (((a as u32) >> shamt) as i32 as i64) as u64,
                    (F7_SUB_SRA, F3_SRL_SRA) => (((a as i32) >> shamt) as i64) as u64,
                    (F7_MULDIV, F3_MUL) => (a as i32).wrapping_mul(b as i32) as i64 as u64,
                    (F7_MULDIV, F3_DIV) => {
                        let x = a as i32;
                        let y = b as i32;
                        if y == 0 {
                            u64::MAX
                        } else if x == i32::MIN && y == -1 {
                            x as i64 as u64
                        } else {
                            x.wrapping_div(y) as i64 as u64
                        }
                    }
                    (F7_MULDIV, F3_DIVU) => {
                        if b as u32 == 0 {
                            u64::MAX
                        } else {
                            ((a as u32 / b as u32) as i32 as i64) as u64
                        }
                    }
                    (F7_MULDIV, F3_REM) => {
                        let x = a as i32;
                        let y = b as i32;
                        if y == 0 {
                            a
                        } else if x == i32::MIN && y == -1 {
                            0
                        } else {
                            x.wrapping_rem(y) as i64 as u64
                        }
                    }
                    (F7_MULDIV, F3_REMU) => {
                        if b as u32 == 0 {
                            a
                        } else {
                            ((a as u32 % b as u32) as i32 as i64) as u64
                        }
                    }
                    _ => return Err(Exception::IllegalInstruction),
                };
            }
            OPCODE_BRANCH => {
                let a = self.regs[rs1];
                let b = self.regs[rs2];
                let take = match funct3 {
                    F3_BEQ => a == b,
                    F3_BNE => a != b,
                    F3_BLT => (a as i64) < (b as i64),
                    F3_BGE => (a as i64) >= (b as i64),
                    F3_BLTU => a < b,
                    F3_BGEU => a >= b,
                    _ => return Err(Exception::IllegalInstruction),
                };
                if take {
                    self.pc = self
                        .pc
                        .wrapping_add(Self::imm_b(insn) as u64)
                        .wrapping_sub(4);
                }
            }
            OPCODE_JALR => {
                let link = self.pc;
                self.pc = self.regs[rs1].wrapping_add(Self::imm_i(insn) as u64) & !1;
                self.regs[rd] = link;
            }
            OPCODE_JAL => {
                self.regs[rd] = self.pc;
                self.pc = self
                    .pc
                    .wrapping_add(Self::imm_j(insn) as u64)
                    .wrapping_sub(4);
            }
            OPCODE_SYSTEM => self.execute_system(insn, funct3, rd, rs1, rs2, funct7)?,
            _ => return Err(Exception::IllegalInstruction),
        }

        self.regs[0] = 0;
        Ok(())
    }

    fn execute_amo(
        &mut self,
        bus: &mut SystemBus,
        insn: u32,
        funct3: u32,
        rd: usize,
        rs1: usize,
        rs2: usize,
    ) -> Result<(), Exception> {
        let funct5 = insn >> 27;
        match funct5 {
            F5_AMOADD | F5_AMOSWAP | F5_AMOXOR | F5_AMOOR | F5_AMOAND | F5_AMOMIN | F5_AMOMAX
            | F5_AMOMINU | F5_AMOMAXU => {}
            _ => return Err(Exception::IllegalInstruction),
        }

        let addr = self.regs[rs1];
        match funct3 {
            F3_AMO_W => {
                if addr & 0x3 != 0 {
                    return Err(Exception::LoadAddressMisaligned);
                }
                let old = self.load(bus, addr, 4)? as u32;
                let b = self.regs[rs2] as u32;
                let new = match funct5 {
                    F5_AMOADD => old.wrapping_add(b),
                    F5_AMOSWAP => b,
                    F5_AMOXOR => old ^ b,
                    F5_AMOOR => old | b,
                    F5_AMOAND => old & b,
                    F5_AMOMIN => (old as i32).min(b as i32) as u32,
                    F5_AMOMAX => (old as i32).max(b as i32) as u32,
                    F5_AMOMINU => old.min(b),
                    F5_AMOMAXU => old.max(b),
                    _ => return Err(Exception::IllegalInstruction),
                };
                self.store(bus, addr, 4, new as u64)?;
                self.regs[rd] = old as i32 as i64 as u64;
            }
            F3_AMO_D => {
                if addr & 0x7 != 0 {
                    return Err(Exception::LoadAddressMisaligned);
                }
                let old = self.load(bus, addr, 8)?;
                let b = self.regs[rs2];
                let new = match funct5 {
                    F5_AMOADD => old.wrapping_add(b),
                    F5_AMOSWAP => b,
                    F5_AMOXOR => old ^ b,
                    F5_AMOOR => old | b,
                    F5_AMOAND => old & b,
                    F5_AMOMIN => (old as i64).min(b as i64) as u64,
                    F5_AMOMAX => (old as i64).max(b as i64) as u64,
                    F5_AMOMINU => old.min(b),
                    F5_AMOMAXU => old.max(b),
                    _ => return Err(Exception::IllegalInstruction),
                };
                self.store(bus, addr, 8, new)?;
                self.regs[rd] = old;
            }
            _ => return Err(Exception::IllegalInstruction),
        }
        Ok(())
    }

    fn execute_system(
        &mut self,
        insn: u32,
        funct3: u32,
        rd: usize,
        rs1: usize,
        rs2: usize,
        funct7: u32,
    ) -> Result<(), Exception> {
        let csr_addr = ((insn >> 20) & 0xFFF) as u16;
        match funct3 {
            F3_PRIV => {
                if rs2 as u32 == RS2_ECALL && funct7 == 0 {
                    return Err(match self.mode {
                        PrivMode::User => Exception::EnvCallFromUMode,
                        PrivMode::Supervisor => Exception::EnvCallFromSMode,
                        PrivMode::Machine => Exception::EnvCallFromMMode,
                    });
                } else if rs2 as u32 == RS2_EBREAK && funct7 == 0 {
                    return Err(Exception::Breakpoint);
                } else if rs2 as u32 == RS2_RET && funct7 == F7_SRET {
                    self.sret();
                } else if rs2 as u32 == RS2_RET && funct7 == F7_MRET {
                    self.mret();
                } else if funct7 == F7_SFENCE_VMA {
                    // No TLB; the walker always reads the live tables.
                } else {
                    return Err(Exception::IllegalInstruction);
                }
            }
            F3_CSRRW => {
                let old = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, self.regs[rs1]);
                self.regs[rd] = old;
                self.update_paging(csr_addr);
            }
            F3_CSRRS => {
                let old = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, old | self.regs[rs1]);
                self.regs[rd] = old;
                self.update_paging(csr_addr);
            }
            F3_CSRRC => {
                let old = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, old & !self.regs[rs1]);
                self.regs[rd] = old;
                self.update_paging(csr_addr);
            }
            F3_CSRRWI => {
                self.regs[rd] = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, rs1 as u64);
                self.update_paging(csr_addr);
            }
            F3_CSRRSI => {
                let old = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, old | rs1 as u64);
                self.regs[rd] = old;
                self.update_paging(csr_addr);
            }
            F3_CSRRCI => {
                let old = self.csrs.read(csr_addr);
                self.csrs.write(csr_addr, old & !(rs1 as u64));
                self.regs[rd] = old;
                self.update_paging(csr_addr);
            }
            _ => return Err(Exception::IllegalInstruction),
        }
        Ok(())
    }

    /// satp is the only CSR whose write has a side effect: it refreshes
    /// the cached translation state.
    fn update_paging(&mut self, csr_addr: u16) {
        if csr_addr != CSR_SATP {
            return;
        }
        let satp = self.csrs.read(CSR_SATP);
        self.page_table = (satp & ((1u64 << 44) - 1)) * PAGE_SIZE;
        self.paging_on = satp >> 60 == 8;
    }

    fn sret(&mut self) {
        self.pc = self.csrs.read(CSR_SEPC);
        let mut sstatus = self.csrs.read(CSR_SSTATUS);
        self.mode = if sstatus & SSTATUS_SPP != 0 {
            PrivMode::Supervisor
        } else {
            PrivMode::User
        };
        if sstatus & SSTATUS_SPIE != 0 {
            sstatus |= SSTATUS_SIE;
        } else {
            sstatus &= !SSTATUS_SIE;
        }
        sstatus |= SSTATUS_SPIE;
        sstatus &= !SSTATUS_SPP;
        self.csrs.write(CSR_SSTATUS, sstatus);
    }

    fn mret(&mut self) {
        self.pc = self.csrs.read(CSR_MEPC);
        let mut mstatus = self.csrs.read(CSR_MSTATUS);
        self.mode = PrivMode::from_bits((mstatus >> 11) & 0x3);
        if mstatus & MSTATUS_MPIE != 0 {
            mstatus |= MSTATUS_MIE;
        } else {
            mstatus &= !MSTATUS_MIE;
        }
        mstatus |= MSTATUS_MPIE;
        mstatus &= !MSTATUS_MPP;
        self.csrs.write(CSR_MSTATUS, mstatus);
    }

    /// Turn device activity into a RISC-V interrupt, if the current mode
    /// may take one. Claims are delivered to the PLIC and surfaced as a
    /// supervisor-external interrupt; a disk claim first runs the DMA
    /// transfer the guest requested.
    fn poll_interrupts(&mut self, bus: &mut SystemBus) -> Result<Option<Interrupt>, Exception> {
        match self.mode {
            PrivMode::Machine if self.csrs.read(CSR_MSTATUS) & MSTATUS_MIE == 0 => {
                return Ok(None)
            }
            PrivMode::Supervisor if self.csrs.read(CSR_SSTATUS) & SSTATUS_SIE == 0 => {
                return Ok(None)
            }
            _ => {}
        }

        let irq = if bus.uart.take_interrupt() {
            Some(UART_IRQ)
        } else if bus.disk.take_notify() {
            bus.disk_dma()?;
            Some(DISK_IRQ)
        } else {
            None
        };
        if let Some(irq) = irq {
            bus.plic.sclaim = irq;
            self.csrs
                .write(CSR_MIP, self.csrs.read(CSR_MIP) | MIP_SEIP);
        }

        if bus.clint.timer_due() {
            self.csrs
                .write(CSR_MIP, self.csrs.read(CSR_MIP) | MIP_MTIP);
        }

        let pending = self.csrs.read(CSR_MIE) & self.csrs.read(CSR_MIP);
        let by_priority = [
            (MIP_MEIP, Interrupt::MachineExternal),
            (MIP_MSIP, Interrupt::MachineSoftware),
            (MIP_MTIP, Interrupt::MachineTimer),
            (MIP_SEIP, Interrupt::SupervisorExternal),
            (MIP_SSIP, Interrupt::SupervisorSoftware),
            (MIP_STIP, Interrupt::SupervisorTimer),
        ];
        for (bit, intr) in by_priority {
            if pending & bit != 0 {
                self.csrs.write(CSR_MIP, self.csrs.read(CSR_MIP) & !bit);
                return Ok(Some(intr));
            }
        }
        Ok(None)
    }

    /// Deliver a trap. Exceptions and interrupts delegated through
    /// medeleg land in S-mode, everything else in M-mode. Vectored
    /// dispatch applies to interrupts only.
    fn take_trap(&mut self, cause: u64, exception_pc: u64) {
        let prev_mode = self.mode;
        let is_interrupt = cause >> 63 != 0;
        let delegated = matches!(prev_mode, PrivMode::User | PrivMode::Supervisor)
            && self.csrs.read(CSR_MEDELEG).wrapping_shr(cause as u32) & 1 != 0;
        debug!(
            "trap cause={cause:#x} epc={exception_pc:#x} {:?} -> {}",
            prev_mode,
            if delegated { "S" } else { "M" }
        );

        if delegated {
            self.mode = PrivMode::Supervisor;
            let stvec = self.csrs.read(CSR_STVEC);
            self.pc = if is_interrupt && stvec & 1 != 0 {
                (stvec & !1).wrapping_add(cause.wrapping_mul(4))
            } else {
                stvec & !1
            };
            self.csrs.write(CSR_SEPC, exception_pc & !1);
            self.csrs.write(CSR_SCAUSE, cause);
            self.csrs.write(CSR_STVAL, 0);
            let mut sstatus = self.csrs.read(CSR_SSTATUS);
            if sstatus & SSTATUS_SIE != 0 {
                sstatus |= SSTATUS_SPIE;
            } else {
                sstatus &= !SSTATUS_SPIE;
            }
            sstatus &= !SSTATUS_SIE;
            if prev_mode == PrivMode::User {
                sstatus &= !SSTATUS_SPP;
            } else {
                sstatus |= SSTATUS_SPP;
            }
            self.csrs.write(CSR_SSTATUS, sstatus);
        } else {
            self.mode = PrivMode::Machine;
            let mtvec = self.csrs.read(CSR_MTVEC);
            self.pc = if is_interrupt && mtvec & 1 != 0 {
                (mtvec & !1).wrapping_add(cause.wrapping_mul(4))
            } else {
                mtvec & !1
            };
            self.csrs.write(CSR_MEPC, exception_pc & !1);
            self.csrs.write(CSR_MCAUSE, cause);
            self.csrs.write(CSR_MTVAL, 0);
            let mut mstatus = self.csrs.read(CSR_MSTATUS);
            if mstatus & MSTATUS_MIE != 0 {
                mstatus |= MSTATUS_MPIE;
            } else {
                mstatus &= !MSTATUS_MPIE;
            }
            mstatus &= !MSTATUS_MIE;
            mstatus &= !MSTATUS_MPP;
            self.csrs.write(CSR_MSTATUS, mstatus);
        }
    }

    pub fn snapshot(&self) -> HartSnapshot {
        HartSnapshot {
            regs: self.regs,
            pc: self.pc,
            mode: self.mode,
            csrs: self.csrs.snapshot(),
        }
    }

    pub fn restore(&mut self, snap: &HartSnapshot) -> Result<(), &'static str> {
        self.regs = snap.regs;
        self.pc = snap.pc;
        self.mode = snap.mode;
        self.csrs.restore(&snap.csrs)?;
        // Translation state is a pure function of satp.
        self.update_paging(CSR_SATP);
        Ok(())
    }
}

impl Default for Hart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SystemBus;

    fn machine(words: &[u32]) -> (Hart, SystemBus) {
        let mut kernel = Vec::new();
        for w in words {
            kernel.extend_from_slice(&w.to_le_bytes());
        }
        (Hart::new(), SystemBus::new(&kernel, None))
    }

    #[test]
    fn boot_state_matches_the_contract() {
        let hart = Hart::new();
        assert_eq!(hart.pc, RAM_BASE);
        assert_eq!(hart.regs[2], RAM_BASE + RAM_SIZE as u64);
        assert_eq!(hart.mode, PrivMode::Machine);
        assert!(!hart.paging_enabled());
    }

    #[test]
    fn addi_writes_and_advances() {
        let (mut hart, mut bus) = machine(&[0x02A0_0093]); // addi x1, x0, 42
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[1], 42);
        assert_eq!(hart.pc, 0x8000_0004);
    }

    #[test]
    fn lui_sign_extends_from_bit_31() {
        let (mut hart, mut bus) = machine(&[0xFFFF_F2B7]); // lui x5, 0xFFFFF
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[5], 0xFFFF_FFFF_FFFF_F000);
    }

    #[test]
    fn auipc_adds_to_the_original_pc() {
        let (mut hart, mut bus) = machine(&[0x0000_1317]); // auipc x6, 0x1
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[6], 0x8000_1000);
    }

    #[test]
    fn store_then_load_byte() {
        // sb x1, 0(x2); lbu x3, 0(x2)
        let (mut hart, mut bus) = machine(&[0x0011_0023, 0x0001_4183]);
        hart.regs[1] = 255;
        hart.regs[2] = 0x8000_1000;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], 255);
    }

    #[test]
    fn signed_byte_load_sign_extends() {
        // sb x1, 0(x2); lb x3, 0(x2)
        let (mut hart, mut bus) = machine(&[0x0011_0023, 0x0001_0183]);
        hart.regs[1] = 255;
        hart.regs[2] = 0x8000_1000;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], 0xFFFF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn amoadd_returns_the_old_word() {
        let (mut hart, mut bus) = machine(&[0x0020_A1AF]); // amoadd.w x3, x2, (x1)
        bus.store(0x8000_2000, 4, 5).unwrap();
        hart.regs[1] = 0x8000_2000;
        hart.regs[2] = 7;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], 5);
        assert_eq!(bus.load(0x8000_2000, 4).unwrap(), 12);
    }

    #[test]
    fn misaligned_amo_traps_without_touching_memory() {
        let (mut hart, mut bus) = machine(&[0x0020_A1AF]); // amoadd.w x3, x2, (x1)
        bus.store(0x8000_2000, 4, 5).unwrap();
        hart.regs[1] = 0x8000_2001;
        hart.regs[2] = 7;
        hart.step(&mut bus).unwrap(); // non-fatal, traps to M
        assert_eq!(
            hart.csrs.read(CSR_MCAUSE),
            Exception::LoadAddressMisaligned.code()
        );
        assert_eq!(hart.csrs.read(CSR_MEPC), 0x8000_0000);
        assert_eq!(bus.load(0x8000_2000, 4).unwrap(), 5);
    }

    #[test]
    fn delegated_ecall_from_user_mode() {
        let (mut hart, mut bus) = machine(&[0x0000_0073]); // ecall
        hart.mode = PrivMode::User;
        hart.csrs.write(CSR_MEDELEG, 1 << 8);
        hart.csrs.write(CSR_STVEC, 0x8000_3000);
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.mode, PrivMode::Supervisor);
        assert_eq!(hart.pc, 0x8000_3000);
        assert_eq!(hart.csrs.read(CSR_SEPC), 0x8000_0000);
        assert_eq!(hart.csrs.read(CSR_SCAUSE), 8);
        assert_eq!(hart.csrs.read(CSR_SSTATUS) & SSTATUS_SPP, 0);
    }

    #[test]
    fn undelegated_ecall_lands_in_machine_mode() {
        let (mut hart, mut bus) = machine(&[0x0000_0073]); // ecall
        hart.csrs.write(CSR_MTVEC, 0x8000_4000);
        hart.csrs.write(CSR_MSTATUS, MSTATUS_MIE | MSTATUS_MPP);
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.mode, PrivMode::Machine);
        assert_eq!(hart.pc, 0x8000_4000);
        assert_eq!(hart.csrs.read(CSR_MCAUSE), 11);
        assert_eq!(hart.csrs.read(CSR_MEPC), 0x8000_0000);
        let mstatus = hart.csrs.read(CSR_MSTATUS);
        // MIE saved into MPIE and cleared; MPP cleared unconditionally.
        assert_eq!(mstatus & MSTATUS_MPIE, MSTATUS_MPIE);
        assert_eq!(mstatus & MSTATUS_MIE, 0);
        assert_eq!(mstatus & MSTATUS_MPP, 0);
    }

    #[test]
    fn trap_and_sret_round_trip() {
        // ecall at 0x80000000, sret at the handler (0x80003000).
        let mut words = vec![0x0000_0073u32];
        words.resize(0x3000 / 4, 0);
        words.push(0x1020_0073); // sret
        let (mut hart, mut bus) = machine(&words);
        hart.mode = PrivMode::Supervisor;
        hart.csrs.write(CSR_MEDELEG, 1 << 9);
        hart.csrs.write(CSR_STVEC, 0x8000_3000);
        hart.csrs.write(CSR_SSTATUS, SSTATUS_SIE);

        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_3000);
        assert_eq!(hart.mode, PrivMode::Supervisor);
        let sstatus = hart.csrs.read(CSR_SSTATUS);
        assert_eq!(sstatus & SSTATUS_SIE, 0);
        assert_eq!(sstatus & SSTATUS_SPIE, SSTATUS_SPIE);
        assert_eq!(sstatus & SSTATUS_SPP, SSTATUS_SPP);

        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0000);
        assert_eq!(hart.mode, PrivMode::Supervisor);
        assert_eq!(hart.csrs.read(CSR_SSTATUS) & SSTATUS_SIE, SSTATUS_SIE);
    }

    #[test]
    fn trap_and_mret_round_trip() {
        // ecall at 0x80000000; the handler restores MPP to machine mode
        // and returns: csrrs x0, mstatus, x1; mret.
        let mut words = vec![0x0000_0073u32];
        words.resize(0x2000 / 4, 0);
        words.push(0x3000_A073); // csrrs x0, mstatus, x1
        words.push(0x3020_0073); // mret
        let (mut hart, mut bus) = machine(&words);
        hart.regs[1] = MSTATUS_MPP;
        hart.csrs.write(CSR_MTVEC, 0x8000_2000);
        hart.csrs.write(CSR_MSTATUS, MSTATUS_MIE);

        hart.step(&mut bus).unwrap(); // ecall -> M trap
        assert_eq!(hart.pc, 0x8000_2000);
        assert_eq!(hart.csrs.read(CSR_MSTATUS) & MSTATUS_MIE, 0);

        hart.step(&mut bus).unwrap(); // restore MPP
        hart.step(&mut bus).unwrap(); // mret
        assert_eq!(hart.pc, 0x8000_0000);
        assert_eq!(hart.mode, PrivMode::Machine);
        assert_eq!(hart.csrs.read(CSR_MSTATUS) & MSTATUS_MIE, MSTATUS_MIE);
    }

    #[test]
    fn addiw_sign_extends_the_32_bit_result() {
        let (mut hart, mut bus) = machine(&[0xFFF0_009B]); // addiw x1, x0, -1
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[1], 0xFFFF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn division_edge_cases_do_not_trap() {
        // div x3, x1, x2; rem x4, x1, x2
        let (mut hart, mut bus) = machine(&[0x0220_C1B3, 0x0220_E233]);
        hart.regs[1] = 1;
        hart.regs[2] = 0;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], u64::MAX); // x / 0 == -1
        assert_eq!(hart.regs[4], 1); // x % 0 == x

        let (mut hart, mut bus) = machine(&[0x0220_C1B3, 0x0220_E233]);
        hart.regs[1] = i64::MIN as u64;
        hart.regs[2] = -1i64 as u64;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], i64::MIN as u64); // overflow quotient
        assert_eq!(hart.regs[4], 0); // overflow remainder
    }

    #[test]
    fn unsigned_division_by_zero_saturates() {
        // divu x3, x1, x2; remu x4, x1, x2
        let (mut hart, mut bus) = machine(&[0x0220_D1B3, 0x0220_F233]);
        hart.regs[1] = 1234;
        hart.regs[2] = 0;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], u64::MAX);
        assert_eq!(hart.regs[4], 1234);
    }

    #[test]
    fn mulh_produces_the_high_64_bits() {
        // mulh x3, x1, x2; mulhu x4, x1, x2; mulhsu x5, x1, x2
        let (mut hart, mut bus) = machine(&[0x0220_91B3, 0x0220_B233, 0x0220_A2B3]);
        hart.regs[1] = -1i64 as u64;
        hart.regs[2] = -1i64 as u64;
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], 0); // (-1) * (-1) = 1, high half 0
        assert_eq!(hart.regs[4], 0xFFFF_FFFF_FFFF_FFFE); // unsigned max squared
        assert_eq!(hart.regs[5], u64::MAX); // -1 * unsigned max
    }

    #[test]
    fn x0_stays_zero_after_a_write_to_it() {
        let (mut hart, mut bus) = machine(&[0x0050_0013]); // addi x0, x0, 5
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[0], 0);
    }

    #[test]
    fn jal_links_past_the_instruction() {
        let (mut hart, mut bus) = machine(&[0x0080_006F]); // jal x0, +8
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0008);

        let (mut hart, mut bus) = machine(&[0x0080_00EF]); // jal x1, +8
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[1], 0x8000_0004);
    }

    #[test]
    fn jalr_masks_the_low_bit_and_links() {
        let (mut hart, mut bus) = machine(&[0x0000_80E7]); // jalr x1, 0(x1)
        hart.regs[1] = 0x8000_0101;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0100);
        assert_eq!(hart.regs[1], 0x8000_0004);
    }

    #[test]
    fn branch_adds_the_compensated_immediate() {
        let (mut hart, mut bus) = machine(&[0x0020_8463]); // beq x1, x2, +8
        hart.regs[1] = 3;
        hart.regs[2] = 3;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0008);

        let (mut hart, mut bus) = machine(&[0x0020_8463, 0]);
        hart.regs[1] = 3;
        hart.regs[2] = 4;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0004);
    }

    #[test]
    fn satp_write_refreshes_translation_state() {
        let (mut hart, mut bus) = machine(&[0x1800_9073]); // csrrw x0, satp, x1
        hart.regs[1] = (8u64 << 60) | 0x8_0010;
        hart.step(&mut bus).unwrap();
        assert!(hart.paging_enabled());
        assert_eq!(hart.page_table_root(), 0x8_0010 * 4096);

        // Writing a non-Sv39 mode turns paging back off.
        let (mut hart, mut bus) = machine(&[0x1800_9073]);
        hart.regs[1] = 0x8_0010;
        hart.step(&mut bus).unwrap();
        assert!(!hart.paging_enabled());
        assert_eq!(hart.page_table_root(), 0x8_0010 * 4096);
    }

    #[test]
    fn csr_set_and_clear_read_the_old_value() {
        // csrrs x2, mscratch, x1; csrrc x3, mscratch, x1
        let (mut hart, mut bus) = machine(&[0x3400_A173, 0x3400_B1F3]);
        hart.csrs.write(CSR_MSCRATCH, 0b1100);
        hart.regs[1] = 0b1010;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[2], 0b1100);
        assert_eq!(hart.csrs.read(CSR_MSCRATCH), 0b1110);
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.regs[3], 0b1110);
        assert_eq!(hart.csrs.read(CSR_MSCRATCH), 0b0100);
    }

    #[test]
    fn fetch_from_an_unmapped_address_is_fatal() {
        let (mut hart, mut bus) = machine(&[]);
        hart.pc = 0;
        assert_eq!(
            hart.step(&mut bus),
            Err(Fatal::Fetch(Exception::InstructionAccessFault))
        );
    }

    #[test]
    fn misaligned_fetch_is_fatal() {
        let (mut hart, mut bus) = machine(&[0, 0]);
        hart.pc = 0x8000_0002;
        assert_eq!(
            hart.step(&mut bus),
            Err(Fatal::Fetch(Exception::InstructionAddressMisaligned))
        );
    }

    #[test]
    fn unknown_encodings_raise_illegal_instruction() {
        let (mut hart, mut bus) = machine(&[0xFFFF_FFFF]);
        hart.step(&mut bus).unwrap();
        assert_eq!(
            hart.csrs.read(CSR_MCAUSE),
            Exception::IllegalInstruction.code()
        );
    }

    fn enable_sv39(hart: &mut Hart, root: u64) {
        hart.csrs.write(CSR_SATP, (8u64 << 60) | (root >> 12));
        hart.update_paging(CSR_SATP);
    }

    #[test]
    fn sv39_translates_a_4k_page() {
        let (mut hart, mut bus) = machine(&[]);
        let root = 0x8001_0000u64;
        let l1 = 0x8001_1000u64;
        let l0 = 0x8001_2000u64;
        // VA 0x4000_2ABC: vpn2=1, vpn1=0, vpn0=2.
        bus.store(root + 1 * 8, 8, (l1 >> 12) << 10 | 1).unwrap();
        bus.store(l1, 8, (l0 >> 12) << 10 | 1).unwrap();
        bus.store(l0 + 2 * 8, 8, (0x8000_5000u64 >> 12) << 10 | 0xF)
            .unwrap();
        enable_sv39(&mut hart, root);

        let pa = hart
            .translate(&mut bus, 0x4000_2ABC, Exception::LoadPageFault)
            .unwrap();
        assert_eq!(pa, 0x8000_5ABC);
    }

    #[test]
    fn sv39_translates_a_2m_superpage() {
        let (mut hart, mut bus) = machine(&[]);
        let root = 0x8001_0000u64;
        let l1 = 0x8001_1000u64;
        bus.store(root + 1 * 8, 8, (l1 >> 12) << 10 | 1).unwrap();
        // Leaf at level 1 mapping onto PA 0x8020_0000.
        bus.store(l1, 8, (0x8020_0000u64 >> 12) << 10 | 0xF).unwrap();
        enable_sv39(&mut hart, root);

        let pa = hart
            .translate(&mut bus, 0x4000_2ABC, Exception::LoadPageFault)
            .unwrap();
        assert_eq!(pa, 0x8020_2ABC);
    }

    #[test]
    fn sv39_translates_a_1g_superpage() {
        let (mut hart, mut bus) = machine(&[]);
        let root = 0x8001_0000u64;
        // Leaf at level 2 mapping VA 2 GiB onto PA 2 GiB (identity).
        bus.store(root + 2 * 8, 8, (0x8000_0000u64 >> 12) << 10 | 0xF)
            .unwrap();
        enable_sv39(&mut hart, root);

        let pa = hart
            .translate(&mut bus, 0x8012_3456, Exception::LoadPageFault)
            .unwrap();
        assert_eq!(pa, 0x8012_3456);
    }

    #[test]
    fn sv39_walk_without_a_leaf_page_faults() {
        let (mut hart, mut bus) = machine(&[]);
        let root = 0x8001_0000u64;
        enable_sv39(&mut hart, root);
        // Root entry invalid.
        assert_eq!(
            hart.translate(&mut bus, 0x4000_0000, Exception::LoadPageFault),
            Err(Exception::LoadPageFault)
        );
        // Write-without-read is reserved.
        bus.store(root + 8, 8, 0b101).unwrap();
        assert_eq!(
            hart.translate(&mut bus, 0x4000_0000, Exception::StoreAmoPageFault),
            Err(Exception::StoreAmoPageFault)
        );
    }

    #[test]
    fn uart_interrupt_is_claimed_and_vectored() {
        let mut words = vec![0x0000_0013u32]; // nop
        words.resize(0x4000 / 4, 0);
        let (mut hart, mut bus) = machine(&words);
        hart.mode = PrivMode::Supervisor;
        hart.csrs.write(CSR_MIDELEG, MIP_SSIP | MIP_STIP | MIP_SEIP);
        hart.csrs.write(CSR_MEDELEG, 1 << 9);
        hart.csrs.write(CSR_MIE, MIP_SEIP);
        hart.csrs.write(CSR_SSTATUS, SSTATUS_SIE);
        hart.csrs.write(CSR_STVEC, 0x8000_3001); // vectored

        bus.uart.handle().push_byte(b'a');
        hart.step(&mut bus).unwrap();

        assert_eq!(bus.plic.sclaim, UART_IRQ);
        assert_eq!(hart.pc, 0x8000_3000 + 4 * 9);
        assert_eq!(hart.csrs.read(CSR_SCAUSE), (1 << 63) | 9);
        assert_eq!(hart.csrs.read(CSR_SEPC), 0x8000_0000);
        // The pending bit was consumed on delivery.
        assert_eq!(hart.csrs.read(CSR_MIP) & MIP_SEIP, 0);
    }

    #[test]
    fn interrupts_are_masked_by_the_enable_bits() {
        let (mut hart, mut bus) = machine(&[0x0000_0013]); // nop
        bus.uart.handle().push_byte(b'a');
        // Machine mode with MIE clear: nothing is delivered, and the
        // device flag is left pending for a later poll.
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0004);
        assert!(bus.uart.take_interrupt());
    }

    #[test]
    fn machine_timer_fires_when_mtime_reaches_mtimecmp() {
        let (mut hart, mut bus) = machine(&[0x0000_0013, 0x0000_0013]); // nops
        hart.csrs.write(CSR_MSTATUS, MSTATUS_MIE);
        hart.csrs.write(CSR_MIE, MIP_MTIP);
        hart.csrs.write(CSR_MTVEC, 0x8000_2000);
        bus.clint.mtimecmp = 10;
        bus.clint.mtime = 9;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_0004);

        bus.clint.mtime = 10;
        hart.step(&mut bus).unwrap();
        assert_eq!(hart.pc, 0x8000_2000);
        assert_eq!(hart.csrs.read(CSR_MCAUSE), (1 << 63) | 7);
    }

    #[test]
    fn disk_notify_runs_dma_before_the_interrupt() {
        use crate::disk::{
            DISK_BUFFER_ADDR_LOW_ADDR, DISK_BUFFER_LEN_LOW_ADDR, DISK_DIRECTION_ADDR,
            DISK_NOTIFY_ADDR, DISK_SECTOR_ADDR,
        };
        let mut kernel = vec![0u8; 8];
        kernel[..4].copy_from_slice(&0x0000_0013u32.to_le_bytes()); // nop
        let mut image = vec![0u8; 1024];
        image[512..516].copy_from_slice(b"data");
        let mut bus = SystemBus::new(&kernel, Some(image));
        let mut hart = Hart::new();
        hart.mode = PrivMode::Supervisor;
        hart.csrs.write(CSR_MIDELEG, MIP_SEIP);
        hart.csrs.write(CSR_MEDELEG, 1 << 9);
        hart.csrs.write(CSR_MIE, MIP_SEIP);
        hart.csrs.write(CSR_SSTATUS, SSTATUS_SIE);
        hart.csrs.write(CSR_STVEC, 0x8000_1000);

        bus.store(DISK_BUFFER_ADDR_LOW_ADDR, 4, 0x8000_4000).unwrap();
        bus.store(DISK_BUFFER_LEN_LOW_ADDR, 4, 4).unwrap();
        bus.store(DISK_SECTOR_ADDR, 4, 1).unwrap();
        bus.store(DISK_DIRECTION_ADDR, 4, 0).unwrap();
        bus.store(DISK_NOTIFY_ADDR, 4, 0).unwrap();

        hart.step(&mut bus).unwrap();

        assert_eq!(bus.plic.sclaim, DISK_IRQ);
        assert_eq!(bus.load(0x8000_4000, 4).unwrap(), u32::from_le_bytes(*b"data") as u64);
        // Trap to S-mode on the external interrupt, cause 9.
        assert_eq!(hart.csrs.read(CSR_SCAUSE), (1 << 63) | 9);
    }
}
