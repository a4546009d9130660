//! The assembled machine: one hart on one bus, plus the host-facing
//! surfaces (framebuffer bytes, input producer handles, snapshots).

use crate::bus::SystemBus;
use crate::dev::{
    KbdHandle, UartHandle, FRAMEBUFFER_BASE, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH, RAM_BASE,
    RAM_SIZE,
};
use crate::hart::Hart;
use crate::snapshot::{self, MachineSnapshot, SnapshotError};
use crate::trap::{Exception, Fatal};
use log::info;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("kernel image ({0} bytes) does not fit in RAM")]
    KernelTooLarge(usize),
    #[error("fatal exception while fetching instruction: {0:?}")]
    FetchFault(Exception),
    #[error("fatal exception while executing instruction: {0:?}")]
    ExecuteFault(Exception),
    #[error("disk transfer failed: {0:?}")]
    DiskTransfer(Exception),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub struct Vm {
    pub hart: Hart,
    pub bus: SystemBus,
}

impl Vm {
    /// Boot a machine: the kernel image is copied to the base of RAM,
    /// sp points at the top of RAM, and the hart starts at RAM_BASE in
    /// machine mode.
    pub fn new(kernel: &[u8], disk: Option<Vec<u8>>) -> Result<Self, VmError> {
        if kernel.len() > RAM_SIZE {
            return Err(VmError::KernelTooLarge(kernel.len()));
        }
        info!(
            "booting: {} byte kernel at {RAM_BASE:#x}, disk {}",
            kernel.len(),
            disk.as_ref()
                .map(|d| format!("{} bytes", d.len()))
                .unwrap_or_else(|| "absent".into()),
        );
        Ok(Self {
            hart: Hart::new(),
            bus: SystemBus::new(kernel, disk),
        })
    }

    /// Fetch, execute and interrupt-poll one instruction. An error means
    /// the machine hit a fatal exception (already delivered as a trap)
    /// or an impossible DMA request, and must not be stepped further.
    pub fn step(&mut self) -> Result<(), VmError> {
        self.hart.step(&mut self.bus).map_err(|fatal| match fatal {
            Fatal::Fetch(e) => VmError::FetchFault(e),
            Fatal::Execute(e) => VmError::ExecuteFault(e),
            Fatal::DiskDma(e) => VmError::DiskTransfer(e),
        })
    }

    /// The guest-visible framebuffer: FRAMEBUFFER_WIDTH x
    /// FRAMEBUFFER_HEIGHT 32-bit little-endian pixels, row-major,
    /// straight out of RAM. A blitter may read this between steps.
    pub fn framebuffer(&self) -> &[u8] {
        let start = (FRAMEBUFFER_BASE - RAM_BASE) as usize;
        let len = FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT * 4;
        &self.bus.ram.bytes()[start..start + len]
    }

    pub fn uart_handle(&self) -> UartHandle {
        self.bus.uart.handle()
    }

    pub fn kbd_handle(&self) -> KbdHandle {
        self.bus.kbd.handle()
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), VmError> {
        let snap = MachineSnapshot {
            hart: self.hart.snapshot(),
            clint: self.bus.clint.snapshot(),
            plic: self.bus.plic.snapshot(),
            uart: self.bus.uart.snapshot(),
            disk: self.bus.disk.snapshot(),
            kbd: self.bus.kbd.snapshot(),
            ram: self.bus.ram.snapshot(),
        };
        snapshot::save(path, &snap)?;
        Ok(())
    }

    pub fn restore_snapshot(&mut self, path: &Path) -> Result<(), VmError> {
        let snap = snapshot::load(path)?;
        self.hart
            .restore(&snap.hart)
            .map_err(SnapshotError::Mismatch)?;
        self.bus.clint.restore(&snap.clint);
        self.bus.plic.restore(&snap.plic);
        self.bus
            .uart
            .restore(&snap.uart)
            .map_err(SnapshotError::Mismatch)?;
        self.bus.disk.restore(&snap.disk);
        self.bus.kbd.restore(&snap.kbd);
        self.bus
            .ram
            .restore(&snap.ram)
            .map_err(SnapshotError::Mismatch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{PrivMode, CSR_MSCRATCH};

    #[test]
    fn boot_contract() {
        let vm = Vm::new(&[0x13, 0x00, 0x00, 0x00], None).unwrap();
        assert_eq!(vm.hart.pc, RAM_BASE);
        assert_eq!(vm.hart.regs[2], RAM_BASE + RAM_SIZE as u64);
        assert_eq!(vm.hart.mode, PrivMode::Machine);
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let image = vec![0u8; RAM_SIZE + 1];
        assert!(matches!(
            Vm::new(&image, None),
            Err(VmError::KernelTooLarge(_))
        ));
    }

    #[test]
    fn framebuffer_window_reflects_ram() {
        let mut vm = Vm::new(&[], None).unwrap();
        vm.bus.store(FRAMEBUFFER_BASE, 4, 0x00FF_8040).unwrap();
        let fb = vm.framebuffer();
        assert_eq!(fb.len(), FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT * 4);
        assert_eq!(&fb[..4], &[0x40, 0x80, 0xFF, 0x00]);
    }

    #[test]
    fn snapshot_round_trips_machine_state() {
        let path = std::env::temp_dir().join(format!("foxvm-snap-{}.zst", std::process::id()));

        let mut vm = Vm::new(&0x02A0_0093u32.to_le_bytes(), Some(vec![7u8; 512])).unwrap();
        vm.step().unwrap(); // addi x1, x0, 42
        vm.hart.csrs.write(CSR_MSCRATCH, 0xABCD);
        vm.bus.clint.mtime = 99;
        vm.bus.plic.sclaim = 10;
        vm.kbd_handle().push_scancode(0x1C);
        vm.save_snapshot(&path).unwrap();

        let mut restored = Vm::new(&[], None).unwrap();
        restored.restore_snapshot(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.hart.pc, vm.hart.pc);
        assert_eq!(restored.hart.regs[1], 42);
        assert_eq!(restored.hart.csrs.read(CSR_MSCRATCH), 0xABCD);
        assert_eq!(restored.bus.clint.mtime, 99);
        assert_eq!(restored.bus.plic.sclaim, 10);
        assert_eq!(restored.bus.disk.backing(), &[7u8; 512]);
        assert_eq!(
            restored.bus.load(crate::dev::KBD_BASE, 4).unwrap(),
            0x1C
        );
        assert_eq!(
            restored.bus.load(RAM_BASE, 4).unwrap(),
            0x02A0_0093
        );
    }
}
