//! Physical address decoder.
//!
//! Routes a (physical address, width) access to exactly one device. The
//! device windows live below RAM_BASE and are disjoint; RAM claims every
//! address from RAM_BASE up. Widths are byte sizes {1, 2, 4, 8}; each
//! device enforces its own natural width.

use crate::clint::{Clint, CLINT_BASE, CLINT_SIZE};
use crate::dev::{Kbd, Ram, Uart, KBD_BASE, KBD_SIZE, RAM_BASE, UART_BASE, UART_SIZE};
use crate::disk::{
    Disk, DIRECTION_RAM_TO_DISK, DISK_BASE, DISK_BUFFER_ADDR_HIGH_ADDR, DISK_BUFFER_ADDR_LOW_ADDR,
    DISK_BUFFER_LEN_HIGH_ADDR, DISK_BUFFER_LEN_LOW_ADDR, DISK_DIRECTION_ADDR, DISK_DONE_ADDR,
    DISK_SECTOR_ADDR, DISK_SIZE, SECTOR_SIZE,
};
use crate::plic::{Plic, PLIC_BASE, PLIC_SIZE};
use crate::trap::Exception;

/// A memory-mapped device model. `addr` is the offset inside the
/// device's window; `size` is the access width in bytes.
pub trait Device {
    fn read(&mut self, addr: u64, size: usize) -> Result<u64, Exception>;
    fn write(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Exception>;
}

#[inline]
fn in_range(addr: u64, base: u64, size: u64) -> bool {
    addr >= base && addr < base + size
}

pub struct SystemBus {
    pub ram: Ram,
    pub clint: Clint,
    pub plic: Plic,
    pub uart: Uart,
    pub disk: Disk,
    pub kbd: Kbd,
}

impl SystemBus {
    pub fn new(kernel: &[u8], disk_image: Option<Vec<u8>>) -> Self {
        Self {
            ram: Ram::new(kernel),
            clint: Clint::new(),
            plic: Plic::new(),
            uart: Uart::new(),
            disk: Disk::new(disk_image),
            kbd: Kbd::new(),
        }
    }

    pub fn load(&mut self, addr: u64, size: usize) -> Result<u64, Exception> {
        if in_range(addr, CLINT_BASE, CLINT_SIZE) {
            return self.clint.read(addr - CLINT_BASE, size);
        }
        if in_range(addr, PLIC_BASE, PLIC_SIZE) {
            return self.plic.read(addr - PLIC_BASE, size);
        }
        if in_range(addr, UART_BASE, UART_SIZE) {
            return self.uart.read(addr - UART_BASE, size);
        }
        if in_range(addr, DISK_BASE, DISK_SIZE) {
            return self.disk.read(addr - DISK_BASE, size);
        }
        if in_range(addr, KBD_BASE, KBD_SIZE) {
            return self.kbd.read(addr - KBD_BASE, size);
        }
        if addr >= RAM_BASE {
            return self.ram.read(addr - RAM_BASE, size);
        }
        Err(Exception::LoadAccessFault)
    }

    pub fn store(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Exception> {
        if in_range(addr, CLINT_BASE, CLINT_SIZE) {
            return self.clint.write(addr - CLINT_BASE, size, value);
        }
        if in_range(addr, PLIC_BASE, PLIC_SIZE) {
            return self.plic.write(addr - PLIC_BASE, size, value);
        }
        if in_range(addr, UART_BASE, UART_SIZE) {
            return self.uart.write(addr - UART_BASE, size, value);
        }
        if in_range(addr, DISK_BASE, DISK_SIZE) {
            return self.disk.write(addr - DISK_BASE, size, value);
        }
        if in_range(addr, KBD_BASE, KBD_SIZE) {
            return self.kbd.write(addr - KBD_BASE, size, value);
        }
        if addr >= RAM_BASE {
            return self.ram.write(addr - RAM_BASE, size, value);
        }
        Err(Exception::StoreAmoAccessFault)
    }

    /// Byte-granular DMA between RAM and the disk backing, driven by the
    /// transfer description the guest left in the disk registers. Clears
    /// `done` when the copy completes.
    pub fn disk_dma(&mut self) -> Result<(), Exception> {
        let addr_high = self.load(DISK_BUFFER_ADDR_HIGH_ADDR, 4)?;
        let addr_low = self.load(DISK_BUFFER_ADDR_LOW_ADDR, 4)?;
        let address = (addr_high << 32) | addr_low;

        let len_high = self.load(DISK_BUFFER_LEN_HIGH_ADDR, 4)?;
        let len_low = self.load(DISK_BUFFER_LEN_LOW_ADDR, 4)?;
        let length = (len_high << 32) | len_low;

        let sector = self.load(DISK_SECTOR_ADDR, 4)?;
        let direction = self.load(DISK_DIRECTION_ADDR, 4)? as u32;

        if direction == DIRECTION_RAM_TO_DISK {
            for i in 0..length {
                let byte = self.load(address.wrapping_add(i), 1)?;
                self.disk
                    .write_backing(sector * SECTOR_SIZE + i, byte as u8)?;
            }
        } else {
            for i in 0..length {
                let byte = self.disk.read_backing(sector * SECTOR_SIZE + i)?;
                self.store(address.wrapping_add(i), 1, byte as u64)?;
            }
        }

        self.store(DISK_DONE_ADDR, 4, 0)
    }
}
