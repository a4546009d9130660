//! Block-disk controller.
//!
//! A register file describing one pending transfer plus a flat byte
//! backing. Writing anything other than -1 to `notify` arms the
//! controller; the hart's interrupt poll performs the DMA copy through
//! the bus and acknowledges with IRQ 1. Sectors are 512 bytes and
//! transfers are byte-granular.

use crate::bus::Device;
use crate::trap::Exception;

pub const DISK_BASE: u64 = 0x1000_1000;
pub const DISK_SIZE: u64 = 0x100;

pub const DISK_MAGIC_VALUE: u32 = 0x666F_7864; // "foxd"
pub const DISK_VERSION_VALUE: u32 = 1;
pub const SECTOR_SIZE: u64 = 512;

// Register offsets inside the disk window.
const DISK_MAGIC: u64 = 0x00;
const DISK_VERSION: u64 = 0x04;
const DISK_NOTIFY: u64 = 0x08;
const DISK_DIRECTION: u64 = 0x0C;
const DISK_BUFFER_ADDR_HIGH: u64 = 0x10;
const DISK_BUFFER_ADDR_LOW: u64 = 0x14;
const DISK_BUFFER_LEN_HIGH: u64 = 0x18;
const DISK_BUFFER_LEN_LOW: u64 = 0x1C;
const DISK_SECTOR: u64 = 0x20;
const DISK_DONE: u64 = 0x24;

pub const DISK_BUFFER_ADDR_HIGH_ADDR: u64 = DISK_BASE + DISK_BUFFER_ADDR_HIGH;
pub const DISK_BUFFER_ADDR_LOW_ADDR: u64 = DISK_BASE + DISK_BUFFER_ADDR_LOW;
pub const DISK_BUFFER_LEN_HIGH_ADDR: u64 = DISK_BASE + DISK_BUFFER_LEN_HIGH;
pub const DISK_BUFFER_LEN_LOW_ADDR: u64 = DISK_BASE + DISK_BUFFER_LEN_LOW;
pub const DISK_SECTOR_ADDR: u64 = DISK_BASE + DISK_SECTOR;
pub const DISK_DIRECTION_ADDR: u64 = DISK_BASE + DISK_DIRECTION;
pub const DISK_NOTIFY_ADDR: u64 = DISK_BASE + DISK_NOTIFY;
pub const DISK_DONE_ADDR: u64 = DISK_BASE + DISK_DONE;

/// RAM-to-disk when the guest writes 1, disk-to-RAM otherwise.
pub const DIRECTION_RAM_TO_DISK: u32 = 1;

pub struct Disk {
    notify: u32,
    direction: u32,
    buffer_addr_high: u32,
    buffer_addr_low: u32,
    buffer_len_high: u32,
    buffer_len_low: u32,
    sector: u32,
    done: u32,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct DiskSnapshot {
    pub notify: u32,
    pub direction: u32,
    pub buffer_addr_high: u32,
    pub buffer_addr_low: u32,
    pub buffer_len_high: u32,
    pub buffer_len_low: u32,
    pub sector: u32,
    pub done: u32,
    pub data: Vec<u8>,
}

impl Disk {
    pub fn new(image: Option<Vec<u8>>) -> Self {
        Self {
            notify: u32::MAX,
            direction: 0,
            buffer_addr_high: 0,
            buffer_addr_low: 0,
            buffer_len_high: 0,
            buffer_len_low: 0,
            sector: 0,
            done: 0,
            data: image.unwrap_or_default(),
        }
    }

    /// One-shot DMA trigger: true exactly once per guest notify.
    pub fn take_notify(&mut self) -> bool {
        if self.notify != u32::MAX {
            self.notify = u32::MAX;
            true
        } else {
            false
        }
    }

    pub fn read_backing(&self, index: u64) -> Result<u8, Exception> {
        self.data
            .get(index as usize)
            .copied()
            .ok_or(Exception::LoadAccessFault)
    }

    pub fn write_backing(&mut self, index: u64, byte: u8) -> Result<(), Exception> {
        match self.data.get_mut(index as usize) {
            Some(slot) => {
                *slot = byte;
                Ok(())
            }
            None => Err(Exception::StoreAmoAccessFault),
        }
    }

    pub fn backing(&self) -> &[u8] {
        &self.data
    }

    pub fn snapshot(&self) -> DiskSnapshot {
        DiskSnapshot {
            notify: self.notify,
            direction: self.direction,
            buffer_addr_high: self.buffer_addr_high,
            buffer_addr_low: self.buffer_addr_low,
            buffer_len_high: self.buffer_len_high,
            buffer_len_low: self.buffer_len_low,
            sector: self.sector,
            done: self.done,
            data: self.data.clone(),
        }
    }

    pub fn restore(&mut self, snap: &DiskSnapshot) {
        self.notify = snap.notify;
        self.direction = snap.direction;
        self.buffer_addr_high = snap.buffer_addr_high;
        self.buffer_addr_low = snap.buffer_addr_low;
        self.buffer_len_high = snap.buffer_len_high;
        self.buffer_len_low = snap.buffer_len_low;
        self.sector = snap.sector;
        self.done = snap.done;
        self.data = snap.data.clone();
    }
}

impl Device for Disk {
    fn read(&mut self, addr: u64, size: usize) -> Result<u64, Exception> {
        if size != 4 {
            return Err(Exception::LoadAccessFault);
        }
        Ok(match addr {
            DISK_MAGIC => DISK_MAGIC_VALUE as u64,
            DISK_VERSION => DISK_VERSION_VALUE as u64,
            DISK_NOTIFY => self.notify as u64,
            DISK_DIRECTION => self.direction as u64,
            DISK_BUFFER_ADDR_HIGH => self.buffer_addr_high as u64,
            DISK_BUFFER_ADDR_LOW => self.buffer_addr_low as u64,
            DISK_BUFFER_LEN_HIGH => self.buffer_len_high as u64,
            DISK_BUFFER_LEN_LOW => self.buffer_len_low as u64,
            DISK_SECTOR => self.sector as u64,
            DISK_DONE => self.done as u64,
            _ => 0,
        })
    }

    fn write(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Exception> {
        if size != 4 {
            return Err(Exception::StoreAmoAccessFault);
        }
        let value = value as u32;
        match addr {
            DISK_NOTIFY => self.notify = value,
            DISK_DIRECTION => self.direction = value,
            DISK_BUFFER_ADDR_HIGH => self.buffer_addr_high = value,
            DISK_BUFFER_ADDR_LOW => self.buffer_addr_low = value,
            DISK_BUFFER_LEN_HIGH => self.buffer_len_high = value,
            DISK_BUFFER_LEN_LOW => self.buffer_len_low = value,
            DISK_SECTOR => self.sector = value,
            DISK_DONE => self.done = value,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_registers_are_fixed() {
        let mut disk = Disk::new(None);
        assert_eq!(disk.read(DISK_MAGIC, 4).unwrap(), DISK_MAGIC_VALUE as u64);
        assert_eq!(disk.read(DISK_VERSION, 4).unwrap(), 1);
        // Writes to them are ignored.
        disk.write(DISK_MAGIC, 4, 0).unwrap();
        assert_eq!(disk.read(DISK_MAGIC, 4).unwrap(), DISK_MAGIC_VALUE as u64);
    }

    #[test]
    fn notify_is_one_shot() {
        let mut disk = Disk::new(Some(vec![0; 512]));
        assert!(!disk.take_notify());
        disk.write(DISK_NOTIFY, 4, 0).unwrap();
        assert!(disk.take_notify());
        assert!(!disk.take_notify());
        assert_eq!(disk.read(DISK_NOTIFY, 4).unwrap(), u32::MAX as u64);
    }

    #[test]
    fn transfer_registers_round_trip() {
        let mut disk = Disk::new(None);
        disk.write(DISK_BUFFER_ADDR_HIGH, 4, 0x1).unwrap();
        disk.write(DISK_BUFFER_ADDR_LOW, 4, 0x8000_2000).unwrap();
        disk.write(DISK_SECTOR, 4, 7).unwrap();
        disk.write(DISK_DIRECTION, 4, DIRECTION_RAM_TO_DISK as u64)
            .unwrap();
        assert_eq!(disk.read(DISK_BUFFER_ADDR_HIGH, 4).unwrap(), 0x1);
        assert_eq!(disk.read(DISK_BUFFER_ADDR_LOW, 4).unwrap(), 0x8000_2000);
        assert_eq!(disk.read(DISK_SECTOR, 4).unwrap(), 7);
        assert_eq!(disk.read(DISK_DIRECTION, 4).unwrap(), 1);
    }

    #[test]
    fn only_word_access_is_accepted() {
        let mut disk = Disk::new(None);
        assert_eq!(disk.read(DISK_MAGIC, 8), Err(Exception::LoadAccessFault));
        assert_eq!(
            disk.write(DISK_NOTIFY, 1, 0),
            Err(Exception::StoreAmoAccessFault)
        );
    }

    #[test]
    fn backing_access_is_bounds_checked() {
        let mut disk = Disk::new(Some(vec![0xAA; 512]));
        assert_eq!(disk.read_backing(511).unwrap(), 0xAA);
        assert_eq!(disk.read_backing(512), Err(Exception::LoadAccessFault));
        assert_eq!(
            disk.write_backing(512, 0),
            Err(Exception::StoreAmoAccessFault)
        );
    }
}
