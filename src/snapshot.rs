//! Whole-machine snapshots.
//!
//! A snapshot is a little-endian binary image of every piece of guest
//! state (hart, CSRs, RAM and all device models), zstd-compressed on
//! disk behind a magic/version header.

use crate::clint::ClintSnapshot;
use crate::csr::{CsrSnapshot, PrivMode};
use crate::dev::{KbdSnapshot, RamSnapshot, UartSnapshot};
use crate::disk::DiskSnapshot;
use crate::hart::HartSnapshot;
use crate::plic::PlicSnapshot;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const MAGIC: &[u8; 8] = b"FOXVMSN1";
const VERSION: u32 = 1;
const NUM_CSRS: usize = 4096;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a foxvm snapshot (bad magic)")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot is truncated or corrupt")]
    Corrupt,
    #[error("snapshot does not match this machine: {0}")]
    Mismatch(&'static str),
}

#[derive(Clone, Debug)]
pub struct MachineSnapshot {
    pub hart: HartSnapshot,
    pub clint: ClintSnapshot,
    pub plic: PlicSnapshot,
    pub uart: UartSnapshot,
    pub disk: DiskSnapshot,
    pub kbd: KbdSnapshot,
    pub ram: RamSnapshot,
}

struct BinWriter<W: Write> {
    w: W,
}

impl<W: Write> BinWriter<W> {
    fn new(w: W) -> Self {
        Self { w }
    }

    fn write_u8(&mut self, v: u8) -> Result<(), SnapshotError> {
        Ok(self.w.write_all(&[v])?)
    }

    fn write_bool(&mut self, v: bool) -> Result<(), SnapshotError> {
        self.write_u8(v as u8)
    }

    fn write_u32(&mut self, v: u32) -> Result<(), SnapshotError> {
        Ok(self.w.write_all(&v.to_le_bytes())?)
    }

    fn write_u64(&mut self, v: u64) -> Result<(), SnapshotError> {
        Ok(self.w.write_all(&v.to_le_bytes())?)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        Ok(self.w.write_all(bytes)?)
    }

    fn write_len(&mut self, len: usize) -> Result<(), SnapshotError> {
        let v = u32::try_from(len).map_err(|_| SnapshotError::Corrupt)?;
        self.write_u32(v)
    }
}

struct BinReader<R: Read> {
    r: R,
}

impl<R: Read> BinReader<R> {
    fn new(r: R) -> Self {
        Self { r }
    }

    fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        let mut buf = [0u8; 1];
        self.r.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        let mut buf = [0u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        let mut buf = [0u8; 8];
        self.r.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, SnapshotError> {
        let mut buf = vec![0u8; len];
        self.r.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_len(&mut self) -> Result<usize, SnapshotError> {
        Ok(self.read_u32()? as usize)
    }
}

fn write_machine<W: Write>(
    w: &mut BinWriter<W>,
    snap: &MachineSnapshot,
) -> Result<(), SnapshotError> {
    w.write_bytes(MAGIC)?;
    w.write_u32(VERSION)?;

    // Hart.
    w.write_u64(snap.hart.pc)?;
    w.write_u8(snap.hart.mode as u8)?;
    for v in snap.hart.regs {
        w.write_u64(v)?;
    }
    if snap.hart.csrs.regs.len() != NUM_CSRS {
        return Err(SnapshotError::Corrupt);
    }
    for &v in &snap.hart.csrs.regs {
        w.write_u64(v)?;
    }

    // Devices.
    w.write_u64(snap.clint.mtime)?;
    w.write_u64(snap.clint.mtimecmp)?;

    w.write_u32(snap.plic.pending)?;
    w.write_u32(snap.plic.senable)?;
    w.write_u32(snap.plic.spriority)?;
    w.write_u32(snap.plic.sclaim)?;

    w.write_len(snap.uart.regs.len())?;
    w.write_bytes(&snap.uart.regs)?;
    w.write_bool(snap.uart.interrupting)?;

    w.write_u32(snap.disk.notify)?;
    w.write_u32(snap.disk.direction)?;
    w.write_u32(snap.disk.buffer_addr_high)?;
    w.write_u32(snap.disk.buffer_addr_low)?;
    w.write_u32(snap.disk.buffer_len_high)?;
    w.write_u32(snap.disk.buffer_len_low)?;
    w.write_u32(snap.disk.sector)?;
    w.write_u32(snap.disk.done)?;
    w.write_len(snap.disk.data.len())?;
    w.write_bytes(&snap.disk.data)?;

    w.write_len(snap.kbd.queue.len())?;
    for &code in &snap.kbd.queue {
        w.write_u32(code)?;
    }

    w.write_len(snap.ram.data.len())?;
    w.write_bytes(&snap.ram.data)?;
    Ok(())
}

fn read_machine<R: Read>(r: &mut BinReader<R>) -> Result<MachineSnapshot, SnapshotError> {
    let magic = r.read_bytes(MAGIC.len())?;
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = r.read_u32()?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let pc = r.read_u64()?;
    let mode = match r.read_u8()? {
        0 => PrivMode::User,
        1 => PrivMode::Supervisor,
        3 => PrivMode::Machine,
        _ => return Err(SnapshotError::Corrupt),
    };
    let mut regs = [0u64; 32];
    for v in &mut regs {
        *v = r.read_u64()?;
    }
    let mut csrs = vec![0u64; NUM_CSRS];
    for v in &mut csrs {
        *v = r.read_u64()?;
    }

    let clint = ClintSnapshot {
        mtime: r.read_u64()?,
        mtimecmp: r.read_u64()?,
    };

    let plic = PlicSnapshot {
        pending: r.read_u32()?,
        senable: r.read_u32()?,
        spriority: r.read_u32()?,
        sclaim: r.read_u32()?,
    };

    let uart_len = r.read_len()?;
    let uart = UartSnapshot {
        regs: r.read_bytes(uart_len)?,
        interrupting: r.read_bool()?,
    };

    let disk = DiskSnapshot {
        notify: r.read_u32()?,
        direction: r.read_u32()?,
        buffer_addr_high: r.read_u32()?,
        buffer_addr_low: r.read_u32()?,
        buffer_len_high: r.read_u32()?,
        buffer_len_low: r.read_u32()?,
        sector: r.read_u32()?,
        done: r.read_u32()?,
        data: {
            let len = r.read_len()?;
            r.read_bytes(len)?
        },
    };

    let kbd_len = r.read_len()?;
    let mut queue = Vec::with_capacity(kbd_len);
    for _ in 0..kbd_len {
        queue.push(r.read_u32()?);
    }
    let kbd = KbdSnapshot { queue };

    let ram_len = r.read_len()?;
    let ram = RamSnapshot {
        data: r.read_bytes(ram_len)?,
    };

    Ok(MachineSnapshot {
        hart: HartSnapshot {
            regs,
            pc,
            mode,
            csrs: CsrSnapshot { regs: csrs },
        },
        clint,
        plic,
        uart,
        disk,
        kbd,
        ram,
    })
}

pub fn save(path: &Path, snap: &MachineSnapshot) -> Result<(), SnapshotError> {
    let mut payload = Vec::new();
    write_machine(&mut BinWriter::new(&mut payload), snap)?;
    let file = BufWriter::new(File::create(path)?);
    zstd::stream::copy_encode(payload.as_slice(), file, 3)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<MachineSnapshot, SnapshotError> {
    let raw = std::fs::read(path)?;
    let payload = zstd::stream::decode_all(raw.as_slice())?;
    read_machine(&mut BinReader::new(payload.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MachineSnapshot {
        let mut csrs = vec![0u64; NUM_CSRS];
        csrs[0x300] = 0x8;
        MachineSnapshot {
            hart: HartSnapshot {
                regs: [3; 32],
                pc: 0x8000_0040,
                mode: PrivMode::Supervisor,
                csrs: CsrSnapshot { regs: csrs },
            },
            clint: ClintSnapshot {
                mtime: 1,
                mtimecmp: 2,
            },
            plic: PlicSnapshot {
                pending: 1,
                senable: 2,
                spriority: 3,
                sclaim: 4,
            },
            uart: UartSnapshot {
                regs: vec![0; 0x100],
                interrupting: true,
            },
            disk: DiskSnapshot {
                notify: u32::MAX,
                direction: 1,
                buffer_addr_high: 0,
                buffer_addr_low: 0x8000_1000,
                buffer_len_high: 0,
                buffer_len_low: 512,
                sector: 9,
                done: 0,
                data: vec![0xAB; 1024],
            },
            kbd: KbdSnapshot {
                queue: vec![1, 2, 3],
            },
            ram: RamSnapshot {
                data: vec![0x55; 4096],
            },
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("foxvm-rt-{}.zst", std::process::id()));
        let snap = sample();
        save(&path, &snap).unwrap();
        let loaded = load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.hart.pc, snap.hart.pc);
        assert_eq!(loaded.hart.mode, snap.hart.mode);
        assert_eq!(loaded.hart.regs, snap.hart.regs);
        assert_eq!(loaded.hart.csrs.regs, snap.hart.csrs.regs);
        assert_eq!(loaded.clint.mtimecmp, 2);
        assert_eq!(loaded.plic.sclaim, 4);
        assert!(loaded.uart.interrupting);
        assert_eq!(loaded.disk.data, snap.disk.data);
        assert_eq!(loaded.kbd.queue, vec![1, 2, 3]);
        assert_eq!(loaded.ram.data, snap.ram.data);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let path = std::env::temp_dir().join(format!("foxvm-bad-{}.zst", std::process::id()));
        std::fs::write(&path, b"not a snapshot").unwrap();
        assert!(load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let path = std::env::temp_dir().join(format!("foxvm-magic-{}.zst", std::process::id()));
        let mut payload = Vec::new();
        BinWriter::new(&mut payload).write_bytes(b"NOTFOXVM").unwrap();
        payload.extend_from_slice(&[0u8; 64]);
        let file = BufWriter::new(File::create(&path).unwrap());
        zstd::stream::copy_encode(payload.as_slice(), file, 3).unwrap();

        assert!(matches!(load(&path), Err(SnapshotError::BadMagic)));
        std::fs::remove_file(&path).ok();
    }
}
