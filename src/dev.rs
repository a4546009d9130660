//! RAM, the 16550-ish UART and the scancode keyboard.
//!
//! The UART and keyboard are the only devices touched by host threads: a
//! stdin reader feeds the UART, a host event loop feeds the keyboard.
//! Their state therefore lives behind `Arc<Mutex<..>>`, and the bus-side
//! device wrappers and producer handles share the same lock.

use crate::bus::Device;
use crate::trap::Exception;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};

pub const RAM_BASE: u64 = 0x8000_0000;
pub const RAM_SIZE: usize = 8 * 1024 * 1024;

pub const FRAMEBUFFER_BASE: u64 = 0x8060_0000;
pub const FRAMEBUFFER_WIDTH: usize = 640;
pub const FRAMEBUFFER_HEIGHT: usize = 480;

pub const UART_BASE: u64 = 0x1000_0000;
pub const UART_SIZE: u64 = 0x100;

// Register offsets inside the UART window. RHR and THR share offset 0.
const UART_RHR: u64 = 0;
const UART_THR: u64 = 0;
const UART_LSR: u64 = 5;

pub const UART_LSR_RX: u8 = 1;
pub const UART_LSR_TX: u8 = 1 << 5;

pub const KBD_BASE: u64 = 0x1000_2000;
pub const KBD_SIZE: u64 = 0x100;
const KBD_GET: u64 = 0;

/// Flat little-endian main memory. Addresses arriving here are offsets
/// into the array; the bus has already subtracted `RAM_BASE`. Unaligned
/// access is legal at this layer.
pub struct Ram {
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct RamSnapshot {
    pub data: Vec<u8>,
}

impl Ram {
    pub fn new(kernel: &[u8]) -> Self {
        let mut data = vec![0u8; RAM_SIZE];
        data[..kernel.len()].copy_from_slice(kernel);
        Self { data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check(&self, addr: u64, size: usize) -> Option<usize> {
        let idx = usize::try_from(addr).ok()?;
        let end = idx.checked_add(size)?;
        (end <= self.data.len()).then_some(idx)
    }

    pub fn snapshot(&self) -> RamSnapshot {
        RamSnapshot {
            data: self.data.clone(),
        }
    }

    pub fn restore(&mut self, snap: &RamSnapshot) -> Result<(), &'static str> {
        if snap.data.len() != self.data.len() {
            return Err("RAM size mismatch");
        }
        self.data.copy_from_slice(&snap.data);
        Ok(())
    }
}

impl Device for Ram {
    fn read(&mut self, addr: u64, size: usize) -> Result<u64, Exception> {
        let idx = self.check(addr, size).ok_or(Exception::LoadAccessFault)?;
        let val = match size {
            1 => self.data[idx] as u64,
            2 => u16::from_le_bytes([self.data[idx], self.data[idx + 1]]) as u64,
            4 => u32::from_le_bytes([
                self.data[idx],
                self.data[idx + 1],
                self.data[idx + 2],
                self.data[idx + 3],
            ]) as u64,
            8 => u64::from_le_bytes([
                self.data[idx],
                self.data[idx + 1],
                self.data[idx + 2],
                self.data[idx + 3],
                self.data[idx + 4],
                self.data[idx + 5],
                self.data[idx + 6],
                self.data[idx + 7],
            ]),
            _ => return Err(Exception::LoadAccessFault),
        };
        Ok(val)
    }

    fn write(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Exception> {
        let idx = self
            .check(addr, size)
            .ok_or(Exception::StoreAmoAccessFault)?;
        match size {
            1 => self.data[idx] = value as u8,
            2 => self.data[idx..idx + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            4 => self.data[idx..idx + 4].copy_from_slice(&(value as u32).to_le_bytes()),
            8 => self.data[idx..idx + 8].copy_from_slice(&value.to_le_bytes()),
            _ => return Err(Exception::StoreAmoAccessFault),
        }
        Ok(())
    }
}

struct UartState {
    regs: [u8; UART_SIZE as usize],
    interrupting: bool,
}

struct UartShared {
    state: Mutex<UartState>,
    // Signaled when the guest drains RHR, i.e. LSR.RX went low.
    rx_free: Condvar,
}

/// Byte-wide 16550 register window. Transmit goes straight to host
/// stdout and is always ready; receive is a single byte slot filled by a
/// producer thread that blocks until the guest has consumed the previous
/// byte.
pub struct Uart {
    shared: Arc<UartShared>,
}

#[derive(Clone, Debug)]
pub struct UartSnapshot {
    pub regs: Vec<u8>,
    pub interrupting: bool,
}

impl Uart {
    pub fn new() -> Self {
        let mut regs = [0u8; UART_SIZE as usize];
        regs[UART_LSR as usize] |= UART_LSR_TX;
        Self {
            shared: Arc::new(UartShared {
                state: Mutex::new(UartState {
                    regs,
                    interrupting: false,
                }),
                rx_free: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> UartHandle {
        UartHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// One-shot interrupt flag, consumed by the hart's interrupt poll.
    pub fn take_interrupt(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        std::mem::take(&mut state.interrupting)
    }

    pub fn snapshot(&self) -> UartSnapshot {
        let state = self.shared.state.lock().unwrap();
        UartSnapshot {
            regs: state.regs.to_vec(),
            interrupting: state.interrupting,
        }
    }

    pub fn restore(&self, snap: &UartSnapshot) -> Result<(), &'static str> {
        let mut state = self.shared.state.lock().unwrap();
        if snap.regs.len() != state.regs.len() {
            return Err("UART register window size mismatch");
        }
        state.regs.copy_from_slice(&snap.regs);
        state.interrupting = snap.interrupting;
        Ok(())
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Uart {
    fn read(&mut self, addr: u64, size: usize) -> Result<u64, Exception> {
        if size != 1 {
            return Err(Exception::LoadAccessFault);
        }
        let mut state = self.shared.state.lock().unwrap();
        if addr == UART_RHR {
            state.regs[UART_LSR as usize] &= !UART_LSR_RX;
            self.shared.rx_free.notify_all();
        }
        Ok(state.regs[addr as usize] as u64)
    }

    fn write(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Exception> {
        if size != 1 {
            return Err(Exception::StoreAmoAccessFault);
        }
        let mut state = self.shared.state.lock().unwrap();
        if addr == UART_THR {
            let mut out = std::io::stdout();
            let _ = out.write_all(&[value as u8]);
            let _ = out.flush();
        } else {
            state.regs[addr as usize] = value as u8;
        }
        Ok(())
    }
}

/// Producer side of the UART, handed to the stdin reader thread.
#[derive(Clone)]
pub struct UartHandle {
    shared: Arc<UartShared>,
}

impl UartHandle {
    /// Deliver one received byte. Blocks until the guest has read the
    /// previous byte out of RHR (single-slot backpressure).
    pub fn push_byte(&self, byte: u8) {
        let mut state = self.shared.state.lock().unwrap();
        while state.regs[UART_LSR as usize] & UART_LSR_RX != 0 {
            state = self.shared.rx_free.wait(state).unwrap();
        }
        state.regs[UART_RHR as usize] = byte;
        state.regs[UART_LSR as usize] |= UART_LSR_RX;
        state.interrupting = true;
    }
}

/// Scancode queue fed by the host. A read of `KBD_GET` pops the oldest
/// scancode, or returns 0 when the queue is empty. The window is
/// read-only from the guest.
pub struct Kbd {
    queue: Arc<Mutex<VecDeque<u32>>>,
}

#[derive(Clone, Debug)]
pub struct KbdSnapshot {
    pub queue: Vec<u32>,
}

impl Kbd {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn handle(&self) -> KbdHandle {
        KbdHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn snapshot(&self) -> KbdSnapshot {
        KbdSnapshot {
            queue: self.queue.lock().unwrap().iter().copied().collect(),
        }
    }

    pub fn restore(&self, snap: &KbdSnapshot) {
        let mut queue = self.queue.lock().unwrap();
        queue.clear();
        queue.extend(snap.queue.iter().copied());
    }
}

impl Default for Kbd {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Kbd {
    fn read(&mut self, addr: u64, size: usize) -> Result<u64, Exception> {
        if size != 4 {
            return Err(Exception::LoadAccessFault);
        }
        match addr {
            KBD_GET => Ok(self.queue.lock().unwrap().pop_front().unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    fn write(&mut self, _addr: u64, _size: usize, _value: u64) -> Result<(), Exception> {
        Err(Exception::StoreAmoAccessFault)
    }
}

/// Producer side of the keyboard, handed to the host event loop.
#[derive(Clone)]
pub struct KbdHandle {
    queue: Arc<Mutex<VecDeque<u32>>>,
}

impl KbdHandle {
    pub fn push_scancode(&self, code: u32) {
        self.queue.lock().unwrap().push_back(code);
    }
}
