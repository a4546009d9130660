//! foxvm: a 64-bit RISC-V virtual machine.
//!
//! One interpreted RV64IMA+Zicsr hart with Sv39 paging and the small
//! memory-mapped device set an xv6-style kernel expects: CLINT, PLIC, a
//! 16550-ish UART, a DMA block disk and a scancode keyboard, over 8 MiB
//! of RAM with an in-RAM framebuffer.
//!
//! The embedder owns the pacing: call [`Vm::step`] as often as the
//! emulated clock demands, feed console bytes through
//! [`Vm::uart_handle`] and scancodes through [`Vm::kbd_handle`] from
//! host threads, and blit [`Vm::framebuffer`] between steps.

mod bus;
mod clint;
mod csr;
mod dev;
mod disk;
mod hart;
mod isa;
mod plic;
mod snapshot;
mod system;
mod trap;

pub use bus::SystemBus;
pub use clint::CLINT_BASE;
pub use csr::PrivMode;
pub use dev::{
    KbdHandle, UartHandle, FRAMEBUFFER_BASE, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH, KBD_BASE,
    RAM_BASE, RAM_SIZE, UART_BASE,
};
pub use disk::DISK_BASE;
pub use hart::Hart;
pub use plic::{PLIC_BASE, PLIC_SCLAIM};
pub use snapshot::SnapshotError;
pub use system::{Vm, VmError};
pub use trap::{Exception, Fatal, Interrupt};
