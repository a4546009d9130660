use clap::Parser;
use foxvm::{UartHandle, Vm};
use log::{error, info};
use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use std::{fs, thread};

/// Emulated clock and frame pacing: the pacer retires CPU_HZ
/// instructions per second in TICKS_PER_SEC batches.
const CPU_HZ: u64 = 33_000_000;
const TICKS_PER_SEC: u64 = 60;
const STEPS_PER_TICK: u64 = CPU_HZ / TICKS_PER_SEC;

#[derive(Parser)]
#[command(name = "foxvm", about = "RV64IMA virtual machine for xv6-style kernel images")]
struct Args {
    /// Raw kernel image, loaded at the base of RAM
    kernel: PathBuf,

    /// Raw disk image backing the block device
    disk: Option<PathBuf>,

    /// Stop after executing this many instructions
    #[arg(long)]
    steps: Option<u64>,

    /// Write a machine snapshot to FILE before exiting
    #[arg(long, value_name = "FILE")]
    save_snapshot: Option<PathBuf>,

    /// Resume from a machine snapshot instead of cold-booting
    #[arg(long, value_name = "FILE")]
    load_snapshot: Option<PathBuf>,
}

/// Puts stdin into non-canonical, no-echo mode for the lifetime of the
/// guard so guest console input arrives a byte at a time. ISIG stays on:
/// Ctrl+C still kills the VM.
struct RawTerminal {
    orig: libc::termios,
}

impl RawTerminal {
    fn enable() -> Option<Self> {
        unsafe {
            if libc::isatty(libc::STDIN_FILENO) == 0 {
                return None;
            }
            let mut orig = std::mem::zeroed::<libc::termios>();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut orig) != 0 {
                return None;
            }
            let mut raw = orig;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            raw.c_iflag &= !(libc::IXON | libc::ICRNL);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw);
            Some(Self { orig })
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.orig);
        }
    }
}

/// Blocks on host stdin and feeds the UART one byte at a time; the UART
/// itself applies single-slot backpressure until the guest reads RHR.
fn stdin_reader(uart: UartHandle) {
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 1];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let byte = if buf[0] == b'\r' { b'\n' } else { buf[0] };
                uart.push_byte(byte);
            }
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let kernel = fs::read(&args.kernel)?;
    let disk = args.disk.as_ref().map(fs::read).transpose()?;
    let mut vm = Vm::new(&kernel, disk)?;
    if let Some(path) = &args.load_snapshot {
        vm.restore_snapshot(path)?;
        info!("resumed from {}", path.display());
    }

    let uart = vm.uart_handle();
    thread::spawn(move || stdin_reader(uart));
    let _raw = RawTerminal::enable();

    let tick_budget = Duration::from_micros(1_000_000 / TICKS_PER_SEC);
    let mut executed = 0u64;
    'pacer: loop {
        let tick_start = Instant::now();
        for _ in 0..STEPS_PER_TICK {
            if args.steps.is_some_and(|limit| executed >= limit) {
                info!("instruction limit reached after {executed} steps");
                break 'pacer;
            }
            if let Err(err) = vm.step() {
                // The trap was already delivered; mirror the guest's
                // last gasp and shut down cleanly.
                error!("{err}");
                break 'pacer;
            }
            executed += 1;
        }
        if let Some(rest) = tick_budget.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    if let Some(path) = &args.save_snapshot {
        vm.save_snapshot(path)?;
        info!("snapshot saved to {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        error!("{err}");
        std::process::exit(1);
    }
}
