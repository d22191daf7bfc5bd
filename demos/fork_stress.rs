//! Fork Stress Test
//!
//! Forks producers and consumers over one shared buffer. Consumers forward
//! everything they took into a collector buffer; the parent drains the
//! collector and checks that no value was delivered twice.
//!
//! Usage: fork_stress <capacity> <mode: 0 = LIFO, 1 = FIFO>

use std::collections::HashSet;
use std::io;
use tracing_subscriber::EnvFilter;
use venom_buffer::{Mode, SharedBuffer};

const WORKERS: i32 = 10;
const TOTAL_ITEMS: usize = 5000;
const PER_WORKER: usize = TOTAL_ITEMS / 5;

fn producer(buffer: &SharedBuffer, id: i32) {
    println!("Producer {} starting", id);
    buffer.put_all((0..PER_WORKER as i32).map(|i| i * 100 + id));
    println!("[+] Producer {} finished", id);
}

fn consumer(buffer: &SharedBuffer, collector: &SharedBuffer, id: i32) {
    println!("Consumer {} starting", id);
    let items = buffer.take_many(PER_WORKER);
    let verdict = if has_duplicates(&items) {
        "DUPLICATES FOUND!"
    } else {
        "No duplicates found"
    };
    println!("[+] Consumer {} finished: {}", id, verdict);
    collector.put_all(items);
}

fn has_duplicates(items: &[i32]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    !items.iter().all(|item| seen.insert(item))
}

fn parse_args() -> io::Result<(usize, Mode)> {
    let mut args = std::env::args().skip(1);
    let (Some(capacity), Some(mode), None) = (args.next(), args.next(), args.next()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "expected 2 arguments: fork_stress <capacity> <mode: 0 = LIFO, 1 = FIFO>",
        ));
    };

    let capacity = capacity
        .parse::<usize>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("capacity: {e}")))?;
    let mode = mode
        .parse::<i64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("mode: {e}")))?;

    Ok((capacity, Mode::try_from(mode)?))
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (capacity, mode) = parse_args()?;

    println!("╔══════════════════════════════════════════════════╗");
    println!("║          VenomBuffer Fork Stress Test            ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("[Main] Buffer: capacity {}, mode {}", capacity, mode);

    let buffer = SharedBuffer::create(capacity, mode)?;
    let collector = SharedBuffer::create(TOTAL_ITEMS, Mode::Fifo)?;

    let mut children = Vec::new();
    for id in 0..WORKERS {
        match unsafe { libc::fork() } {
            -1 => return Err(io::Error::last_os_error()),
            0 => {
                if id % 2 == 0 {
                    producer(&buffer, id);
                } else {
                    consumer(&buffer, &collector, id);
                }
                // The parent owns both mappings; leave without running destructors
                std::process::exit(0);
            }
            pid => children.push(pid),
        }
    }

    let items = collector.take_many(TOTAL_ITEMS);

    for pid in children {
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
    }

    println!();
    if has_duplicates(&items) {
        println!("Duplicates found!");
    } else {
        println!("No duplicates found!");
    }
    println!();
    print!("{}", buffer.inspect(capacity.min(16)));

    collector.destroy();
    buffer.destroy();
    Ok(())
}
