//! Concurrency properties of the shared buffer.
//!
//! Threads stand in for processes in most tests; one test forks real
//! producers to check the mapping is shared across processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use venom_buffer::{BufferConfig, BufferError, Mode, SharedBuffer};

const SETTLE: Duration = Duration::from_millis(100);

fn sorted(mut values: Vec<i32>) -> Vec<i32> {
    values.sort_unstable();
    values
}

/// put(10, 20, 30) fills a 3-slot FIFO buffer, put(40) blocks until a take
#[test]
fn test_fifo_full_buffer_scenario() {
    let buffer = SharedBuffer::create(3, Mode::Fifo).expect("Failed to create buffer");
    buffer.put_all([10, 20, 30]);
    assert_eq!(buffer.free_count(), 0);

    let fourth_done = AtomicBool::new(false);

    thread::scope(|s| {
        let producer = s.spawn(|| {
            buffer.put(40);
            fourth_done.store(true, Ordering::SeqCst);
        });

        thread::sleep(SETTLE);
        assert!(!fourth_done.load(Ordering::SeqCst), "put on a full buffer returned");

        assert_eq!(buffer.take(), 10);
        producer.join().unwrap();
    });

    assert!(fourth_done.load(Ordering::SeqCst));
    assert_eq!(buffer.take_many(3), vec![20, 30, 40]);
    buffer.destroy();
}

#[test]
fn test_single_producer_fifo_order() {
    let buffer = SharedBuffer::create(16, Mode::Fifo).unwrap();
    let values: Vec<i32> = (0..16).map(|i| i * 7 - 20).collect();

    buffer.put_all(values.iter().copied());
    assert_eq!(buffer.take_many(values.len()), values);
    buffer.destroy();
}

#[test]
fn test_single_producer_lifo_order() {
    let buffer = SharedBuffer::create(16, Mode::Lifo).unwrap();
    let values: Vec<i32> = (0..16).map(|i| i * 7 - 20).collect();

    buffer.put_all(values.iter().copied());
    let reversed: Vec<i32> = values.iter().rev().copied().collect();
    assert_eq!(buffer.take_many(values.len()), reversed);
    buffer.destroy();
}

/// Exactly `capacity` puts never wait; the next one does
#[test]
fn test_capacity_boundary() {
    let capacity = 5;
    let buffer = SharedBuffer::create(capacity, Mode::Lifo).unwrap();

    for value in 0..capacity as i32 {
        assert!(buffer.try_put(value), "insert {value} should not wait for space");
    }
    assert!(!buffer.try_put(99));
    assert_eq!(buffer.filled_count(), capacity);

    let overflow_done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            buffer.put(99);
            overflow_done.store(true, Ordering::SeqCst);
        });

        thread::sleep(SETTLE);
        assert!(!overflow_done.load(Ordering::SeqCst));
        assert_eq!(buffer.take(), 4);
    });

    assert!(overflow_done.load(Ordering::SeqCst));
    assert_eq!(buffer.take(), 99);
    buffer.destroy();
}

#[test]
fn test_take_on_empty_waits_for_put() {
    let buffer = SharedBuffer::create(2, Mode::Fifo).unwrap();
    let taken = AtomicBool::new(false);

    thread::scope(|s| {
        let consumer = s.spawn(|| {
            let value = buffer.take();
            taken.store(true, Ordering::SeqCst);
            value
        });

        thread::sleep(SETTLE);
        assert!(!taken.load(Ordering::SeqCst), "take on an empty buffer returned");
        buffer.put(5);
        assert_eq!(consumer.join().unwrap(), 5);
    });

    buffer.destroy();
}

fn run_many_to_many(mode: Mode) {
    const PRODUCERS: i32 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: i32 = 500;

    let buffer = SharedBuffer::with_config(BufferConfig {
        capacity: 8,
        mode,
        ..BufferConfig::default()
    })
    .unwrap();

    let per_consumer = (PRODUCERS * PER_PRODUCER) as usize / CONSUMERS;

    let taken: Vec<i32> = thread::scope(|s| {
        for producer in 0..PRODUCERS {
            let buffer = &buffer;
            s.spawn(move || {
                buffer.put_all((0..PER_PRODUCER).map(|i| i * 100 + producer));
            });
        }

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| s.spawn(|| buffer.take_many(per_consumer)))
            .collect();

        consumers
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    let expected: Vec<i32> = (0..PRODUCERS)
        .flat_map(|producer| (0..PER_PRODUCER).map(move |i| i * 100 + producer))
        .collect();

    // Every value exactly once
    assert_eq!(sorted(taken), sorted(expected));
    assert_eq!(buffer.free_count(), 8);
    assert_eq!(buffer.filled_count(), 0);
    buffer.destroy();
}

#[test]
fn test_many_to_many_fifo_no_loss_no_duplicates() {
    run_many_to_many(Mode::Fifo);
}

#[test]
fn test_many_to_many_lifo_no_loss_no_duplicates() {
    run_many_to_many(Mode::Lifo);
}

#[test]
fn test_fifo_preserves_each_producers_order() {
    let buffer = SharedBuffer::create(4, Mode::Fifo).unwrap();

    let taken = thread::scope(|s| {
        for producer in 0..2 {
            let buffer = &buffer;
            s.spawn(move || buffer.put_all((0..200).map(|i| i * 10 + producer)));
        }
        s.spawn(|| buffer.take_many(400)).join().unwrap()
    });

    for producer in 0..2 {
        let mine: Vec<i32> = taken.iter().copied().filter(|v| v % 10 == producer).collect();
        let expected: Vec<i32> = (0..200).map(|i| i * 10 + producer).collect();
        assert_eq!(mine, expected);
    }
    buffer.destroy();
}

/// Forked children produce into the parent's anonymous mapping
#[test]
fn test_forked_producers_share_buffer() {
    const CHILDREN: i32 = 3;
    const PER_CHILD: i32 = 200;

    let buffer = SharedBuffer::create(16, Mode::Fifo).unwrap();
    let mut pids = Vec::new();

    for child in 0..CHILDREN {
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed: {}", std::io::Error::last_os_error()),
            0 => {
                for i in 0..PER_CHILD {
                    buffer.put(i * 100 + child);
                }
                // Skip destructors and the test harness in the child
                unsafe { libc::_exit(0) };
            }
            pid => pids.push(pid),
        }
    }

    let taken = buffer.take_many((CHILDREN * PER_CHILD) as usize);

    for pid in pids {
        let mut status = 0;
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(waited, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }

    let expected: Vec<i32> = (0..CHILDREN)
        .flat_map(|child| (0..PER_CHILD).map(move |i| i * 100 + child))
        .collect();
    assert_eq!(sorted(taken), sorted(expected));
    assert_eq!(buffer.free_count() + buffer.filled_count(), 16);
    buffer.destroy();
}

/// A region the kernel refuses to map is an allocation failure
#[test]
fn test_create_reports_exhausted_address_space_as_allocation() {
    // Lower the limit in a child so concurrent tests keep their address space
    match unsafe { libc::fork() } {
        -1 => panic!("fork failed: {}", std::io::Error::last_os_error()),
        0 => {
            let limit = libc::rlimit {
                rlim_cur: 1 << 30,
                rlim_max: 1 << 30,
            };
            if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
                unsafe { libc::_exit(2) };
            }

            // 4 GiB of slots against a 1 GiB limit
            let code = match SharedBuffer::create(1 << 30, Mode::Fifo) {
                Err(BufferError::Allocation { .. }) => 0,
                Err(_) => 1,
                Ok(_) => 3,
            };
            unsafe { libc::_exit(code) };
        }
        pid => {
            let mut status = 0;
            assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
            assert!(libc::WIFEXITED(status));
            assert_eq!(
                libc::WEXITSTATUS(status),
                0,
                "exit 1: wrong error variant, 2: setrlimit failed, 3: mapping succeeded"
            );
        }
    }
}
