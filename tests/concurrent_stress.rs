//! Concurrent stress tests - many producers, one consumer
//!
//! Each record carries its producer id, sequence number and a fill byte
//! derived from both, so the consumer can tell a published record from
//! stale or unwritten memory.
//!
//! Usage:
//!   cargo test --release --test concurrent_stress

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;
use std::thread;

use mpscbuf::{MmapRing, RingBuffer, RingConfig, RingError, RingStorage};

const RECORD_HEADER: usize = 12;

fn fill_byte(producer: u32, seq: u32) -> u8 {
    (producer.wrapping_mul(31).wrapping_add(seq) as u8) | 1
}

fn record_len(producer: u32, seq: u32) -> usize {
    RECORD_HEADER + ((seq as usize * 7 + producer as usize * 13) % 97)
}

fn encode(buf: &mut [u8], producer: u32, seq: u32) {
    let len = buf.len() as u32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
    buf[4..8].copy_from_slice(&producer.to_le_bytes());
    buf[8..12].copy_from_slice(&seq.to_le_bytes());
    buf[RECORD_HEADER..].fill(fill_byte(producer, seq));
}

/// Splits a drained run into records and checks each one
fn decode_run(run: &[u8], mut on_record: impl FnMut(u32, u32)) {
    let mut at = 0;
    while at < run.len() {
        assert!(run.len() - at >= RECORD_HEADER, "torn record header");
        let len = u32::from_le_bytes(run[at..at + 4].try_into().unwrap()) as usize;
        let producer = u32::from_le_bytes(run[at + 4..at + 8].try_into().unwrap());
        let seq = u32::from_le_bytes(run[at + 8..at + 12].try_into().unwrap());

        assert_eq!(len, record_len(producer, seq), "bad length for {}/{}", producer, seq);
        assert!(at + len <= run.len(), "record crosses a run boundary");
        let expected = fill_byte(producer, seq);
        assert!(
            run[at + RECORD_HEADER..at + len].iter().all(|&b| b == expected),
            "unpublished bytes visible in record {}/{}",
            producer,
            seq
        );

        on_record(producer, seq);
        at += len;
    }
}

/// Statistics collector
struct StressStats {
    records: AtomicU64,
    bytes: AtomicU64,
    full_retries: AtomicU64,
}

impl StressStats {
    fn new() -> Self {
        Self {
            records: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            full_retries: AtomicU64::new(0),
        }
    }
}

fn produce_records<S: RingStorage + Sync>(
    storage: &S,
    producer_id: u32,
    count: u32,
    stats: &StressStats,
) {
    let mut producer = storage.producer().unwrap();
    for seq in 0..count {
        let len = record_len(producer_id, seq);
        loop {
            match producer.reserve(len) {
                Ok(mut grant) => {
                    encode(&mut grant, producer_id, seq);
                    grant.commit();
                    break;
                }
                Err(RingError::InsufficientSpace { .. }) => {
                    stats.full_retries.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
                Err(e) => panic!("reserve failed: {}", e),
            }
        }
        stats.records.fetch_add(1, Ordering::Relaxed);
        stats.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Drains until `expected` records arrived; returns (records, bytes).
fn consume_records<S: RingStorage>(storage: &S, producers: u32, expected: u64) -> (u64, u64) {
    let mut consumer = storage.consumer().unwrap();
    let mut next_seq = vec![0u32; producers as usize];
    let mut records = 0u64;
    let mut bytes = 0u64;

    while records < expected {
        let stats = storage.stats();
        assert!(stats.read_pos <= stats.write_pos);
        assert!(stats.write_pos <= stats.read_pos + stats.capacity as u64);

        let drained = consumer.drain(|run| {
            decode_run(run, |producer, seq| {
                let slot = &mut next_seq[producer as usize];
                assert_eq!(seq, *slot, "producer {} out of order", producer);
                *slot += 1;
                records += 1;
            });
        });
        bytes += drained as u64;
        if drained == 0 {
            thread::yield_now();
        }
    }

    assert!(consumer.read().is_none());
    (records, bytes)
}

#[test]
fn test_many_producers_round_trip() {
    const PRODUCERS: u32 = 6;
    const PER_PRODUCER: u32 = 5_000;

    let rb = RingBuffer::new(RingConfig::new(4096, PRODUCERS as usize)).unwrap();
    let stats = StressStats::new();

    let (records, bytes) = thread::scope(|s| {
        for id in 0..PRODUCERS {
            let rb = &rb;
            let stats = &stats;
            s.spawn(move || produce_records(rb, id, PER_PRODUCER, stats));
        }
        consume_records(&rb, PRODUCERS, (PRODUCERS * PER_PRODUCER) as u64)
    });

    assert_eq!(records, stats.records.load(Ordering::Relaxed));
    assert_eq!(bytes, stats.bytes.load(Ordering::Relaxed));

    let end = rb.stats();
    assert_eq!(end.used, 0);
    assert!(!end.wrap_pending);
}

#[test]
fn test_tiny_ring_forces_wraps() {
    const PRODUCERS: u32 = 3;
    const PER_PRODUCER: u32 = 2_000;

    // Records are at most 108 bytes; a wrap needs skipped tail plus record
    // to fit, so stay just above twice that
    let rb = RingBuffer::new(RingConfig::new(224, PRODUCERS as usize)).unwrap();
    let stats = StressStats::new();

    let (records, bytes) = thread::scope(|s| {
        for id in 0..PRODUCERS {
            let rb = &rb;
            let stats = &stats;
            s.spawn(move || produce_records(rb, id, PER_PRODUCER, stats));
        }
        consume_records(&rb, PRODUCERS, (PRODUCERS * PER_PRODUCER) as u64)
    });

    assert_eq!(records, (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(bytes, stats.bytes.load(Ordering::Relaxed));
    assert_eq!(rb.stats().used, 0);
    println!(
        "tiny ring: {} records, {} full-ring retries",
        records,
        stats.full_retries.load(Ordering::Relaxed)
    );
}

#[test]
fn test_stalled_producer_blocks_later_offsets() {
    let rb = RingBuffer::new(RingConfig::new(256, 3)).unwrap();
    let reserved = Barrier::new(2);
    let others_done = Barrier::new(2);

    thread::scope(|s| {
        let mut consumer = rb.consumer().unwrap();

        s.spawn(|| {
            let mut p1 = rb.producer().unwrap();
            let mut grant = p1.reserve(16).unwrap();
            assert_eq!(grant.span().offset, 0);
            reserved.wait();

            others_done.wait();
            grant.fill(0xEE);
            grant.commit();
        });

        reserved.wait();
        thread::scope(|inner| {
            for tag in [0x22u8, 0x33] {
                let rb = &rb;
                inner.spawn(move || {
                    let mut p = rb.producer().unwrap();
                    p.write(&[tag; 16]).unwrap();
                });
            }
        });

        // P2 and P3 are published, P1 is not
        assert!(consumer.read().is_none());
        assert_eq!(rb.ring().watermark(), 0);
        others_done.wait();

        let mut seen = Vec::new();
        while seen.len() < 48 {
            consumer.drain(|run| seen.extend_from_slice(run));
            thread::yield_now();
        }
        assert!(seen[..16].iter().all(|&b| b == 0xEE));
        assert_eq!(seen.len(), 48);
    });
}

#[test]
fn test_mmap_ring_across_mappings() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 1_000;

    let path = std::env::temp_dir().join(format!("concurrent_stress_{}.ring", std::process::id()));

    {
        let writer_side = MmapRing::create(&path, RingConfig::new(8192, 8)).unwrap();
        let reader_side = MmapRing::open(&path).unwrap();
        let stats = StressStats::new();

        let (records, _) = thread::scope(|s| {
            for id in 0..PRODUCERS {
                let writer_side = &writer_side;
                let stats = &stats;
                s.spawn(move || produce_records(writer_side, id, PER_PRODUCER, stats));
            }
            consume_records(&reader_side, PRODUCERS, (PRODUCERS * PER_PRODUCER) as u64)
        });

        assert_eq!(records, (PRODUCERS * PER_PRODUCER) as u64);
        assert_eq!(reader_side.stats().registered_producers, PRODUCERS as usize);
    }

    std::fs::remove_file(&path).ok();
}
