// Buffer cache tests

use super::*;
use crate::disk::{DiskError, FileDisk, MemDisk};
use crate::infrastructure::ticks::TickCounter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::AtomicU64;
use std::sync::{Barrier, mpsc};
use std::thread;
use std::time::Duration;

const BS: usize = 512;

struct Harness {
    cache: BufferCache,
    disk: Arc<MemDisk>,
    ticks: Arc<TickCounter>,
}

fn harness(num_buffers: usize, num_buckets: usize) -> Harness {
    let disk = Arc::new(MemDisk::new(BS));
    let ticks = Arc::new(TickCounter::new());
    let config = CacheConfig::new(num_buffers)
        .with_buckets(num_buckets)
        .with_block_size(BS);
    let cache = BufferCache::new(config, disk.clone(), ticks.clone()).unwrap();
    Harness { cache, disk, ticks }
}

fn pattern(seed: u8) -> Vec<u8> {
    (0..BS).map(|i| seed.wrapping_mul(31).wrapping_add(i as u8)).collect()
}

fn counter_of(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..8].try_into().unwrap())
}

#[test]
fn test_initial_layout() {
    let h = harness(5, 13);
    assert_eq!(h.cache.capacity(), 5);
    assert_eq!(h.cache.bucket_count(), 13);
    assert_eq!(h.cache.block_size(), BS);
    assert_eq!(h.cache.free_count(), 5);
    assert_eq!(h.cache.bucket_members(0).unwrap().len(), 5);
    for bucket in 1..13 {
        assert!(h.cache.bucket_members(bucket).unwrap().is_empty());
    }
    assert!(h.cache.bucket_members(13).is_none());
    h.cache.verify().unwrap();
}

#[test]
fn test_new_rejects_mismatched_block_size() {
    let disk = Arc::new(MemDisk::new(BS));
    let ticks = Arc::new(TickCounter::new());
    let config = CacheConfig::new(4).with_block_size(2 * BS);
    let err = BufferCache::new(config, disk.clone(), ticks.clone()).unwrap_err();
    assert!(matches!(
        err,
        BufferError::BlockSizeMismatch {
            device: BS,
            buffer
        } if buffer == 2 * BS
    ));

    let err = BufferCache::new(CacheConfig::new(0).with_block_size(BS), disk, ticks).unwrap_err();
    assert!(matches!(err, BufferError::Config { .. }));
}

#[test]
fn test_read_miss_then_hit() {
    let h = harness(4, 13);
    h.disk.put(1, 5, &pattern(5)).unwrap();

    let buf = h.cache.read(1, 5).unwrap();
    assert_eq!(buf.dev(), 1);
    assert_eq!(buf.blockno(), 5);
    assert!(buf.is_valid());
    assert_eq!(buf.data(), &pattern(5)[..]);
    let id = buf.id();
    buf.release().unwrap();
    assert_eq!(h.disk.reads_of(1, 5), 1);

    let buf = h.cache.read(1, 5).unwrap();
    assert_eq!(buf.id(), id);
    assert_eq!(buf.data(), &pattern(5)[..]);
    buf.release().unwrap();
    assert_eq!(h.disk.reads_of(1, 5), 1);

    let stats = h.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.disk_reads, 1);
    assert_eq!(stats.referenced, 0);
}

#[test]
fn test_exhaustion_fails_instead_of_blocking() {
    let h = harness(1, 13);
    let held = h.cache.read(1, 5).unwrap();
    let held_id = held.id();

    let cache = &h.cache;
    let result = thread::scope(|s| {
        s.spawn(|| cache.read(1, 6).map(|buf| buf.id()))
            .join()
            .unwrap()
    });
    let err = result.unwrap_err();
    assert!(matches!(err, BufferError::NoFreeBuffers { capacity: 1 }));
    assert!(err.is_fatal());

    held.release().unwrap();
    let buf = h.cache.read(1, 6).unwrap();
    assert_eq!(buf.id(), held_id);
}

#[test]
fn test_global_path_links_into_requesting_bucket() {
    let h = harness(4, 13);

    // Bucket 5 starts empty, so the miss must steal from bucket 0.
    let buf = h.cache.read(1, 5).unwrap();
    let id = buf.id();
    buf.release().unwrap();

    let stats = h.cache.stats();
    assert_eq!(stats.global_evictions, 1);
    assert_eq!(stats.local_evictions, 0);
    assert_eq!(h.cache.descriptor(id).unwrap().home(), 5);
    assert_eq!(h.cache.bucket_members(5).unwrap(), vec![id]);
    assert_eq!(h.cache.bucket_members(0).unwrap().len(), 3);
    assert_eq!(h.cache.lookup(1, 5), Some(id));

    // Block 13 hashes to bucket 0, which still has free buffers.
    h.cache.read(1, 13).unwrap().release().unwrap();
    assert_eq!(h.cache.stats().local_evictions, 1);
    h.cache.verify().unwrap();
}

#[test]
fn test_global_path_when_local_buffer_is_busy() {
    let h = harness(3, 13);
    let first = h.cache.read(1, 5).unwrap();
    // 18 also hashes to bucket 5, whose only buffer is held.
    let second = h.cache.read(1, 18).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(h.cache.bucket_members(5).unwrap().len(), 2);
    assert_eq!(h.cache.stats().global_evictions, 2);
    drop(first);
    drop(second);
    h.cache.verify().unwrap();
}

#[test]
fn test_victim_in_target_bucket_moves_in_place() {
    let h = Arc::new(harness(3, 13));
    let (tx, rx) = mpsc::channel();

    let worker = Arc::clone(&h);
    thread::spawn(move || {
        let cache = &worker.cache;
        let mut list = cache.buckets[0].lock();
        let victim = cache.steal_victim(0, &mut list).map_err(|e| e.to_string());
        let members: Vec<BufId> = list.iter().collect();
        drop(list);
        tx.send((victim, members)).unwrap();
    });

    let (victim, members) = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("victim scan did not return");
    let victim = victim.unwrap();
    // All timestamps are zero: the first descriptor wins the tie.
    assert_eq!(victim, BufId::new(0));
    assert_eq!(members.first(), Some(&victim));
    assert_eq!(members.len(), 3);
    assert_eq!(h.cache.descriptor(victim).unwrap().home(), 0);
    assert_eq!(h.cache.stats().global_evictions, 1);
    h.cache.verify().unwrap();
}

#[test]
fn test_concurrent_reads_of_uncached_block_issue_one_transfer() {
    let h = harness(4, 13);
    h.disk.put(1, 7, &pattern(7)).unwrap();
    h.disk.set_read_latency(Duration::from_millis(50));

    let barrier = &Barrier::new(2);
    let cache = &h.cache;
    let results: Vec<(BufId, bool, Vec<u8>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(move || {
                    barrier.wait();
                    let buf = cache.read(1, 7).unwrap();
                    let seen = (buf.id(), buf.is_valid(), buf.data().to_vec());
                    buf.release().unwrap();
                    seen
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(h.disk.reads_of(1, 7), 1);
    assert_eq!(results[0].0, results[1].0);
    for (_, valid, data) in &results {
        assert!(*valid);
        assert_eq!(data, &pattern(7));
    }
    let stats = h.cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_holders_are_mutually_exclusive() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 300;
    const BLOCKS: u32 = 20;

    let h = harness(6, 13);
    let inside: Vec<AtomicUsize> = (0..h.cache.capacity()).map(|_| AtomicUsize::new(0)).collect();
    let expected: Vec<AtomicU64> = (0..BLOCKS).map(|_| AtomicU64::new(0)).collect();

    let cache = &h.cache;
    thread::scope(|s| {
        for t in 0..THREADS {
            let inside = &inside;
            let expected = &expected;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..ROUNDS {
                    let blockno = rng.gen_range(0..BLOCKS);
                    let mut buf = cache.read(1, blockno).unwrap();
                    assert_eq!(buf.blockno(), blockno);
                    let slot = &inside[buf.id().index()];
                    assert_eq!(slot.fetch_add(1, Ordering::SeqCst), 0);

                    let next = counter_of(buf.data()) + 1;
                    buf.data_mut()[..8].copy_from_slice(&next.to_le_bytes());
                    buf.write().unwrap();
                    expected[blockno as usize].fetch_add(1, Ordering::SeqCst);

                    slot.fetch_sub(1, Ordering::SeqCst);
                    buf.release().unwrap();
                }
            });
        }
    });

    for blockno in 0..BLOCKS {
        let want = expected[blockno as usize].load(Ordering::SeqCst);
        let on_disk = h.disk.block(1, blockno).map(|d| counter_of(&d)).unwrap_or(0);
        assert_eq!(on_disk, want, "block {blockno}");
    }
    assert_eq!(h.cache.free_count(), h.cache.capacity());
    assert_eq!(h.cache.stats().referenced, 0);
    h.cache.verify().unwrap();
}

#[test]
fn test_release_stamps_tick_and_evicts_oldest() {
    let h = harness(3, 1);
    for blockno in 1..=3 {
        h.ticks.advance(1);
        h.cache.read(1, blockno).unwrap().release().unwrap();
    }
    let oldest = h.cache.lookup(1, 1).unwrap();
    assert_eq!(h.cache.descriptor(oldest).unwrap().timestamp(), 1);

    // Touching block 2 makes block 1 the only least recently used one.
    h.ticks.advance(1);
    h.cache.read(1, 2).unwrap().release().unwrap();

    let buf = h.cache.read(1, 4).unwrap();
    assert_eq!(buf.id(), oldest);
    buf.release().unwrap();
    assert_eq!(h.cache.lookup(1, 1), None);

    // Block 3 now carries the smallest timestamp.
    let third = h.cache.lookup(1, 3).unwrap();
    let buf = h.cache.read(1, 5).unwrap();
    assert_eq!(buf.id(), third);
    drop(buf);
    assert_eq!(h.cache.lookup(1, 3), None);
    assert!(h.cache.lookup(1, 2).is_some());
    assert!(h.cache.lookup(1, 4).is_some());
}

#[test]
fn test_reuse_invalidates_payload() {
    let h = harness(1, 13);
    h.disk.put(1, 5, &pattern(1)).unwrap();
    h.disk.put(1, 6, &pattern(2)).unwrap();

    let mut buf = h.cache.read(1, 5).unwrap();
    buf.data_mut().fill(0xFF);
    let id = buf.id();
    buf.release().unwrap();

    let buf = h.cache.read(1, 6).unwrap();
    assert_eq!(buf.id(), id);
    assert_eq!(buf.data(), &pattern(2)[..]);
    buf.release().unwrap();

    // The unwritten change to block 5 was discarded with the buffer.
    let buf = h.cache.read(1, 5).unwrap();
    assert_eq!(buf.data(), &pattern(1)[..]);
    buf.release().unwrap();
    assert_eq!(h.disk.reads_of(1, 5), 2);
}

#[test]
fn test_read_failure_leaves_buffer_invalid() {
    let h = harness(2, 13);
    h.disk.fail_reads(1, 9);

    let err = h.cache.read(1, 9).unwrap_err();
    assert!(matches!(
        err,
        BufferError::Disk(DiskError::Media { dev: 1, blockno: 9 })
    ));
    assert!(err.is_io());

    let id = h.cache.lookup(1, 9).unwrap();
    assert_eq!(h.cache.refcount(id).unwrap(), 0);
    assert!(!h.cache.descriptor(id).unwrap().is_valid());
    assert_eq!(h.cache.free_count(), 2);

    h.disk.heal(1, 9);
    let buf = h.cache.read(1, 9).unwrap();
    assert_eq!(buf.id(), id);
    assert!(buf.is_valid());
    buf.release().unwrap();
    assert_eq!(h.disk.reads_of(1, 9), 2);
}

#[test]
fn test_write_persists_payload() {
    let h = harness(2, 13);
    let mut buf = h.cache.read(1, 3).unwrap();
    buf.data_mut().fill(0x5A);
    h.cache.write(&buf).unwrap();
    h.cache.release(buf).unwrap();

    assert_eq!(h.disk.block(1, 3), Some(vec![0x5A; BS]));
    assert_eq!(h.cache.stats().disk_writes, 1);
}

#[test]
fn test_write_failure_keeps_buffer_held() {
    let h = harness(2, 13);
    h.disk.fail_writes(1, 3);
    let buf = h.cache.read(1, 3).unwrap();
    assert!(matches!(
        buf.write(),
        Err(BufferError::Disk(DiskError::Media { dev: 1, blockno: 3 }))
    ));
    assert_eq!(h.cache.refcount(buf.id()).unwrap(), 1);
    buf.release().unwrap();
    assert_eq!(h.cache.stats().disk_writes, 0);
}

#[test]
fn test_get_skips_disk_read() {
    let h = harness(2, 13);
    let mut buf = h.cache.get(1, 4).unwrap();
    assert!(!buf.is_valid());
    assert_eq!(h.disk.reads(), 0);

    buf.data_mut().copy_from_slice(&pattern(4));
    buf.write().unwrap();
    assert!(buf.is_valid());
    buf.release().unwrap();

    let buf = h.cache.read(1, 4).unwrap();
    assert_eq!(buf.data(), &pattern(4)[..]);
    assert_eq!(h.disk.reads(), 0);
}

#[test]
fn test_reread_by_holder_is_rejected() {
    let h = harness(2, 13);
    let buf = h.cache.read(1, 5).unwrap();
    let err = h.cache.read(1, 5).unwrap_err();
    assert!(matches!(err, BufferError::AlreadyHeld { dev: 1, blockno: 5 }));
    assert_eq!(h.cache.refcount(buf.id()).unwrap(), 1);

    let id = buf.id();
    buf.release().unwrap();
    assert_eq!(h.cache.refcount(id).unwrap(), 0);
    h.cache.verify().unwrap();
}

#[test]
fn test_write_and_release_require_content_lock() {
    let h = harness(2, 13);
    let buf = h.cache.read(1, 5).unwrap();
    let id = buf.id();
    // Lose ownership behind the guard's back.
    buf.desc().content_lock().release().unwrap();

    assert!(matches!(
        h.cache.write(&buf),
        Err(BufferError::NotHeld { id: bad }) if bad == id
    ));
    assert!(matches!(buf.release(), Err(BufferError::NotHeld { .. })));
    assert_eq!(h.cache.refcount(id).unwrap(), 1);
    assert_eq!(h.disk.writes(), 0);
}

#[test]
fn test_pin_keeps_block_resident() {
    let h = harness(1, 13);
    let buf = h.cache.read(1, 5).unwrap();
    let id = buf.id();
    h.cache.pin(id).unwrap();
    buf.release().unwrap();
    assert_eq!(h.cache.refcount(id).unwrap(), 1);

    assert!(matches!(
        h.cache.read(1, 6),
        Err(BufferError::NoFreeBuffers { .. })
    ));

    // A pinned block is still found by lookup.
    let buf = h.cache.read(1, 5).unwrap();
    assert_eq!(buf.id(), id);
    assert_eq!(h.cache.refcount(id).unwrap(), 2);
    buf.release().unwrap();

    h.ticks.advance(10);
    h.cache.unpin(id).unwrap();
    assert_eq!(h.cache.refcount(id).unwrap(), 0);
    assert_eq!(h.cache.descriptor(id).unwrap().timestamp(), 10);
    assert!(matches!(
        h.cache.unpin(id),
        Err(BufferError::RefcountUnderflow { id: bad }) if bad == id
    ));

    h.cache.read(1, 6).unwrap().release().unwrap();
    assert_eq!(h.cache.lookup(1, 5), None);
}

#[test]
fn test_invalid_handles() {
    let h = harness(2, 13);
    let bogus = BufId::new(99);
    assert!(matches!(
        h.cache.pin(bogus),
        Err(BufferError::InvalidHandle { .. })
    ));
    assert!(matches!(
        h.cache.unpin(bogus),
        Err(BufferError::InvalidHandle { .. })
    ));
    assert!(h.cache.refcount(bogus).is_err());
    assert!(h.cache.descriptor(bogus).is_err());
}

#[test]
fn test_release_into_wrong_cache() {
    let a = harness(2, 13);
    let b = harness(2, 13);
    let buf = a.cache.read(1, 1).unwrap();
    let id = buf.id();
    assert!(matches!(
        b.cache.release(buf),
        Err(BufferError::InvalidHandle { .. })
    ));
    // The rejected guard was dropped and released into its own cache.
    assert_eq!(a.cache.refcount(id).unwrap(), 0);
    assert_eq!(b.cache.free_count(), 2);
}

#[test]
fn test_dropped_guard_releases() {
    let h = harness(2, 13);
    h.ticks.advance(7);
    let id = {
        let buf = h.cache.read(1, 2).unwrap();
        buf.id()
    };
    let desc = h.cache.descriptor(id).unwrap();
    assert_eq!(desc.refcount(), 0);
    assert_eq!(desc.timestamp(), 7);
    assert!(!desc.content_lock().is_locked());
}

#[test]
fn test_verify_detects_double_membership() {
    let h = harness(2, 13);
    h.cache.buckets[3].lock().push_front(BufId::new(0));
    let err = h.cache.verify().unwrap_err();
    assert!(matches!(err, BufferError::Inconsistent { .. }));
}

#[test]
fn test_file_backed_cache_persists() {
    let dir = tempfile::TempDir::new().unwrap();
    let image = dir.path().join("disk1.img");
    let ticks = Arc::new(TickCounter::new());
    let config = CacheConfig::new(4).with_block_size(BS);

    {
        let disk = Arc::new(FileDisk::new(BS));
        disk.attach(1, &image, 32).unwrap();
        let cache = BufferCache::new(config.clone(), disk, ticks.clone()).unwrap();
        let mut buf = cache.read(1, 17).unwrap();
        buf.data_mut().copy_from_slice(&pattern(17));
        buf.write().unwrap();
        buf.release().unwrap();
    }

    let disk = Arc::new(FileDisk::new(BS));
    disk.attach(1, &image, 32).unwrap();
    let cache = BufferCache::new(config, disk, ticks).unwrap();
    let buf = cache.read(1, 17).unwrap();
    assert_eq!(buf.data(), &pattern(17)[..]);
    buf.release().unwrap();

    assert!(matches!(
        cache.read(1, 32),
        Err(BufferError::Disk(DiskError::OutOfRange { .. }))
    ));
}
