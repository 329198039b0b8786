/*!
 * Shared Memory Tests
 * Segment lifecycle against the host's System V table
 */

#![cfg(unix)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_test::serial;
use shm_bridge::{
    ErrorKind, SegmentBridge, SegmentManager, SegmentTable, ShmConfig, ShmError, SysvTable,
};
use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;

/// Fill the first `len` bytes of a segment out-of-band, as a child process would
fn inject(id: i32, byte: u8, len: usize) {
    unsafe {
        let addr = libc::shmat(id, std::ptr::null(), 0);
        assert_ne!(addr as isize, -1, "out-of-band attach failed");
        std::ptr::write_bytes(addr.cast::<u8>(), byte, len);
        assert_eq!(libc::shmdt(addr), 0);
    }
}

fn manager() -> SegmentManager {
    SegmentManager::new(ShmConfig::default())
}

#[test]
#[serial]
fn test_fresh_segment_reads_zero() {
    let sm = manager();
    let handle = sm.allocate(4096).unwrap();

    let data = sm.read(&handle, 4096).unwrap();
    assert_eq!(data.len(), 4096);
    assert!(data.iter().all(|&b| b == 0));

    sm.release(handle).unwrap();
}

#[test]
#[serial]
fn test_segment_is_owner_only() {
    let sm = manager();
    let handle = sm.allocate(64).unwrap();

    let stats = sm.stats(&handle).unwrap();
    assert_eq!(stats.id, handle.id());
    assert_eq!(stats.size, 64);
    assert_eq!(stats.permissions(), 0o600);
    assert_eq!(stats.owner_uid, unsafe { libc::geteuid() });
    assert_eq!(stats.creator_pid, std::process::id() as i32);

    sm.release(handle).unwrap();
}

#[test]
#[serial]
fn test_read_leaves_no_attachment() {
    let sm = manager();
    let handle = sm.allocate(256).unwrap();

    for _ in 0..3 {
        sm.read(&handle, 256).unwrap();
    }
    assert_eq!(sm.stats(&handle).unwrap().attach_count, 0);

    // A failed read must not leak an attachment either.
    assert!(sm.read(&handle, 257).is_err());
    assert_eq!(sm.stats(&handle).unwrap().attach_count, 0);

    sm.release(handle).unwrap();
}

#[test]
#[serial]
fn test_injected_bytes_round_trip() {
    let bridge = SegmentBridge::new(manager());

    let id = bridge.allocate(64).unwrap();
    inject(id, 0xAB, 64);

    let data = bridge.read(id, 64).unwrap();
    assert_eq!(data, vec![0xAB; 64]);

    bridge.release(id).unwrap();
    let err = bridge.read(id, 64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[test]
#[serial]
fn test_partial_read_returns_prefix() {
    let sm = manager();
    let handle = sm.allocate(128).unwrap();
    inject(handle.id(), 0x11, 16);

    let data = sm.read(&handle, 32).unwrap();
    assert_eq!(&data[..16], &[0x11; 16]);
    assert_eq!(&data[16..], &[0u8; 16]);

    sm.release(handle).unwrap();
}

#[test]
#[serial]
fn test_released_segment_is_gone_from_kernel() {
    let table = SysvTable::new();
    let sm = manager();
    let handle = sm.allocate(64).unwrap();
    let id = handle.id();

    sm.release(handle).unwrap();

    assert_eq!(table.stat(id).unwrap_err(), ShmError::InvalidHandle(id));
    let mut buf = [0u8; 64];
    assert_eq!(
        table.read_into(id, &mut buf).unwrap_err(),
        ShmError::InvalidHandle(id)
    );
    assert_eq!(table.remove(id).unwrap_err(), ShmError::InvalidHandle(id));
}

#[test]
#[serial]
fn test_double_release_fails() {
    let bridge = SegmentBridge::new(manager());
    let id = bridge.allocate(32).unwrap();

    bridge.release(id).unwrap();
    let err = bridge.release(id).unwrap_err();
    assert_eq!(err, ShmError::InvalidHandle(id));
}

#[test]
#[serial]
fn test_invalid_sizes_return_no_handle() {
    let bridge = SegmentBridge::new(manager());

    for size in [0, -1, i32::MIN] {
        let err = bridge.allocate(size).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(bridge.is_empty());
    assert_eq!(bridge.manager().live_segments(), 0);
}

#[test]
#[serial]
fn test_over_read_is_rejected() {
    let sm = manager();
    let handle = sm.allocate(100).unwrap();

    let err = sm.read(&handle, 101).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // The table checks the kernel-reported size too, not the page-rounded mapping.
    let mut buf = vec![0u8; 4096];
    assert_eq!(
        SysvTable::new().read_into(handle.id(), &mut buf).unwrap_err(),
        ShmError::ReadOutOfBounds {
            id: handle.id(),
            requested: 4096,
            allocated: 100
        }
    );

    sm.release(handle).unwrap();
}

#[test]
#[serial]
fn test_configured_size_limit() {
    let sm = SegmentManager::new(ShmConfig::default().with_max_segment_size(4096));

    let err = sm.allocate(4097).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(sm.live_segments(), 0);
}

#[test]
#[serial]
fn test_drop_destroys_segment() {
    let sm = manager();
    let id = {
        let handle = sm.allocate(32).unwrap();
        handle.id()
    };

    assert!(!sm.owns(id));
    assert_eq!(
        SysvTable::new().stat(id).unwrap_err(),
        ShmError::InvalidHandle(id)
    );
}

#[test]
#[serial]
fn test_concurrent_allocations_are_unique() {
    let sm = manager();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let sm = sm.clone();
            thread::spawn(move || {
                (0..4)
                    .map(|_| sm.allocate(1024).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let handles: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    let ids: HashSet<i32> = handles.iter().map(|h| h.id()).collect();

    assert_eq!(ids.len(), 32);
    assert_eq!(sm.live_segments(), 32);

    for handle in handles {
        sm.release(handle).unwrap();
    }
    assert_eq!(sm.live_segments(), 0);
}

#[test]
#[serial]
fn test_release_waits_for_in_flight_read() {
    const SIZE: usize = 1024 * 1024;
    let bridge = SegmentBridge::new(manager());

    for _ in 0..200 {
        let id = bridge.allocate(SIZE as i32).unwrap();
        inject(id, 0xCD, SIZE);
        let start = Barrier::new(2);

        let read = thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut out = vec![0u8; SIZE];
                start.wait();
                bridge.read_into(id, SIZE as i32, &mut out).map(|_| out)
            });

            start.wait();
            bridge.release(id).unwrap();
            reader.join().unwrap()
        });

        // Either the read finished before the release, or it saw the id gone.
        match read {
            Ok(out) => assert!(out.iter().all(|&b| b == 0xCD)),
            Err(e) => assert_eq!(e, ShmError::InvalidHandle(id)),
        }
        assert!(!bridge.contains(id));
    }

    assert!(bridge.is_empty());
    assert_eq!(bridge.manager().live_segments(), 0);
}

#[test]
#[serial]
fn test_any_size_reads_back_zeroed() {
    let sm = manager();

    proptest!(ProptestConfig::with_cases(32), |(size in 1usize..=16384)| {
        let handle = sm.allocate(size).unwrap();
        let data = sm.read(&handle, size).unwrap();
        prop_assert_eq!(data.len(), size);
        prop_assert!(data.iter().all(|&b| b == 0));
        sm.release(handle).unwrap();
    });

    assert_eq!(sm.live_segments(), 0);
}
