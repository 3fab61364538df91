//! End-to-end scenarios (SPEC_FULL.md §8, scenarios 1-5). Scenario 6 (the
//! deadlock trip) lives in `tests/deadlock_trip.rs` as its own
//! `harness = false` binary, since it must assert on process-abort
//! behavior rather than a normal pass/fail test outcome.

use mn::{block, Chan, FabricBuilder, Waitgroup};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn producer_consumer_sum() {
    let fabric = FabricBuilder::new().workers_count(3).build().unwrap();
    let chan: Chan<u64> = Chan::new(1);
    let sum = Arc::new(AtomicU64::new(0));
    let wg = Arc::new(Waitgroup::new());

    for _ in 0..6 {
        let chan = chan.clone();
        let sum = Arc::clone(&sum);
        wg.add(1);
        let wg2 = Arc::clone(&wg);
        fabric.go(move || {
            for v in chan.iter() {
                sum.fetch_add(v, Ordering::SeqCst);
            }
            wg2.done();
        });
    }

    let producer_chan = chan.clone();
    fabric.go(move || {
        for v in 0..=100u64 {
            producer_chan.send(v);
        }
        producer_chan.close();
    });

    wg.wait();
    assert_eq!(sum.load(Ordering::SeqCst), 5050);
}

#[test]
fn buffered_stress() {
    let fabric = FabricBuilder::new().workers_count(3).build().unwrap();
    let chan: Chan<u64> = Chan::new(1000);
    let sum = Arc::new(AtomicU64::new(0));
    let wg = Arc::new(Waitgroup::new());

    for _ in 0..6 {
        let chan = chan.clone();
        let sum = Arc::clone(&sum);
        wg.add(1);
        let wg2 = Arc::clone(&wg);
        fabric.go(move || {
            for v in chan.iter() {
                sum.fetch_add(v, Ordering::SeqCst);
            }
            wg2.done();
        });
    }

    let producer_chan = chan.clone();
    fabric.go(move || {
        for v in 0..=10_000u64 {
            producer_chan.send(v);
        }
        producer_chan.close();
    });

    wg.wait();
    assert_eq!(sum.load(Ordering::SeqCst), 50_005_000);
}

#[test]
fn coroutines_spawning_coroutines() {
    let fabric = Arc::new(FabricBuilder::new().workers_count(3).build().unwrap());
    let sum = Arc::new(AtomicU64::new(0));
    let wg = Arc::new(Waitgroup::new());
    wg.add(1);

    let fabric_for_task = Arc::clone(&fabric);
    let sum_for_reader = Arc::clone(&sum);
    let wg_for_reader = Arc::clone(&wg);

    fabric.go(move || {
        let chan: Chan<u64> = Chan::new(1000);

        let reader_chan = chan.clone();
        fabric_for_task.go(move || {
            for v in reader_chan.iter() {
                sum_for_reader.fetch_add(v, Ordering::SeqCst);
            }
            wg_for_reader.done();
        });

        for v in 0..=10_000u64 {
            chan.send(v);
        }
        chan.close();
    });

    wg.wait();
    assert_eq!(sum.load(Ordering::SeqCst), 50_005_000);
}

#[test]
fn waitgroup_rendezvous() {
    let fabric = FabricBuilder::new().workers_count(2).build().unwrap();
    let wg = Arc::new(Waitgroup::new());
    let n = Arc::new(AtomicI64::new(0));

    wg.add(1);
    let n2 = Arc::clone(&n);
    let wg2 = Arc::clone(&wg);
    fabric.go(move || {
        n2.fetch_add(1, Ordering::SeqCst);
        wg2.done();
    });

    wg.wait();
    assert_eq!(n.load(Ordering::SeqCst), 1);
}

#[test]
fn replacement_under_block() {
    let fabric = FabricBuilder::new()
        .workers_count(2)
        .coop_blocking_threshold_ms(50)
        .build()
        .unwrap();

    // Every worker blocks on a mock external primitive for 500ms at once,
    // which is what makes sysmon see the whole fabric as stuck.
    for _ in 0..2 {
        fabric.go(|| {
            let deadline = std::time::Instant::now() + Duration::from_millis(500);
            block::worker_block_on(|| std::time::Instant::now() >= deadline);
        });
    }

    // Give sysmon a generous window past `coop_blocking_threshold_ms + ε`
    // to have already swapped both workers for replacements.
    std::thread::sleep(Duration::from_millis(300));

    let progressed = Arc::new(AtomicU64::new(0));
    let p2 = Arc::clone(&progressed);
    fabric.go(move || {
        p2.store(1, Ordering::SeqCst);
    });

    let mut waited = 0;
    while progressed.load(Ordering::SeqCst) == 0 && waited < 2000 {
        std::thread::sleep(Duration::from_millis(1));
        waited += 1;
    }
    assert_eq!(progressed.load(Ordering::SeqCst), 1);
}
