//! Deadlock-detector trip (SPEC_FULL.md §8, scenario 6): two mutexes locked
//! in opposite orders by two threads must make the detector abort the
//! process with a structured cycle report.
//!
//! `harness = false` (see `Cargo.toml`) because the thing under test is a
//! process abort, not a pass/fail assertion a normal `#[test]` can make;
//! this re-execs itself as a child (mirroring the teacher's own
//! `stack_overflow_crash` test) and inspects the child's exit status and
//! stderr instead.

use std::env;
use std::process::{Command, Stdio};

const CHILD_ENV: &str = "MN_DEADLOCK_TRIP_CHILD";

fn main() {
    if env::var_os(CHILD_ENV).is_some() {
        run_child();
        return;
    }

    let exe = env::current_exe().expect("current_exe");
    let output = Command::new(exe)
        .env(CHILD_ENV, "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to spawn deadlock_trip child");

    assert!(
        !output.status.success(),
        "child should have aborted, got status {:?}",
        output.status
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("mn: deadlock detected"),
        "stderr missing detector banner:\n{}",
        stderr
    );
    assert!(
        stderr.contains("mutex_a") && stderr.contains("mutex_b"),
        "stderr missing both mutex names:\n{}",
        stderr
    );

    println!("deadlock_trip: child aborted as expected");
}

/// Locks `mutex_a` then `mutex_b` on one thread and `mutex_b` then
/// `mutex_a` on another, with a small sleep between the two acquires on
/// each side so both threads are guaranteed to hold their first lock
/// before reaching for their second.
fn run_child() {
    use mn::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let mutex_a = Arc::new(Mutex::new("mutex_a", 0i32));
    let mutex_b = Arc::new(Mutex::new("mutex_b", 0i32));

    let a1 = Arc::clone(&mutex_a);
    let b1 = Arc::clone(&mutex_b);
    let t1 = thread::spawn(move || {
        let _guard_a = a1.lock();
        thread::sleep(Duration::from_millis(100));
        let _guard_b = b1.lock();
    });

    let a2 = Arc::clone(&mutex_a);
    let b2 = Arc::clone(&mutex_b);
    let t2 = thread::spawn(move || {
        let _guard_b = b2.lock();
        thread::sleep(Duration::from_millis(100));
        let _guard_a = a2.lock();
    });

    // One of the two joins should never return: the detector aborts the
    // whole process from inside whichever thread completes the cycle.
    let _ = t1.join();
    let _ = t2.join();

    // Reached only if the detector failed to trip at all (both threads ran
    // to completion without a cycle ever being observed). Exit nonzero with
    // a message that deliberately does not satisfy the parent's stderr
    // checks, so a broken detector fails loudly instead of looking like a
    // pass.
    eprintln!("deadlock_trip: detector never fired");
    std::process::exit(1);
}
