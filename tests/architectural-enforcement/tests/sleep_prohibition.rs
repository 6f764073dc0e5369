//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never blocks a runtime thread with
//! `std::thread::sleep`. Timed waits live in one place, the timer module;
//! everything else waits on I/O, tokens or watch channels.

use architectural_enforcement::{find, report, PRODUCTION_DIRS};

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = find(PRODUCTION_DIRS, "thread::sleep", &[]);
    report("std::thread::sleep in production code", &violations);
}

#[test]
fn test_timed_waits_only_in_timer_module() {
    let violations = find(PRODUCTION_DIRS, "sleep(", &["ports/core/src/timer.rs"]);
    report(
        "sleep outside the timer module (use OwnedTimer or wait on an event)",
        &violations,
    );
}
