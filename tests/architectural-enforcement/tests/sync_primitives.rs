//! Integration Test: Synchronization Primitives
//!
//! **Policy**: Shared state uses `parking_lot` locks (never held across an
//! await), tokio's async mutex where a guard must cross an await, and
//! `arc-swap` for the lock-free registry. `std::sync` locks are not used.

use architectural_enforcement::{find, report, PRODUCTION_DIRS};

#[test]
fn test_no_std_mutex() {
    let mut violations = find(PRODUCTION_DIRS, "std::sync::Mutex", &[]);
    violations.extend(find(PRODUCTION_DIRS, "std::sync::RwLock", &[]));
    violations.extend(find(PRODUCTION_DIRS, "std::sync::{Mutex", &[]));
    report("std::sync locks in production code (use parking_lot)", &violations);
}
