//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: The core library propagates errors with `?` and typed
//! errors. `unwrap()` and `expect()` are only allowed in test code.

use architectural_enforcement::{find, report};

#[test]
fn test_no_unwrap_in_core() {
    let mut violations = find(&["ports/core/src"], ".unwrap()", &[]);
    violations.extend(find(&["ports/core/src"], ".expect(", &[]));
    report("unwrap/expect in ports-core production code", &violations);
}
