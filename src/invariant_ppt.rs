//! Invariant checking for the autofocus pipeline
//!
//! Production code asserts geometric and numeric invariants (regions inside the
//! frame, scores inside `[0, 1]`, crops at the canvas size) through
//! [`assert_invariant!`]. Every check is recorded per thread so contract tests
//! can prove that a code path actually exercised the invariant it relies on.
//!
//! ```rust,ignore
//! use crabfocus::invariant_ppt::*;
//!
//! assert_invariant!(score <= 1.0, "Sharpness score must be at most 1.0");
//!
//! #[test]
//! fn contract_scoring() {
//!     // ... run a score ...
//!     contract_test("scoring", &["Sharpness score must be at most 1.0"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread_local;

thread_local! {
    static CHECKED: RefCell<HashMap<String, u64>> = RefCell::new(HashMap::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check_invariant(condition: bool, message: &str, context: Option<&str>) {
    CHECKED.with(|checked| {
        *checked.borrow_mut().entry(message.to_string()).or_insert(0) += 1;
    });

    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            message
        );
    }
}

/// Number of times `message` was checked on this thread.
pub fn times_checked(message: &str) -> u64 {
    CHECKED.with(|checked| checked.borrow().get(message).copied().unwrap_or(0))
}

/// Panic unless every listed invariant was checked on this thread.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|message| times_checked(message) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: invariants never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Forget all recorded checks on this thread.
pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_are_counted() {
        clear_invariant_log();
        crate::assert_invariant!(true, "counted twice");
        crate::assert_invariant!(true, "counted twice");
        assert_eq!(times_checked("counted twice"), 2);
        contract_test("counting", &["counted twice"]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_missing_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("missing", &["never asserted anywhere"]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [unit]")]
    fn test_violation_panics_with_context() {
        crate::assert_invariant!(1 + 1 == 3, "arithmetic", "unit");
    }
}
