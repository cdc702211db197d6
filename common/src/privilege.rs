//! Process privilege detection.
//!
//! Raw datalink channels, transport channels and the rule backends all
//! need elevation; everything downstream depends only on this one
//! boolean, checked once and cached for the process lifetime.

use std::sync::OnceLock;

static ELEVATED: OnceLock<bool> = OnceLock::new();

pub fn has_elevated_privileges() -> bool {
    *ELEVATED.get_or_init(is_root::is_root)
}

/// Test seam: force the cached answer before anything reads it. Has no
/// effect once the real check has run.
pub fn force_for_tests(value: bool) -> bool {
    *ELEVATED.get_or_init(|| value)
}
