//! Shared test-only logging setup for the integration suites, matching the
//! `env_logger::Builder::from_default_env()` + `Once` pattern the teacher's
//! `test_utils::setup_logger` uses.

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
    });
}
