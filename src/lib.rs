//! Framed, endian-neutral, optionally TLS-tunneled messaging transport for
//! cluster node communication (see spec.md / SPEC_FULL.md).
//!
//! The crate is organized leaves-first, matching the component table in
//! SPEC_FULL.md §2:
//!
//! - [`header`] — the fixed-layout frame header and its endian detection.
//! - [`buffer`] — the grow-on-demand receive buffer.
//! - [`transport`] — plaintext/TLS byte transport.
//! - [`session`] — `RemoteSession`, the Frame Assembler and Send Path.
//! - [`tls`] — the TLS session factory and handshake driver.
//! - [`connect`] — the async TCP connect engine and accept helper.
//! - [`scheduler`] — the event-loop-agnostic timer collaborator.
//! - [`message`] — the out-of-scope tree-serialization collaborator stand-in.
//! - [`config`] — environment-variable configuration surface.
//! - [`error`] — the error taxonomy shared across every module.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod config;
pub mod connect;
pub mod error;
pub mod header;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod tls;
pub mod transport;

pub use error::{Error, Result};
pub use header::{Header, HEADER_LEN, LOCAL_MAGIC, PROTOCOL_VERSION};
pub use message::{DefaultCodec, MessageCodec, MessageTree};
pub use session::RemoteSession;
pub use transport::Transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APPNAME: &str = env!("CARGO_PKG_NAME");

/// Test-only logging setup, grounded in the teacher's `test_utils::setup_logger`
/// (same `env_logger::Builder::from_default_env()` plus a `Once` guard so
/// every test file can call it unconditionally).
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init_logging() {
        INIT.call_once(|| {
            let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
        });
    }
}
