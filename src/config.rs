//! Environment-variable configuration surface (§6, §4.9). Grounded in
//! `crm_default_remote_port`'s memoize-on-first-call pattern and the
//! `configuration.rs` teacher module's env-driven settings.

use std::sync::OnceLock;

/// Pacemaker's compiled-in default remote port, used whenever
/// `PCMK_remote_port` is unset or invalid.
const DEFAULT_REMOTE_PORT: u16 = 3121;

static DEFAULT_PORT: OnceLock<u16> = OnceLock::new();

/// §4.9 `Default Port Resolution`, memoized process-wide on first call.
pub fn default_remote_port() -> u16 {
    *DEFAULT_PORT.get_or_init(|| match std::env::var("PCMK_remote_port") {
        Ok(raw) => parse_port(&raw).unwrap_or_else(|| {
            log::warn!(
                "Environment variable PCMK_remote_port has invalid value '{raw}', using {DEFAULT_REMOTE_PORT} instead"
            );
            DEFAULT_REMOTE_PORT
        }),
        Err(_) => DEFAULT_REMOTE_PORT,
    })
}

fn parse_port(raw: &str) -> Option<u16> {
    let value: i64 = raw.trim().parse().ok()?;
    if (1..=65535).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

/// The base TLS priority string: `PCMK_tls_priorities` if set, else the
/// compiled-in default (§4.5).
pub fn tls_priorities_base() -> String {
    std::env::var("PCMK_tls_priorities").unwrap_or_else(|_| "NORMAL".to_string())
}

pub fn dh_min_bits() -> Option<u32> {
    std::env::var("PCMK_dh_min_bits")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|b| *b > 0)
}

pub fn dh_max_bits() -> Option<u32> {
    std::env::var("PCMK_dh_max_bits")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|b| *b > 0)
}
