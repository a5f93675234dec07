//! C FFI Interface for the hev-socks5-tunnel bridge
//!
//! This module provides the C-compatible surface the managed host calls
//! (Kotlin, Swift, C#, etc.). All exports operate on one process-wide
//! [`Bridge`]; the host never sees a handle, mirroring the start/stop pair
//! the original JNI bridge exposed.

#![allow(clippy::missing_safety_doc)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::sync::Once;

use crate::Bridge;

lazy_static::lazy_static! {
    // Bridge state shared across FFI calls
    static ref BRIDGE: Bridge = Bridge::new();
}

static LOG_INIT: Once = Once::new();

/// Install the logging sink for the library
///
/// Idempotent; the host should call it once when the library is loaded.
/// Filtering follows `RUST_LOG`, defaulting to `info`.
#[no_mangle]
pub extern "C" fn hev_tun_bridge_init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();
    });
}

/// Start a tunnel session
///
/// # Parameters
/// - `config`: engine configuration text (newline-separated `key: value`
///   lines); a `tunfd: <tun_fd>` line is appended unless the key is already
///   present
/// - `tun_fd`: descriptor of the TUN interface opened by the host
///
/// # Returns
/// - 0 if the session was launched, or one is already running
/// - -1 if the engine module could not be prepared or `config` is invalid
#[no_mangle]
pub unsafe extern "C" fn hev_tun_bridge_start(config: *const c_char, tun_fd: c_int) -> c_int {
    if config.is_null() {
        return -1;
    }

    let config = match CStr::from_ptr(config).to_str() {
        Ok(s) => s,
        Err(_) => return -1,
    };

    match BRIDGE.start(config, tun_fd) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Request shutdown of the in-flight session
///
/// Asynchronous and best-effort: the call returns immediately; the session
/// ends when the engine's blocking run call comes back. No-op when nothing
/// is running.
#[no_mangle]
pub extern "C" fn hev_tun_bridge_stop() {
    BRIDGE.stop();
}

/// Whether a session is currently in flight
///
/// # Returns
/// - 1 while the engine's run call is blocked inside a session
/// - 0 otherwise
#[no_mangle]
pub extern "C" fn hev_tun_bridge_is_running() -> c_int {
    c_int::from(BRIDGE.is_running())
}

/// Get library version
///
/// # Returns
/// - Version string (caller must not free)
#[no_mangle]
pub extern "C" fn hev_tun_bridge_version() -> *const c_char {
    static VERSION_CSTR: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION_CSTR.as_ptr() as *const c_char
}
