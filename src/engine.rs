//! Native engine module loading
//!
//! The tunneling work itself is done by hev-socks5-tunnel, shipped as a
//! separate dynamic library next to the host application. This module
//! resolves that library and its two entry points, and hides the resolution
//! behind a capability trait so the bridge can be driven by a fake engine in
//! tests.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use libloading::{Library, Symbol};

use crate::error::{BridgeError, Result};

/// Well-known file name of the engine module, resolved through the
/// platform's standard dynamic-library search path.
pub const ENGINE_LIBRARY: &str = "libhev-socks5-tunnel.so";

/// Entry point that runs a tunnel session from a configuration string.
/// Blocks until the session ends.
pub const RUN_SYMBOL: &str = "hev_socks5_tunnel_main_from_str";

/// Entry point that asks a running session to shut down.
pub const QUIT_SYMBOL: &str = "hev_socks5_tunnel_quit";

type RunFn = unsafe extern "C" fn(*const c_char) -> c_int;
type QuitFn = unsafe extern "C" fn();

/// Capability interface of the engine module.
///
/// `run` blocks for the whole session and returns the engine's exit status;
/// `quit` asynchronously causes a blocked `run` to return. Implementations
/// must be safe to share across threads: `run` is called from the session
/// thread while `quit` arrives from a caller thread.
pub trait TunnelEngine: Send + Sync {
    /// Run a tunnel session with the given configuration text. Blocks until
    /// the session ends and returns the engine's exit status.
    fn run(&self, config: &CStr) -> i32;

    /// Request shutdown of the in-flight session. Best-effort; returns
    /// without waiting for termination.
    fn quit(&self);
}

/// The real engine: hev-socks5-tunnel loaded via the platform dynamic
/// loader.
///
/// The resolved function pointers are plain copies out of the library; the
/// `Library` is kept in the same struct so the mapping outlives them.
#[derive(Debug)]
pub struct HevEngine {
    run: RunFn,
    quit: QuitFn,
    _lib: Library,
}

impl HevEngine {
    /// Open the engine module by its well-known name and resolve both entry
    /// points.
    ///
    /// # Errors
    /// Returns `EngineLoad` if the module cannot be opened and `Symbol` if
    /// either entry point is missing. A partially resolved module is never
    /// returned; on any failure the library handle is dropped so a later
    /// call starts from scratch.
    pub fn load() -> Result<Self> {
        Self::load_from(ENGINE_LIBRARY)
    }

    fn load_from(name: &str) -> Result<Self> {
        // SAFETY: loading a foreign module and running its initializers is
        // inherently unsafe; the engine is trusted by deployment.
        let lib = unsafe { Library::new(name) }
            .map_err(|e| BridgeError::EngineLoad(format!("{name}: {e}")))?;

        // SAFETY: symbol types match the engine's C ABI contract. The fn
        // pointers are copied out of the symbols; `lib` keeps them valid.
        let run = {
            let symbol: Symbol<RunFn> = unsafe { lib.get(RUN_SYMBOL.as_bytes()) }
                .map_err(|e| BridgeError::Symbol(format!("{RUN_SYMBOL}: {e}")))?;
            *symbol
        };

        let quit = {
            let symbol: Symbol<QuitFn> = unsafe { lib.get(QUIT_SYMBOL.as_bytes()) }
                .map_err(|e| BridgeError::Symbol(format!("{QUIT_SYMBOL}: {e}")))?;
            *symbol
        };

        Ok(HevEngine {
            run,
            quit,
            _lib: lib,
        })
    }
}

impl TunnelEngine for HevEngine {
    fn run(&self, config: &CStr) -> i32 {
        // SAFETY: the pointer is a valid NUL-terminated string for the whole
        // call, and the mapping is pinned by `_lib`.
        unsafe { (self.run)(config.as_ptr()) }
    }

    fn quit(&self) {
        // SAFETY: no arguments; the mapping is pinned by `_lib`.
        unsafe { (self.quit)() }
    }
}
