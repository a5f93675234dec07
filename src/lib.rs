//! hev-tun-bridge - Lifecycle Bridge for the hev-socks5-tunnel Engine
//!
//! This is a **lifecycle bridge** between a managed host application
//! (Android/Flutter in the original deployment) and the hev-socks5-tunnel
//! native engine, which ships as a separate dynamically loadable module and
//! does the actual tunneling.
//!
//! ## What This Library Provides
//! - Lazy resolution of the engine module and its entry points, cached for
//!   the process lifetime
//! - A single-session lifecycle: `start` launches the engine's blocking
//!   entry point on a detached thread, `stop` asks it to return
//! - Finalization of the engine's line-oriented configuration text,
//!   injecting the tunnel file descriptor supplied by the host
//! - C FFI bindings for integration with other languages
//!
//! ## What Your Application Must Implement
//! - Opening the TUN interface and obtaining its file descriptor
//!   (`VpnService.Builder.establish()` on Android)
//! - UI, permission flows, and session status reporting
//! - Packaging the engine module where the platform loader can find it
//!
//! The engine itself is opaque here: one blocking run entry point, one quit
//! entry point, nothing else.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;

// Re-export core types for the library interface
pub use bridge::Bridge;
pub use config::{finalize_config, TunnelConfig};
pub use engine::{HevEngine, TunnelEngine};
pub use error::{BridgeError, Result};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// C FFI Interface for cross-platform integration
pub mod ffi;
