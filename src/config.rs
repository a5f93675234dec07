//! Configuration text for the hev-socks5-tunnel engine
//!
//! The engine takes its configuration as newline-separated `key: value`
//! lines. The managed side normally hands the bridge finished text and the
//! bridge treats it as opaque, except for one key: `tunfd`, the descriptor
//! of the TUN interface the platform has already opened. `TunnelConfig`
//! additionally builds the text for hosts that assemble it in Rust.

use std::fmt;

use crate::error::{BridgeError, Result};

/// Configuration key carrying the tunnel file descriptor.
pub const TUNFD_KEY: &str = "tunfd:";

/// Finalize caller-supplied configuration text for a session.
///
/// If the text already names `tunfd:` anywhere it is passed through
/// byte-identical (the caller's value wins, even if it disagrees with
/// `tun_fd`). Otherwise a `tunfd: <fd>` line is appended.
pub fn finalize_config(config: &str, tun_fd: i32) -> String {
    if config.contains(TUNFD_KEY) {
        return config.to_string();
    }
    format!("{config}\n{TUNFD_KEY} {tun_fd}\n")
}

/// Engine configuration builder.
///
/// Field defaults mirror the values the Ananas host application ships with:
/// an MTU tuned for UDP-heavy traffic and a local SOCKS5 bridge on port
/// 10808.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfig {
    /// MTU of the tunnel interface
    pub mtu: u16,
    /// SOCKS5 server address the engine forwards into
    pub socks5_address: String,
    /// SOCKS5 server port
    pub socks5_port: u16,
    /// Relay UDP through the SOCKS5 server
    pub socks5_udp: bool,
    /// Engine log level (`debug`, `info`, `warn`, `error`)
    pub log_level: String,
    /// Tunnel file descriptor, if already known at build time
    pub tun_fd: Option<i32>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            socks5_address: "127.0.0.1".to_string(),
            socks5_port: 10808,
            socks5_udp: true,
            log_level: "warn".to_string(),
            tun_fd: None,
        }
    }
}

impl TunnelConfig {
    /// Set the tunnel file descriptor on the rendered text instead of
    /// leaving injection to the bridge.
    #[must_use]
    pub fn with_tun_fd(mut self, tun_fd: i32) -> Self {
        self.tun_fd = Some(tun_fd);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.socks5_address.is_empty() {
            return Err(BridgeError::Config(
                "SOCKS5 address cannot be empty".to_string(),
            ));
        }

        if self.socks5_port == 0 {
            return Err(BridgeError::Config(
                "SOCKS5 port cannot be zero".to_string(),
            ));
        }

        if self.mtu < 576 || self.mtu > 9000 {
            return Err(BridgeError::Config(
                "MTU must be between 576 and 9000".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as the engine's line-oriented text.
    pub fn to_config_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mtu: {}", self.mtu)?;
        writeln!(f, "socks5-address: {}", self.socks5_address)?;
        writeln!(f, "socks5-port: {}", self.socks5_port)?;
        writeln!(f, "socks5-udp: {}", self.socks5_udp)?;
        writeln!(f, "loglevel: {}", self.log_level)?;
        if let Some(fd) = self.tun_fd {
            writeln!(f, "{TUNFD_KEY} {fd}")?;
        }
        Ok(())
    }
}
