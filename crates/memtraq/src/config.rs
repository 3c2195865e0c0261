//! Environment-variable configuration.
//!
//! The complete recognized set:
//!
//! | Variable | Effect |
//! |---|---|
//! | `MEMTRAQ_LOG` | Path of the output log file; absent disables file output |
//! | `MEMTRAQ_TARGET` | IPv4 address; when set, frames are also sent over UDP |
//! | `MEMTRAQ_ENABLED` | `"0"` starts with logging disabled |
//! | `MEMTRAQ_RESOLVE` | `"0"` disables symbol resolution |
//! | `MEMTRAQ_BACKTRACE_FREE` | enables call-stack capture on free |
//! | `MEMTRAQ_DEBUG`, `MEMTRAQ_TRACE_<CLASS>` | internal trace levels (see [`crate::trace`]) |
//!
//! Boolean variables: the literal `"0"` means false, any other present
//! value means true.

use std::net::Ipv4Addr;

use crate::trace::Class;

pub const ENV_LOG: &str = "MEMTRAQ_LOG";
pub const ENV_TARGET: &str = "MEMTRAQ_TARGET";
pub const ENV_ENABLED: &str = "MEMTRAQ_ENABLED";
pub const ENV_RESOLVE: &str = "MEMTRAQ_RESOLVE";
pub const ENV_BACKTRACE_FREE: &str = "MEMTRAQ_BACKTRACE_FREE";

/// Configuration snapshot taken once during initialization.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log-file path; `None` disables the file sink.
    pub log_path: Option<String>,
    /// UDP destination host; `None` disables the UDP sink.
    pub target: Option<Ipv4Addr>,
    /// Initial value of the `enabled` flag (default true).
    pub enabled: bool,
    /// Whether captured addresses are symbolized (default true).
    pub resolve: bool,
    /// Whether `free` events carry a backtrace (default false).
    pub backtrace_on_free: bool,
}

impl Config {
    /// Reads the environment. Unparseable values degrade to their defaults
    /// with a trace diagnostic; this never fails.
    pub fn from_env() -> Self {
        let log_path = std::env::var(ENV_LOG).ok().filter(|v| !v.is_empty());

        let target = std::env::var(ENV_TARGET).ok().and_then(|v| match v.parse::<Ipv4Addr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                crate::trace!(Class::Init, 1, "ignoring unparseable {}={}", ENV_TARGET, v);
                None
            }
        });

        Self {
            log_path,
            target,
            enabled: bool_var(ENV_ENABLED, true),
            resolve: bool_var(ENV_RESOLVE, true),
            backtrace_on_free: bool_var(ENV_BACKTRACE_FREE, false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: None,
            target: None,
            enabled: true,
            resolve: true,
            backtrace_on_free: false,
        }
    }
}

fn bool_var(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0",
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The test harness runs tests on parallel threads; environment access
    // is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_with_empty_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in [ENV_LOG, ENV_TARGET, ENV_ENABLED, ENV_RESOLVE, ENV_BACKTRACE_FREE] {
            std::env::remove_var(var);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.log_path, None);
        assert_eq!(cfg.target, None);
        assert!(cfg.enabled);
        assert!(cfg.resolve);
        assert!(!cfg.backtrace_on_free);
    }

    #[test]
    fn zero_means_false_and_anything_else_true() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_ENABLED, "0");
        std::env::set_var(ENV_RESOLVE, "yes");
        std::env::set_var(ENV_BACKTRACE_FREE, "1");
        let cfg = Config::from_env();
        assert!(!cfg.enabled);
        assert!(cfg.resolve);
        assert!(cfg.backtrace_on_free);
        for var in [ENV_ENABLED, ENV_RESOLVE, ENV_BACKTRACE_FREE] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn target_parses_ipv4_and_rejects_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_TARGET, "127.0.0.1");
        assert_eq!(Config::from_env().target, Some(Ipv4Addr::LOCALHOST));
        std::env::set_var(ENV_TARGET, "not-an-address");
        assert_eq!(Config::from_env().target, None);
        std::env::remove_var(ENV_TARGET);
    }
}
