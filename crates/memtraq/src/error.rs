//! Error types for the instrumentation core.
//!
//! Nothing here ever crosses the interposition boundary: errors visible to
//! the host are signalled through the same channel the real allocator uses
//! (a null return or a no-op). These types exist for the initialization
//! path, where the distinction between a fatal failure (missing real
//! allocator symbols) and a recoverable one (log sink open failure) decides
//! whether instrumentation comes up at all.

use thiserror::Error;

/// Failures during one-shot initialization.
#[derive(Debug, Error)]
pub enum InitError {
    /// A real-allocator symbol did not resolve from the next object in load
    /// order. Fatal: without it the instrumentation cannot forward requests.
    #[error("real allocator symbol `{0}` did not resolve")]
    UnresolvedSymbol(&'static str),

    /// The configured log file could not be opened. Recoverable: the logger
    /// falls back to stdout.
    #[error("failed to open log file `{path}`: {source}")]
    LogOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The UDP socket could not be opened or bound. Recoverable: the UDP
    /// sink stays disabled.
    #[error("failed to open UDP socket for target {target}: {source}")]
    UdpSocket {
        target: String,
        #[source]
        source: std::io::Error,
    },
}
