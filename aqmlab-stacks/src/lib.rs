//! # Transport-stack adapters
//!
//! The stacks under test (a picoquic-based QUIC stack, a custom TCP tool and
//! iperf3 as a UDP rate generator) are external binaries; the experiment
//! coordinator only needs to build their command lines, discover their log
//! files and know how to stop them. Each stack implements the
//! [`StackAdapter`] capability set, and the coordinator branches on declared
//! capabilities (`uses_probe_logging`, `fixed_duration`), never on which
//! concrete stack it is holding.

pub mod config;
pub mod quic;
pub mod tcp;
pub mod udp;

pub use config::{ClientConfig, CongestionControl, EcnMode, ServerConfig, SpinMode};
pub use quic::PicoQuic;
pub use tcp::CustomTcp;
pub use udp::Iperf3Udp;

/// Command generation, log discovery and stop handling for one stack.
pub trait StackAdapter: Send + Sync + std::fmt::Debug {
    /// Short name used in experiment labels and artifact folders.
    fn name(&self) -> &'static str;

    /// Full client command line for one flow.
    fn client_command(&self, config: &ClientConfig) -> String;

    /// Full server command line.
    fn server_command(&self, config: &ServerConfig) -> String;

    /// Remote path of the client's log, discovered from the flow config and
    /// the client's captured stdout. `None` when the stack does not produce
    /// one itself.
    fn client_log_path(&self, config: &ClientConfig, stdout: &str) -> Option<String>;

    /// Remote paths of the server's logs (one per accepted connection for
    /// stacks that log per connection).
    fn server_log_paths(&self, config: &ServerConfig, stdout: &str) -> Vec<String>;

    /// Stop command for client processes. Idempotent: "process not found" is
    /// an acceptable outcome.
    fn stop_client_command(&self) -> &'static str;

    /// Stop command for server processes. Idempotent like the client stop.
    fn stop_server_command(&self) -> &'static str;

    /// Whether per-flow logging is delegated to the external kernel-probe
    /// subsystem instead of the stack's own output.
    fn uses_probe_logging(&self) -> bool {
        false
    }

    /// Whether flows of this stack run for a configured duration rather than
    /// a transfer volume. Such flows are joined by being stopped explicitly.
    fn fixed_duration(&self) -> bool {
        false
    }
}
