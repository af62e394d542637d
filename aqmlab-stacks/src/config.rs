//! Per-flow endpoint configuration, created once at experiment-plan build
//! time and immutable during execution.

use serde::{Deserialize, Serialize};

/// Congestion-control algorithm, with the numeric codes the QUIC stack's CLI
/// expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionControl {
    Bbr,
    Cubic,
    Reno,
}

impl CongestionControl {
    pub fn code(self) -> u32 {
        match self {
            Self::Bbr => 0,
            Self::Cubic => 1,
            Self::Reno => 8,
        }
    }

    /// Kernel module name used by the TCP stack.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Bbr => "bbr",
            Self::Cubic => "cubic",
            Self::Reno => "reno",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Bbr => "BBR",
            Self::Cubic => "CUBIC",
            Self::Reno => "RENO",
        }
    }
}

/// ECN codepoint negotiation requested from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcnMode {
    #[serde(rename = "NO_ECN")]
    NoEcn,
    #[serde(rename = "ECT_0")]
    Ect0,
    #[serde(rename = "ECT_1")]
    Ect1,
}

impl EcnMode {
    pub fn code(self) -> u32 {
        match self {
            Self::NoEcn => 0,
            Self::Ect0 => 1,
            Self::Ect1 => 2,
        }
    }

    /// Whether the stack negotiates ECN at all.
    pub fn negotiated(self) -> bool {
        !matches!(self, Self::NoEcn)
    }
}

/// Spin-bit behavior of the QUIC stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpinMode {
    /// Draft-conformant randomized spinning.
    Basic,
    /// Always spin; used in experiments so every flow yields RTT samples.
    On,
    /// Never spin.
    Off,
}

impl SpinMode {
    pub fn code(self) -> u32 {
        match self {
            Self::Basic => 0,
            Self::On => 3,
            Self::Off => 4,
        }
    }
}

/// One client flow endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Flow number, unique within the experiment; names artifact folders and
    /// derived log files.
    pub flow_id: usize,
    /// Path of the stack binary on the client host.
    pub stack_path: String,
    /// Directory for stack-side output on the client host.
    pub output_path: String,
    pub target_ip: String,
    pub target_port: u16,
    pub local_ip: String,
    pub local_port: u16,
    /// Download volume in MB (volume-driven stacks).
    pub transfer_mb: u64,
    /// Delay relative to the iteration's client-start synchronization point.
    pub start_delay_ms: u64,
    pub cc: CongestionControl,
    pub ecn: EcnMode,
    pub spin: SpinMode,
    /// TCP only: request data in both directions.
    pub bidirectional: bool,
    /// UDP rate flows: offered load in Mbit/s.
    pub udp_bitrate_mbit: u32,
    /// UDP rate flows: run duration in seconds.
    pub udp_duration_s: u64,
}

/// One server endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub stack_path: String,
    pub output_path: String,
    pub ip: String,
    pub port: u16,
    pub cert_file: String,
    pub key_file: String,
    /// Directory holding the pre-generated traffic volume files.
    pub file_dir: String,
    /// Upload volume in MB (TCP bidirectional runs).
    pub transfer_mb: u64,
    /// Number of client flows expected to connect.
    pub connections: u32,
    pub cc: CongestionControl,
    pub ecn: EcnMode,
    pub spin: SpinMode,
    pub bidirectional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cc_codes_match_stack_cli() {
        assert_eq!(CongestionControl::Bbr.code(), 0);
        assert_eq!(CongestionControl::Cubic.code(), 1);
        assert_eq!(CongestionControl::Reno.code(), 8);
    }

    #[test]
    fn spin_codes_match_stack_cli() {
        assert_eq!(SpinMode::Basic.code(), 0);
        assert_eq!(SpinMode::On.code(), 3);
        assert_eq!(SpinMode::Off.code(), 4);
    }

    #[test]
    fn only_no_ecn_skips_negotiation() {
        assert!(!EcnMode::NoEcn.negotiated());
        assert!(EcnMode::Ect0.negotiated());
        assert!(EcnMode::Ect1.negotiated());
    }
}
