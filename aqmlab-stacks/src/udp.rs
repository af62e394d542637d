//! Adapter for iperf3 used as a constant-rate UDP background generator.

use crate::config::{ClientConfig, ServerConfig};
use crate::StackAdapter;

/// iperf3 in UDP reverse mode: the server pushes at a fixed rate for a fixed
/// duration, so flows are joined by being stopped rather than by completion.
/// Log files are redirected stdout with names derived from the port pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iperf3Udp;

impl Iperf3Udp {
    fn client_log_name(config: &ClientConfig) -> String {
        format!("{}-{}-iperf.txt", config.target_port, config.local_port)
    }

    fn server_log_name(config: &ServerConfig) -> String {
        format!("{}-iperf.txt", config.port)
    }
}

impl StackAdapter for Iperf3Udp {
    fn name(&self) -> &'static str {
        "iperf3-udp"
    }

    fn client_command(&self, config: &ClientConfig) -> String {
        format!(
            "iperf3 -c {} -u -p {} -t {} --cport {} -b {}M -R > {}",
            config.target_ip,
            config.target_port,
            config.udp_duration_s,
            config.local_port,
            config.udp_bitrate_mbit,
            Self::client_log_name(config),
        )
    }

    fn server_command(&self, config: &ServerConfig) -> String {
        format!("iperf3 -s -p {} -1 > {}", config.port, Self::server_log_name(config))
    }

    fn client_log_path(&self, config: &ClientConfig, _stdout: &str) -> Option<String> {
        Some(Self::client_log_name(config))
    }

    fn server_log_paths(&self, config: &ServerConfig, _stdout: &str) -> Vec<String> {
        vec![Self::server_log_name(config)]
    }

    fn stop_client_command(&self) -> &'static str {
        "pkill --signal SIGINT iperf3"
    }

    fn stop_server_command(&self) -> &'static str {
        "pkill --signal SIGINT iperf3"
    }

    fn fixed_duration(&self) -> bool {
        true
    }
}
