//! Adapter for the custom TCP measurement tool.

use crate::config::{ClientConfig, ServerConfig};
use crate::StackAdapter;

/// `custom-tcp` client/server pair using the kernel TCP stack.
///
/// The tool produces no per-flow logs of its own; flow telemetry comes from
/// the kernel-probe logging subsystem the coordinator manages, so log
/// discovery is empty here.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomTcp;

impl StackAdapter for CustomTcp {
    fn name(&self) -> &'static str {
        "custom-tcp"
    }

    fn client_command(&self, config: &ClientConfig) -> String {
        format!(
            "sudo {} client --congestion {} --remote_address {}:{} --local_address {}:{} \
             --volume {} --bidirectional {} --output {}/{}",
            config.stack_path,
            config.cc.kernel_name(),
            config.target_ip,
            config.target_port,
            config.local_ip,
            config.local_port,
            config.transfer_mb,
            u8::from(config.bidirectional),
            config.output_path,
            config.flow_id,
        )
    }

    fn server_command(&self, config: &ServerConfig) -> String {
        format!(
            "sudo {} server --flows 1 --output {} --local_address {}:{} --congestion {} \
             --bidirectional {} --volume {}",
            config.stack_path,
            config.output_path,
            config.ip,
            config.port,
            config.cc.kernel_name(),
            u8::from(config.bidirectional),
            config.transfer_mb,
        )
    }

    fn client_log_path(&self, _config: &ClientConfig, _stdout: &str) -> Option<String> {
        None
    }

    fn server_log_paths(&self, _config: &ServerConfig, _stdout: &str) -> Vec<String> {
        Vec::new()
    }

    fn stop_client_command(&self) -> &'static str {
        "sudo pkill --signal SIGKILL -f custom-tcp"
    }

    fn stop_server_command(&self) -> &'static str {
        "sudo pkill --signal SIGKILL -f custom-tcp"
    }

    fn uses_probe_logging(&self) -> bool {
        true
    }
}
