//! Adapter for the picoquic-based QUIC stack.

use crate::config::{ClientConfig, ServerConfig};
use crate::StackAdapter;

const CLIENT_CID_MARKER: &str = "Initial connection ID:";
const SERVER_CID_MARKER: &str = "New Connection - Initial cID:";

/// picoquic demo binary driven in `clientLocalPort` / `server` mode.
///
/// The stack writes one qlog per connection, named after the initial
/// connection id it prints on stdout; log discovery scrapes those markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PicoQuic;

impl StackAdapter for PicoQuic {
    fn name(&self) -> &'static str {
        "picoquic"
    }

    fn client_command(&self, config: &ClientConfig) -> String {
        format!(
            "{} clientLocalPort {} {} {} {} {} ./req/ {}MB",
            config.stack_path,
            config.target_ip,
            config.target_port,
            config.local_port,
            config.cc.code(),
            config.spin.code(),
            config.transfer_mb,
        )
    }

    fn server_command(&self, config: &ServerConfig) -> String {
        format!(
            "{} server {} {} {} {} {} {}",
            config.stack_path,
            config.port,
            config.cert_file,
            config.key_file,
            config.cc.code(),
            config.spin.code(),
            config.file_dir,
        )
    }

    fn client_log_path(&self, _config: &ClientConfig, stdout: &str) -> Option<String> {
        let start = stdout.find(CLIENT_CID_MARKER)? + CLIENT_CID_MARKER.len();
        let rest = &stdout[start..];
        let cid = rest.lines().next()?.trim();
        if cid.is_empty() {
            return None;
        }
        Some(format!("{cid}.client.qlog"))
    }

    fn server_log_paths(&self, _config: &ServerConfig, stdout: &str) -> Vec<String> {
        let mut paths = Vec::new();
        let mut rest = stdout;
        while let Some(pos) = rest.find(SERVER_CID_MARKER) {
            rest = &rest[pos + SERVER_CID_MARKER.len()..];
            if let Some(cid) = rest.lines().next().map(str::trim) {
                if !cid.is_empty() {
                    let path = format!("{cid}.server.qlog");
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
        }
        paths
    }

    fn stop_client_command(&self) -> &'static str {
        "pkill --signal SIGINT picoquic"
    }

    fn stop_server_command(&self) -> &'static str {
        "pkill --signal SIGINT picoquic"
    }
}
