//! The JSON run descriptor: testbed identities, classifier parameters,
//! orchestration paths and the per-experiment parameter matrix.
//!
//! Matrix *generation* is external tooling; this module only models the
//! descriptor those generators emit.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use aqmlab_stacks::{CongestionControl, CustomTcp, EcnMode, Iperf3Udp, PicoQuic, StackAdapter};

/// Top-level descriptor: one testbed, one parameter block, many experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RunDescriptor {
    pub testbed: TestbedSpec,
    pub parameters: ClassParameters,
    pub orchestration: Orchestration,
    pub experiments: Vec<ExperimentSpec>,
}

impl RunDescriptor {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Addresses per testbed host role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HostAddrs {
    pub bottle: String,
    pub load1: String,
    pub load2: String,
    pub client: String,
}

/// Physical testbed identities: management/data addresses and the bottleneck
/// device names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TestbedSpec {
    /// Management-plane addresses the execution channel connects to.
    pub device_ip: HostAddrs,
    /// Data-plane addresses traffic flows between.
    pub local_ip: HostAddrs,
    pub ingress_device: String,
    pub egress_device: String,
    pub client_device: String,
    pub first_ifb: String,
    pub second_ifb: String,
}

/// Numeric classifier parameters: the nine state ids, the default id and the
/// two physical queue ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClassParameters {
    pub both_unclassified: u32,
    pub both_responsive: u32,
    pub both_unresponsive: u32,
    pub ecn_resp_loss_unclass: u32,
    pub ecn_resp_loss_unresp: u32,
    pub ecn_unresp_loss_unclass: u32,
    pub ecn_unclass_loss_resp: u32,
    pub ecn_unresp_loss_resp: u32,
    pub ecn_unclass_loss_unresp: u32,
    pub default_id: u32,
    pub standard_queue: u32,
    pub responsive_queue: u32,
}

/// Paths and run-wide toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Orchestration {
    /// Local directory results land in.
    pub result_path: String,
    /// Name of the run's top-level result folder.
    pub overall_name: String,
    /// Stack name -> binary path on the remote hosts.
    pub stack_paths: FxHashMap<StackKind, String>,
    /// Remote directory for stack-side output.
    pub local_output_path: String,
    /// Remote scratch directory payload files are delivered to.
    pub local_tmp_path: String,
    /// Remote directory holding the generated traffic volume files.
    pub traffic_files_path: String,
    /// Remote directory with the QUIC server certificate and key.
    pub certfolder_path: String,
    /// Remote tcviz checkout for topology visualizations, if any.
    #[serde(default)]
    pub tc_viz_path: Option<String>,
    /// Local path of the kernel-probe logging script staged for TCP flows.
    #[serde(default)]
    pub tcp_probe_path: Option<String>,
    pub iterations: u32,
    /// Whether remote stack logs should be collected after each iteration.
    #[serde(default = "default_true")]
    pub load_qlog_data: bool,
    /// Environment exported to every spawned stack process.
    #[serde(default)]
    pub process_env: FxHashMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// The transport stacks under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackKind {
    #[serde(rename = "PICOQUIC")]
    PicoQuic,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "IPERF_UDP")]
    IperfUdp,
}

impl StackKind {
    /// The adapter implementing this stack's capability set.
    pub fn adapter(self) -> Arc<dyn StackAdapter> {
        match self {
            Self::PicoQuic => Arc::new(PicoQuic),
            Self::Tcp => Arc::new(CustomTcp),
            Self::IperfUdp => Arc::new(Iperf3Udp),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PicoQuic => "PICO",
            Self::Tcp => "TCP",
            Self::IperfUdp => "IPUDP",
        }
    }
}

/// One entry of the experiment matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExperimentSpec {
    /// Emulated round-trip time in milliseconds.
    pub rtt: f64,
    /// Bottleneck bandwidth in Mbit/s.
    pub bw: u32,
    /// Responsive-queue bandwidth in the multi-queue setting.
    #[serde(default)]
    pub bw_good: Option<u32>,
    /// Standard-queue bandwidth in the multi-queue setting.
    #[serde(default)]
    pub bw_bad: Option<u32>,
    /// Queue size as a multiple of the bandwidth-delay product.
    pub queue_size_bdp: f64,
    pub standard_aqm: String,
    #[serde(default)]
    pub responsive_aqm: Option<String>,
    #[serde(default)]
    pub standard_aqm_target_ms: Option<f64>,
    #[serde(default)]
    pub standard_aqm_interval_ms: Option<u32>,
    #[serde(default)]
    pub responsive_aqm_target_ms: Option<f64>,
    #[serde(default)]
    pub responsive_aqm_interval_ms: Option<u32>,
    /// Two-queue deployment with per-responsiveness-class AQMs.
    pub multiclass_aqm_deploy: bool,
    pub responsiveness_test: String,
    /// Hard per-iteration deadline in seconds.
    #[serde(default)]
    pub watchdog_timeout: Option<u64>,
    /// Force-enables or disables the classification agent.
    #[serde(default)]
    pub classifier_deploy: Option<bool>,
    #[serde(default)]
    pub tcp_dump: Option<bool>,
    #[serde(default)]
    pub tcp_dump_options: Option<String>,
    /// Let fixed-duration background flows run to completion untouched.
    #[serde(default)]
    pub let_background_finish: bool,
    pub server_1_deploy: bool,
    #[serde(default)]
    pub server_1_port_start: u16,
    #[serde(default)]
    pub server_1_configs: Vec<ServerSpec>,
    pub server_2_deploy: bool,
    #[serde(default)]
    pub server_2_port_start: u16,
    #[serde(default)]
    pub server_2_configs: Vec<ServerSpec>,
    pub client_configs: Vec<ClientSpec>,
    pub background: BackgroundSpec,
    #[serde(default)]
    pub folder_name_suffix: Option<String>,
}

/// One application a load host serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServerSpec {
    pub stack: StackKind,
    pub cc: CongestionControl,
    pub ecn: EcnMode,
    /// Upload volume in MB; only meaningful for the TCP stack.
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub bidirectional: Bidirectional,
}

/// One measurement flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClientSpec {
    pub stack: StackKind,
    pub cc: CongestionControl,
    pub ecn: EcnMode,
    /// Download volume in MB.
    pub filesize: u64,
    /// Start delay in milliseconds relative to the client-start sync point.
    pub start_delay: u64,
    /// Which load host serves this flow (1 or 2).
    pub server_machine: u8,
    /// Index into that host's server configs.
    pub server_app: usize,
    /// QUIC spin-bit override; `OFF` disables spinning for this flow.
    #[serde(default)]
    pub spin: Option<String>,
    #[serde(default)]
    pub bidirectional: Bidirectional,
}

/// Bidirectional flag, kept as the generator's `"0"`/`"1"` strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bidirectional {
    #[default]
    #[serde(rename = "0")]
    No,
    #[serde(rename = "1")]
    Yes,
}

impl Bidirectional {
    pub fn as_bool(self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// Fixed-rate UDP background load definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BackgroundSpec {
    pub server_1: bool,
    #[serde(default)]
    pub server_1_port_start: u16,
    #[serde(default)]
    pub server_1_flows: Vec<BackgroundFlowSpec>,
    pub server_2: bool,
    #[serde(default)]
    pub server_2_port_start: u16,
    #[serde(default)]
    pub server_2_flows: Vec<BackgroundFlowSpec>,
}

/// One background flow: offered rate and start delay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BackgroundFlowSpec {
    /// Offered load in Mbit/s.
    pub bw: u32,
    /// Start delay in milliseconds.
    pub start_delay: u64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "TESTBED": {
            "DEVICE_IP": {"BOTTLE": "192.168.0.2", "LOAD1": "192.168.0.3", "LOAD2": "192.168.0.4", "CLIENT": "192.168.0.5"},
            "LOCAL_IP": {"BOTTLE": "10.0.1.1", "LOAD1": "10.0.2.2", "LOAD2": "10.0.2.3", "CLIENT": "10.0.3.2"},
            "INGRESS_DEVICE": "enp2s0",
            "EGRESS_DEVICE": "enp2s0",
            "CLIENT_DEVICE": "enp3s0",
            "FIRST_IFB": "ifb0",
            "SECOND_IFB": "ifb1"
        },
        "PARAMETERS": {
            "BOTH_UNCLASSIFIED": 9, "BOTH_RESPONSIVE": 10, "BOTH_UNRESPONSIVE": 11,
            "ECN_RESP_LOSS_UNCLASS": 12, "ECN_RESP_LOSS_UNRESP": 13, "ECN_UNRESP_LOSS_UNCLASS": 14,
            "ECN_UNCLASS_LOSS_RESP": 15, "ECN_UNRESP_LOSS_RESP": 16, "ECN_UNCLASS_LOSS_UNRESP": 17,
            "DEFAULT_ID": 9, "STANDARD_QUEUE": 3, "RESPONSIVE_QUEUE": 4
        },
        "ORCHESTRATION": {
            "RESULT_PATH": "/tmp/aqmlab-results",
            "OVERALL_NAME": "smoke",
            "STACK_PATHS": {"PICOQUIC": "/home/test/picoquicdemo", "TCP": "/home/test/custom-tcp", "IPERF_UDP": "iperf3"},
            "LOCAL_OUTPUT_PATH": "/home/test/out",
            "LOCAL_TMP_PATH": "/home/test/tmp",
            "TRAFFIC_FILES_PATH": "/home/test/files",
            "CERTFOLDER_PATH": "/home/test/certs",
            "ITERATIONS": 2
        },
        "EXPERIMENTS": [{
            "RTT": 5, "BW": 100, "QUEUE_SIZE_BDP": 1.0,
            "STANDARD_AQM": "CODEL_ECN",
            "MULTICLASS_AQM_DEPLOY": false,
            "RESPONSIVENESS_TEST": "WITHOUT_GRACE_MAX_NODELETE",
            "WATCHDOG_TIMEOUT": 300,
            "SERVER_1_DEPLOY": true,
            "SERVER_1_PORT_START": 37337,
            "SERVER_1_CONFIGS": [{"STACK": "PICOQUIC", "CC": "BBR", "ECN": "ECT_0"}],
            "SERVER_2_DEPLOY": false,
            "CLIENT_CONFIGS": [
                {"STACK": "PICOQUIC", "CC": "BBR", "ECN": "ECT_0", "FILESIZE": 100, "START_DELAY": 0, "SERVER_MACHINE": 1, "SERVER_APP": 0}
            ],
            "BACKGROUND": {"SERVER_1": false, "SERVER_2": false}
        }]
    }"#;

    #[test]
    fn parses_the_reference_descriptor_shape() {
        let descriptor = RunDescriptor::from_json(SAMPLE).unwrap();
        assert_eq!(descriptor.testbed.first_ifb, "ifb0");
        assert_eq!(descriptor.parameters.standard_queue, 3);
        assert_eq!(descriptor.orchestration.iterations, 2);
        assert!(descriptor.orchestration.load_qlog_data);

        let exp = &descriptor.experiments[0];
        assert_eq!(exp.rtt, 5.0);
        assert_eq!(exp.watchdog_timeout, Some(300));
        assert_eq!(exp.server_1_configs[0].stack, StackKind::PicoQuic);
        assert_eq!(exp.client_configs[0].cc, CongestionControl::Bbr);
        assert_eq!(exp.client_configs[0].ecn, EcnMode::Ect0);
        assert!(!exp.client_configs[0].bidirectional.as_bool());
    }

    #[test]
    fn stack_kinds_resolve_adapters() {
        assert_eq!(StackKind::PicoQuic.adapter().name(), "picoquic");
        assert_eq!(StackKind::Tcp.adapter().name(), "custom-tcp");
        assert!(StackKind::IperfUdp.adapter().fixed_duration());
    }
}
