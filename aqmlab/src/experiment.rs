//! Materializes one experiment-matrix entry into a runnable experiment:
//! resolved queue specs, the topology builder, the classifier payload and the
//! fully-paired client/server flow configs.

use std::{sync::Arc, time::Duration};

use rustc_hash::FxHashMap;
use serde::Serialize;

use aqmlab_classify::{
    ClassIds, ClassifierPayload, PayloadParams, QueueIds, QueueMapping, ResponsivenessTest,
};
use aqmlab_stacks::{ClientConfig, ServerConfig, SpinMode, StackAdapter};
use aqmlab_tc::{bdp_bytes, DeviceMap, TopologyBuilder, TrafficClassSpec};

use crate::descriptor::{ExperimentSpec, RunDescriptor, ServerSpec, StackKind};

/// First client-side port; flow N binds `PORT_START + N`. The resulting 2-bit
/// port prefix is what the topology's redirect filters match on.
pub const CLIENT_PORT_START: u16 = (1 << 11) + 1024;

/// Default per-iteration watchdog deadline in seconds.
pub const DEFAULT_WATCHDOG_TIMEOUT_S: u64 = 900;

/// Which testbed host a flow endpoint runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostRole {
    Bottleneck,
    Load1,
    Load2,
    Client,
}

/// A server endpoint bound to its host and stack adapter.
#[derive(Debug, Clone)]
pub struct ServerFlow {
    /// Position in the experiment's server list; names the artifact folder.
    pub index: usize,
    pub host: HostRole,
    pub kind: StackKind,
    pub stack: Arc<dyn StackAdapter>,
    pub config: ServerConfig,
}

/// A client flow bound to its host and stack adapter.
#[derive(Debug, Clone)]
pub struct ClientFlow {
    pub host: HostRole,
    pub kind: StackKind,
    pub stack: Arc<dyn StackAdapter>,
    pub config: ClientConfig,
}

/// Client/server pairing summary written into `configs.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PortPair {
    pub flow_id: usize,
    pub server_ip: String,
    pub server_port: u16,
    pub client_ip: String,
    pub client_port: u16,
    pub server_stack: &'static str,
    pub client_stack: &'static str,
    pub client_cca: &'static str,
    pub filesize_mb: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("unknown queue selector `{0}`")]
    UnknownQueue(String),
    #[error("multi-queue deployment needs RESPONSIVE_AQM plus BW_GOOD and BW_BAD")]
    IncompleteMultiQueue,
    #[error("server {machine} not deployed but requested by client {flow_id}")]
    ServerNotDeployed { machine: u8, flow_id: usize },
    #[error("server {machine} app {app} not deployed but requested by client {flow_id}")]
    ServerAppMissing { machine: u8, app: usize, flow_id: usize },
    #[error("server {machine} app {app} is not requested by any client")]
    ServerUnused { machine: u8, app: usize },
    #[error("no binary path configured for stack {0:?}")]
    MissingStackPath(StackKind),
    #[error("invalid topology: {0}")]
    Topology(#[from] aqmlab_tc::plan::Error),
    #[error(transparent)]
    UnknownTest(#[from] aqmlab_classify::payload::UnknownTest),
}

/// Everything one iteration of the coordinator needs, frozen at build time.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Folder-friendly parameter summary.
    pub name: String,
    pub rtt_ms: f64,
    pub bottleneck_bw_mbit: u32,
    pub builder: TopologyBuilder,
    pub class_ids: ClassIds,
    pub mapping: QueueMapping,
    pub payload: ClassifierPayload,
    pub servers: Vec<ServerFlow>,
    pub clients: Vec<ClientFlow>,
    pub port_pairs: Vec<PortPair>,
    pub iterations: u32,
    pub watchdog_timeout: Duration,
    pub deploy_classifier: bool,
    pub tcp_dump: bool,
    pub tcp_dump_options: String,
    pub let_background_finish: bool,
    pub collect_logs: bool,
    /// Remote scratch directory on the bottleneck host.
    pub tmp_path: String,
    pub traffic_files_path: String,
    pub tc_viz_path: Option<String>,
    pub tcp_probe_path: Option<String>,
    pub process_env: Vec<(String, String)>,
}

impl Experiment {
    /// Resolves one matrix entry against the run-wide configuration.
    pub fn materialize(
        descriptor: &RunDescriptor,
        spec: &ExperimentSpec,
    ) -> Result<Self, MaterializeError> {
        let params = &descriptor.parameters;
        let testbed = &descriptor.testbed;
        let orch = &descriptor.orchestration;

        let class_ids = ClassIds {
            both_unclassified: params.both_unclassified,
            both_responsive: params.both_responsive,
            both_unresponsive: params.both_unresponsive,
            ecn_resp_loss_unclass: params.ecn_resp_loss_unclass,
            ecn_resp_loss_unresp: params.ecn_resp_loss_unresp,
            ecn_unresp_loss_unclass: params.ecn_unresp_loss_unclass,
            ecn_unclass_loss_resp: params.ecn_unclass_loss_resp,
            ecn_unresp_loss_resp: params.ecn_unresp_loss_resp,
            ecn_unclass_loss_unresp: params.ecn_unclass_loss_unresp,
            default_id: params.default_id,
        };
        let queue_ids = QueueIds { standard: params.standard_queue, responsive: params.responsive_queue };

        // Queue resolution mirrors the matrix selectors: GOOD variants pair
        // the responsive queue id with BW_GOOD, BAD variants the standard
        // queue with BW_BAD, plain variants the standard queue with BW.
        let (classes, mapping, bottleneck_bw, aqm_label) = if spec.multiclass_aqm_deploy {
            let responsive_name =
                spec.responsive_aqm.as_deref().ok_or(MaterializeError::IncompleteMultiQueue)?;
            let (bw_good, bw_bad) = match (spec.bw_good, spec.bw_bad) {
                (Some(g), Some(b)) => (g, b),
                _ => return Err(MaterializeError::IncompleteMultiQueue),
            };
            let mut good = resolve_queue(responsive_name, spec, queue_ids)?;
            let mut bad = resolve_queue(&spec.standard_aqm, spec, queue_ids)?;
            good.set_limit_bytes(bdp_bytes(spec.queue_size_bdp, bw_good, spec.rtt));
            bad.set_limit_bytes(bdp_bytes(spec.queue_size_bdp, bw_bad, spec.rtt));
            let ecn_mode =
                responsive_name.contains("ECN") && spec.standard_aqm.contains("ECN");
            let label = format!(
                "GOOD+{responsive_name}+{bw_good}_BAD+{}+{bw_bad}",
                spec.standard_aqm
            );
            (
                vec![good, bad],
                QueueMapping::multi(queue_ids, ecn_mode),
                bw_good.min(bw_bad),
                label,
            )
        } else {
            let mut aqm = resolve_queue(&spec.standard_aqm, spec, queue_ids)?;
            aqm.set_limit_bytes(bdp_bytes(spec.queue_size_bdp, spec.bw, spec.rtt));
            (vec![aqm], QueueMapping::single(queue_ids), spec.bw, spec.standard_aqm.clone())
        };

        let devices = DeviceMap {
            ingress: testbed.ingress_device.clone(),
            egress: testbed.egress_device.clone(),
            client: testbed.client_device.clone(),
            first_ifb: testbed.first_ifb.clone(),
            second_ifb: testbed.second_ifb.clone(),
        };
        let builder = TopologyBuilder::new(devices, classes, params.standard_queue)?;

        let test: ResponsivenessTest = spec.responsiveness_test.parse()?;
        let payload = ClassifierPayload::render(&PayloadParams {
            ids: &class_ids,
            mapping: &mapping,
            bottleneck_device: &testbed.ingress_device,
            client_device: &testbed.client_device,
            first_ifb: &testbed.first_ifb,
            measurement_subnet: &testbed.local_ip.bottle,
            edge_threshold: 1,
            test,
        });

        let flows = build_flows(descriptor, spec)?;

        let watchdog_timeout = Duration::from_secs(
            spec.watchdog_timeout.unwrap_or(DEFAULT_WATCHDOG_TIMEOUT_S),
        );

        // The classifier deploys whenever any flow is not probe-logged,
        // unless the matrix entry overrides it.
        let any_agent_classified =
            flows.clients.iter().any(|c| !c.stack.uses_probe_logging());
        let deploy_classifier = spec.classifier_deploy.unwrap_or(any_agent_classified);

        let mut name = format!(
            "QUEUE-{}_RTT-{}_BW-{}_{}_SERVERS-{}_CLIENTS-{}",
            spec.queue_size_bdp,
            spec.rtt,
            spec.bw,
            aqm_label,
            flows.servers.len(),
            flows.clients.len(),
        );
        if let Some(suffix) = &spec.folder_name_suffix {
            name.push_str("--");
            name.push_str(suffix);
        }

        Ok(Self {
            name,
            rtt_ms: spec.rtt,
            bottleneck_bw_mbit: bottleneck_bw,
            builder,
            class_ids,
            mapping,
            payload,
            servers: flows.servers,
            clients: flows.clients,
            port_pairs: flows.port_pairs,
            iterations: orch.iterations,
            watchdog_timeout,
            deploy_classifier,
            tcp_dump: spec.tcp_dump.unwrap_or(false),
            tcp_dump_options: spec.tcp_dump_options.clone().unwrap_or_else(|| "-s 50".to_string()),
            let_background_finish: spec.let_background_finish,
            collect_logs: orch.load_qlog_data,
            tmp_path: orch.local_tmp_path.clone(),
            traffic_files_path: orch.traffic_files_path.clone(),
            tc_viz_path: orch.tc_viz_path.clone(),
            tcp_probe_path: orch.tcp_probe_path.clone(),
            process_env: orch.process_env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Whether the kernel-probe logging subsystem is active: TCP flows exist
    /// and a probe script is configured.
    pub fn probe_logging_enabled(&self) -> bool {
        self.tcp_probe_path.is_some()
            && self.clients.iter().any(|c| c.stack.uses_probe_logging())
    }

    /// Unique transfer volumes (MB) the servers must have files for.
    pub fn volume_file_sizes(&self) -> Vec<u64> {
        let mut sizes: Vec<u64> = self
            .clients
            .iter()
            .filter(|c| !c.stack.fixed_duration())
            .map(|c| c.config.transfer_mb)
            .collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }

    /// Host roles that serve at least one flow.
    pub fn server_hosts(&self) -> Vec<HostRole> {
        let mut hosts = Vec::new();
        for server in &self.servers {
            if !hosts.contains(&server.host) {
                hosts.push(server.host);
            }
        }
        hosts
    }
}

struct Flows {
    servers: Vec<ServerFlow>,
    clients: Vec<ClientFlow>,
    port_pairs: Vec<PortPair>,
}

fn stack_path(
    descriptor: &RunDescriptor,
    kind: StackKind,
) -> Result<String, MaterializeError> {
    descriptor
        .orchestration
        .stack_paths
        .get(&kind)
        .cloned()
        .ok_or(MaterializeError::MissingStackPath(kind))
}

fn build_flows(
    descriptor: &RunDescriptor,
    spec: &ExperimentSpec,
) -> Result<Flows, MaterializeError> {
    let testbed = &descriptor.testbed;
    let orch = &descriptor.orchestration;

    // How many clients each (machine, app) pair serves; deployed apps no
    // client asked for are a configuration mistake.
    let mut clients_per_app: FxHashMap<(u8, usize), u32> = FxHashMap::default();
    for client in &spec.client_configs {
        *clients_per_app.entry((client.server_machine, client.server_app)).or_default() += 1;
    }

    let mut servers = Vec::new();
    let mut server_ports: FxHashMap<(u8, usize), u16> = FxHashMap::default();
    let mut server_stacks: FxHashMap<(u8, usize), StackKind> = FxHashMap::default();

    for (machine, deploy, port_start, configs, host, host_ip) in [
        (
            1u8,
            spec.server_1_deploy,
            spec.server_1_port_start,
            &spec.server_1_configs,
            HostRole::Load1,
            &testbed.local_ip.load1,
        ),
        (
            2u8,
            spec.server_2_deploy,
            spec.server_2_port_start,
            &spec.server_2_configs,
            HostRole::Load2,
            &testbed.local_ip.load2,
        ),
    ] {
        if !deploy {
            continue;
        }
        for (app, server_spec) in configs.iter().enumerate() {
            let connections = *clients_per_app
                .get(&(machine, app))
                .ok_or(MaterializeError::ServerUnused { machine, app })?;
            let port = port_start + app as u16;
            servers.push(make_server(descriptor, server_spec, servers.len(), host, host_ip, port, connections, orch)?);
            server_ports.insert((machine, app), port);
            server_stacks.insert((machine, app), server_spec.stack);
        }
    }

    let mut clients = Vec::new();
    let mut port_pairs = Vec::new();
    let client_ip = testbed.local_ip.client.clone();

    for (flow_id, client_spec) in spec.client_configs.iter().enumerate() {
        let machine = client_spec.server_machine;
        let key = (machine, client_spec.server_app);
        if !server_ports.contains_key(&key) {
            let deployed = match machine {
                1 => spec.server_1_deploy,
                2 => spec.server_2_deploy,
                _ => false,
            };
            return Err(if deployed {
                MaterializeError::ServerAppMissing { machine, app: client_spec.server_app, flow_id }
            } else {
                MaterializeError::ServerNotDeployed { machine, flow_id }
            });
        }
        let target_port = server_ports[&key];
        let target_ip = match machine {
            1 => testbed.local_ip.load1.clone(),
            _ => testbed.local_ip.load2.clone(),
        };

        let spin = match client_spec.spin.as_deref() {
            Some("OFF") if client_spec.stack == StackKind::PicoQuic => SpinMode::Off,
            _ => SpinMode::On,
        };

        let config = ClientConfig {
            flow_id,
            stack_path: stack_path(descriptor, client_spec.stack)?,
            output_path: orch.local_output_path.clone(),
            target_ip: target_ip.clone(),
            target_port,
            local_ip: client_ip.clone(),
            local_port: CLIENT_PORT_START + flow_id as u16,
            transfer_mb: client_spec.filesize,
            start_delay_ms: client_spec.start_delay,
            cc: client_spec.cc,
            ecn: client_spec.ecn,
            spin,
            bidirectional: client_spec.bidirectional.as_bool(),
            udp_bitrate_mbit: 0,
            udp_duration_s: 0,
        };
        port_pairs.push(PortPair {
            flow_id,
            server_ip: target_ip,
            server_port: target_port,
            client_ip: client_ip.clone(),
            client_port: config.local_port,
            server_stack: server_stacks[&key].label(),
            client_stack: client_spec.stack.label(),
            client_cca: client_spec.cc.label(),
            filesize_mb: client_spec.filesize,
        });
        clients.push(ClientFlow {
            host: HostRole::Client,
            kind: client_spec.stack,
            stack: client_spec.stack.adapter(),
            config,
        });
    }

    // Background UDP rate flows run for the watchdog window and are stopped
    // explicitly at join time.
    let duration = spec.watchdog_timeout.unwrap_or(DEFAULT_WATCHDOG_TIMEOUT_S);
    for (enabled, port_start, flow_specs, host, host_ip) in [
        (
            spec.background.server_1,
            spec.background.server_1_port_start,
            &spec.background.server_1_flows,
            HostRole::Load1,
            &testbed.local_ip.load1,
        ),
        (
            spec.background.server_2,
            spec.background.server_2_port_start,
            &spec.background.server_2_flows,
            HostRole::Load2,
            &testbed.local_ip.load2,
        ),
    ] {
        if !enabled {
            continue;
        }
        for (number, flow) in flow_specs.iter().enumerate() {
            let port = port_start + number as u16;
            let flow_id = clients.len();
            let udp = StackKind::IperfUdp;
            let adapter = udp.adapter();

            servers.push(ServerFlow {
                index: servers.len(),
                host,
                kind: udp,
                stack: adapter.clone(),
                config: ServerConfig {
                    stack_path: stack_path(descriptor, udp)?,
                    output_path: orch.local_output_path.clone(),
                    ip: host_ip.clone(),
                    port,
                    cert_file: String::new(),
                    key_file: String::new(),
                    file_dir: String::new(),
                    transfer_mb: 0,
                    connections: 1,
                    cc: aqmlab_stacks::CongestionControl::Bbr,
                    ecn: aqmlab_stacks::EcnMode::NoEcn,
                    spin: SpinMode::On,
                    bidirectional: false,
                },
            });

            let config = ClientConfig {
                flow_id,
                stack_path: stack_path(descriptor, udp)?,
                output_path: orch.local_output_path.clone(),
                target_ip: host_ip.clone(),
                target_port: port,
                local_ip: client_ip.clone(),
                local_port: CLIENT_PORT_START + flow_id as u16,
                transfer_mb: 0,
                start_delay_ms: flow.start_delay,
                cc: aqmlab_stacks::CongestionControl::Bbr,
                ecn: aqmlab_stacks::EcnMode::NoEcn,
                spin: SpinMode::On,
                bidirectional: false,
                udp_bitrate_mbit: flow.bw,
                udp_duration_s: duration,
            };
            port_pairs.push(PortPair {
                flow_id,
                server_ip: host_ip.clone(),
                server_port: port,
                client_ip: client_ip.clone(),
                client_port: config.local_port,
                server_stack: udp.label(),
                client_stack: udp.label(),
                client_cca: "None",
                filesize_mb: 0,
            });
            clients.push(ClientFlow { host: HostRole::Client, kind: udp, stack: adapter, config });
        }
    }

    Ok(Flows { servers, clients, port_pairs })
}

#[allow(clippy::too_many_arguments)]
fn make_server(
    descriptor: &RunDescriptor,
    spec: &ServerSpec,
    index: usize,
    host: HostRole,
    host_ip: &str,
    port: u16,
    connections: u32,
    orch: &crate::descriptor::Orchestration,
) -> Result<ServerFlow, MaterializeError> {
    Ok(ServerFlow {
        index,
        host,
        kind: spec.stack,
        stack: spec.stack.adapter(),
        config: ServerConfig {
            stack_path: stack_path(descriptor, spec.stack)?,
            output_path: orch.local_output_path.clone(),
            ip: host_ip.to_string(),
            port,
            cert_file: format!("{}/cert.pem", orch.certfolder_path),
            key_file: format!("{}/key.pem", orch.certfolder_path),
            file_dir: orch.traffic_files_path.clone(),
            transfer_mb: if spec.stack == StackKind::Tcp { spec.filesize } else { 0 },
            connections,
            cc: spec.cc,
            ecn: spec.ecn,
            spin: SpinMode::On,
            bidirectional: spec.bidirectional.as_bool(),
        },
    })
}

/// Resolves an AQM selector (`CODEL_ECN`, `CODEL_DROP_GOOD`, `DT_BAD`, ...)
/// into a traffic class spec.
fn resolve_queue(
    name: &str,
    spec: &ExperimentSpec,
    queues: QueueIds,
) -> Result<TrafficClassSpec, MaterializeError> {
    let bw = spec.bw;
    let bw_good = spec.bw_good.unwrap_or(bw);
    let bw_bad = spec.bw_bad.unwrap_or(bw);
    let standard = queues.standard;
    let responsive = queues.responsive;

    let std_target = spec.standard_aqm_target_ms.unwrap_or(0.5);
    let std_interval = spec.standard_aqm_interval_ms.unwrap_or(20);
    let resp_target = spec.responsive_aqm_target_ms.unwrap_or(0.5);
    let resp_interval = spec.responsive_aqm_interval_ms.unwrap_or(20);

    let class = match name {
        "CODEL_ECN" => TrafficClassSpec::codel(bw, bw, standard, standard)
            .with_target_ms(std_target)
            .with_interval_ms(std_interval)
            .with_ecn(true),
        "CODEL_ECN_GOOD" => TrafficClassSpec::codel(bw_good, bw, responsive, responsive)
            .with_target_ms(resp_target)
            .with_interval_ms(resp_interval)
            .with_ecn(true),
        "CODEL_ECN_BAD" => TrafficClassSpec::codel(bw_bad, bw_bad, standard, standard)
            .with_target_ms(std_target)
            .with_interval_ms(std_interval)
            .with_ecn(true),
        "CODEL_DROP" => TrafficClassSpec::codel(bw, bw, standard, standard)
            .with_target_ms(std_target)
            .with_interval_ms(std_interval)
            .with_ecn(false),
        "CODEL_DROP_GOOD" => TrafficClassSpec::codel(bw_good, bw, responsive, responsive)
            .with_target_ms(resp_target)
            .with_interval_ms(resp_interval)
            .with_ecn(false),
        "CODEL_DROP_BAD" => TrafficClassSpec::codel(bw_bad, bw_bad, standard, standard)
            .with_target_ms(std_target)
            .with_interval_ms(std_interval)
            .with_ecn(false),
        "DT" => TrafficClassSpec::drop_tail(bw, bw, standard, standard).with_rate_mbit(bw),
        "DT_GOOD" => {
            TrafficClassSpec::drop_tail(bw_good, bw, responsive, responsive).with_rate_mbit(bw)
        }
        "DT_BAD" => {
            TrafficClassSpec::drop_tail(bw_bad, bw_bad, standard, standard).with_rate_mbit(bw)
        }
        other => return Err(MaterializeError::UnknownQueue(other.to_string())),
    };
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::SAMPLE;
    use aqmlab_tc::Aqm;

    fn descriptor() -> RunDescriptor {
        RunDescriptor::from_json(SAMPLE).unwrap()
    }

    #[test]
    fn single_queue_experiment_materializes() {
        let descriptor = descriptor();
        let exp = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap();

        assert_eq!(exp.bottleneck_bw_mbit, 100);
        assert_eq!(exp.servers.len(), 1);
        assert_eq!(exp.clients.len(), 1);
        assert!(exp.deploy_classifier);
        assert_eq!(exp.watchdog_timeout, Duration::from_secs(300));

        // 1 BDP at 100 Mbit / 5 ms = 62500 bytes -> 41 CoDel packets.
        let class = &exp.builder.classes()[0];
        assert!(matches!(class.aqm, Aqm::CoDel { limit_pkts: 41, ecn: true, .. }));
        assert_eq!(class.class_id, 3);

        // Client 0 binds the first tagged port and pairs with server app 0.
        let client = &exp.clients[0].config;
        assert_eq!(client.local_port, 3072);
        assert_eq!(client.target_port, 37337);
        assert_eq!(client.target_ip, "10.0.2.2");
        assert_eq!(exp.port_pairs[0].server_stack, "PICO");
    }

    #[test]
    fn multi_queue_experiment_builds_two_classes() {
        let mut descriptor = descriptor();
        let spec = &mut descriptor.experiments[0];
        spec.multiclass_aqm_deploy = true;
        spec.responsive_aqm = Some("CODEL_ECN_GOOD".to_string());
        spec.standard_aqm = "CODEL_ECN_BAD".to_string();
        spec.bw_good = Some(60);
        spec.bw_bad = Some(40);

        let exp = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap();
        assert_eq!(exp.builder.classes().len(), 2);
        assert_eq!(exp.bottleneck_bw_mbit, 40);

        let good = &exp.builder.classes()[0];
        assert_eq!(good.class_id, 4);
        assert_eq!(good.soft_rate_mbit, 60);
        assert_eq!(good.hard_rate_mbit, 100);

        // ECN distinction is active: ECN-responsive states go to queue 4.
        assert_eq!(exp.mapping.queue_for(aqmlab_classify::FlowClass::EcnRespLossUnclass), 4);
    }

    #[test]
    fn background_flows_extend_clients_and_servers() {
        let mut descriptor = descriptor();
        let spec = &mut descriptor.experiments[0];
        spec.background.server_1 = true;
        spec.background.server_1_port_start = 40000;
        spec.background.server_1_flows =
            vec![crate::descriptor::BackgroundFlowSpec { bw: 25, start_delay: 100 }];

        let exp = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap();
        assert_eq!(exp.clients.len(), 2);
        assert_eq!(exp.servers.len(), 2);

        let bg = &exp.clients[1];
        assert!(bg.stack.fixed_duration());
        assert_eq!(bg.config.udp_bitrate_mbit, 25);
        assert_eq!(bg.config.udp_duration_s, 300);
        assert_eq!(bg.config.local_port, 3073);
        assert_eq!(bg.config.target_port, 40000);
    }

    #[test]
    fn unused_server_app_is_rejected() {
        let mut descriptor = descriptor();
        let spec = &mut descriptor.experiments[0];
        spec.server_1_configs.push(spec.server_1_configs[0].clone());

        let err = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap_err();
        assert!(matches!(err, MaterializeError::ServerUnused { machine: 1, app: 1 }));
    }

    #[test]
    fn client_referencing_undeployed_server_is_rejected() {
        let mut descriptor = descriptor();
        descriptor.experiments[0].client_configs[0].server_machine = 2;

        let err = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap_err();
        assert!(matches!(err, MaterializeError::ServerNotDeployed { machine: 2, flow_id: 0 }));
    }

    #[test]
    fn unknown_queue_selector_is_rejected() {
        let mut descriptor = descriptor();
        descriptor.experiments[0].standard_aqm = "FQ_CODEL".to_string();
        let err = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap_err();
        assert!(matches!(err, MaterializeError::UnknownQueue(_)));
    }

    #[test]
    fn volume_sizes_exclude_fixed_duration_flows() {
        let mut descriptor = descriptor();
        let spec = &mut descriptor.experiments[0];
        spec.background.server_1 = true;
        spec.background.server_1_port_start = 40000;
        spec.background.server_1_flows =
            vec![crate::descriptor::BackgroundFlowSpec { bw: 25, start_delay: 0 }];

        let exp = Experiment::materialize(&descriptor, &descriptor.experiments[0]).unwrap();
        assert_eq!(exp.volume_file_sizes(), vec![100]);
        assert_eq!(exp.server_hosts(), vec![HostRole::Load1]);
    }
}
