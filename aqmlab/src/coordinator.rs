//! The experiment lifecycle coordinator: drives every iteration through
//! prepare, server start, topology configuration, monitoring rendezvous,
//! delayed client starts, the watchdog-bounded join phase, artifact
//! collection and teardown.

use std::{path::Path, sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};

use aqmlab_common::{ready_signal, ReadySignal, Watchdog};
use aqmlab_remote::{
    CommandOutput, Error as RemoteError, Host, OutputWatch, RemoteChannel, RemoteHandle,
};
use aqmlab_tc::{apply, clear, parse_qdisc_show, stats_to_csv, ConfigError, TopologyPlan};

use crate::artifacts::{IterationArtifacts, RunArtifacts};
use crate::descriptor::TestbedSpec;
use crate::experiment::{ClientFlow, Experiment, HostRole, ServerFlow};

/// Poll interval of the cooperative wait loops.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Remote file the classification agent streams its telemetry into.
const CLASSIFIER_CSV: &str = "ebpf_classifier_log.csv";
/// Remote packet capture file.
const TCPDUMP_FILE: &str = "tcpdump_bottleneck.pcap";
/// Readiness marker printed by the classification agent.
const CLASSIFIER_READY_MARKER: &str = "Ready:";
/// Readiness marker printed by the kernel-probe logging script.
const PROBE_READY_MARKER: &str = "Ready";

/// The four testbed hosts by role.
#[derive(Debug, Clone)]
pub struct Hosts {
    pub bottleneck: Host,
    pub load1: Host,
    pub load2: Host,
    pub client: Host,
}

impl Hosts {
    pub fn get(&self, role: HostRole) -> &Host {
        match role {
            HostRole::Bottleneck => &self.bottleneck,
            HostRole::Load1 => &self.load1,
            HostRole::Load2 => &self.load2,
            HostRole::Client => &self.client,
        }
    }

    pub fn all(&self) -> [&Host; 4] {
        [&self.bottleneck, &self.load1, &self.load2, &self.client]
    }

    /// All four roles over one shared channel. Backs single-machine setups
    /// where the driver runs on the bottleneck router itself.
    pub fn shared(testbed: &TestbedSpec, channel: Arc<dyn RemoteChannel>) -> Self {
        Self {
            bottleneck: Host::new("bottleneck", &testbed.local_ip.bottle, channel.clone()),
            load1: Host::new("load1", &testbed.local_ip.load1, channel.clone()),
            load2: Host::new("load2", &testbed.local_ip.load2, channel.clone()),
            client: Host::new("client", &testbed.local_ip.client, channel),
        }
    }
}

/// Terminal state of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Success,
    Failed,
    WatchdogAborted,
}

/// Result of a full run.
#[derive(Debug)]
pub struct RunSummary {
    pub result_dir: std::path::PathBuf,
    pub outcomes: Vec<IterationOutcome>,
}

/// Run-level setup failed before any iteration; aborts the whole run.
#[derive(Debug, thiserror::Error)]
#[error("preparation failed on {host}: {what}: {detail}")]
pub struct PreparationError {
    pub host: String,
    pub what: String,
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Preparation(#[from] PreparationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize run configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A step of one iteration failed; fatal to the iteration, not the run.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("remote execution failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("monitoring process exited before readiness: {0}")]
    MonitorDied(String),
}

enum IterationFailure {
    Watchdog,
    Step(StepError),
}

impl From<StepError> for IterationFailure {
    fn from(err: StepError) -> Self {
        Self::Step(err)
    }
}

impl From<ConfigError> for IterationFailure {
    fn from(err: ConfigError) -> Self {
        Self::Step(StepError::Config(err))
    }
}

/// A launched client with its eventual join outcome.
struct LiveClient {
    flow: ClientFlow,
    command: String,
    handle: Option<Box<dyn RemoteHandle>>,
    outcome: Option<Result<CommandOutput, RemoteError>>,
}

/// A launched server with its eventual join outcome.
struct LiveServer {
    flow: ServerFlow,
    command: String,
    handle: Option<Box<dyn RemoteHandle>>,
    outcome: Option<Result<CommandOutput, RemoteError>>,
}

/// Outstanding monitoring processes of one iteration.
#[derive(Default)]
struct Monitoring {
    classifier: Option<Box<dyn RemoteHandle>>,
    tcpdump: Option<Box<dyn RemoteHandle>>,
    client_probes: Vec<(usize, Box<dyn RemoteHandle>)>,
    server_probes: Vec<(usize, Box<dyn RemoteHandle>)>,
}

/// Drives a materialized [`Experiment`] over the testbed [`Hosts`].
#[derive(Debug)]
pub struct Coordinator {
    experiment: Experiment,
    hosts: Hosts,
}

impl Coordinator {
    pub fn new(experiment: Experiment, hosts: Hosts) -> Self {
        Self { experiment, hosts }
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// Runs all iterations. Iterations are independent: a fatal iteration is
    /// logged and the run moves on to the next one. Only run-level
    /// preparation failures abort the whole run.
    pub async fn run(&self, result_base: &Path) -> Result<RunSummary, RunError> {
        let artifacts = RunArtifacts::create(result_base, &self.experiment.name)?;
        artifacts.write("configs.json", &self.config_dump()?)?;

        if let Err(err) = self.prepare().await {
            artifacts.log(&format!("could not do overall experiment preparation: {err}"));
            return Err(err.into());
        }

        let mut outcomes = Vec::with_capacity(self.experiment.iterations as usize);
        for index in 0..self.experiment.iterations {
            tracing::info!(iteration = index, "starting iteration");
            self.reset_connections().await;
            sleep(POLL_INTERVAL).await;

            let iteration = match artifacts.iteration(index) {
                Ok(iteration) => iteration,
                Err(err) => {
                    artifacts.log(&format!("iteration {index:03}: no artifact folder: {err}"));
                    outcomes.push(IterationOutcome::Failed);
                    continue;
                }
            };
            let outcome = self.run_iteration(&iteration).await;
            match outcome {
                IterationOutcome::Success => {
                    artifacts.log(&format!("complete iteration {index:03}"));
                }
                IterationOutcome::Failed => {
                    artifacts.log(&format!("iteration {index:03} failed"));
                }
                IterationOutcome::WatchdogAborted => {
                    artifacts.log(&format!("iteration {index:03} aborted by watchdog"));
                }
            }
            outcomes.push(outcome);
        }

        Ok(RunSummary { result_dir: artifacts.root().to_path_buf(), outcomes })
    }

    fn config_dump(&self) -> Result<String, serde_json::Error> {
        let exp = &self.experiment;
        serde_json::to_string_pretty(&serde_json::json!({
            "name": &exp.name,
            "rtt_ms": exp.rtt_ms,
            "bottleneck_bw_mbit": exp.bottleneck_bw_mbit,
            "iterations": exp.iterations,
            "watchdog_timeout_s": exp.watchdog_timeout.as_secs(),
            "port_pairs": &exp.port_pairs,
        }))
    }

    /// One-time run setup: traffic volume files on the server hosts
    /// (delete-then-recreate, so reruns start clean), the classifier payload
    /// on the bottleneck host, and the probe script where TCP flows run.
    async fn prepare(&self) -> Result<(), PreparationError> {
        let exp = &self.experiment;
        let prep_err = |host: &Host, what: String, detail: String| PreparationError {
            host: host.name.clone(),
            what,
            detail,
        };

        let roles = exp.server_hosts();
        for role in &roles {
            let host = self.hosts.get(*role);
            if let Err(err) =
                host.channel.run(&format!("rm -f {}/*", exp.traffic_files_path)).await
            {
                tracing::debug!(host = %host.name, %err, "traffic file cleanup");
            }
        }

        let mut pending = Vec::new();
        for size in exp.volume_file_sizes() {
            for role in &roles {
                let host = self.hosts.get(*role);
                tracing::info!(host = %host.name, size, "creating traffic volume file");
                let command = format!(
                    "head -c {size}M </dev/urandom > {}/{size}MB",
                    exp.traffic_files_path
                );
                let handle = host
                    .channel
                    .spawn(&command, &[], None)
                    .await
                    .map_err(|e| prep_err(host, format!("create {size}MB file"), e.to_string()))?;
                pending.push((*role, size, handle));
            }
        }
        let joined = futures::future::join_all(
            pending.into_iter().map(|(role, size, handle)| async move {
                (role, size, handle.join().await)
            }),
        )
        .await;
        for (role, size, result) in joined {
            let host = self.hosts.get(role);
            result
                .map_err(|e| prep_err(host, format!("create {size}MB file"), e.to_string()))?;
        }

        let bottleneck = &self.hosts.bottleneck;
        for file in &exp.payload.files {
            let path = format!("{}/{}", exp.tmp_path, file.name);
            bottleneck
                .channel
                .put(&file.contents, &path)
                .await
                .map_err(|e| prep_err(bottleneck, format!("deliver {}", file.name), e.to_string()))?;
        }

        if exp.probe_logging_enabled() {
            let script = exp.tcp_probe_path.as_deref().expect("probe path present");
            let contents = std::fs::read_to_string(script).map_err(|e| {
                prep_err(bottleneck, format!("read probe script {script}"), e.to_string())
            })?;
            for role in self.probe_hosts() {
                let host = self.hosts.get(role);
                let path = format!("{}/tcp_probe_bpf.py", exp.tmp_path);
                host.channel
                    .put(&contents, &path)
                    .await
                    .map_err(|e| prep_err(host, "stage probe script".to_string(), e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Hosts running at least one probe-logged flow endpoint.
    fn probe_hosts(&self) -> Vec<HostRole> {
        let mut roles = Vec::new();
        for client in &self.experiment.clients {
            if client.stack.uses_probe_logging() && !roles.contains(&client.host) {
                roles.push(client.host);
            }
        }
        for server in &self.experiment.servers {
            if server.stack.uses_probe_logging() && !roles.contains(&server.host) {
                roles.push(server.host);
            }
        }
        roles
    }

    async fn reset_connections(&self) {
        for host in self.hosts.all() {
            if let Err(err) = host.channel.reset().await {
                tracing::warn!(host = %host.name, %err, "could not reset connection");
            }
        }
    }

    async fn run_iteration(&self, artifacts: &IterationArtifacts) -> IterationOutcome {
        let plan = self
            .experiment
            .builder
            .plan(self.experiment.rtt_ms, self.experiment.bottleneck_bw_mbit);

        let outcome = match self.iteration_body(artifacts, &plan).await {
            Ok(()) => IterationOutcome::Success,
            Err(IterationFailure::Watchdog) => {
                artifacts.log("watchdog deadline expired; stopping all processes");
                IterationOutcome::WatchdogAborted
            }
            Err(IterationFailure::Step(err)) => {
                artifacts.log(&format!("iteration failed: {err}"));
                IterationOutcome::Failed
            }
        };

        // Teardown runs on every exit path, watchdog aborts included.
        self.kill_everything().await;
        clear(self.hosts.bottleneck.channel.as_ref(), &plan).await;

        outcome
    }

    async fn iteration_body(
        &self,
        artifacts: &IterationArtifacts,
        plan: &TopologyPlan,
    ) -> Result<(), IterationFailure> {
        let mut monitoring = Monitoring::default();

        if self.experiment.probe_logging_enabled() {
            self.start_server_probes(&mut monitoring).await?;
        }
        let mut servers = self.start_servers().await?;

        apply(self.hosts.bottleneck.channel.as_ref(), plan).await.map_err(StepError::from)?;

        self.start_monitoring(&mut monitoring).await?;
        if self.experiment.probe_logging_enabled() {
            self.start_client_probes(&mut monitoring).await?;
        }

        let mut clients = self.start_clients().await?;

        // One deadline over the whole join-and-collect phase. On expiry the
        // guarded future is dropped at its next await; already-collected
        // artifacts stay on disk.
        let watchdog = Watchdog::arm(self.experiment.watchdog_timeout);
        let guarded = watchdog
            .guard(async {
                self.join_clients(&mut clients).await;
                self.stop_background_clients(&mut clients).await;
                self.stop_monitoring(&mut monitoring, artifacts).await;
                self.collect_clients(&clients, artifacts);
                self.stop_servers(&servers).await;
                self.join_servers(&mut servers).await;
                self.join_probes(&mut monitoring, artifacts).await;
                self.collect_servers(&servers, artifacts);
            })
            .await;
        match guarded {
            Ok(()) => watchdog.disarm(),
            Err(_expired) => return Err(IterationFailure::Watchdog),
        }

        self.collect_tc_debug(artifacts).await?;
        Ok(())
    }

    async fn start_servers(&self) -> Result<Vec<LiveServer>, IterationFailure> {
        let mut servers = Vec::with_capacity(self.experiment.servers.len());
        for flow in &self.experiment.servers {
            let host = self.hosts.get(flow.host);
            let command = flow.stack.server_command(&flow.config);
            tracing::info!(host = %host.name, %command, "starting server");
            let handle = host
                .channel
                .spawn(&command, &self.experiment.process_env, None)
                .await
                .map_err(StepError::from)?;
            servers.push(LiveServer {
                flow: flow.clone(),
                command,
                handle: Some(handle),
                outcome: None,
            });
        }
        Ok(servers)
    }

    async fn start_monitoring(&self, monitoring: &mut Monitoring) -> Result<(), IterationFailure> {
        let bottleneck = &self.hosts.bottleneck;

        if self.experiment.tcp_dump {
            let command = format!(
                "sudo tcpdump -U -i {} -w {TCPDUMP_FILE} {}",
                self.experiment.builder.devices().egress,
                self.experiment.tcp_dump_options,
            );
            tracing::info!(%command, "starting packet capture");
            monitoring.tcpdump =
                Some(bottleneck.channel.spawn(&command, &[], None).await.map_err(StepError::from)?);
        }

        if self.experiment.deploy_classifier {
            let command =
                format!("sudo python3 {}/classifier.py {CLASSIFIER_CSV}", self.experiment.tmp_path);
            tracing::info!(%command, "starting classification agent");
            let (notifier, signal) = ready_signal();
            let handle = bottleneck
                .channel
                .spawn(&command, &[], Some(OutputWatch::new(CLASSIFIER_READY_MARKER, notifier)))
                .await
                .map_err(StepError::from)?;
            monitoring.classifier = Some(self.await_readiness(handle, signal, "classifier").await?);
        }

        Ok(())
    }

    /// Rendezvous on a monitoring process's readiness marker, polling at the
    /// bounded interval. A process that exits before announcing readiness is
    /// an iteration failure.
    async fn await_readiness(
        &self,
        handle: Box<dyn RemoteHandle>,
        mut signal: ReadySignal,
        what: &str,
    ) -> Result<Box<dyn RemoteHandle>, StepError> {
        loop {
            if signal.try_ready() {
                tracing::info!(what, "monitoring process ready");
                return Ok(handle);
            }
            if handle.is_finished() {
                let detail = match handle.join().await {
                    Ok(out) => out.stderr,
                    Err(err) => err.to_string(),
                };
                return Err(StepError::MonitorDied(format!("{what}: {}", detail.trim_end())));
            }
            tracing::debug!(what, "waiting for readiness");
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn start_server_probes(&self, monitoring: &mut Monitoring) -> Result<(), IterationFailure> {
        for server in &self.experiment.servers {
            if !server.stack.uses_probe_logging() {
                continue;
            }
            for client in &self.experiment.clients {
                if !client.stack.uses_probe_logging()
                    || client.config.target_ip != server.config.ip
                    || client.config.target_port != server.config.port
                {
                    continue;
                }
                let host = self.hosts.get(server.host);
                let output = format!("{}_TCPlog_server.csv", client.config.flow_id);
                let command = format!(
                    "sudo python3 {}/tcp_probe_bpf.py --filter \"(saddr {}) and (dport {})\" --output {output}",
                    self.experiment.tmp_path, server.config.ip, client.config.local_port,
                );
                let (notifier, signal) = ready_signal();
                let handle = host
                    .channel
                    .spawn(&command, &[], Some(OutputWatch::new(PROBE_READY_MARKER, notifier)))
                    .await
                    .map_err(StepError::from)?;
                let handle = self.await_readiness(handle, signal, "tcp server probe").await?;
                monitoring.server_probes.push((client.config.flow_id, handle));
                let _ = host.channel.run("sudo ip tcp_metrics flush").await;
            }
        }
        Ok(())
    }

    async fn start_client_probes(&self, monitoring: &mut Monitoring) -> Result<(), IterationFailure> {
        for client in &self.experiment.clients {
            if !client.stack.uses_probe_logging() {
                continue;
            }
            let host = self.hosts.get(client.host);
            let output = format!("{}_TCPlog_client.csv", client.config.flow_id);
            let command = format!(
                "sudo python3 {}/tcp_probe_bpf.py --filter \"(saddr {}) and (sport {})\" --output {output}",
                self.experiment.tmp_path, client.config.local_ip, client.config.local_port,
            );
            let (notifier, signal) = ready_signal();
            let handle = host
                .channel
                .spawn(&command, &[], Some(OutputWatch::new(PROBE_READY_MARKER, notifier)))
                .await
                .map_err(StepError::from)?;
            let handle = self.await_readiness(handle, signal, "tcp client probe").await?;
            monitoring.client_probes.push((client.config.flow_id, handle));
            let _ = host.channel.run("sudo ip tcp_metrics flush").await;
        }
        Ok(())
    }

    /// Launches clients sorted by start delay. Zero-delay clients form a
    /// burst that resets the synchronization point; each later client sleeps
    /// only the residual delay relative to that point, so delays are measured
    /// from the burst start rather than accumulating.
    async fn start_clients(&self) -> Result<Vec<LiveClient>, IterationFailure> {
        let mut flows = self.experiment.clients.clone();
        flows.sort_by_key(|f| f.config.start_delay_ms);

        let mut clients = Vec::with_capacity(flows.len());
        let mut sync_point = Instant::now();
        for flow in flows {
            if flow.config.start_delay_ms == 0 {
                sync_point = Instant::now();
            } else {
                let target = Duration::from_millis(flow.config.start_delay_ms);
                let elapsed = sync_point.elapsed();
                if target > elapsed {
                    sleep(target - elapsed).await;
                }
            }
            let host = self.hosts.get(flow.host);
            let command = flow.stack.client_command(&flow.config);
            tracing::info!(host = %host.name, %command, "starting client");
            let handle = host
                .channel
                .spawn(&command, &self.experiment.process_env, None)
                .await
                .map_err(StepError::from)?;
            clients.push(LiveClient { flow, command, handle: Some(handle), outcome: None });
        }
        Ok(clients)
    }

    /// Polls all volume-driven clients until each has finished, joining them
    /// as they complete. Per-flow failures are recorded, never escalated:
    /// flows are isolated from one another.
    async fn join_clients(&self, clients: &mut [LiveClient]) {
        loop {
            let mut outstanding = false;
            for client in clients.iter_mut() {
                if client.flow.stack.fixed_duration() || client.outcome.is_some() {
                    continue;
                }
                if client.handle.as_ref().is_some_and(|h| h.is_finished()) {
                    let handle = client.handle.take().expect("handle present");
                    let result = handle.join().await;
                    if let Err(err) = &result {
                        tracing::warn!(
                            flow = client.flow.config.flow_id,
                            %err,
                            "client join failed"
                        );
                    }
                    client.outcome = Some(result);
                } else {
                    outstanding = true;
                }
            }
            if !outstanding {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Fixed-duration background flows are stopped explicitly, then joined.
    /// When configured to finish on their own they are left untouched and
    /// reaped by teardown.
    async fn stop_background_clients(&self, clients: &mut [LiveClient]) {
        if self.experiment.let_background_finish {
            return;
        }
        for client in clients.iter_mut() {
            if !client.flow.stack.fixed_duration() || client.outcome.is_some() {
                continue;
            }
            let host = self.hosts.get(client.flow.host);
            if let Err(err) = host.channel.run(client.flow.stack.stop_client_command()).await {
                // "already terminated" is the normal case here.
                tracing::debug!(flow = client.flow.config.flow_id, %err, "background stop");
            }
            if let Some(handle) = client.handle.take() {
                client.outcome = Some(handle.join().await);
            }
        }
    }

    async fn stop_monitoring(&self, monitoring: &mut Monitoring, artifacts: &IterationArtifacts) {
        let bottleneck = &self.hosts.bottleneck;
        self.interrupt_by_name(bottleneck, "python").await;
        self.interrupt_by_name(bottleneck, "tcpdump").await;

        if let Some(handle) = monitoring.classifier.take() {
            match handle.join().await {
                Ok(out) | Err(RemoteError::NonZero(out)) => {
                    if let Err(err) = artifacts.write("stdout_classifier.log", &out.stdout) {
                        artifacts.log(&format!("could not write classifier stdout: {err}"));
                    }
                    artifacts.log(&format!(
                        "classifier telemetry left at {} on the bottleneck host",
                        CLASSIFIER_CSV
                    ));
                }
                Err(err) => artifacts.log(&format!("classifier join failed: {err}")),
            }
        }

        if let Some(handle) = monitoring.tcpdump.take() {
            match handle.join().await {
                Ok(_) | Err(RemoteError::NonZero(_)) => artifacts.log(&format!(
                    "packet capture left at {TCPDUMP_FILE} on the bottleneck host"
                )),
                Err(err) => artifacts.log(&format!("tcpdump join failed: {err}")),
            }
        }
    }

    fn collect_clients(&self, clients: &[LiveClient], artifacts: &IterationArtifacts) {
        for client in clients {
            let label = format!("client_{}", client.flow.config.flow_id);
            let config_json =
                serde_json::to_string_pretty(&client.flow.config).unwrap_or_default();
            let (output, note) = flow_outcome(&client.outcome);

            match artifacts.dump_flow(&label, &config_json, &client.command, output) {
                Ok(dir) => {
                    let stdout = output.map(|o| o.stdout.as_str()).unwrap_or("");
                    let path = client.flow.stack.client_log_path(&client.flow.config, stdout);
                    if let Some(path) = path.filter(|_| self.experiment.collect_logs) {
                        if let Err(err) = artifacts.record_log_paths(&dir, &[path]) {
                            artifacts.log(&format!("{label}: could not record log paths: {err}"));
                        }
                    }
                    if let Some(note) = note {
                        artifacts.log(&format!("{label}: {note}"));
                    }
                }
                Err(err) => {
                    artifacts.log(&format!("{label}: no artifact folder ({err}); skipped"));
                }
            }
        }
    }

    /// Stack-specific stop commands are idempotent: a server that already
    /// exited makes the stop command fail, which is not an error.
    async fn stop_servers(&self, servers: &[LiveServer]) {
        for server in servers {
            let host = self.hosts.get(server.flow.host);
            if let Err(err) = host.channel.run(server.flow.stack.stop_server_command()).await {
                tracing::debug!(server = server.flow.index, %err, "server stop command");
            }
        }
    }

    async fn join_servers(&self, servers: &mut [LiveServer]) {
        for server in servers.iter_mut() {
            if let Some(handle) = server.handle.take() {
                let result = handle.join().await;
                if let Err(err) = &result {
                    tracing::warn!(server = server.flow.index, %err, "server join failed");
                }
                server.outcome = Some(result);
            }
        }
    }

    async fn join_probes(&self, monitoring: &mut Monitoring, artifacts: &IterationArtifacts) {
        if monitoring.client_probes.is_empty() && monitoring.server_probes.is_empty() {
            return;
        }
        for role in self.probe_hosts() {
            self.interrupt_by_name(self.hosts.get(role), "tcp_probe_bpf.py").await;
        }
        for (kind, probes) in [
            ("client", &mut monitoring.client_probes),
            ("server", &mut monitoring.server_probes),
        ] {
            for (flow_id, handle) in probes.drain(..) {
                match handle.join().await {
                    Ok(out) | Err(RemoteError::NonZero(out)) => {
                        let name = format!("TCP_{kind}_log_{flow_id}.log");
                        if let Err(err) = artifacts.write(&name, &out.stdout) {
                            artifacts.log(&format!("could not write {name}: {err}"));
                        }
                    }
                    Err(err) => {
                        artifacts.log(&format!("tcp {kind} probe {flow_id} join failed: {err}"));
                    }
                }
            }
        }
    }

    fn collect_servers(&self, servers: &[LiveServer], artifacts: &IterationArtifacts) {
        for server in servers {
            let label = format!("server_{}", server.flow.index + 1);
            let config_json =
                serde_json::to_string_pretty(&server.flow.config).unwrap_or_default();
            let (output, note) = flow_outcome(&server.outcome);

            match artifacts.dump_flow(&label, &config_json, &server.command, output) {
                Ok(dir) => {
                    if self.experiment.collect_logs {
                        let stdout = output.map(|o| o.stdout.as_str()).unwrap_or("");
                        let paths =
                            server.flow.stack.server_log_paths(&server.flow.config, stdout);
                        if let Err(err) = artifacts.record_log_paths(&dir, &paths) {
                            artifacts.log(&format!("{label}: could not record log paths: {err}"));
                        }
                    }
                    if let Some(note) = note {
                        artifacts.log(&format!("{label}: {note}"));
                    }
                }
                Err(err) => {
                    artifacts.log(&format!("{label}: no artifact folder ({err}); skipped"));
                }
            }
        }
    }

    /// Snapshots queue statistics and optionally renders the topology.
    async fn collect_tc_debug(&self, artifacts: &IterationArtifacts) -> Result<(), IterationFailure> {
        let out = self
            .hosts
            .bottleneck
            .channel
            .run("tc -s qdisc show")
            .await
            .map_err(StepError::from)?;
        let rows = parse_qdisc_show(&out.stdout);
        artifacts.write("queue-stats.csv", &stats_to_csv(&rows)).map_err(StepError::from)?;

        if let Some(viz) = &self.experiment.tc_viz_path {
            let devices = self.experiment.builder.devices();
            let mut seen: Vec<&str> = Vec::new();
            for device in [
                devices.client.as_str(),
                devices.ingress.as_str(),
                devices.egress.as_str(),
                devices.first_ifb.as_str(),
                devices.second_ifb.as_str(),
            ] {
                if seen.contains(&device) {
                    continue;
                }
                seen.push(device);
                let png = format!("{}/{device}.png", self.experiment.tmp_path);
                let command = format!("python3 {viz}/tcviz.py {device} | dot -Tpng > {png}");
                self.hosts.bottleneck.channel.run(&command).await.map_err(StepError::from)?;
                artifacts.log(&format!("topology visualization rendered at {png}"));
            }
        }
        Ok(())
    }

    /// Defensive stop of every process the experiment may have started,
    /// whether or not it is known to be running.
    async fn kill_everything(&self) {
        for server in &self.experiment.servers {
            let host = self.hosts.get(server.host);
            if let Err(err) = host.channel.run(server.stack.stop_server_command()).await {
                tracing::debug!(%err, "cleanup server stop");
            }
        }
        for client in &self.experiment.clients {
            let host = self.hosts.get(client.host);
            if let Err(err) = host.channel.run(client.stack.stop_client_command()).await {
                tracing::debug!(%err, "cleanup client stop");
            }
        }
        for role in self.probe_hosts() {
            self.interrupt_by_name(self.hosts.get(role), "tcp_probe_bpf.py").await;
        }
        self.interrupt_by_name(&self.hosts.bottleneck, "python").await;
        self.interrupt_by_name(&self.hosts.bottleneck, "tcpdump").await;
    }

    async fn interrupt_by_name(&self, host: &Host, name: &str) {
        if let Err(err) = host.channel.run(&format!("sudo pkill --signal SIGINT {name}")).await {
            tracing::debug!(host = %host.name, name, %err, "interrupt by name");
        }
    }
}

/// Splits a stored join outcome into the dumpable output and a log note.
fn flow_outcome(
    outcome: &Option<Result<CommandOutput, RemoteError>>,
) -> (Option<&CommandOutput>, Option<String>) {
    match outcome {
        Some(Ok(out)) => (Some(out), None),
        Some(Err(RemoteError::NonZero(out))) => {
            (Some(out), Some(format!("exited with status {}", out.exit_code)))
        }
        Some(Err(err)) => (None, Some(format!("did not join: {err}"))),
        None => (None, Some("not joined".to_string())),
    }
}
