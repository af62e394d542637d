//! Applies a [`TopologyPlan`] over a remote channel with per-group failure
//! semantics: clearing is best-effort, general setup tolerates an
//! already-configured device, everything else aborts the iteration.

use aqmlab_remote::{Error as RemoteError, RemoteChannel};

use crate::plan::{CommandGroup, TopologyPlan};

/// Stderr emitted by `tc` when deleting a qdisc that does not exist; the
/// expected no-op case while clearing.
const EMPTY_QDISC_ERR: &str = "Cannot delete qdisc with handle of zero";

/// A topology command failed. Carries the failing command and its group;
/// fatal to the iteration, not to the run.
#[derive(Debug, thiserror::Error)]
#[error("tc {group} configuration failed at `{command}`: {detail}")]
pub struct ConfigError {
    pub group: CommandGroup,
    pub command: String,
    pub detail: String,
}

/// Runs the full plan in group order.
pub async fn apply(channel: &dyn RemoteChannel, plan: &TopologyPlan) -> Result<(), ConfigError> {
    clear(channel, plan).await;

    for command in &plan.general {
        if let Err(err) = channel.run(command).await {
            // clsact / prio roots survive a partial previous run.
            tracing::info!(command, %err, "general configuration already present");
        }
    }

    for (group, commands) in
        [(CommandGroup::Ingress, &plan.ingress), (CommandGroup::Delay, &plan.delay), (CommandGroup::Egress, &plan.egress)]
    {
        for command in commands {
            channel.run(command).await.map_err(|err| {
                tracing::error!(%group, command, %err, "tc configuration failed");
                ConfigError { group, command: command.clone(), detail: err.to_string() }
            })?;
        }
    }

    Ok(())
}

/// Runs only the clear group. Safe against an already-clean device and never
/// fails: unexpected errors are logged and skipped.
pub async fn clear(channel: &dyn RemoteChannel, plan: &TopologyPlan) {
    for command in &plan.clear {
        match channel.run(command).await {
            Ok(_) => {}
            Err(RemoteError::NonZero(out)) if out.stderr.contains(EMPTY_QDISC_ERR) => {
                tracing::debug!(command, "qdisc already empty");
            }
            Err(err) => {
                tracing::warn!(command, %err, "could not clear tc configuration");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use aqmlab_remote::{CommandOutput, OutputWatch, RemoteHandle, Result as RemoteResult};

    use super::*;
    use crate::class::TrafficClassSpec;
    use crate::plan::{DeviceMap, TopologyBuilder};

    /// Channel that fails every `delete` command and records what ran.
    #[derive(Default)]
    struct ScriptedChannel {
        log: Mutex<Vec<String>>,
        fail_group: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl RemoteChannel for ScriptedChannel {
        async fn run(&self, command: &str) -> RemoteResult<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            let fail_delete = command.contains(" delete ") || command.contains(" del ");
            let fail_scripted = self.fail_group.is_some_and(|frag| command.contains(frag));
            if fail_delete || fail_scripted {
                let stderr =
                    if fail_delete { "Error: Cannot delete qdisc with handle of zero." } else { "RTNETLINK answers: No such file or directory" };
                return Err(RemoteError::NonZero(CommandOutput {
                    command: command.to_string(),
                    exit_code: 2,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }));
            }
            Ok(CommandOutput {
                command: command.to_string(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn spawn(
            &self,
            _command: &str,
            _env: &[(String, String)],
            _watch: Option<OutputWatch>,
        ) -> RemoteResult<Box<dyn RemoteHandle>> {
            unimplemented!("not used by plan application")
        }

        async fn put(&self, _contents: &str, _remote_path: &str) -> RemoteResult<()> {
            Ok(())
        }

        async fn reset(&self) -> RemoteResult<()> {
            Ok(())
        }
    }

    fn builder() -> TopologyBuilder {
        let devices = DeviceMap {
            ingress: "enp2s0".to_string(),
            egress: "enp2s0".to_string(),
            client: "enp3s0".to_string(),
            first_ifb: "ifb0".to_string(),
            second_ifb: "ifb1".to_string(),
        };
        TopologyBuilder::new(devices, vec![TrafficClassSpec::codel(100, 100, 3, 3)], 3).unwrap()
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let plan = builder().plan(10.0, 100);
        let channel = ScriptedChannel::default();
        // Both passes see "nothing to delete" and neither raises.
        clear(&channel, &plan).await;
        clear(&channel, &plan).await;
        assert_eq!(channel.log.lock().unwrap().len(), plan.clear.len() * 2);
    }

    #[tokio::test]
    async fn apply_runs_groups_in_order() {
        let plan = builder().plan(10.0, 100);
        let channel = ScriptedChannel::default();
        apply(&channel, &plan).await.unwrap();

        let log = channel.log.lock().unwrap();
        let expected: Vec<&String> = plan
            .groups()
            .iter()
            .flat_map(|(_, cmds)| cmds.iter())
            .collect();
        assert_eq!(log.iter().collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn egress_failure_carries_group_and_command() {
        let plan = builder().plan(10.0, 100);
        let channel = ScriptedChannel { fail_group: Some("htb default"), ..Default::default() };
        let err = apply(&channel, &plan).await.unwrap_err();
        assert_eq!(err.group, CommandGroup::Egress);
        assert!(err.command.contains("htb default"));
        assert!(err.detail.contains("No such file or directory"));
    }

    #[tokio::test]
    async fn delay_failure_aborts_before_egress() {
        let plan = builder().plan(10.0, 100);
        let channel = ScriptedChannel { fail_group: Some("netem"), ..Default::default() };
        let err = apply(&channel, &plan).await.unwrap_err();
        assert_eq!(err.group, CommandGroup::Delay);
        let log = channel.log.lock().unwrap();
        assert!(!log.iter().any(|c| c.contains("htb")));
    }
}
