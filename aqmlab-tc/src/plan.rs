//! Topology plan construction: five ordered groups of `tc` commands.

use std::fmt;

use crate::class::{TrafficClassSpec, HTB_ROOT_HANDLE};

/// Interface names of the bottleneck topology. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMap {
    /// Device traffic from the clients enters the bottleneck on.
    pub ingress: String,
    /// Device carrying the rate-limited classes towards the servers.
    pub egress: String,
    /// Client-facing device (reverse direction).
    pub client: String,
    /// Intermediate redirect device delaying the forward direction.
    pub first_ifb: String,
    /// Intermediate redirect device delaying the reverse direction.
    pub second_ifb: String,
}

/// The five command groups of a [`TopologyPlan`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    Clear,
    General,
    Ingress,
    Delay,
    Egress,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Clear => "clear",
            Self::General => "general",
            Self::Ingress => "ingress",
            Self::Delay => "delay",
            Self::Egress => "egress",
        };
        f.write_str(name)
    }
}

/// Ordered command plan for configuring the bottleneck. Groups execute
/// strictly in the order clear, general, ingress, delay, egress; the clear
/// group tolerates an already-clean device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyPlan {
    pub clear: Vec<String>,
    pub general: Vec<String>,
    pub ingress: Vec<String>,
    pub delay: Vec<String>,
    pub egress: Vec<String>,
}

impl TopologyPlan {
    /// Groups with their commands, in execution order.
    pub fn groups(&self) -> [(CommandGroup, &[String]); 5] {
        [
            (CommandGroup::Clear, self.clear.as_slice()),
            (CommandGroup::General, self.general.as_slice()),
            (CommandGroup::Ingress, self.ingress.as_slice()),
            (CommandGroup::Delay, self.delay.as_slice()),
            (CommandGroup::Egress, self.egress.as_slice()),
        ]
    }
}

/// Queue depth for the delay-emulating redirect devices, in packets.
///
/// Four times the bandwidth-delay product of the one-way path (in 1514-byte
/// frames) so the delay emulation itself never drops packets, floored at the
/// netem default of 1000.
pub fn netem_queue_limit(rtt_ms: f64, bottleneck_bw_mbit: u32) -> u64 {
    let frames = 4.0 * (rtt_ms / 2.0 / 1000.0) * f64::from(bottleneck_bw_mbit) * 1e6 / 8.0 / 1514.0;
    (frames as u64).max(1000)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate class id {0:#x} in topology")]
    DuplicateClassId(u32),
    #[error("class {class_id:#x}: soft rate {soft} mbit exceeds ceiling {hard} mbit")]
    RateInversion { class_id: u32, soft: u32, hard: u32 },
}

/// Builds [`TopologyPlan`]s for a fixed device map and class set.
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    devices: DeviceMap,
    classes: Vec<TrafficClassSpec>,
    default_class: u32,
}

impl TopologyBuilder {
    pub fn new(
        devices: DeviceMap,
        classes: Vec<TrafficClassSpec>,
        default_class: u32,
    ) -> Result<Self, Error> {
        let mut seen = Vec::with_capacity(classes.len());
        for class in &classes {
            if seen.contains(&class.class_id) {
                return Err(Error::DuplicateClassId(class.class_id));
            }
            seen.push(class.class_id);
            if class.soft_rate_mbit > class.hard_rate_mbit {
                return Err(Error::RateInversion {
                    class_id: class.class_id,
                    soft: class.soft_rate_mbit,
                    hard: class.hard_rate_mbit,
                });
            }
        }
        Ok(Self { devices, classes, default_class })
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    pub fn classes(&self) -> &[TrafficClassSpec] {
        &self.classes
    }

    /// Builds the command plan for one iteration.
    pub fn plan(&self, rtt_ms: f64, bottleneck_bw_mbit: u32) -> TopologyPlan {
        TopologyPlan {
            clear: self.clear_group(),
            general: self.general_group(),
            ingress: self.ingress_group(),
            delay: self.delay_group(rtt_ms, bottleneck_bw_mbit),
            egress: self.egress_group(),
        }
    }

    fn clear_group(&self) -> Vec<String> {
        let d = &self.devices;
        let mut cmds = vec![
            format!("sudo tc qdisc delete dev {} root", d.first_ifb),
            format!("sudo tc qdisc delete dev {} root", d.second_ifb),
            format!("sudo tc filter delete dev {} ingress", d.ingress),
            format!("sudo tc qdisc delete dev {} root", d.ingress),
            format!("sudo tc qdisc del dev {} parent ffff:fff1", d.ingress),
        ];
        if d.ingress != d.egress {
            cmds.push(format!("sudo tc qdisc delete dev {} root", d.egress));
            cmds.push(format!("sudo tc qdisc del dev {} parent ffff:fff1", d.egress));
        }
        cmds.push(format!("sudo tc qdisc del dev {} parent ffff:fff1", d.client));
        cmds
    }

    fn general_group(&self) -> Vec<String> {
        let d = &self.devices;
        vec![
            format!("sudo tc qdisc add dev {} clsact", d.ingress),
            format!("sudo tc qdisc add dev {} root prio", d.client),
            format!("sudo tc qdisc add dev {} clsact", d.client),
        ]
    }

    /// Steers traffic matching the 2-bit experiment port tag into the two
    /// redirect devices, one per direction, so delay applies without loops.
    fn ingress_group(&self) -> Vec<String> {
        let d = &self.devices;
        vec![
            format!(
                "sudo tc filter add dev {} parent ffff:fff2 u32 match ip dport 0x4000 0xc000 \
                 action mirred egress redirect dev {}",
                d.ingress, d.first_ifb
            ),
            format!(
                "sudo tc filter add dev {} parent ffff:fff2 u32 match ip sport 0x4000 0xc000 \
                 action mirred egress redirect dev {}",
                d.client, d.second_ifb
            ),
        ]
    }

    /// Half the RTT on each redirect device.
    fn delay_group(&self, rtt_ms: f64, bottleneck_bw_mbit: u32) -> Vec<String> {
        let d = &self.devices;
        let limit = netem_queue_limit(rtt_ms, bottleneck_bw_mbit);
        let delay = rtt_ms / 2.0;
        vec![
            format!("sudo tc qdisc add dev {} root netem delay {delay}ms limit {limit}", d.first_ifb),
            format!("sudo tc qdisc add dev {} root netem delay {delay}ms limit {limit}", d.second_ifb),
        ]
    }

    fn egress_group(&self) -> Vec<String> {
        let d = &self.devices;
        let mut cmds = vec![format!(
            "sudo tc qdisc add dev {} root handle {}: htb default {:x}",
            d.egress, HTB_ROOT_HANDLE, self.default_class
        )];
        for class in &self.classes {
            cmds.push(format!("sudo tc class add dev {} {}", d.egress, class.htb_class_args()));
            cmds.push(format!("sudo tc qdisc add dev {} {}", d.egress, class.qdisc_args()));
            cmds.push(format!(
                "sudo tc filter add dev {} basic match 'meta(tc_index eq {:#x})' classid {}:{:x}",
                d.egress, class.class_id, HTB_ROOT_HANDLE, class.class_id
            ));
        }
        cmds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::TrafficClassSpec;

    fn devices() -> DeviceMap {
        DeviceMap {
            ingress: "enp2s0".to_string(),
            egress: "enp2s0".to_string(),
            client: "enp3s0".to_string(),
            first_ifb: "ifb0".to_string(),
            second_ifb: "ifb1".to_string(),
        }
    }

    fn builder() -> TopologyBuilder {
        let classes =
            vec![TrafficClassSpec::codel(100, 100, 3, 3), TrafficClassSpec::codel(40, 100, 4, 4)];
        TopologyBuilder::new(devices(), classes, 3).unwrap()
    }

    #[test]
    fn netem_limit_floor_dominates_at_low_bdp() {
        // rtt 5 ms, 100 Mbit: 4 * 0.0025 * 100e6 / 8 / 1514 = 825.6 -> floor wins.
        assert_eq!(netem_queue_limit(5.0, 100), 1000);
    }

    #[test]
    fn netem_limit_scales_with_bdp() {
        // rtt 50 ms, 500 Mbit: 4 * 0.025 * 500e6 / 8 / 1514 = 4128.1.
        assert_eq!(netem_queue_limit(50.0, 500), 4128);
        for (rtt, bw) in [(1.0, 1), (10.0, 100), (200.0, 1000)] {
            assert!(netem_queue_limit(rtt, bw) >= 1000);
        }
    }

    #[test]
    fn plan_groups_are_ordered() {
        let plan = builder().plan(10.0, 100);
        let order: Vec<CommandGroup> = plan.groups().iter().map(|(g, _)| *g).collect();
        assert_eq!(
            order,
            [
                CommandGroup::Clear,
                CommandGroup::General,
                CommandGroup::Ingress,
                CommandGroup::Delay,
                CommandGroup::Egress
            ]
        );
    }

    #[test]
    fn delay_group_splits_rtt() {
        // rtt 10 ms, 100 Mbit: 4 * 0.005 * 100e6 / 8 / 1514 = 165.1 -> floor 1000.
        let plan = builder().plan(10.0, 100);
        assert_eq!(
            plan.delay,
            vec![
                "sudo tc qdisc add dev ifb0 root netem delay 5ms limit 1000",
                "sudo tc qdisc add dev ifb1 root netem delay 5ms limit 1000",
            ]
        );

        // rtt 80 ms, 800 Mbit: 4 * 0.04 * 800e6 / 8 / 1514 = 10568.0.
        let plan = builder().plan(80.0, 800);
        assert_eq!(
            plan.delay[0],
            "sudo tc qdisc add dev ifb0 root netem delay 40ms limit 10568"
        );
    }

    #[test]
    fn egress_group_has_root_class_qdisc_filter_per_class() {
        let plan = builder().plan(10.0, 100);
        assert_eq!(plan.egress.len(), 1 + 3 * 2);
        assert_eq!(plan.egress[0], "sudo tc qdisc add dev enp2s0 root handle 20: htb default 3");
        assert_eq!(
            plan.egress[3],
            "sudo tc filter add dev enp2s0 basic match 'meta(tc_index eq 0x3)' classid 20:3"
        );
    }

    #[test]
    fn shared_ingress_egress_device_is_cleared_once() {
        let plan = builder().plan(10.0, 100);
        let root_deletes = plan
            .clear
            .iter()
            .filter(|c| c.contains("dev enp2s0 root"))
            .count();
        assert_eq!(root_deletes, 1);

        let mut split = devices();
        split.egress = "enp4s0".to_string();
        let classes = vec![TrafficClassSpec::codel(100, 100, 3, 3)];
        let plan = TopologyBuilder::new(split, classes, 3).unwrap().plan(10.0, 100);
        assert!(plan.clear.iter().any(|c| c.contains("dev enp4s0 root")));
    }

    #[test]
    fn duplicate_class_ids_are_rejected() {
        let classes =
            vec![TrafficClassSpec::codel(100, 100, 3, 3), TrafficClassSpec::codel(40, 100, 3, 4)];
        assert!(matches!(
            TopologyBuilder::new(devices(), classes, 3),
            Err(Error::DuplicateClassId(3))
        ));
    }

    #[test]
    fn rate_inversion_is_rejected() {
        let classes = vec![TrafficClassSpec::codel(200, 100, 3, 3)];
        assert!(matches!(
            TopologyBuilder::new(devices(), classes, 3),
            Err(Error::RateInversion { class_id: 3, .. })
        ));
    }
}
