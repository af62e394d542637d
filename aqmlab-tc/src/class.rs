//! Per-class queueing parameters: one HTB rate-limiter class plus an attached
//! AQM discipline per traffic class.

/// Major handle of the HTB root on the egress device.
pub const HTB_ROOT_HANDLE: &str = "20";
/// Parent class minor under which all per-class limiters attach.
pub const HTB_BOTTLENECK_CLASS_HANDLE: &str = "ffff";

/// MTU assumed when converting byte limits to packet limits.
pub const ASSUMED_MTU: u64 = 1500;

/// Bandwidth-delay product in bytes for the given queue sizing.
///
/// `floor(multiplier * bw_mbit * 125000 * rtt_ms / 1000)`, where 125000
/// converts Mbit/s to bytes/ms.
pub fn bdp_bytes(bdp_multiplier: f64, bw_mbit: u32, rtt_ms: f64) -> u64 {
    (bdp_multiplier * f64::from(bw_mbit) * 125_000.0 * (rtt_ms / 1000.0)) as u64
}

/// The active-queue-management discipline attached below a class.
#[derive(Debug, Clone, PartialEq)]
pub enum Aqm {
    /// CoDel with a target-latency control loop; limit is in packets.
    CoDel { limit_pkts: u32, target_ms: f64, interval_ms: u32, ecn: bool, ce_threshold: u32 },
    /// Plain token-bucket FIFO; limit is in bytes.
    DropTail { limit_bytes: u64, burst_bytes: u32, rate_mbit: u32 },
}

/// One queueing class on the bottleneck: HTB rate/ceiling/priority plus the
/// attached AQM discipline.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficClassSpec {
    /// Guaranteed rate in Mbit/s.
    pub soft_rate_mbit: u32,
    /// Ceiling rate in Mbit/s. Invariant: `soft_rate_mbit <= hard_rate_mbit`.
    pub hard_rate_mbit: u32,
    /// Class id; doubles as the filter match value. Unique per topology.
    pub class_id: u32,
    pub prio: u32,
    pub aqm: Aqm,
}

impl TrafficClassSpec {
    /// A CoDel class with the conventional defaults (limit 1000 packets,
    /// target 0.5 ms, interval 20 ms, ECN marking on).
    pub fn codel(soft_rate_mbit: u32, hard_rate_mbit: u32, class_id: u32, prio: u32) -> Self {
        Self {
            soft_rate_mbit,
            hard_rate_mbit,
            class_id,
            prio,
            aqm: Aqm::CoDel {
                limit_pkts: 1000,
                target_ms: 0.5,
                interval_ms: 20,
                ecn: true,
                ce_threshold: 0,
            },
        }
    }

    /// A drop-tail (tbf) class; limit 750 kB, burst one MTU frame, 20 Mbit.
    pub fn drop_tail(soft_rate_mbit: u32, hard_rate_mbit: u32, class_id: u32, prio: u32) -> Self {
        Self {
            soft_rate_mbit,
            hard_rate_mbit,
            class_id,
            prio,
            aqm: Aqm::DropTail { limit_bytes: 750_000, burst_bytes: 1514, rate_mbit: 20 },
        }
    }

    pub fn with_target_ms(mut self, target: f64) -> Self {
        if let Aqm::CoDel { target_ms, .. } = &mut self.aqm {
            *target_ms = target;
        }
        self
    }

    pub fn with_interval_ms(mut self, interval: u32) -> Self {
        if let Aqm::CoDel { interval_ms, .. } = &mut self.aqm {
            *interval_ms = interval;
        }
        self
    }

    pub fn with_ecn(mut self, enabled: bool) -> Self {
        if let Aqm::CoDel { ecn, .. } = &mut self.aqm {
            *ecn = enabled;
        }
        self
    }

    pub fn with_ce_threshold(mut self, threshold: u32) -> Self {
        if let Aqm::CoDel { ce_threshold, .. } = &mut self.aqm {
            *ce_threshold = threshold;
        }
        self
    }

    pub fn with_rate_mbit(mut self, rate: u32) -> Self {
        if let Aqm::DropTail { rate_mbit, .. } = &mut self.aqm {
            *rate_mbit = rate;
        }
        self
    }

    /// Sizes the queue from a byte budget (typically a BDP multiple): CoDel
    /// converts to packets assuming [`ASSUMED_MTU`]-sized frames, drop-tail
    /// stores the byte limit directly.
    pub fn set_limit_bytes(&mut self, bytes: u64) {
        match &mut self.aqm {
            Aqm::CoDel { limit_pkts, .. } => *limit_pkts = (bytes / ASSUMED_MTU) as u32,
            Aqm::DropTail { limit_bytes, .. } => *limit_bytes = bytes,
        }
    }

    /// Argument fragment for `tc class add dev <egress> ...`.
    pub fn htb_class_args(&self) -> String {
        format!(
            "parent {root}:{parent} classid {root}:{id:x} htb rate {soft}mbit ceil {hard}mbit prio {prio} burst 100k",
            root = HTB_ROOT_HANDLE,
            parent = HTB_BOTTLENECK_CLASS_HANDLE,
            id = self.class_id,
            soft = self.soft_rate_mbit,
            hard = self.hard_rate_mbit,
            prio = self.prio,
        )
    }

    /// Argument fragment for `tc qdisc add dev <egress> ...` attaching the
    /// AQM below this class.
    pub fn qdisc_args(&self) -> String {
        match &self.aqm {
            Aqm::CoDel { limit_pkts, target_ms, interval_ms, ecn, ce_threshold } => {
                let ce = if *ce_threshold != 0 {
                    format!(" ce_threshold {ce_threshold}")
                } else {
                    String::new()
                };
                format!(
                    "parent {root}:{id:x} handle {id:x}: codel limit {limit_pkts} target {target_ms}ms interval {interval_ms}ms {ecn}{ce}",
                    root = HTB_ROOT_HANDLE,
                    id = self.class_id,
                    ecn = if *ecn { "ecn" } else { "noecn" },
                )
            }
            Aqm::DropTail { limit_bytes, burst_bytes, rate_mbit } => format!(
                "parent {root}:{id:x} handle {id:x}: tbf limit {limit_bytes} burst {burst_bytes} rate {rate_mbit}Mbit",
                root = HTB_ROOT_HANDLE,
                id = self.class_id,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codel_qdisc_args() {
        let spec = TrafficClassSpec::codel(95, 100, 3, 3);
        assert_eq!(
            spec.qdisc_args(),
            "parent 20:3 handle 3: codel limit 1000 target 0.5ms interval 20ms ecn"
        );

        let spec = TrafficClassSpec::codel(95, 100, 3, 3).with_ecn(false).with_ce_threshold(50);
        assert_eq!(
            spec.qdisc_args(),
            "parent 20:3 handle 3: codel limit 1000 target 0.5ms interval 20ms noecn ce_threshold 50"
        );
    }

    #[test]
    fn drop_tail_qdisc_args() {
        let spec = TrafficClassSpec::drop_tail(100, 100, 4, 4).with_rate_mbit(100);
        assert_eq!(spec.qdisc_args(), "parent 20:4 handle 4: tbf limit 750000 burst 1514 rate 100Mbit");
    }

    #[test]
    fn htb_class_args_carry_rates() {
        let spec = TrafficClassSpec::codel(40, 100, 4, 4);
        assert_eq!(
            spec.htb_class_args(),
            "parent 20:ffff classid 20:4 htb rate 40mbit ceil 100mbit prio 4 burst 100k"
        );
    }

    #[test]
    fn limit_sizing_from_bdp() {
        // 1 BDP at 100 Mbit / 5 ms.
        let bytes = bdp_bytes(1.0, 100, 5.0);
        assert_eq!(bytes, 62_500);

        let mut codel = TrafficClassSpec::codel(100, 100, 3, 3);
        codel.set_limit_bytes(bytes);
        assert!(matches!(codel.aqm, Aqm::CoDel { limit_pkts: 41, .. }));

        let mut dt = TrafficClassSpec::drop_tail(100, 100, 3, 3);
        dt.set_limit_bytes(bytes);
        assert!(matches!(dt.aqm, Aqm::DropTail { limit_bytes: 62_500, .. }));
    }

    #[test]
    fn bdp_bytes_floors() {
        // 0.37 * 7 * 125000 * 0.0033 -> 1068.375
        assert_eq!(bdp_bytes(0.37, 7, 3.3), 1068);
    }
}
