//! # Bottleneck traffic-control topology
//!
//! This crate turns abstract experiment parameters (bandwidth, RTT, queue
//! sizing, AQM selection) into an ordered plan of `tc` command strings and
//! applies that plan over a remote channel.
//!
//! ## Topology overview
//!
//! ```text
//!                ingress dev                     egress dev
//! clients ──────► [clsact] ──► u32 tag match ──► [HTB 20:] ──► servers
//!                     │                             │
//!                     ▼                             ├── class 20:<id> (rate/ceil/prio)
//!                [first ifb]                        │     └── CoDel or TBF qdisc <id>:
//!                netem delay rtt/2                  └── basic filter tc_index == <id>
//!
//! client-facing dev: [prio root] + [clsact] ──► u32 tag match ──► [second ifb]
//!                                               netem delay rtt/2
//! ```
//!
//! Delay emulation is split across the two intermediate (ifb) devices, one
//! per direction, so each carries half the configured RTT without creating a
//! redirect loop. Per-class rate limiting and AQM live under a fixed HTB root
//! on the egress device; the per-packet `tc_index` tag written by the
//! external classification agent selects the class via a basic filter.

pub mod apply;
pub mod class;
pub mod plan;
pub mod stats;

pub use apply::{apply, clear, ConfigError};
pub use class::{bdp_bytes, Aqm, TrafficClassSpec};
pub use plan::{netem_queue_limit, CommandGroup, DeviceMap, TopologyBuilder, TopologyPlan};
pub use stats::{parse_qdisc_show, stats_to_csv, QdiscStats};
