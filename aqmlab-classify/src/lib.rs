//! # Flow-responsiveness classification policy
//!
//! Every flow crossing the bottleneck is assigned one of nine classes based
//! on evidence accumulated from ECN markings and loss events: for each
//! evidence kind a flow is unclassified, responsive or unresponsive, and the
//! class is the cross product of the two. Evidence is tallied per flow and a
//! majority vote decides which transition table applies.
//!
//! Packet-level classification runs in an external eBPF agent on the
//! bottleneck host. This crate owns the policy itself (the transition tables,
//! the class-to-queue mapping and the rendering of the agent's configuration
//! payload) as pure functions that the experiment driver and the tests share.

pub mod mapping;
pub mod payload;
pub mod state;
pub mod telemetry;

pub use mapping::{ClassIds, QueueIds, QueueMapping, QueueMode};
pub use payload::{ClassifierPayload, PayloadFile, PayloadParams, ResponsivenessTest};
pub use state::{Evidence, EvidenceCounters, FlowClass, Verdict};
pub use telemetry::TelemetryRecord;
