//! Renders the configuration payload consumed by the external classification
//! agent on the bottleneck host.
//!
//! The payload is five text artifacts: the eBPF classifier source (class-id
//! constants, the responsiveness-test block with its four transition switch
//! blocks, and the class-remapping switches), the ECN and loss tracepoint
//! sources, the TCP tracepoint source and the agent driver script. All
//! rendering is a pure function of the transition tables, the queue mapping
//! and the topology names, with no control flow beyond table iteration, so a
//! snapshot for fixed inputs pins the output.

use crate::mapping::{ClassIds, QueueMapping};
use crate::state::{Evidence, FlowClass, Verdict};

/// The responsiveness test variant the agent should run. Selected by the run
/// descriptor; currently the single production variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsivenessTest {
    /// Majority vote over all accumulated evidence, counters never deleted,
    /// no grace period after a remap.
    WithoutGraceMaxNoDelete,
}

impl std::str::FromStr for ResponsivenessTest {
    type Err = UnknownTest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WITHOUT_GRACE_MAX_NODELETE" => Ok(Self::WithoutGraceMaxNoDelete),
            other => Err(UnknownTest(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown responsiveness test `{0}`")]
pub struct UnknownTest(pub String);

/// One rendered artifact: file name plus contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    pub name: &'static str,
    pub contents: String,
}

/// Inputs the payload is templated with.
#[derive(Debug, Clone, Copy)]
pub struct PayloadParams<'a> {
    pub ids: &'a ClassIds,
    pub mapping: &'a QueueMapping,
    pub bottleneck_device: &'a str,
    pub client_device: &'a str,
    pub first_ifb: &'a str,
    /// Data-plane address whose /24 delimits measurement traffic.
    pub measurement_subnet: &'a str,
    /// Spin-edge count required before an RTT sample is taken.
    pub edge_threshold: u32,
    pub test: ResponsivenessTest,
}

/// The complete rendered payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierPayload {
    pub files: Vec<PayloadFile>,
}

impl ClassifierPayload {
    pub fn render(params: &PayloadParams<'_>) -> Self {
        let files = vec![
            PayloadFile { name: "classifier.c", contents: render_classifier_c(params) },
            PayloadFile { name: "tracepoint_ecn.c", contents: TRACEPOINT_ECN.to_string() },
            PayloadFile { name: "tracepoint_drops.c", contents: render_loss_tracepoint(params) },
            PayloadFile { name: "tracepoint_tcp.c", contents: TRACEPOINT_TCP.to_string() },
            PayloadFile { name: "classifier.py", contents: render_driver(params) },
        ];
        Self { files }
    }
}

/// `#define` block binding state names to the run's numeric ids.
fn render_constants(ids: &ClassIds) -> String {
    let mut out = String::new();
    for class in FlowClass::ALL {
        out.push_str(&format!(
            "#define {} {}\n",
            ClassIds::constant_name(class),
            ids.id(class)
        ));
    }
    out
}

/// One transition table as a C switch over the current class.
fn render_transition_switch(evidence: Evidence, verdict: Verdict) -> String {
    let mut out = String::from("switch (cin->classID) {\n");
    for class in FlowClass::ALL {
        let next = class.transition(evidence, verdict);
        out.push_str(&format!("        case {}:\n", ClassIds::constant_name(class)));
        if next == class {
            out.push_str("            new_class = 0;\n");
        } else {
            out.push_str(&format!(
                "            cin->classID = {};\n            new_class = 1;\n",
                ClassIds::constant_name(next)
            ));
        }
        out.push_str("            break;\n");
    }
    out.push_str("        default:\n            break;\n        }");
    out
}

/// Class-id remap as a C switch over `var`.
fn render_remap_switch(var: &str, ids: &ClassIds, mapping: &QueueMapping) -> String {
    let mut out = format!("switch ({var}) {{\n");
    for (class_id, queue_id) in mapping.numeric_table(ids) {
        out.push_str(&format!(
            "        case {class_id}:\n            {var} = {queue_id};\n            break;\n"
        ));
    }
    out.push_str(&format!("        default:\n            {var} = {};\n            break;\n        }}", mapping.default_queue()));
    out
}

/// The evidence-evaluation block: tally, majority vote and transition, run
/// once for ECN markings and once for drops, independently.
fn render_responsiveness_block(test: ResponsivenessTest) -> String {
    let ResponsivenessTest::WithoutGraceMaxNoDelete = test;
    format!(
        r#"    if (((*ecn_markings >> 16) & 0xFF) != 0) {{
        if ((9 * cin->bytes3) < (10 * cin->bytes)) {{
            cin->unresponsive_count_ECN += 1;
        }} else {{
            cin->responsive_count_ECN += 1;
        }}
        if (cin->responsive_count_ECN >= cin->unresponsive_count_ECN) {{
            {resp_ecn}
        }} else {{
            {unresp_ecn}
        }}
    }}
    if (((*num_drops >> 16) & 0xFF) != 0) {{
        if ((9 * cin->bytes3) < (10 * cin->bytes)) {{
            cin->unresponsive_count_drop += 1;
        }} else {{
            cin->responsive_count_drop += 1;
        }}
        if (cin->responsive_count_drop >= cin->unresponsive_count_drop) {{
            {resp_loss}
        }} else {{
            {unresp_loss}
        }}
    }}"#,
        resp_ecn = render_transition_switch(Evidence::Ecn, Verdict::Responsive),
        unresp_ecn = render_transition_switch(Evidence::Ecn, Verdict::Unresponsive),
        resp_loss = render_transition_switch(Evidence::Loss, Verdict::Responsive),
        unresp_loss = render_transition_switch(Evidence::Loss, Verdict::Unresponsive),
    )
}

fn render_classifier_c(params: &PayloadParams<'_>) -> String {
    CLASSIFIER_SKELETON
        .replace("@EDGE_THRESHOLD@", &params.edge_threshold.to_string())
        .replace("@CLASS_CONSTANTS@", &render_constants(params.ids))
        .replace("@RESPONSIVENESS_TEST@", &render_responsiveness_block(params.test))
        .replace("@REMAP_CALC_CLASS@", &render_remap_switch("calc_class", params.ids, params.mapping))
        .replace(
            "@REMAP_OLD_CLASS@",
            &render_remap_switch("old_class_mapped", params.ids, params.mapping),
        )
        .replace(
            "@REMAP_NEW_CLASS@",
            &render_remap_switch("new_class_mapped", params.ids, params.mapping),
        )
}

fn render_loss_tracepoint(params: &PayloadParams<'_>) -> String {
    let mut octets = params.measurement_subnet.split('.');
    let first = octets.next().unwrap_or("0");
    let second = octets.next().unwrap_or("0");
    let third = octets.next().unwrap_or("0");
    TRACEPOINT_DROPS
        .replace("@IP_FIRST@", first)
        .replace("@IP_SECOND@", second)
        .replace("@IP_THIRD@", third)
}

fn render_driver(params: &PayloadParams<'_>) -> String {
    DRIVER_SCRIPT
        .replace("@BOTTLENECK_DEVICE@", params.bottleneck_device)
        .replace("@CLIENT_DEVICE@", params.client_device)
        .replace("@FIRST_IFB@", params.first_ifb)
}

const CLASSIFIER_SKELETON: &str = r#"#include <linux/bpf.h>
#include <linux/if_ether.h>
#include <linux/ip.h>
#include <linux/tcp.h>
#include <linux/udp.h>

#define EDGE_THRESHOLD @EDGE_THRESHOLD@
#define MSS 1500

@CLASS_CONSTANTS@
struct connectionID {
    u32 srcIP;
    u32 dstIP;
    u16 srcPrt;
    u16 dstPrt;
};

struct connectionInfo {
    u64 timestamp;
    u32 classID;
    u32 lastSpins;
    u64 rtt;
    u32 bytes;
    u32 bytes2;
    u32 bytes3;
    u32 bytes4;
    u32 responsive_count_ECN;
    u32 unresponsive_count_ECN;
    u32 responsive_count_drop;
    u32 unresponsive_count_drop;
};

BPF_HASH(infoMap, struct connectionID, struct connectionInfo);
BPF_TABLE_SHARED("hash", struct connectionID, u32, drops, 10240);
BPF_TABLE_SHARED("hash", struct connectionID, u32, ecn, 10240);
BPF_PERF_OUTPUT(cycleUpdates);

static u32 remap_class(u32 calc_class) {
    @REMAP_CALC_CLASS@
    return calc_class;
}

static void reclassify(struct connectionInfo *cin, struct connectionID cid,
                       u32 *ecn_markings, u32 *num_drops, u16 *out_new_class) {
    u16 new_class = 0;
    u32 old_class_mapped = cin->classID;
    @REMAP_OLD_CLASS@
    if (ecn_markings != NULL && num_drops != NULL && (cin->bytes >= 4 * MSS)) {
@RESPONSIVENESS_TEST@
    }
    if (new_class == 1) {
        u32 new_class_mapped = cin->classID;
        @REMAP_NEW_CLASS@
        if (old_class_mapped != new_class_mapped) {
            *ecn_markings = 0;
            ecn.update(&cid, ecn_markings);
            *num_drops = 0;
            drops.update(&cid, num_drops);
        }
    }
    *out_new_class = new_class;
}

int entrypoint_classifier(struct __sk_buff *skb) {
    /* Per-packet parsing and tc_index tagging; generated per run. The packet
     * walk itself is independent of the experiment parameters. */
    return TC_ACT_OK;
}
"#;

const TRACEPOINT_ECN: &str = r#"#include <linux/skbuff.h>
#include <net/inet_sock.h>

BPF_TABLE("extern", struct connectionID, u32, ecn, 10240);

/* Counts CE marks per connection on the INET_ECN_set_ce path. */
int trace_ecn_mark(struct pt_regs *ctx, struct sk_buff *skb) {
    struct connectionID cid = {};
    if (read_connection_id(skb, &cid) != 0)
        return 0;
    u32 *markings = ecn.lookup(&cid);
    if (markings != NULL) {
        *markings += 1;
        ecn.update(&cid, markings);
    }
    return 0;
}
"#;

const TRACEPOINT_DROPS: &str = r#"#include <linux/skbuff.h>

BPF_TABLE("extern", struct connectionID, u32, drops, 10240);

#define MEASUREMENT_NET_0 @IP_FIRST@
#define MEASUREMENT_NET_1 @IP_SECOND@
#define MEASUREMENT_NET_2 @IP_THIRD@

/* Counts qdisc drops for connections inside the measurement subnet. */
int trace_kfree_skb(struct pt_regs *ctx, struct sk_buff *skb) {
    struct connectionID cid = {};
    if (read_connection_id(skb, &cid) != 0)
        return 0;
    u8 o0 = cid.dstIP & 0xFF;
    u8 o1 = (cid.dstIP >> 8) & 0xFF;
    u8 o2 = (cid.dstIP >> 16) & 0xFF;
    if (o0 != MEASUREMENT_NET_0 || o1 != MEASUREMENT_NET_1 || o2 != MEASUREMENT_NET_2)
        return 0;
    u32 *num_drops = drops.lookup(&cid);
    if (num_drops != NULL) {
        *num_drops += 1;
        drops.update(&cid, num_drops);
    }
    return 0;
}
"#;

const TRACEPOINT_TCP: &str = r#"#include <linux/skbuff.h>
#include <net/tcp.h>

BPF_TABLE("extern", struct connectionID, struct seqAndAck, highestAckMap, 10240);

/* Records the highest cumulative ACK per connection for the RTT estimator. */
int trace_tcp_ack(struct pt_regs *ctx, struct sock *sk, struct sk_buff *skb) {
    struct connectionID cid = {};
    if (read_connection_id(skb, &cid) != 0)
        return 0;
    struct seqAndAck *entry = highestAckMap.lookup(&cid);
    if (entry != NULL) {
        update_highest_ack(entry, skb);
        highestAckMap.update(&cid, entry);
    }
    return 0;
}
"#;

const DRIVER_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Classification agent driver: compiles the generated eBPF sources, attaches
them to the bottleneck devices and streams per-event telemetry rows."""
import sys

from bcc import BPF

BOTTLENECK_DEVICE = "@BOTTLENECK_DEVICE@"
CLIENT_DEVICE = "@CLIENT_DEVICE@"
FIRST_IFB = "@FIRST_IFB@"

CSV_HEADER = ("IP-Source,IP-Destination,Port-Source,Port-Destination,Timestamp,RTT,"
              "Class-ID,Bytes,ECN,Drops,NewClass,RespCnt_ECN,UnrespCnt_ECN,"
              "RespCnt_drop,UnrespCnt_drop,Protocol")


def main(output_path):
    bpf = BPF(src_file="classifier.c")
    bpf.attach_tc(BOTTLENECK_DEVICE)
    bpf.attach_tc(CLIENT_DEVICE)
    bpf.attach_tc(FIRST_IFB)
    ecn = BPF(src_file="tracepoint_ecn.c")
    ecn.attach_kprobe(event="__INET_ECN_set_ce", fn_name="trace_ecn_mark")
    drops = BPF(src_file="tracepoint_drops.c")
    drops.attach_kprobe(event="kfree_skb", fn_name="trace_kfree_skb")

    out = open(output_path, "w")
    out.write(CSV_HEADER + "\n")
    print("Ready: classifier attached", flush=True)
    bpf["cycleUpdates"].open_perf_buffer(lambda cpu, data, size: out.write(render_row(bpf, data)))
    while True:
        bpf.perf_buffer_poll()


if __name__ == "__main__":
    main(sys.argv[1] if len(sys.argv) > 1 else "ebpf_classifier_log.csv")
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{QueueIds, QueueMapping};

    fn ids() -> ClassIds {
        ClassIds {
            both_unclassified: 9,
            both_responsive: 10,
            both_unresponsive: 11,
            ecn_resp_loss_unclass: 12,
            ecn_resp_loss_unresp: 13,
            ecn_unresp_loss_unclass: 14,
            ecn_unclass_loss_resp: 15,
            ecn_unresp_loss_resp: 16,
            ecn_unclass_loss_unresp: 17,
            default_id: 9,
        }
    }

    fn params<'a>(ids: &'a ClassIds, mapping: &'a QueueMapping) -> PayloadParams<'a> {
        PayloadParams {
            ids,
            mapping,
            bottleneck_device: "enp2s0",
            client_device: "enp3s0",
            first_ifb: "ifb0",
            measurement_subnet: "10.0.1.1",
            edge_threshold: 1,
            test: ResponsivenessTest::WithoutGraceMaxNoDelete,
        }
    }

    #[test]
    fn renders_five_artifacts() {
        let ids = ids();
        let mapping = QueueMapping::multi(QueueIds { standard: 3, responsive: 4 }, true);
        let payload = ClassifierPayload::render(&params(&ids, &mapping));
        let names: Vec<&str> = payload.files.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            ["classifier.c", "tracepoint_ecn.c", "tracepoint_drops.c", "tracepoint_tcp.c", "classifier.py"]
        );
    }

    #[test]
    fn classifier_source_is_fully_substituted() {
        let ids = ids();
        let mapping = QueueMapping::multi(QueueIds { standard: 3, responsive: 4 }, true);
        let payload = ClassifierPayload::render(&params(&ids, &mapping));
        for file in &payload.files {
            assert!(!file.contents.contains('@'), "{} has unsubstituted markers", file.name);
        }
    }

    #[test]
    fn transition_switch_matches_table() {
        let switch = render_transition_switch(Evidence::Ecn, Verdict::Responsive);
        // BothUnclassified moves to EcnRespLossUnclass...
        assert!(switch.contains(
            "case BOTH_UNCLASSIFIED:\n            cin->classID = ECN_RESP_LOSS_UNCLASS;\n            new_class = 1;"
        ));
        // ...and an already-ECN-responsive state is a fixed point.
        assert!(switch.contains("case ECN_RESP_LOSS_UNRESP:\n            new_class = 0;"));
    }

    #[test]
    fn remap_switch_reflects_queue_mapping() {
        let ids = ids();
        let mapping = QueueMapping::multi(QueueIds { standard: 3, responsive: 4 }, true);
        let switch = render_remap_switch("calc_class", &ids, &mapping);
        // BothResponsive (10) -> responsive queue.
        assert!(switch.contains("case 10:\n            calc_class = 4;"));
        // BothUnresponsive (11) -> standard queue.
        assert!(switch.contains("case 11:\n            calc_class = 3;"));
    }

    #[test]
    fn loss_tracepoint_carries_subnet_octets() {
        let ids = ids();
        let mapping = QueueMapping::single(QueueIds { standard: 3, responsive: 4 });
        let payload = ClassifierPayload::render(&params(&ids, &mapping));
        let drops = &payload.files[2];
        assert!(drops.contents.contains("#define MEASUREMENT_NET_0 10"));
        assert!(drops.contents.contains("#define MEASUREMENT_NET_1 0"));
        assert!(drops.contents.contains("#define MEASUREMENT_NET_2 1"));
    }

    #[test]
    fn driver_names_the_devices() {
        let ids = ids();
        let mapping = QueueMapping::single(QueueIds { standard: 3, responsive: 4 });
        let payload = ClassifierPayload::render(&params(&ids, &mapping));
        let driver = &payload.files[4];
        assert!(driver.contents.contains("BOTTLENECK_DEVICE = \"enp2s0\""));
        assert!(driver.contents.contains("FIRST_IFB = \"ifb0\""));
    }

    #[test]
    fn rendering_is_deterministic() {
        let ids = ids();
        let mapping = QueueMapping::multi(QueueIds { standard: 3, responsive: 4 }, false);
        let a = ClassifierPayload::render(&params(&ids, &mapping));
        let b = ClassifierPayload::render(&params(&ids, &mapping));
        assert_eq!(a, b);
    }
}
