//! Prints the tc command plan and the classifier queue mapping for a small
//! single-queue experiment, without touching any device.
//!
//! ```bash
//! cargo run -p aqmlab --example plan_preview
//! ```

use aqmlab_classify::{ClassIds, FlowClass, QueueIds, QueueMapping};
use aqmlab_tc::{DeviceMap, TopologyBuilder, TrafficClassSpec};

fn main() {
    let devices = DeviceMap {
        ingress: "enp2s0".to_string(),
        egress: "enp2s0".to_string(),
        client: "enp3s0".to_string(),
        first_ifb: "ifb0".to_string(),
        second_ifb: "ifb1".to_string(),
    };

    let mut codel = TrafficClassSpec::codel(100, 100, 3, 3);
    codel.set_limit_bytes(aqmlab_tc::bdp_bytes(1.0, 100, 5.0));

    let builder = TopologyBuilder::new(devices, vec![codel], 3).expect("valid topology");
    let plan = builder.plan(5.0, 100);

    for (group, commands) in plan.groups() {
        println!("== {group} ==");
        for command in commands {
            println!("{command}");
        }
    }

    let mapping = QueueMapping::multi(QueueIds { standard: 3, responsive: 4 }, true);

    println!("== class -> queue ==");
    for class in FlowClass::ALL {
        println!("{:>24}: {}", ClassIds::constant_name(class), mapping.queue_for(class));
    }
    println!("{:>24}: {}", "DEFAULT", mapping.default_queue());
}
