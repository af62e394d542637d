//! Numeric class ids and the class-to-queue remapping tables.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::state::FlowClass;

/// Physical queue ids on the bottleneck (class ids of the egress topology).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueIds {
    /// Queue carrying unclassified and unresponsive traffic.
    pub standard: u32,
    /// Queue reserved for flows judged responsive.
    pub responsive: u32,
}

/// Numeric ids the classifier agent uses for the nine states, plus the id of
/// traffic it has not classified at all. Configured per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIds {
    pub both_unclassified: u32,
    pub both_responsive: u32,
    pub both_unresponsive: u32,
    pub ecn_resp_loss_unclass: u32,
    pub ecn_resp_loss_unresp: u32,
    pub ecn_unresp_loss_unclass: u32,
    pub ecn_unclass_loss_resp: u32,
    pub ecn_unresp_loss_resp: u32,
    pub ecn_unclass_loss_unresp: u32,
    /// Id for traffic outside the classifier's state machine.
    pub default_id: u32,
}

impl ClassIds {
    pub fn id(&self, class: FlowClass) -> u32 {
        match class {
            FlowClass::BothUnclassified => self.both_unclassified,
            FlowClass::BothResponsive => self.both_responsive,
            FlowClass::BothUnresponsive => self.both_unresponsive,
            FlowClass::EcnRespLossUnclass => self.ecn_resp_loss_unclass,
            FlowClass::EcnRespLossUnresp => self.ecn_resp_loss_unresp,
            FlowClass::EcnUnrespLossUnclass => self.ecn_unresp_loss_unclass,
            FlowClass::EcnUnclassLossResp => self.ecn_unclass_loss_resp,
            FlowClass::EcnUnrespLossResp => self.ecn_unresp_loss_resp,
            FlowClass::EcnUnclassLossUnresp => self.ecn_unclass_loss_unresp,
        }
    }

    /// The agent-side constant name for a state.
    pub fn constant_name(class: FlowClass) -> &'static str {
        match class {
            FlowClass::BothUnclassified => "BOTH_UNCLASSIFIED",
            FlowClass::BothResponsive => "BOTH_RESPONSIVE",
            FlowClass::BothUnresponsive => "BOTH_UNRESPONSIVE",
            FlowClass::EcnRespLossUnclass => "ECN_RESP_LOSS_UNCLASS",
            FlowClass::EcnRespLossUnresp => "ECN_RESP_LOSS_UNRESP",
            FlowClass::EcnUnrespLossUnclass => "ECN_UNRESP_LOSS_UNCLASS",
            FlowClass::EcnUnclassLossResp => "ECN_UNCLASS_LOSS_RESP",
            FlowClass::EcnUnrespLossResp => "ECN_UNRESP_LOSS_RESP",
            FlowClass::EcnUnclassLossUnresp => "ECN_UNCLASS_LOSS_UNRESP",
        }
    }
}

/// Whether classified flows are spread over two queues or funneled into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Every class routes to the standard queue.
    Single,
    /// Responsive flows get their own queue; `ecn_active` selects which
    /// partially-classified states count as responsive.
    Multi { ecn_active: bool },
}

/// Pure class-to-queue mapping, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMapping {
    mode: QueueMode,
    queues: QueueIds,
}

impl QueueMapping {
    pub fn single(queues: QueueIds) -> Self {
        Self { mode: QueueMode::Single, queues }
    }

    pub fn multi(queues: QueueIds, ecn_active: bool) -> Self {
        Self { mode: QueueMode::Multi { ecn_active }, queues }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn queues(&self) -> QueueIds {
        self.queues
    }

    /// The queue a flow in `class` is steered into.
    pub fn queue_for(&self, class: FlowClass) -> u32 {
        let QueueIds { standard, responsive } = self.queues;
        match self.mode {
            QueueMode::Single => standard,
            QueueMode::Multi { ecn_active } => match class {
                FlowClass::BothResponsive => responsive,
                // Responsive so far, judged on ECN evidence alone: only
                // trustworthy while ECN marking is actually negotiated.
                FlowClass::EcnRespLossUnclass | FlowClass::EcnRespLossUnresp => {
                    if ecn_active {
                        responsive
                    } else {
                        standard
                    }
                }
                // Judged responsive on loss evidence alone: the signal the
                // ECN-based deployment does not act on, and vice versa.
                FlowClass::EcnUnclassLossResp | FlowClass::EcnUnrespLossResp => {
                    if ecn_active {
                        standard
                    } else {
                        responsive
                    }
                }
                FlowClass::BothUnclassified
                | FlowClass::BothUnresponsive
                | FlowClass::EcnUnrespLossUnclass
                | FlowClass::EcnUnclassLossUnresp => standard,
            },
        }
    }

    /// Queue for unclassified (default-id) traffic.
    pub fn default_queue(&self) -> u32 {
        self.queues.standard
    }

    /// The numeric remap table delivered to the agent, including the default
    /// id. Iteration follows [`FlowClass::ALL`] order.
    pub fn numeric_table(&self, ids: &ClassIds) -> Vec<(u32, u32)> {
        let mut table: Vec<(u32, u32)> =
            FlowClass::ALL.iter().map(|&c| (ids.id(c), self.queue_for(c))).collect();
        table.push((ids.default_id, self.default_queue()));
        table
    }

    /// Same table as a lookup map.
    pub fn numeric_map(&self, ids: &ClassIds) -> FxHashMap<u32, u32> {
        self.numeric_table(ids).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    const QUEUES: QueueIds = QueueIds { standard: 3, responsive: 4 };

    #[test]
    fn single_queue_maps_everything_to_standard() {
        let mapping = QueueMapping::single(QUEUES);
        for class in FlowClass::ALL {
            assert_eq!(mapping.queue_for(class), 3);
        }
        assert_eq!(mapping.default_queue(), 3);
    }

    #[test]
    fn multi_queue_with_ecn_rewards_ecn_evidence() {
        let mapping = QueueMapping::multi(QUEUES, true);
        assert_eq!(mapping.queue_for(FlowClass::BothResponsive), 4);
        assert_eq!(mapping.queue_for(FlowClass::EcnRespLossUnclass), 4);
        assert_eq!(mapping.queue_for(FlowClass::EcnRespLossUnresp), 4);
        assert_eq!(mapping.queue_for(FlowClass::EcnUnclassLossResp), 3);
        assert_eq!(mapping.queue_for(FlowClass::EcnUnrespLossResp), 3);
        assert_eq!(mapping.queue_for(FlowClass::BothUnclassified), 3);
        assert_eq!(mapping.queue_for(FlowClass::BothUnresponsive), 3);
    }

    #[test]
    fn multi_queue_without_ecn_rewards_loss_evidence() {
        let mapping = QueueMapping::multi(QUEUES, false);
        assert_eq!(mapping.queue_for(FlowClass::BothResponsive), 4);
        assert_eq!(mapping.queue_for(FlowClass::EcnRespLossUnclass), 3);
        assert_eq!(mapping.queue_for(FlowClass::EcnUnclassLossResp), 4);
        assert_eq!(mapping.queue_for(FlowClass::EcnUnrespLossResp), 4);
    }

    #[test]
    fn mapping_is_pure() {
        let mapping = QueueMapping::multi(QUEUES, true);
        for class in FlowClass::ALL {
            assert_eq!(mapping.queue_for(class), mapping.queue_for(class));
        }
    }

    #[test]
    fn numeric_table_covers_all_states_plus_default() {
        let mapping = QueueMapping::multi(QUEUES, true);
        let table = mapping.numeric_table(&ids());
        assert_eq!(table.len(), 10);
        assert!(table.contains(&(10, 4)));
        assert!(table.contains(&(9, 3)));
        let map = mapping.numeric_map(&ids());
        assert_eq!(map[&13], 4);
    }
}
