//! The nine-state responsiveness machine and its four transition tables.

/// Responsiveness class of a flow: per-evidence-kind verdicts crossed over
/// ECN and loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowClass {
    BothUnclassified,
    BothResponsive,
    BothUnresponsive,
    EcnRespLossUnclass,
    EcnRespLossUnresp,
    EcnUnrespLossUnclass,
    EcnUnclassLossResp,
    EcnUnrespLossResp,
    EcnUnclassLossUnresp,
}

impl FlowClass {
    /// All nine states, in the canonical order used by ids and payloads.
    pub const ALL: [Self; 9] = [
        Self::BothUnclassified,
        Self::BothResponsive,
        Self::BothUnresponsive,
        Self::EcnRespLossUnclass,
        Self::EcnRespLossUnresp,
        Self::EcnUnrespLossUnclass,
        Self::EcnUnclassLossResp,
        Self::EcnUnrespLossResp,
        Self::EcnUnclassLossUnresp,
    ];

    /// Applies one evidence observation. Total over all inputs; states that
    /// already reflect the verdict are fixed points.
    pub fn transition(self, evidence: Evidence, verdict: Verdict) -> Self {
        match (evidence, verdict) {
            (Evidence::Ecn, Verdict::Responsive) => match self {
                Self::BothUnclassified => Self::EcnRespLossUnclass,
                Self::BothUnresponsive => Self::EcnRespLossUnresp,
                Self::EcnUnclassLossUnresp => Self::EcnRespLossUnresp,
                Self::EcnUnclassLossResp => Self::BothResponsive,
                Self::EcnUnrespLossUnclass => Self::EcnRespLossUnclass,
                Self::EcnUnrespLossResp => Self::BothResponsive,
                other => other,
            },
            (Evidence::Ecn, Verdict::Unresponsive) => match self {
                Self::BothUnclassified => Self::EcnUnrespLossUnclass,
                Self::BothResponsive => Self::EcnUnrespLossResp,
                Self::EcnUnclassLossUnresp => Self::BothUnresponsive,
                Self::EcnUnclassLossResp => Self::EcnUnrespLossResp,
                Self::EcnRespLossUnclass => Self::EcnUnrespLossUnclass,
                Self::EcnRespLossUnresp => Self::BothUnresponsive,
                other => other,
            },
            (Evidence::Loss, Verdict::Responsive) => match self {
                Self::BothUnclassified => Self::EcnUnclassLossResp,
                Self::BothUnresponsive => Self::EcnUnrespLossResp,
                Self::EcnUnclassLossUnresp => Self::EcnUnclassLossResp,
                Self::EcnUnrespLossUnclass => Self::EcnUnrespLossResp,
                Self::EcnRespLossUnclass => Self::BothResponsive,
                Self::EcnRespLossUnresp => Self::BothResponsive,
                other => other,
            },
            (Evidence::Loss, Verdict::Unresponsive) => match self {
                Self::BothUnclassified => Self::EcnUnclassLossUnresp,
                Self::BothResponsive => Self::EcnRespLossUnresp,
                Self::EcnUnclassLossResp => Self::EcnUnclassLossUnresp,
                Self::EcnUnrespLossUnclass => Self::BothUnresponsive,
                Self::EcnUnrespLossResp => Self::BothUnresponsive,
                Self::EcnRespLossUnclass => Self::EcnRespLossUnresp,
                other => other,
            },
        }
    }
}

/// The two independent congestion signals evidence is collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Evidence {
    Ecn,
    Loss,
}

/// Outcome of one responsiveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Responsive,
    Unresponsive,
}

impl Verdict {
    /// Compares the flow's current throughput share against its baseline
    /// share from before the congestion signal: a flow that did not back off
    /// by at least a tenth is provisionally unresponsive.
    pub fn from_share(current_bytes: u64, baseline_bytes: u64) -> Self {
        if 9 * baseline_bytes < 10 * current_bytes {
            Self::Unresponsive
        } else {
            Self::Responsive
        }
    }
}

/// Per-flow evidence tallies backing the majority vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvidenceCounters {
    pub responsive_ecn: u32,
    pub unresponsive_ecn: u32,
    pub responsive_loss: u32,
    pub unresponsive_loss: u32,
}

impl EvidenceCounters {
    /// Records one provisional verdict.
    pub fn observe(&mut self, evidence: Evidence, verdict: Verdict) {
        let counter = match (evidence, verdict) {
            (Evidence::Ecn, Verdict::Responsive) => &mut self.responsive_ecn,
            (Evidence::Ecn, Verdict::Unresponsive) => &mut self.unresponsive_ecn,
            (Evidence::Loss, Verdict::Responsive) => &mut self.responsive_loss,
            (Evidence::Loss, Verdict::Unresponsive) => &mut self.unresponsive_loss,
        };
        *counter += 1;
    }

    /// Majority vote for one evidence kind; ties count as responsive.
    pub fn majority(&self, evidence: Evidence) -> Verdict {
        let (responsive, unresponsive) = match evidence {
            Evidence::Ecn => (self.responsive_ecn, self.unresponsive_ecn),
            Evidence::Loss => (self.responsive_loss, self.unresponsive_loss),
        };
        if responsive >= unresponsive {
            Verdict::Responsive
        } else {
            Verdict::Unresponsive
        }
    }

    /// Records one observation and returns the class after applying the
    /// majority verdict for that evidence kind.
    pub fn reclassify(
        &mut self,
        class: FlowClass,
        evidence: Evidence,
        verdict: Verdict,
    ) -> FlowClass {
        self.observe(evidence, verdict);
        class.transition(evidence, self.majority(evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [Evidence; 2] = [Evidence::Ecn, Evidence::Loss];
    const VERDICTS: [Verdict; 2] = [Verdict::Responsive, Verdict::Unresponsive];

    #[test]
    fn transitions_are_total() {
        for state in FlowClass::ALL {
            for evidence in KINDS {
                for verdict in VERDICTS {
                    let next = state.transition(evidence, verdict);
                    assert!(FlowClass::ALL.contains(&next));
                }
            }
        }
    }

    #[test]
    fn verdict_states_are_fixed_points() {
        // Once a flow is responsive to a kind, further responsive evidence of
        // that kind changes nothing (and symmetrically for unresponsive).
        for (state, evidence, verdict) in [
            (FlowClass::BothResponsive, Evidence::Ecn, Verdict::Responsive),
            (FlowClass::BothResponsive, Evidence::Loss, Verdict::Responsive),
            (FlowClass::BothUnresponsive, Evidence::Ecn, Verdict::Unresponsive),
            (FlowClass::BothUnresponsive, Evidence::Loss, Verdict::Unresponsive),
            (FlowClass::EcnRespLossUnclass, Evidence::Ecn, Verdict::Responsive),
            (FlowClass::EcnUnrespLossUnclass, Evidence::Ecn, Verdict::Unresponsive),
            (FlowClass::EcnUnclassLossResp, Evidence::Loss, Verdict::Responsive),
            (FlowClass::EcnUnclassLossUnresp, Evidence::Loss, Verdict::Unresponsive),
        ] {
            assert_eq!(state.transition(evidence, verdict), state);
        }
    }

    #[test]
    fn opposite_evidence_from_unclassified_is_not_lost() {
        // Responsive then unresponsive evidence of the same kind lands on the
        // state a single unresponsive transition reaches.
        for evidence in KINDS {
            let via_responsive = FlowClass::BothUnclassified
                .transition(evidence, Verdict::Responsive)
                .transition(evidence, Verdict::Unresponsive);
            let direct =
                FlowClass::BothUnclassified.transition(evidence, Verdict::Unresponsive);
            assert_eq!(via_responsive, direct);
        }
    }

    #[test]
    fn ecn_and_loss_evidence_commute() {
        // Simultaneous evidence is applied as two independent table lookups;
        // the result must not depend on application order.
        for first in VERDICTS {
            for second in VERDICTS {
                for state in FlowClass::ALL {
                    let a = state
                        .transition(Evidence::Ecn, first)
                        .transition(Evidence::Loss, second);
                    let b = state
                        .transition(Evidence::Loss, second)
                        .transition(Evidence::Ecn, first);
                    assert_eq!(a, b, "order dependence from {state:?} ({first:?}/{second:?})");
                }
            }
        }
    }

    #[test]
    fn share_threshold_is_nine_tenths() {
        // Backed off by more than 10%: responsive.
        assert_eq!(Verdict::from_share(80, 100), Verdict::Responsive);
        // Exactly 90% of baseline still counts as responsive.
        assert_eq!(Verdict::from_share(90, 100), Verdict::Responsive);
        assert_eq!(Verdict::from_share(91, 100), Verdict::Unresponsive);
        assert_eq!(Verdict::from_share(100, 100), Verdict::Unresponsive);
        // A brand-new flow with no baseline cannot look responsive.
        assert_eq!(Verdict::from_share(1, 0), Verdict::Unresponsive);
        assert_eq!(Verdict::from_share(0, 0), Verdict::Responsive);
    }

    #[test]
    fn majority_vote_drives_reclassification() {
        let mut counters = EvidenceCounters::default();
        let mut class = FlowClass::BothUnclassified;

        // First ECN observation: responsive (tie counts as responsive).
        class = counters.reclassify(class, Evidence::Ecn, Verdict::Responsive);
        assert_eq!(class, FlowClass::EcnRespLossUnclass);

        // Two unresponsive observations flip the majority.
        class = counters.reclassify(class, Evidence::Ecn, Verdict::Unresponsive);
        assert_eq!(class, FlowClass::EcnRespLossUnclass);
        class = counters.reclassify(class, Evidence::Ecn, Verdict::Unresponsive);
        assert_eq!(class, FlowClass::EcnUnrespLossUnclass);

        // Loss evidence is tallied independently.
        class = counters.reclassify(class, Evidence::Loss, Verdict::Responsive);
        assert_eq!(class, FlowClass::EcnUnrespLossResp);
        assert_eq!(counters.responsive_loss, 1);
        assert_eq!(counters.unresponsive_ecn, 2);
    }
}
