//! Turns raw agent outcomes into per-attribute decision percentages.

use shared::domain::AgentOutcome;

/// Share of one decision within a single attribute group, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionShare {
    pub decision: String,
    pub percent: f64,
}

/// Decision distribution for one attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSeries {
    pub attribute: String,
    pub shares: Vec<DecisionShare>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedResults {
    /// One series per attribute that had at least one valid outcome, in
    /// first-seen attribute order. Decisions a group never took are absent
    /// from its series rather than zero-filled.
    pub series: Vec<AttributeSeries>,
    /// Every distinct decision across all outcomes, in first-seen order.
    /// Presentation layers use this as a stable column set.
    pub decision_catalog: Vec<String>,
}

struct AttributeTally {
    attribute: String,
    total: u64,
    counts: Vec<(String, u64)>,
}

/// Groups outcomes by attribute and computes each decision's percentage
/// share of that group. Outcomes without a decision are skipped entirely;
/// outcomes without an attribute still register their decision in the
/// catalog but join no series, so an attribute whose outcomes were all
/// invalid never appears in the output. Empty input yields empty output.
pub fn aggregate_outcomes(outcomes: &[AgentOutcome]) -> AggregatedResults {
    let mut tallies: Vec<AttributeTally> = Vec::new();
    let mut decision_catalog: Vec<String> = Vec::new();

    for outcome in outcomes {
        let attribute = outcome.attribute.as_str();
        let decision = outcome.result.decision.as_str();
        if decision.is_empty() {
            continue;
        }

        // the catalog spans every outcome with a decision, attributed or not
        if !decision_catalog.iter().any(|known| known.as_str() == decision) {
            decision_catalog.push(decision.to_string());
        }

        if attribute.is_empty() {
            continue;
        }

        let position = match tallies
            .iter()
            .position(|tally| tally.attribute.as_str() == attribute)
        {
            Some(position) => position,
            None => {
                tallies.push(AttributeTally {
                    attribute: attribute.to_string(),
                    total: 0,
                    counts: Vec::new(),
                });
                tallies.len() - 1
            }
        };
        let tally = &mut tallies[position];
        tally.total += 1;
        match tally
            .counts
            .iter_mut()
            .find(|(known, _)| known.as_str() == decision)
        {
            Some((_, count)) => *count += 1,
            None => tally.counts.push((decision.to_string(), 1)),
        }
    }

    let series = tallies
        .into_iter()
        .map(|tally| {
            let total = tally.total as f64;
            AttributeSeries {
                attribute: tally.attribute,
                shares: tally
                    .counts
                    .into_iter()
                    .map(|(decision, count)| DecisionShare {
                        decision,
                        percent: count as f64 / total * 100.0,
                    })
                    .collect(),
            }
        })
        .collect();

    AggregatedResults {
        series,
        decision_catalog,
    }
}

#[cfg(test)]
#[path = "tests/aggregate_tests.rs"]
mod tests;
