//! Folding of sub-commission results along a commission's relations.
//!
//! Relations are visited by ascending priority and the first one that yields a
//! value decides the outcome. A target without a result falls through to the next
//! target under take-highest-priority and contributes nothing under the aggregate
//! methods; it is never read as zero points.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{CommissionId, CommissionRelation, RelationId, ResultCalculationMethod};
use super::points::floor_to_cents;

/// Result a target commission holds for the entity and year being aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TargetResult {
    Classification(String),
    Points(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub result: TargetResult,
    pub relation: RelationId,
    pub method: ResultCalculationMethod,
    /// Targets whose results were used, in evaluation order.
    pub contributors: Vec<CommissionId>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("relation {relation} cannot combine classification codes with {method}")]
    NotCombinable {
        relation: RelationId,
        method: &'static str,
    },
    #[error("no target of commission {commission} has a result to aggregate")]
    MissingCommissionRelationTarget { commission: CommissionId },
    #[error("relation {relation} does not leave commission {commission}")]
    ForeignRelation {
        relation: RelationId,
        commission: CommissionId,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommissionRelationAggregator;

impl CommissionRelationAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(
        &self,
        source: CommissionId,
        relations: &[CommissionRelation],
        per_target: &BTreeMap<CommissionId, TargetResult>,
    ) -> Result<AggregatedResult, AggregationError> {
        if let Some(foreign) = relations.iter().find(|relation| relation.source != source) {
            return Err(AggregationError::ForeignRelation {
                relation: foreign.id,
                commission: source,
            });
        }

        let mut ordered: Vec<&CommissionRelation> = relations.iter().collect();
        ordered.sort_by_key(|relation| (relation.priority, relation.id));

        for relation in ordered {
            if let Some(result) = fold_relation(relation, per_target)? {
                debug!(
                    %source,
                    relation = %relation.id,
                    method = relation.method.label(),
                    "commission result aggregated"
                );
                return Ok(result);
            }
        }

        Err(AggregationError::MissingCommissionRelationTarget { commission: source })
    }
}

fn fold_relation(
    relation: &CommissionRelation,
    per_target: &BTreeMap<CommissionId, TargetResult>,
) -> Result<Option<AggregatedResult>, AggregationError> {
    let mut present = relation
        .targets
        .iter()
        .filter_map(|target| per_target.get(target).map(|result| (*target, result)));

    if relation.method == ResultCalculationMethod::TakeHighestPriority {
        return Ok(present.next().map(|(target, result)| AggregatedResult {
            result: result.clone(),
            relation: relation.id,
            method: relation.method,
            contributors: vec![target],
        }));
    }

    let mut contributors = Vec::new();
    let mut values = Vec::new();
    for (target, result) in present {
        match result {
            TargetResult::Points(points) => {
                contributors.push(target);
                values.push(*points);
            }
            TargetResult::Classification(_) => {
                return Err(AggregationError::NotCombinable {
                    relation: relation.id,
                    method: relation.method.label(),
                })
            }
        }
    }

    if values.is_empty() {
        return Ok(None);
    }

    let combined = match relation.method {
        ResultCalculationMethod::AggregateSum => values.iter().sum(),
        ResultCalculationMethod::AggregateMax => values.iter().copied().fold(f64::MIN, f64::max),
        ResultCalculationMethod::AggregateMin => values.iter().copied().fold(f64::MAX, f64::min),
        ResultCalculationMethod::AggregateAverage => {
            values.iter().sum::<f64>() / values.len() as f64
        }
        ResultCalculationMethod::TakeHighestPriority => values[0],
    };

    Ok(Some(AggregatedResult {
        result: TargetResult::Points(floor_to_cents(combined)),
        relation: relation.id,
        method: relation.method,
        contributors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(
        id: u64,
        priority: i32,
        targets: &[u64],
        method: ResultCalculationMethod,
    ) -> CommissionRelation {
        CommissionRelation {
            id: RelationId(id),
            source: CommissionId(1),
            targets: targets.iter().copied().map(CommissionId).collect(),
            priority,
            method,
        }
    }

    fn points(value: f64) -> TargetResult {
        TargetResult::Points(value)
    }

    #[test]
    fn take_highest_priority_falls_through_missing_target() {
        let relations = vec![
            relation(1, 1, &[10], ResultCalculationMethod::TakeHighestPriority),
            relation(2, 2, &[20], ResultCalculationMethod::TakeHighestPriority),
        ];
        let mut results = BTreeMap::new();
        results.insert(
            CommissionId(20),
            TargetResult::Classification("M21".to_string()),
        );

        let aggregated = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect("second relation supplies a result");

        assert_eq!(
            aggregated.result,
            TargetResult::Classification("M21".to_string())
        );
        assert_eq!(aggregated.relation, RelationId(2));
        assert_eq!(aggregated.contributors, vec![CommissionId(20)]);
    }

    #[test]
    fn take_highest_priority_within_one_relation_uses_target_order() {
        let relations = vec![relation(
            1,
            1,
            &[10, 20, 30],
            ResultCalculationMethod::TakeHighestPriority,
        )];
        let mut results = BTreeMap::new();
        results.insert(CommissionId(20), TargetResult::Classification("M22".into()));
        results.insert(CommissionId(30), TargetResult::Classification("M21".into()));

        let aggregated = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect("a target has a result");
        assert_eq!(aggregated.result, TargetResult::Classification("M22".into()));
    }

    #[test]
    fn sum_skips_missing_target() {
        let relations = vec![relation(
            1,
            1,
            &[10, 20, 30],
            ResultCalculationMethod::AggregateSum,
        )];
        let mut results = BTreeMap::new();
        results.insert(CommissionId(10), points(10.0));
        results.insert(CommissionId(30), points(5.0));

        let aggregated = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect("two targets contribute");
        assert_eq!(aggregated.result, points(15.0));
        assert_eq!(
            aggregated.contributors,
            vec![CommissionId(10), CommissionId(30)]
        );
    }

    #[test]
    fn average_counts_only_present_targets() {
        let relations = vec![relation(
            1,
            1,
            &[10, 20, 30],
            ResultCalculationMethod::AggregateAverage,
        )];
        let mut results = BTreeMap::new();
        results.insert(CommissionId(10), points(10.0));
        results.insert(CommissionId(30), points(5.0));

        let aggregated = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect("two targets contribute");
        assert_eq!(aggregated.result, points(7.5));
    }

    #[test]
    fn max_and_min_pick_extremes() {
        let mut results = BTreeMap::new();
        results.insert(CommissionId(10), points(2.5));
        results.insert(CommissionId(20), points(8.0));
        let aggregator = CommissionRelationAggregator::new();

        let max = aggregator
            .aggregate(
                CommissionId(1),
                &[relation(1, 1, &[10, 20], ResultCalculationMethod::AggregateMax)],
                &results,
            )
            .expect("max resolves");
        let min = aggregator
            .aggregate(
                CommissionId(1),
                &[relation(1, 1, &[10, 20], ResultCalculationMethod::AggregateMin)],
                &results,
            )
            .expect("min resolves");

        assert_eq!(max.result, points(8.0));
        assert_eq!(min.result, points(2.5));
    }

    #[test]
    fn classification_codes_are_not_combinable() {
        let relations = vec![relation(1, 1, &[10], ResultCalculationMethod::AggregateSum)];
        let mut results = BTreeMap::new();
        results.insert(CommissionId(10), TargetResult::Classification("M21".into()));

        let error = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect_err("codes cannot be summed");
        assert_eq!(
            error,
            AggregationError::NotCombinable {
                relation: RelationId(1),
                method: "aggregate_sum",
            }
        );
    }

    #[test]
    fn lower_priority_value_wins_regardless_of_input_order() {
        let relations = vec![
            relation(2, 5, &[20], ResultCalculationMethod::AggregateSum),
            relation(1, 1, &[10], ResultCalculationMethod::AggregateSum),
        ];
        let mut results = BTreeMap::new();
        results.insert(CommissionId(10), points(1.0));
        results.insert(CommissionId(20), points(9.0));

        let aggregated = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &results)
            .expect("priority 1 resolves");
        assert_eq!(aggregated.relation, RelationId(1));
        assert_eq!(aggregated.result, points(1.0));
    }

    #[test]
    fn reports_missing_targets_when_nothing_contributes() {
        let relations = vec![
            relation(1, 1, &[10], ResultCalculationMethod::AggregateSum),
            relation(2, 2, &[20], ResultCalculationMethod::TakeHighestPriority),
        ];

        let error = CommissionRelationAggregator::new()
            .aggregate(CommissionId(1), &relations, &BTreeMap::new())
            .expect_err("no results at all");
        assert_eq!(
            error,
            AggregationError::MissingCommissionRelationTarget {
                commission: CommissionId(1)
            }
        );
    }
}
