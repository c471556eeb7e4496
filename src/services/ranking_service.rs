use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::db::repositories::performance_repository::PerformanceRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::month::Month;
use crate::models::performance::PerformanceScore;
use crate::utils::locks::EngineLocks;

fn ranking_order(left: &PerformanceScore, right: &PerformanceScore) -> Ordering {
    right
        .final_score
        .cmp(&left.final_score)
        .then_with(|| left.user_id.cmp(&right.user_id))
}

/// Orders by final score descending, then user id ascending, and numbers the
/// result from 1. Ties never share a rank.
pub fn assign_ranks(mut scores: Vec<PerformanceScore>) -> Vec<PerformanceScore> {
    scores.sort_by(ranking_order);
    for (index, score) in scores.iter_mut().enumerate() {
        score.rank = Some(index as u32 + 1);
    }
    scores
}

pub struct RankingService {
    db: DbPool,
    locks: Arc<EngineLocks>,
}

impl RankingService {
    pub fn new(db: DbPool, locks: Arc<EngineLocks>) -> Self {
        Self { db, locks }
    }

    /// Ranks every stored score of the month and writes the ranks back.
    ///
    /// Holds the month exclusively, so no aggregation of the month can land
    /// between the read and the write.
    pub fn rank(&self, month: &Month) -> AppResult<Vec<PerformanceScore>> {
        self.locks.months.exclusive(month, || {
            let ranked = self.db.with_transaction(|tx| {
                let ranked = assign_ranks(PerformanceRepository::list_by_month(tx, month)?);
                for score in &ranked {
                    PerformanceRepository::update_rank(tx, &score.user_id, month, score.rank)?;
                }
                Ok(ranked)
            })?;

            info!(target: "app::ranking", %month, ranked = ranked.len(), "month ranked");
            Ok(ranked)
        })
    }

    pub fn get_ranking(&self, month: &Month) -> AppResult<Vec<PerformanceScore>> {
        self.db
            .with_connection(|conn| PerformanceRepository::list_by_month(conn, month))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::performance::{DimensionScores, RawMetrics, ScoreStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn score(user_id: &str, final_score: Decimal) -> PerformanceScore {
        PerformanceScore {
            user_id: user_id.into(),
            month: Month::new(2024, 3).expect("month"),
            dimensions: DimensionScores::default(),
            raw: RawMetrics::default(),
            final_score,
            rank: None,
            status: ScoreStatus::Complete,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn ties_break_on_user_id() {
        let ranked = assign_ranks(vec![score("u2", dec!(87.50)), score("u1", dec!(87.50))]);
        assert_eq!(ranked[0].user_id, "u1");
        assert_eq!(ranked[0].rank, Some(1));
        assert_eq!(ranked[1].user_id, "u2");
        assert_eq!(ranked[1].rank, Some(2));
    }

    #[test]
    fn ranks_are_sequential_and_idempotent() {
        let input = vec![
            score("c", dec!(40)),
            score("a", dec!(90.25)),
            score("b", dec!(90.25)),
            score("d", dec!(95)),
        ];
        let once = assign_ranks(input);
        let twice = assign_ranks(once.clone());

        let order: Vec<_> = once.iter().map(|s| (s.user_id.as_str(), s.rank)).collect();
        assert_eq!(
            order,
            vec![("d", Some(1)), ("a", Some(2)), ("b", Some(3)), ("c", Some(4))]
        );
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_month_ranks_nothing() {
        assert!(assign_ranks(Vec::new()).is_empty());
    }
}
