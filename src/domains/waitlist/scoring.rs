//! Priority scoring for waitlist entries.
//!
//! Scoring is a pure function: no I/O, no side effects, deterministic for
//! unchanged inputs. Scores are recomputed at matching time; a stored score
//! is advisory only and is never trusted for ranking across ticks.

use chrono::{DateTime, Utc};

use super::models::entry::WaitlistEntry;
use crate::domains::slots::models::slot::Slot;

/// Integer weights for the scoring formula.
///
/// Invalid weight sets are a configuration error caught at startup by
/// [`ScoreWeights::validate`], never at call time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScoreWeights {
    /// Flat score every candidate starts with.
    pub base: i32,
    /// Bonus for VIP entries.
    pub vip: i32,
    /// Bonus for matching the slot's service. Candidates are pre-filtered by
    /// service, so this is always applied; it exists so the total is
    /// comparable to scores computed outside the matcher.
    pub service_match: i32,
    /// Bonus when the entry asked for the slot's staff member specifically.
    pub staff_preference: i32,
    /// Bonus when the slot's start time falls inside the entry's window.
    pub time_window: i32,
    /// Points per full week the entry has been waiting.
    pub recency_per_week: i32,
    /// Upper bound on the recency bonus.
    pub recency_cap: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 20,
            vip: 15,
            service_match: 15,
            staff_preference: 10,
            time_window: 10,
            recency_per_week: 1,
            recency_cap: 20,
        }
    }
}

impl ScoreWeights {
    /// Validates the weight set. Called once at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        let named = [
            ("base", self.base),
            ("vip", self.vip),
            ("service_match", self.service_match),
            ("staff_preference", self.staff_preference),
            ("time_window", self.time_window),
            ("recency_per_week", self.recency_per_week),
            ("recency_cap", self.recency_cap),
        ];
        for (name, value) in named {
            if value < 0 {
                anyhow::bail!("score weight `{name}` must be non-negative, got {value}");
            }
        }
        Ok(())
    }
}

/// Computes the priority score of `entry` for `slot` at time `now`.
pub fn score(entry: &WaitlistEntry, slot: &Slot, now: DateTime<Utc>, weights: &ScoreWeights) -> i32 {
    let mut total = weights.base + weights.service_match;

    if entry.vip {
        total += weights.vip;
    }

    if entry.staff_id == Some(slot.staff_id) {
        total += weights.staff_preference;
    }

    if entry.earliest_time <= slot.start_time && slot.start_time <= entry.latest_time {
        total += weights.time_window;
    }

    total + recency_bonus(entry.created_at, now, weights)
}

fn recency_bonus(created_at: DateTime<Utc>, now: DateTime<Utc>, weights: &ScoreWeights) -> i32 {
    let weeks = (now - created_at).num_weeks().max(0);
    let weeks = i32::try_from(weeks).unwrap_or(i32::MAX);
    weeks.saturating_mul(weights.recency_per_week).min(weights.recency_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::domains::slots::models::slot::tests::slot_at;
    use crate::domains::waitlist::models::entry::tests::entry_for;

    fn now() -> DateTime<Utc> {
        "2024-01-15T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn default_weights_are_valid() {
        ScoreWeights::default().validate().unwrap();
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = ScoreWeights {
            vip: -1,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn scoring_is_deterministic() {
        let slot = slot_at(now() + Duration::hours(2));
        let entry = entry_for(&slot);
        let weights = ScoreWeights::default();
        assert_eq!(
            score(&entry, &slot, now(), &weights),
            score(&entry, &slot, now(), &weights)
        );
    }

    #[test]
    fn fresh_non_vip_entry_in_window_scores_base_service_window() {
        let slot = slot_at(now() + Duration::hours(2));
        let entry = entry_for(&slot);
        // 20 base + 15 service + 10 window
        assert_eq!(score(&entry, &slot, now(), &ScoreWeights::default()), 45);
    }

    #[test]
    fn vip_flag_never_decreases_score() {
        let slot = slot_at(now() + Duration::hours(2));
        let plain = entry_for(&slot);
        let mut vip = plain.clone();
        vip.vip = true;
        let weights = ScoreWeights::default();
        assert!(score(&vip, &slot, now(), &weights) >= score(&plain, &slot, now(), &weights));
    }

    #[test]
    fn staff_preference_match_adds_bonus() {
        let slot = slot_at(now() + Duration::hours(2));
        let mut entry = entry_for(&slot);
        entry.staff_id = Some(slot.staff_id);
        // 20 + 15 + 10 staff + 10 window
        assert_eq!(score(&entry, &slot, now(), &ScoreWeights::default()), 55);
    }

    #[test]
    fn recency_grows_with_weeks_and_is_capped() {
        let slot = slot_at(now() + Duration::hours(2));
        let weights = ScoreWeights::default();

        let mut three_weeks = entry_for(&slot);
        three_weeks.created_at = now() - Duration::weeks(3);
        assert_eq!(score(&three_weeks, &slot, now(), &weights), 48);

        let mut ancient = entry_for(&slot);
        ancient.created_at = now() - Duration::weeks(500);
        // Capped at 20.
        assert_eq!(score(&ancient, &slot, now(), &weights), 65);
    }

    #[test]
    fn more_weeks_waiting_never_lowers_the_score() {
        let slot = slot_at(now() + Duration::hours(2));
        let weights = ScoreWeights::default();
        let mut previous = i32::MIN;
        for weeks in 0..30 {
            let mut entry = entry_for(&slot);
            entry.created_at = now() - Duration::weeks(weeks);
            let s = score(&entry, &slot, now(), &weights);
            assert!(s >= previous, "score dropped at {weeks} weeks");
            previous = s;
        }
    }

    #[test]
    fn slot_outside_window_gets_no_window_bonus() {
        let slot = slot_at(now() + Duration::days(30));
        let mut entry = entry_for(&slot);
        entry.latest_time = now() + Duration::days(7);
        assert_eq!(score(&entry, &slot, now(), &ScoreWeights::default()), 35);
    }
}
