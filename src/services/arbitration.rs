//! Routing between memory and the generator.
//!
//! The regime is derived from the topic's confidence band on every call;
//! nothing about it is stored. The decision depends only on the band, the
//! ranked candidates and the configured thresholds.

use super::RecallCandidate;
use crate::config::ArbitrationConfig;
use crate::models::{ConfidenceBand, Regime, Route};

/// Outcome of one arbitration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// Regime the band maps to.
    pub regime: Regime,
    /// Route to take.
    pub route: Route,
    /// Index of the candidate to answer with when autonomous.
    pub chosen: Option<usize>,
    /// Score of the top candidate, if any.
    pub top_score: Option<f32>,
}

/// Decides between answering from memory and delegating.
#[derive(Debug, Clone, Default)]
pub struct ArbitrationController {
    config: ArbitrationConfig,
}

impl ArbitrationController {
    /// Creates a controller.
    #[must_use]
    pub const fn new(config: ArbitrationConfig) -> Self {
        Self { config }
    }

    /// Decides the route for ranked `candidates` under `band`.
    ///
    /// - Symbiosis always delegates.
    /// - Evolving answers from memory when the top score exceeds the
    ///   acceptance threshold.
    /// - Autonomous answers from memory when the top score exceeds the relevance
    ///   floor.
    #[must_use]
    pub fn decide(&self, band: ConfidenceBand, candidates: &[RecallCandidate]) -> Verdict {
        let regime = Regime::from_band(band);
        let top_score = candidates.first().map(|c| c.score);

        let autonomous = match regime {
            Regime::Symbiosis => false,
            Regime::Evolving => top_score.is_some_and(|s| s > self.config.acceptance_threshold),
            Regime::Autonomous => top_score.is_some_and(|s| s > self.config.relevance_floor),
        };
        let route = if autonomous {
            Route::Autonomous
        } else {
            Route::Delegated
        };

        metrics::counter!(
            "arbitration_decisions_total",
            "regime" => regime.as_str(),
            "route" => route.as_str()
        )
        .increment(1);

        Verdict {
            regime,
            route,
            chosen: autonomous.then_some(0),
            top_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryItem;
    use test_case::test_case;

    fn candidates(scores: &[f32]) -> Vec<RecallCandidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| RecallCandidate {
                item: MemoryItem::new(format!("m{i}"), vec![1.0], 1),
                similarity: *score,
                score: *score,
            })
            .collect()
    }

    #[test_case(ConfidenceBand::Low, &[0.99] => Route::Delegated ; "symbiosis ignores memory")]
    #[test_case(ConfidenceBand::Medium, &[0.61] => Route::Autonomous ; "evolving above acceptance")]
    #[test_case(ConfidenceBand::Medium, &[0.6] => Route::Delegated ; "evolving at acceptance")]
    #[test_case(ConfidenceBand::Medium, &[] => Route::Delegated ; "evolving without candidates")]
    #[test_case(ConfidenceBand::High, &[0.31] => Route::Autonomous ; "autonomous above floor")]
    #[test_case(ConfidenceBand::High, &[0.3] => Route::Delegated ; "autonomous at floor")]
    #[test_case(ConfidenceBand::High, &[0.29] => Route::Delegated ; "autonomous below floor")]
    #[test_case(ConfidenceBand::High, &[] => Route::Delegated ; "autonomous without candidates")]
    fn test_route_table(band: ConfidenceBand, scores: &[f32]) -> Route {
        ArbitrationController::default()
            .decide(band, &candidates(scores))
            .route
    }

    #[test]
    fn test_autonomous_picks_top_candidate() {
        let verdict =
            ArbitrationController::default().decide(ConfidenceBand::High, &candidates(&[0.9, 0.5]));
        assert_eq!(verdict.regime, Regime::Autonomous);
        assert_eq!(verdict.chosen, Some(0));
        assert_eq!(verdict.top_score, Some(0.9));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let controller = ArbitrationController::default();
        let ranked = candidates(&[0.7, 0.2]);
        let first = controller.decide(ConfidenceBand::Medium, &ranked);
        for _ in 0..10 {
            assert_eq!(controller.decide(ConfidenceBand::Medium, &ranked), first);
        }
    }
}
