//! Ranking of candidate insertion sites
//!
//! A [`SiteRanker`] turns feature records into an ordered list of sites. Any scoring
//! function can be plugged in; two simple ones are provided.

use serde::{Deserialize, Serialize};

use crate::features::FeatureRecord;

/// A ranked insertion site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Name of the net
    pub net: String,
    /// Suitability, in [0, 1]
    pub score: f64,
}

/// Scoring of insertion sites
pub trait SiteRanker {
    /// Suitability of a site; higher is better
    fn score(&self, features: &FeatureRecord) -> f64;

    /// Return at most k sites, best first
    ///
    /// Scores are clamped to [0, 1]. Ties keep the order of the feature records.
    fn rank(&self, features: &[FeatureRecord], k: usize) -> Vec<Site> {
        let mut sites: Vec<Site> = features
            .iter()
            .map(|f| Site {
                net: f.net_name.clone(),
                score: clamp_score(self.score(f)),
            })
            .collect();
        // Stable sort: equal scores keep their input order
        sites.sort_by(|a, b| b.score.total_cmp(&a.score));
        sites.truncate(k);
        sites
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Rank purely by testability, brought back to [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct TestabilityRanker;

impl SiteRanker for TestabilityRanker {
    fn score(&self, features: &FeatureRecord) -> f64 {
        features.testability / 2.0
    }
}

/// Weighted combination of structural features
///
/// Favours nets that are hard to control and observe, buried at a moderate depth,
/// and with a large fanout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicRanker {
    /// Weight of the average controllability
    pub controllability_weight: f64,
    /// Weight of the observability
    pub observability_weight: f64,
    /// Weight of the closeness to the preferred depth
    pub depth_weight: f64,
    /// Weight of the fanout
    pub fanout_weight: f64,
    /// Preferred logic depth
    pub preferred_depth: f64,
    /// Fanout at which the fanout term saturates
    pub fanout_scale: f64,
}

impl Default for HeuristicRanker {
    fn default() -> Self {
        HeuristicRanker {
            controllability_weight: 0.3,
            observability_weight: 0.3,
            depth_weight: 0.2,
            fanout_weight: 0.2,
            preferred_depth: 25.0,
            fanout_scale: 20.0,
        }
    }
}

impl SiteRanker for HeuristicRanker {
    fn score(&self, f: &FeatureRecord) -> f64 {
        let depth = 1.0 - (f.logic_depth as f64 - self.preferred_depth).abs() / self.preferred_depth;
        let fanout = f.fanout as f64 / self.fanout_scale;
        self.controllability_weight * f.avg_controllability
            + self.observability_weight * f.observability
            + self.depth_weight * depth
            + self.fanout_weight * fanout
    }
}

/// Write the score of each record into its stealth score
pub fn annotate<R: SiteRanker + ?Sized>(ranker: &R, features: &mut [FeatureRecord]) {
    for f in features {
        f.stealth_score = clamp_score(ranker.score(f));
    }
}

#[cfg(test)]
mod tests {
    use super::{annotate, HeuristicRanker, SiteRanker, TestabilityRanker};
    use crate::features::FeatureRecord;

    fn record(name: &str, testability: f64) -> FeatureRecord {
        FeatureRecord {
            net_name: name.to_owned(),
            fanin: 1,
            fanout: 1,
            logic_depth: 1,
            controllability_0: testability / 2.0,
            controllability_1: testability / 2.0,
            observability: testability / 2.0,
            avg_controllability: testability / 2.0,
            testability,
            stealth_score: 0.0,
        }
    }

    #[test]
    fn test_testability_rank() {
        let features = vec![
            record("a", 0.5),
            record("b", 1.5),
            record("c", 0.5),
            record("d", 1.0),
        ];
        let sites = TestabilityRanker.rank(&features, 3);
        let names: Vec<&str> = sites.iter().map(|s| s.net.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a"]);
        assert_eq!(sites[0].score, 0.75);
        assert_eq!(sites[2].score, 0.25);

        // Ties keep the input order
        let sites = TestabilityRanker.rank(&features, 10);
        let names: Vec<&str> = sites.iter().map(|s| s.net.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
        assert!(TestabilityRanker.rank(&features, 0).is_empty());
    }

    #[test]
    fn test_heuristic_rank() {
        let ranker = HeuristicRanker::default();
        let mut buried = record("buried", 2.0);
        buried.logic_depth = 25;
        buried.fanout = 40;
        let shallow = record("shallow", 0.0);
        let sites = ranker.rank(&[shallow.clone(), buried.clone()], 2);
        assert_eq!(sites[0].net, "buried");
        // 0.3 + 0.3 + 0.2 + 0.4, clamped
        assert_eq!(sites[0].score, 1.0);
        for s in &sites {
            assert!((0.0..=1.0).contains(&s.score));
        }

        let mut features = vec![shallow, buried];
        annotate(&ranker, &mut features);
        assert_eq!(features[1].stealth_score, 1.0);
        assert!(features[0].stealth_score < 1.0);
    }
}
