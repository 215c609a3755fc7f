use crate::voting::{Tally, VoteCounts};
use std::collections::HashMap;

/// Turns raw counts into a tally.
///
/// Credibility is the share of `true` votes as a whole percentage, rounded
/// half-up. With no votes at all it is exactly 0.
pub fn tally(true_count: u64, false_count: u64) -> Tally {
    let total = true_count + false_count;

    let credibility = if total == 0 {
        0
    } else {
        // floor(100t/n + 1/2) in integers, so 50.0 and x.5 land exactly
        ((200 * true_count + total) / (2 * total)) as u8
    };

    Tally {
        true_count,
        false_count,
        credibility,
    }
}

pub fn tally_counts(counts: VoteCounts) -> Tally {
    tally(counts.true_count, counts.false_count)
}

/// Tallies every report in `counts`, plus a zeroed tally for each id in
/// `report_ids` that has no counts at all.
pub fn batch_tally(counts: &HashMap<String, VoteCounts>, report_ids: &[String]) -> HashMap<String, Tally> {
    let mut tallies: HashMap<String, Tally> = counts
        .iter()
        .map(|(report_id, c)| (report_id.clone(), tally_counts(*c)))
        .collect();

    for report_id in report_ids {
        tallies.entry(report_id.clone()).or_insert_with(|| tally(0, 0));
    }

    tallies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_votes_is_zero() {
        assert_eq!(
            tally(0, 0),
            Tally { true_count: 0, false_count: 0, credibility: 0 }
        );
    }

    #[test]
    fn test_credibility_formula() {
        assert_eq!(tally(3, 1).credibility, 75);
        assert_eq!(tally(1, 3).credibility, 25);
        assert_eq!(tally(1, 1).credibility, 50);
        assert_eq!(tally(5, 0).credibility, 100);
        assert_eq!(tally(0, 5).credibility, 0);
    }

    #[test]
    fn test_rounds_half_up() {
        // 1/8 = 12.5%
        assert_eq!(tally(1, 7).credibility, 13);
        // 2/3 = 66.67%, 1/3 = 33.33%
        assert_eq!(tally(2, 1).credibility, 67);
        assert_eq!(tally(1, 2).credibility, 33);
        // 1/200 = 0.5%
        assert_eq!(tally(1, 199).credibility, 1);
    }

    #[test]
    fn test_batch_fills_missing_reports() {
        let mut counts = HashMap::new();
        counts.insert("a".to_string(), VoteCounts::new(3, 1));

        let ids = vec!["a".to_string(), "b".to_string()];
        let tallies = batch_tally(&counts, &ids);

        assert_eq!(tallies.len(), 2);
        assert_eq!(tallies["a"], tally(3, 1));
        assert_eq!(tallies["b"], tally(0, 0));
    }

    #[test]
    fn test_batch_matches_single() {
        let mut counts = HashMap::new();
        counts.insert("x".to_string(), VoteCounts::new(7, 2));
        counts.insert("y".to_string(), VoteCounts::new(0, 4));
        counts.insert("z".to_string(), VoteCounts::new(1, 1));

        let tallies = batch_tally(&counts, &[]);
        for (id, c) in &counts {
            assert_eq!(tallies[id], tally(c.true_count, c.false_count));
        }
    }

    #[test]
    fn test_tally_json_shape() {
        let json = serde_json::to_value(tally(3, 1)).unwrap();
        assert_eq!(json, serde_json::json!({"true": 3, "false": 1, "credibility": 75}));
    }
}
