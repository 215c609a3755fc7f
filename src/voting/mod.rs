pub mod credibility;

pub use credibility::{batch_tally, tally};

use crate::models::VoteType;
use serde::{Deserialize, Serialize};

// Raw per-type counts for one report, as read from a vote store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCounts {
    pub true_count: u64,
    pub false_count: u64,
}

impl VoteCounts {
    #[cfg(test)]
    pub fn new(true_count: u64, false_count: u64) -> Self {
        Self { true_count, false_count }
    }

    pub fn add(&mut self, vote_type: VoteType, n: u64) {
        match vote_type {
            VoteType::True => self.true_count += n,
            VoteType::False => self.false_count += n,
        }
    }
}

// Derived view of a report's votes. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    #[serde(rename = "true")]
    pub true_count: u64,
    #[serde(rename = "false")]
    pub false_count: u64,
    pub credibility: u8,
}
