//! Storage seams used by the services.
//!
//! Both traits are implemented by the SQLite [`Database`](crate::db::Database)
//! and by [`MemoryStore`](memory::MemoryStore).

pub mod memory;

use crate::error::Result;
use crate::models::{Report, ReportFilter, ReportStatus, Vote, VoteType};
use crate::voting::VoteCounts;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Inserts the vote for (report, device) or overwrites the existing one.
    /// Never leaves two rows for the same pair.
    async fn upsert_vote(&self, report_id: &str, device_hash: &str, vote_type: VoteType) -> Result<Vote>;

    async fn count_by_type(&self, report_id: &str, vote_type: VoteType) -> Result<u64>;

    /// Per-report counts for every requested id in a single read. Reports
    /// without any votes are simply absent from the map.
    async fn count_by_type_batch(&self, report_ids: &HashSet<String>) -> Result<HashMap<String, VoteCounts>>;

    #[cfg(test)]
    async fn votes_for_report(&self, report_id: &str) -> Result<Vec<Vote>>;

    /// Returns the number of votes removed.
    async fn delete_all_for_report(&self, report_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert_report(&self, report: &Report) -> Result<()>;

    /// Matching reports, newest first.
    async fn find_reports(&self, filter: &ReportFilter, skip: u64, limit: u64) -> Result<Vec<Report>>;

    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64>;

    async fn find_report_by_id(&self, id: &str) -> Result<Option<Report>>;

    /// Returns false when no report had that id.
    async fn set_status(&self, id: &str, status: ReportStatus) -> Result<bool>;

    /// Returns false when no report had that id.
    async fn delete_report(&self, id: &str) -> Result<bool>;

    async fn distinct_categories(&self) -> Result<Vec<String>>;

    async fn distinct_locations(&self) -> Result<Vec<String>>;
}
