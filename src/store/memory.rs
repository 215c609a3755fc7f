use crate::error::{Error, Result};
use crate::models::{Report, ReportFilter, ReportStatus, Vote, VoteType};
use crate::store::{ReportStore, VoteStore};
use crate::voting::VoteCounts;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    reports: HashMap<String, Report>,
    // Keyed by (report_id, device_hash): one vote per device per report
    votes: HashMap<(String, String), Vote>,
}

/// Process-local store. Used when `DATABASE_URL=memory` and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
    }
}

fn matches(filter: &ReportFilter, location: &Option<Regex>, report: &Report) -> bool {
    if let Some(re) = location {
        if !re.is_match(&report.location) {
            return false;
        }
    }
    if let Some(category) = &filter.category {
        if &report.category != category {
            return false;
        }
    }
    filter.status_matches(report.status)
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn upsert_vote(&self, report_id: &str, device_hash: &str, vote_type: VoteType) -> Result<Vote> {
        let vote = Vote {
            report_id: report_id.to_string(),
            device_hash: device_hash.to_string(),
            vote_type,
            created_at: Utc::now(),
        };
        let mut tables = self.lock()?;
        tables
            .votes
            .insert((report_id.to_string(), device_hash.to_string()), vote.clone());
        Ok(vote)
    }

    async fn count_by_type(&self, report_id: &str, vote_type: VoteType) -> Result<u64> {
        let tables = self.lock()?;
        let count = tables
            .votes
            .values()
            .filter(|v| v.report_id == report_id && v.vote_type == vote_type)
            .count();
        Ok(count as u64)
    }

    async fn count_by_type_batch(&self, report_ids: &HashSet<String>) -> Result<HashMap<String, VoteCounts>> {
        let tables = self.lock()?;
        let mut counts: HashMap<String, VoteCounts> = HashMap::new();
        for vote in tables.votes.values().filter(|v| report_ids.contains(&v.report_id)) {
            counts
                .entry(vote.report_id.clone())
                .or_default()
                .add(vote.vote_type, 1);
        }
        Ok(counts)
    }

    #[cfg(test)]
    async fn votes_for_report(&self, report_id: &str) -> Result<Vec<Vote>> {
        let tables = self.lock()?;
        let mut votes: Vec<Vote> = tables
            .votes
            .values()
            .filter(|v| v.report_id == report_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.device_hash.cmp(&b.device_hash));
        Ok(votes)
    }

    async fn delete_all_for_report(&self, report_id: &str) -> Result<u64> {
        let mut tables = self.lock()?;
        let before = tables.votes.len();
        tables.votes.retain(|(r, _), _| r != report_id);
        Ok((before - tables.votes.len()) as u64)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_report(&self, report: &Report) -> Result<()> {
        let mut tables = self.lock()?;
        tables.reports.insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn find_reports(&self, filter: &ReportFilter, skip: u64, limit: u64) -> Result<Vec<Report>> {
        let location = filter.location_matcher()?;
        let tables = self.lock()?;
        let mut found: Vec<Report> = tables
            .reports
            .values()
            .filter(|r| matches(filter, &location, r))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(found
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64> {
        let location = filter.location_matcher()?;
        let tables = self.lock()?;
        let count = tables
            .reports
            .values()
            .filter(|r| matches(filter, &location, r))
            .count();
        Ok(count as u64)
    }

    async fn find_report_by_id(&self, id: &str) -> Result<Option<Report>> {
        let tables = self.lock()?;
        Ok(tables.reports.get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: ReportStatus) -> Result<bool> {
        let mut tables = self.lock()?;
        match tables.reports.get_mut(id) {
            Some(report) => {
                report.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_report(&self, id: &str) -> Result<bool> {
        let mut tables = self.lock()?;
        Ok(tables.reports.remove(id).is_some())
    }

    async fn distinct_categories(&self) -> Result<Vec<String>> {
        let tables = self.lock()?;
        let set: BTreeSet<String> = tables.reports.values().map(|r| r.category.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn distinct_locations(&self) -> Result<Vec<String>> {
        let tables = self.lock()?;
        let set: BTreeSet<String> = tables.reports.values().map(|r| r.location.clone()).collect();
        Ok(set.into_iter().collect())
    }
}
