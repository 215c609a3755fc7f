use crate::error::{Error, Result};
use crate::models::{
    parse_report_id, NewReport, PageRequest, Report, ReportFilter, ReportPage, ReportStatus, ReportWithTally, VoteType,
};
use crate::store::{ReportStore, VoteStore};
use crate::voting::{batch_tally, tally, Tally};
use log::{debug, info, warn};
use std::collections::HashSet;

/// One page of reports, each joined with its tally.
///
/// Vote counts for the whole page come from a single batch read, however
/// many reports the page holds.
pub async fn list_reports(
    reports: &dyn ReportStore,
    votes: &dyn VoteStore,
    filter: &ReportFilter,
    page: PageRequest,
) -> Result<ReportPage> {
    let found = reports
        .find_reports(filter, page.offset(), page.limit as u64)
        .await?;
    let total = reports.count_reports(filter).await?;

    let report_ids: Vec<String> = found.iter().map(|r| r.id.clone()).collect();
    let id_set: HashSet<String> = report_ids.iter().cloned().collect();
    let counts = votes.count_by_type_batch(&id_set).await?;
    let tallies = batch_tally(&counts, &report_ids);

    debug!(
        "Listed {} of {} report(s) on page {} ({:?})",
        found.len(),
        total,
        page.page,
        filter
    );

    let reports = found
        .into_iter()
        .map(|report| {
            let votes = tallies.get(&report.id).copied().unwrap_or_default();
            ReportWithTally { report, votes }
        })
        .collect();

    Ok(ReportPage {
        reports,
        total_pages: page.total_pages(total),
        current_page: page.page,
    })
}

/// Tally for a single report via two per-type counts.
pub async fn report_tally(votes: &dyn VoteStore, report_id: &str) -> Result<Tally> {
    let true_count = votes.count_by_type(report_id, VoteType::True).await?;
    let false_count = votes.count_by_type(report_id, VoteType::False).await?;
    Ok(tally(true_count, false_count))
}

pub async fn get_report(reports: &dyn ReportStore, votes: &dyn VoteStore, report_id: &str) -> Result<ReportWithTally> {
    let report_id = parse_report_id(report_id)?;
    let report = reports
        .find_report_by_id(&report_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Report {} not found", report_id)))?;

    let votes = report_tally(votes, &report_id).await?;
    Ok(ReportWithTally { report, votes })
}

pub async fn create_report(reports: &dyn ReportStore, submission: NewReport) -> Result<Report> {
    let report = Report::new(submission)?;
    reports.insert_report(&report).await?;
    info!("Created report {} in {} ({})", report.id, report.location, report.category);
    Ok(report)
}

/// Admin delete: removes the report and every vote cast on it.
///
/// Orphaned votes are cleared even when the report itself is already gone,
/// in which case NotFound is still returned.
pub async fn delete_report(
    reports: &dyn ReportStore,
    votes: &dyn VoteStore,
    report_id: &str,
    authorized: bool,
) -> Result<()> {
    if !authorized {
        warn!("Refused unauthorized delete of report {}", report_id);
        return Err(Error::Unauthorized);
    }
    let report_id = parse_report_id(report_id)?;

    let existed = reports.delete_report(&report_id).await?;
    let removed = votes.delete_all_for_report(&report_id).await?;

    if !existed {
        return Err(Error::NotFound(format!("Report {} not found", report_id)));
    }
    info!("Deleted report {} and {} vote(s)", report_id, removed);
    Ok(())
}

pub async fn moderate_report(
    reports: &dyn ReportStore,
    report_id: &str,
    status: ReportStatus,
    authorized: bool,
) -> Result<Report> {
    if !authorized {
        warn!("Refused unauthorized moderation of report {}", report_id);
        return Err(Error::Unauthorized);
    }
    let report_id = parse_report_id(report_id)?;

    if !reports.set_status(&report_id, status).await? {
        return Err(Error::NotFound(format!("Report {} not found", report_id)));
    }
    info!("Report {} moved to {}", report_id, status);

    reports
        .find_report_by_id(&report_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Report {} not found", report_id)))
}

pub async fn list_categories(reports: &dyn ReportStore) -> Result<Vec<String>> {
    reports.distinct_categories().await
}

pub async fn list_locations(reports: &dyn ReportStore) -> Result<Vec<String>> {
    reports.distinct_locations().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn submission(location: &str, category: &str) -> NewReport {
        NewReport {
            title: "Inflated road contract".into(),
            description: "Invoice is triple the market rate".into(),
            location: location.into(),
            category: Some(category.into()),
            images: vec![],
        }
    }

    // Inserts a report created `age_minutes` ago with the given status
    async fn seed(store: &dyn ReportStore, location: &str, status: ReportStatus, age_minutes: i64) -> Report {
        let mut report = Report::new(submission(location, "Procurement")).unwrap();
        report.status = status;
        report.created_at = Utc::now() - Duration::minutes(age_minutes);
        store.insert_report(&report).await.unwrap();
        report
    }

    fn page(page: u32, limit: u32) -> PageRequest {
        PageRequest::new(page, limit, 100).unwrap()
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = MemoryStore::new();
        for i in 0..25 {
            seed(&store, "Harare", ReportStatus::Approved, i).await;
        }

        let first = list_reports(&store, &store, &ReportFilter::default(), page(1, 10)).await.unwrap();
        assert_eq!(first.reports.len(), 10);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.current_page, 1);

        let last = list_reports(&store, &store, &ReportFilter::default(), page(3, 10)).await.unwrap();
        assert_eq!(last.reports.len(), 5);
        assert_eq!(last.current_page, 3);

        let beyond = list_reports(&store, &store, &ReportFilter::default(), page(4, 10)).await.unwrap();
        assert!(beyond.reports.is_empty());
        assert_eq!(beyond.total_pages, 3);
    }

    #[tokio::test]
    async fn test_newest_first() {
        let store = MemoryStore::new();
        let old = seed(&store, "Lusaka", ReportStatus::Pending, 60).await;
        let new = seed(&store, "Lusaka", ReportStatus::Pending, 1).await;

        let listed = list_reports(&store, &store, &ReportFilter::default(), page(1, 10)).await.unwrap();
        assert_eq!(listed.reports[0].report.id, new.id);
        assert_eq!(listed.reports[1].report.id, old.id);
    }

    #[tokio::test]
    async fn test_default_status_filter() {
        let store = MemoryStore::new();
        seed(&store, "Gaborone", ReportStatus::Pending, 3).await;
        seed(&store, "Gaborone", ReportStatus::Approved, 2).await;
        let rejected = seed(&store, "Gaborone", ReportStatus::Rejected, 1).await;

        let listed = list_reports(&store, &store, &ReportFilter::default(), page(1, 10)).await.unwrap();
        assert_eq!(listed.reports.len(), 2);
        assert!(listed.reports.iter().all(|r| r.report.status != ReportStatus::Rejected));

        let filter = ReportFilter {
            status: Some(ReportStatus::Rejected),
            ..Default::default()
        };
        let listed = list_reports(&store, &store, &filter, page(1, 10)).await.unwrap();
        assert_eq!(listed.reports.len(), 1);
        assert_eq!(listed.reports[0].report.id, rejected.id);
    }

    #[tokio::test]
    async fn test_category_and_location_filters() {
        let store = MemoryStore::new();
        store.insert_report(&Report::new(submission("Port Harcourt", "Police")).unwrap()).await.unwrap();
        store.insert_report(&Report::new(submission("Port Louis", "Customs")).unwrap()).await.unwrap();
        store.insert_report(&Report::new(submission("Kigali", "Police")).unwrap()).await.unwrap();

        let filter = ReportFilter {
            location: Some("port".into()),
            category: Some("Police".into()),
            status: None,
        };
        let listed = list_reports(&store, &store, &filter, page(1, 10)).await.unwrap();
        assert_eq!(listed.reports.len(), 1);
        assert_eq!(listed.reports[0].report.location, "Port Harcourt");
    }

    #[tokio::test]
    async fn test_zero_vote_reports_get_zeroed_tally() {
        let store = MemoryStore::new();
        let voted = seed(&store, "Maputo", ReportStatus::Approved, 2).await;
        let quiet = seed(&store, "Maputo", ReportStatus::Approved, 1).await;
        store.upsert_vote(&voted.id, "d1", VoteType::True).await.unwrap();
        store.upsert_vote(&voted.id, "d2", VoteType::True).await.unwrap();
        store.upsert_vote(&voted.id, "d3", VoteType::True).await.unwrap();
        store.upsert_vote(&voted.id, "d4", VoteType::False).await.unwrap();

        let listed = list_reports(&store, &store, &ReportFilter::default(), page(1, 10)).await.unwrap();
        let by_id: HashMap<&str, Tally> = listed
            .reports
            .iter()
            .map(|r| (r.report.id.as_str(), r.votes))
            .collect();
        assert_eq!(by_id[voted.id.as_str()], tally(3, 1));
        assert_eq!(by_id[quiet.id.as_str()], tally(0, 0));

        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json["reports"][0]["votes"]["credibility"], 0);
        assert_eq!(json["reports"][1]["votes"]["credibility"], 75);
        assert_eq!(json["totalPages"], 1);
    }

    async fn assert_batch_matches_single(reports: &dyn ReportStore, votes: &dyn VoteStore) {
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(seed(reports, "Windhoek", ReportStatus::Approved, i).await.id);
        }
        let pattern = [(0, 0), (3, 1), (1, 3), (2, 2)];
        for (id, (t, f)) in ids.iter().zip(pattern) {
            for n in 0..t {
                votes.upsert_vote(id, &format!("t{}", n), VoteType::True).await.unwrap();
            }
            for n in 0..f {
                votes.upsert_vote(id, &format!("f{}", n), VoteType::False).await.unwrap();
            }
        }

        let listed = list_reports(reports, votes, &ReportFilter::default(), page(1, 10)).await.unwrap();
        assert_eq!(listed.reports.len(), 4);
        for entry in &listed.reports {
            let single = report_tally(votes, &entry.report.id).await.unwrap();
            assert_eq!(entry.votes, single);
        }
    }

    #[tokio::test]
    async fn test_batch_consistency_memory() {
        let store = MemoryStore::new();
        assert_batch_matches_single(&store, &store).await;
    }

    #[tokio::test]
    async fn test_batch_consistency_sqlite() {
        let db = Database::connect("sqlite::memory:", 1).await.unwrap();
        assert_batch_matches_single(&db, &db).await;
    }

    #[tokio::test]
    async fn test_get_report() {
        let store = MemoryStore::new();
        let report = seed(&store, "Lilongwe", ReportStatus::Pending, 0).await;
        store.upsert_vote(&report.id, "d1", VoteType::True).await.unwrap();

        let fetched = get_report(&store, &store, &report.id).await.unwrap();
        assert_eq!(fetched.report, report);
        assert_eq!(fetched.votes, tally(1, 0));

        let missing = uuid::Uuid::new_v4().to_string();
        assert!(matches!(get_report(&store, &store, &missing).await, Err(Error::NotFound(_))));
        assert!(matches!(get_report(&store, &store, "42").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_votes() {
        let db = Database::connect("sqlite::memory:", 1).await.unwrap();
        let report = seed(&db, "Dakar", ReportStatus::Approved, 0).await;
        db.upsert_vote(&report.id, "d1", VoteType::True).await.unwrap();
        db.upsert_vote(&report.id, "d2", VoteType::False).await.unwrap();

        assert!(matches!(
            delete_report(&db, &db, &report.id, false).await,
            Err(Error::Unauthorized)
        ));
        assert_eq!(db.count_by_type(&report.id, VoteType::True).await.unwrap(), 1);

        delete_report(&db, &db, &report.id, true).await.unwrap();
        assert!(db.find_report_by_id(&report.id).await.unwrap().is_none());
        assert_eq!(db.count_by_type(&report.id, VoteType::True).await.unwrap(), 0);
        assert_eq!(db.count_by_type(&report.id, VoteType::False).await.unwrap(), 0);

        assert!(matches!(
            delete_report(&db, &db, &report.id, true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_moderation() {
        let store = MemoryStore::new();
        let report = seed(&store, "Accra", ReportStatus::Pending, 0).await;

        assert!(matches!(
            moderate_report(&store, &report.id, ReportStatus::Rejected, false).await,
            Err(Error::Unauthorized)
        ));

        let updated = moderate_report(&store, &report.id, ReportStatus::Rejected, true).await.unwrap();
        assert_eq!(updated.status, ReportStatus::Rejected);

        let listed = list_reports(&store, &store, &ReportFilter::default(), page(1, 10)).await.unwrap();
        assert!(listed.reports.is_empty());
        assert_eq!(listed.total_pages, 0);
    }

    #[tokio::test]
    async fn test_create_and_distinct_lists() {
        let store = MemoryStore::new();
        let created = create_report(&store, submission("Tunis", "")).await.unwrap();
        assert_eq!(created.category, "Other");
        create_report(&store, submission("Cairo", "Health")).await.unwrap();

        assert_eq!(list_categories(&store).await.unwrap(), vec!["Health", "Other"]);
        assert_eq!(list_locations(&store).await.unwrap(), vec!["Cairo", "Tunis"]);

        let mut bad = submission("Tunis", "Health");
        bad.title = String::new();
        assert!(matches!(create_report(&store, bad).await, Err(Error::Validation(_))));
    }
}
