use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Report, ReportFilter, ReportStatus, Vote, VoteType};
use crate::store::{ReportStore, VoteStore};
use crate::voting::VoteCounts;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, QueryBuilder, Row, Sqlite};
use std::collections::{HashMap, HashSet};
use std::future::Future;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &Config) -> Result<Self> {
        Self::connect(&config.database_url, config.max_connections).await
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        // Create database file if it doesn't exist
        if !in_memory && !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database at {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // An in-memory database lives and dies with its single connection
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
                .connect(db_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect(db_url)
                .await?
        };

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                location TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'Other',
                images TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'Pending'
                    CHECK (status IN ('Pending', 'Approved', 'Rejected')),
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports (created_at DESC);")
            .execute(pool)
            .await?;

        // No foreign key on report_id: the reference is the caller's concern
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                report_id TEXT NOT NULL,
                device_hash TEXT NOT NULL,
                vote_type TEXT NOT NULL CHECK (vote_type IN ('true', 'false')),
                created_at TEXT NOT NULL,
                PRIMARY KEY (report_id, device_hash)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_device_hash ON votes (device_hash);")
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn try_upsert_vote(
        &self,
        report_id: &str,
        device_hash: &str,
        vote_type: VoteType,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO votes (report_id, device_hash, vote_type, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(report_id, device_hash)
            DO UPDATE SET vote_type = excluded.vote_type, created_at = excluded.created_at
            "#,
        )
        .bind(report_id)
        .bind(device_hash)
        .bind(vote_type.as_str())
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Runs `op`, running it a second time if the first attempt hit a unique
/// constraint. A failure on the second attempt is not retried.
async fn retry_unique_once<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = sqlx::Result<T>>,
{
    match op().await {
        Err(e) if is_unique_violation(&e) => {
            warn!("{} raced on a unique key ({}), retrying once", what, e);
            Ok(op().await?)
        }
        other => Ok(other?),
    }
}

// Fixed-width UTC timestamps so that text ordering is time ordering
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::StoreUnavailable(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

// SQLite's LOWER() and LIKE only fold ASCII, so the location filter is
// applied in Rust with ReportFilter::location_matcher instead.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ReportFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(category) = &filter.category {
        qb.push(" AND category = ");
        qb.push_bind(category.clone());
    }
    match filter.status {
        Some(status) => {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        None => {
            qb.push(" AND status <> 'Rejected'");
        }
    }
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let images_json = row.get::<String, _>("images");
    let images: Vec<String> = serde_json::from_str(&images_json)
        .map_err(|e| Error::StoreUnavailable(format!("Failed to parse images: {}", e)))?;
    let status = row
        .get::<String, _>("status")
        .parse::<ReportStatus>()
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

    Ok(Report {
        id: row.get::<String, _>("id"),
        title: row.get::<String, _>("title"),
        description: row.get::<String, _>("description"),
        location: row.get::<String, _>("location"),
        category: row.get::<String, _>("category"),
        images,
        status,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn vote_type_from_row(row: &SqliteRow) -> Result<VoteType> {
    row.get::<String, _>("vote_type")
        .parse::<VoteType>()
        .map_err(|e| Error::StoreUnavailable(e.to_string()))
}

#[async_trait]
impl VoteStore for Database {
    async fn upsert_vote(&self, report_id: &str, device_hash: &str, vote_type: VoteType) -> Result<Vote> {
        let now = Utc::now();

        // Losing an insert race on the (report, device) key means the retry takes the update path
        retry_unique_once("Vote upsert", move || {
            self.try_upsert_vote(report_id, device_hash, vote_type, now)
        })
        .await?;

        Ok(Vote {
            report_id: report_id.to_string(),
            device_hash: device_hash.to_string(),
            vote_type,
            created_at: now,
        })
    }

    async fn count_by_type(&self, report_id: &str, vote_type: VoteType) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM votes WHERE report_id = ? AND vote_type = ?")
            .bind(report_id)
            .bind(vote_type.as_str())
            .fetch_one(&self.pool)
            .await?
            .get("count");
        Ok(count as u64)
    }

    async fn count_by_type_batch(&self, report_ids: &HashSet<String>) -> Result<HashMap<String, VoteCounts>> {
        let mut counts: HashMap<String, VoteCounts> = HashMap::new();
        if report_ids.is_empty() {
            return Ok(counts);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT report_id, vote_type, COUNT(*) AS count FROM votes WHERE report_id IN (");
        let mut ids = qb.separated(", ");
        for id in report_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(") GROUP BY report_id, vote_type");

        let rows = qb.build().fetch_all(&self.pool).await?;
        for row in &rows {
            let vote_type = vote_type_from_row(row)?;
            let n: i64 = row.get("count");
            counts
                .entry(row.get::<String, _>("report_id"))
                .or_default()
                .add(vote_type, n as u64);
        }

        Ok(counts)
    }

    #[cfg(test)]
    async fn votes_for_report(&self, report_id: &str) -> Result<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT report_id, device_hash, vote_type, created_at
            FROM votes
            WHERE report_id = ?
            ORDER BY device_hash
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Vote {
                    report_id: row.get::<String, _>("report_id"),
                    device_hash: row.get::<String, _>("device_hash"),
                    vote_type: vote_type_from_row(row)?,
                    created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn delete_all_for_report(&self, report_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM votes WHERE report_id = ?")
            .bind(report_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReportStore for Database {
    async fn insert_report(&self, report: &Report) -> Result<()> {
        let images = serde_json::to_string(&report.images)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to encode images: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO reports (id, title, description, location, category, images, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.title)
        .bind(&report.description)
        .bind(&report.location)
        .bind(&report.category)
        .bind(images)
        .bind(report.status.as_str())
        .bind(format_timestamp(report.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_reports(&self, filter: &ReportFilter, skip: u64, limit: u64) -> Result<Vec<Report>> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT id, title, description, location, category, images, status, created_at FROM reports",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC");

        let location = match filter.location_matcher()? {
            Some(re) => re,
            None => {
                qb.push(" LIMIT ");
                qb.push_bind(limit as i64);
                qb.push(" OFFSET ");
                qb.push_bind(skip as i64);
                let rows = qb.build().fetch_all(&self.pool).await?;
                return rows.iter().map(report_from_row).collect();
            }
        };

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .filter(|row| location.is_match(&row.get::<String, _>("location")))
            .skip(skip as usize)
            .take(limit as usize)
            .map(report_from_row)
            .collect()
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64> {
        let location = match filter.location_matcher()? {
            Some(re) => re,
            None => {
                let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) AS count FROM reports");
                push_filter(&mut qb, filter);
                let count: i64 = qb.build().fetch_one(&self.pool).await?.get("count");
                return Ok(count as u64);
            }
        };

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT location FROM reports");
        push_filter(&mut qb, filter);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let count = rows
            .iter()
            .filter(|row| location.is_match(&row.get::<String, _>("location")))
            .count();
        Ok(count as u64)
    }

    async fn find_report_by_id(&self, id: &str) -> Result<Option<Report>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, location, category, images, status, created_at
            FROM reports
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn set_status(&self, id: &str, status: ReportStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE reports SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_report(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn distinct_categories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT category FROM reports ORDER BY category")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("category")).collect())
    }

    async fn distinct_locations(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT location FROM reports ORDER BY location")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("location")).collect())
    }
}
