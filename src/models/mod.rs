use crate::error::{Error, Result};
use crate::voting::Tally;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_IMAGES: usize = 3;
pub const DEFAULT_CATEGORY: &str = "Other";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub category: String,
    pub images: Vec<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

/// Moderation state of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "Pending",
            ReportStatus::Approved => "Approved",
            ReportStatus::Rejected => "Rejected",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(ReportStatus::Pending),
            "Approved" => Ok(ReportStatus::Approved),
            "Rejected" => Ok(ReportStatus::Rejected),
            other => Err(Error::validation(format!("Unknown report status: {}", other))),
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credibility vote. Serialized as the strings `"true"` / `"false"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::True => "true",
            VoteType::False => "false",
        }
    }
}

impl FromStr for VoteType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "true" => Ok(VoteType::True),
            "false" => Ok(VoteType::False),
            other => Err(Error::validation(format!(
                "voteType must be 'true' or 'false', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored vote. At most one exists per (report_id, device_hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub report_id: String,
    pub device_hash: String,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

/// A report as returned to callers, with its vote tally attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportWithTally {
    #[serde(flatten)]
    pub report: Report,
    pub votes: Tally,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Report {
    /// Builds a fresh `Pending` report from a submission, trimming and
    /// checking every field.
    pub fn new(submission: NewReport) -> Result<Self> {
        let title = submission.title.trim().to_string();
        let description = submission.description.trim().to_string();
        let location = submission.location.trim().to_string();
        let category = submission
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        if title.is_empty() {
            return Err(Error::validation("title is required"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(Error::validation(format!(
                "title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
        if description.is_empty() {
            return Err(Error::validation("description is required"));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::validation(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        if location.is_empty() {
            return Err(Error::validation("location is required"));
        }
        if submission.images.len() > MAX_IMAGES {
            return Err(Error::validation(format!(
                "at most {} images may be attached",
                MAX_IMAGES
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title,
            description,
            location,
            category,
            images: submission.images,
            status: ReportStatus::Pending,
            created_at: Utc::now(),
        })
    }
}

/// Report listing filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilter {
    /// Case-insensitive substring match.
    pub location: Option<String>,
    pub category: Option<String>,
    /// `None` means "everything except Rejected".
    pub status: Option<ReportStatus>,
}

impl ReportFilter {
    /// Unicode case-insensitive literal matcher for the location filter.
    /// Every store applies this same matcher so backends agree on non-ASCII text.
    pub fn location_matcher(&self) -> Result<Option<Regex>> {
        match &self.location {
            Some(location) => RegexBuilder::new(&regex::escape(location))
                .case_insensitive(true)
                .build()
                .map(Some)
                .map_err(|e| Error::validation(format!("Invalid location filter: {}", e))),
            None => Ok(None),
        }
    }

    pub fn status_matches(&self, status: ReportStatus) -> bool {
        match self.status {
            Some(wanted) => status == wanted,
            None => status != ReportStatus::Rejected,
        }
    }
}

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32, max_limit: u32) -> Result<Self> {
        if page < 1 {
            return Err(Error::validation("page must be 1 or greater"));
        }
        if limit < 1 || limit > max_limit {
            return Err(Error::validation(format!(
                "limit must be between 1 and {}",
                max_limit
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub reports: Vec<ReportWithTally>,
    pub total_pages: u64,
    pub current_page: u32,
}

/// Checks that a report id is a well-formed UUID before it reaches a store.
pub fn parse_report_id(raw: &str) -> Result<String> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .map_err(|_| Error::validation(format!("Malformed report id: {}", raw)))
}
