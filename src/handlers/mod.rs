//! Request/response shapes and dispatch.
//!
//! Each request is one JSON object with an `action` field; the reply carries
//! an HTTP-style `status` and either `data` or `error`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{NewReport, PageRequest, ReportFilter, ReportStatus};
use crate::services::{reports, votes};
use crate::services::votes::VoteRequest;
use crate::store::{ReportStore, VoteStore};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub struct AppContext {
    pub reports: Arc<dyn ReportStore>,
    pub votes: Arc<dyn VoteStore>,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    ListReports {
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
    },
    GetReport {
        id: String,
    },
    CastVote {
        id: String,
        #[serde(default)]
        vote_type: Option<String>,
        #[serde(default)]
        device_hash: Option<String>,
    },
    CreateReport(NewReport),
    DeleteReport {
        id: String,
        #[serde(default)]
        admin_password: Option<String>,
    },
    ModerateReport {
        id: String,
        status: String,
        #[serde(default)]
        admin_password: Option<String>,
    },
    ListCategories,
    ListLocations,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::ListReports { .. } => "listReports",
            Command::GetReport { .. } => "getReport",
            Command::CastVote { .. } => "castVote",
            Command::CreateReport(_) => "createReport",
            Command::DeleteReport { .. } => "deleteReport",
            Command::ModerateReport { .. } => "moderateReport",
            Command::ListCategories => "listCategories",
            Command::ListLocations => "listLocations",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(request_id: Option<Value>, status: u16, data: Value) -> Self {
        Self { request_id, status, data: Some(data), error: None }
    }

    fn failed(request_id: Option<Value>, err: &Error) -> Self {
        Self {
            request_id,
            status: err.status(),
            data: None,
            error: Some(err.public_message()),
        }
    }
}

// Blank strings in query-like fields mean "not given"
fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::StoreUnavailable(format!("Failed to encode response: {}", e)))
}

async fn dispatch(ctx: &AppContext, command: Command) -> Result<(u16, Value)> {
    let report_store = ctx.reports.as_ref();
    let vote_store = ctx.votes.as_ref();

    match command {
        Command::ListReports { location, category, status, page, limit } => {
            let filter = ReportFilter {
                location: non_blank(location),
                category: non_blank(category),
                status: non_blank(status).map(|s| s.parse::<ReportStatus>()).transpose()?,
            };
            let page = PageRequest::new(
                page.unwrap_or(1),
                limit.unwrap_or(ctx.config.default_page_size),
                ctx.config.max_page_size,
            )?;
            let listed = reports::list_reports(report_store, vote_store, &filter, page).await?;
            Ok((200, to_json(&listed)?))
        }
        Command::GetReport { id } => {
            let report = reports::get_report(report_store, vote_store, &id).await?;
            Ok((200, to_json(&report)?))
        }
        Command::CastVote { id, vote_type, device_hash } => {
            let request = VoteRequest { vote_type, device_hash };
            let tally = votes::cast_vote(report_store, vote_store, &id, &request).await?;
            Ok((200, to_json(&tally)?))
        }
        Command::CreateReport(submission) => {
            let report = reports::create_report(report_store, submission).await?;
            Ok((201, to_json(&report)?))
        }
        Command::DeleteReport { id, admin_password } => {
            let authorized = ctx.config.is_admin(admin_password.as_deref());
            reports::delete_report(report_store, vote_store, &id, authorized).await?;
            Ok((200, serde_json::json!({ "message": "Report deleted" })))
        }
        Command::ModerateReport { id, status, admin_password } => {
            let authorized = ctx.config.is_admin(admin_password.as_deref());
            let status = status.parse::<ReportStatus>()?;
            let report = reports::moderate_report(report_store, &id, status, authorized).await?;
            Ok((200, to_json(&report)?))
        }
        Command::ListCategories => Ok((200, to_json(&reports::list_categories(report_store).await?)?)),
        Command::ListLocations => Ok((200, to_json(&reports::list_locations(report_store).await?)?)),
    }
}

/// Handles one raw request line and always produces a response.
pub async fn handle_line(ctx: &AppContext, line: &str) -> Response {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("Rejected malformed request: {}", e);
            return Response::failed(None, &Error::validation(format!("Malformed JSON: {}", e)));
        }
    };
    let request_id = raw.get("requestId").cloned();

    let command: Command = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Rejected unrecognised request: {}", e);
            return Response::failed(request_id, &Error::validation(format!("Invalid request: {}", e)));
        }
    };
    let action = command.action();
    info!("Received request: {}", action);

    match dispatch(ctx, command).await {
        Ok((status, data)) => Response::ok(request_id, status, data),
        Err(e) => {
            if e.status() >= 500 {
                error!("{} failed: {}", action, e);
            }
            Response::failed(request_id, &e)
        }
    }
}
