//! Request/response shapes for the HTTP surface: spec §6. Field names
//! match the table there exactly (snake_case).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::VariableDescriptor;
use crate::session::{ExecutionResult, SessionInfo};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct StartSessionRequest {
    pub workdir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub created_at: String,
    pub workdir: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub code: String,
    pub timeout: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct VarsResponse {
    pub variables: Vec<VariableDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct GetVarsRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GetVarsResponse {
    pub values: HashMap<String, Option<VariableDescriptor>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub n: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<crate::history::HistoryEntry>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusMessageResponse {
    pub status: &'static str,
    pub message: String,
}

impl StatusMessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok",
            message: message.into(),
        }
    }
}

pub type ExecResponse = ExecutionResult;
