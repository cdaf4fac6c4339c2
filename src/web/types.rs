// src/web/types.rs - request/response envelopes for the API

use rocket::serde::{Deserialize, Serialize};

use crate::matching::{CandidateProfile, ClientProfile};

// ===== Standard response envelopes =====

#[derive(Serialize)]
#[serde(crate = "rocket::serde", rename_all = "lowercase")]
pub enum ResponseType {
    Text,
    Data,
    Action,
    Error,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct TextResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct DataResponse<T> {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
    pub data: T,
}

/// Acknowledgement for fire-and-forget triggers: the work continues in the
/// background and its outcome is only observable through the job queries.
#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct ActionResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub message: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<String>,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct StandardErrorResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub suggestions: Vec<String>,
}

impl TextResponse {
    pub fn success(message: String) -> Self {
        Self {
            response_type: ResponseType::Text,
            success: true,
            message,
        }
    }
}

impl<T> DataResponse<T> {
    pub fn success(message: String, data: T) -> Self {
        Self {
            response_type: ResponseType::Data,
            success: true,
            message,
            data,
        }
    }
}

impl ActionResponse {
    pub fn accepted(message: String, action: String) -> Self {
        Self {
            response_type: ResponseType::Action,
            success: true,
            message,
            action,
            poll: Some("/api/jobs".to_string()),
        }
    }
}

impl StandardErrorResponse {
    pub fn new(error: String, error_code: String, suggestions: Vec<String>) -> Self {
        Self {
            response_type: ResponseType::Error,
            success: false,
            error,
            error_code,
            suggestions,
        }
    }
}

// ===== Request shapes =====

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct MatchRequest {
    pub client: ClientProfile,
    pub candidates: Vec<CandidateProfile>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ScrapeRequest {
    /// Source tag to scrape; omit to run every registered scraper.
    pub source: Option<String>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct RescrapeRequest {
    pub source: String,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct RegistryLoadRequest {
    pub archive_url: String,
}

/// Count summary for the query endpoints.
#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct CountData {
    pub count: i64,
}
