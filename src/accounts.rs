use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::server::SharedState;
use crate::store::accounts::{Account, TopUpResult};

/// Error envelope returned by every account endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error taxonomy for the account endpoints: validation = 400, unknown
/// smartcard = 404, store faults = 500. Unknown smartcards are 404 on every
/// endpoint, never a validity-false envelope.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!("Account endpoint failure: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn unknown_smartcard(smartcard: &str) -> ApiError {
    ApiError::NotFound(format!("Smart card number {} not found", smartcard))
}

fn require_field(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::Validation(format!("{} must not be empty", name)))
    } else {
        Ok(())
    }
}

// ── Request / response types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SmartcardRequest {
    #[serde(rename = "smartcardNumber")]
    pub smartcard_number: String,
}

#[derive(Debug, Deserialize)]
pub struct PhoneVerificationRequest {
    #[serde(rename = "smartcardNumber")]
    pub smartcard_number: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    #[serde(rename = "smartcardNumber")]
    pub smartcard_number: String,
    #[serde(rename = "itemName")]
    pub item_name: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    #[serde(rename = "smartcardNumber")]
    pub smartcard_number: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    #[serde(rename = "smartcardNumber")]
    pub smartcard_number: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AddItemResponse {
    pub message: String,
    pub items: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub smartcard_number: String,
    pub balance: i64,
    pub items: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    pub smartcard_number: String,
    pub new_balance: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ── Handlers ────────────────────────────────────────────────────────────────

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn verify_smartcard(
    State(state): State<SharedState>,
    Json(req): Json<SmartcardRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    require_field(&req.smartcard_number, "smartcardNumber")?;

    match state.store.find(&req.smartcard_number).await? {
        Some(_) => Ok(Json(VerifyResponse {
            valid: true,
            name: None,
            message: "Smartcard verified. Please enter your mobile number.".to_string(),
        })),
        None => Err(unknown_smartcard(&req.smartcard_number)),
    }
}

pub async fn verify_phone(
    State(state): State<SharedState>,
    Json(req): Json<PhoneVerificationRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    require_field(&req.smartcard_number, "smartcardNumber")?;
    require_field(&req.phone_number, "phoneNumber")?;

    let verification = state
        .store
        .verify_phone(&req.smartcard_number, &req.phone_number)
        .await?
        .ok_or_else(|| unknown_smartcard(&req.smartcard_number))?;

    if verification.matches {
        Ok(Json(VerifyResponse {
            valid: true,
            name: Some(verification.name),
            message: "Phone number verified. You can now access services.".to_string(),
        }))
    } else {
        Ok(Json(VerifyResponse {
            valid: false,
            name: None,
            message: "Phone number does not match for the given smartcard.".to_string(),
        }))
    }
}

pub async fn add_item(
    State(state): State<SharedState>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<AddItemResponse>, ApiError> {
    require_field(&req.smartcard_number, "smartcardNumber")?;
    require_field(&req.item_name, "itemName")?;

    let addition = state
        .store
        .add_item(&req.smartcard_number, &req.item_name)
        .await?
        .ok_or_else(|| unknown_smartcard(&req.smartcard_number))?;

    let message = if addition.added {
        format!(
            "Item '{}' added successfully to {}",
            req.item_name, req.smartcard_number
        )
    } else {
        format!(
            "Item '{}' is already in your list for {}",
            req.item_name, req.smartcard_number
        )
    };

    Ok(Json(AddItemResponse {
        message,
        items: addition.items,
    }))
}

pub async fn balance(
    State(state): State<SharedState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    require_field(&query.smartcard_number, "smartcardNumber")?;

    let account = state
        .store
        .find(&query.smartcard_number)
        .await?
        .ok_or_else(|| unknown_smartcard(&query.smartcard_number))?;

    Ok(Json(BalanceResponse {
        smartcard_number: account.smartcard,
        balance: account.balance,
        items: account.items,
    }))
}

pub async fn top_up(
    State(state): State<SharedState>,
    Json(req): Json<TopUpRequest>,
) -> Result<Json<TopUpResponse>, ApiError> {
    require_field(&req.smartcard_number, "smartcardNumber")?;

    match state.store.top_up(&req.smartcard_number, req.amount).await? {
        TopUpResult::Updated(new_balance) => Ok(Json(TopUpResponse {
            smartcard_number: req.smartcard_number,
            new_balance,
        })),
        TopUpResult::Rejected => Err(ApiError::Validation(
            "balance cannot go below zero".to_string(),
        )),
        TopUpResult::NotFound => Err(unknown_smartcard(&req.smartcard_number)),
    }
}

pub async fn list_accounts(
    State(state): State<SharedState>,
) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(state.store.list_all().await?))
}
