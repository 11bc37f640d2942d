//! Bank account command routes.
//!
//! Each request names an account; the supervisor opens its aggregate process
//! on first use and every command for that account runs on it in order.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AggregateId;
use domain::{
    AccountStatus, Aggregate, AggregateSupervisor, BankAccount, CloseAccount, CommandResult, DomainEvent,
    Deposit, OpenAccount, Withdraw,
};
use event_store::{EventStore, EventStoreExt, StreamId};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityLog;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore + Clone> {
    pub accounts: AggregateSupervisor<S>,
    pub activity: Arc<ActivityLog>,
}

#[derive(Deserialize)]
pub struct OpenAccountRequest {
    pub owner: String,
}

#[derive(Deserialize)]
pub struct AmountRequest {
    pub amount: u64,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub id: String,
    pub version: i64,
    pub events: Vec<&'static str>,
}

impl CommandResponse {
    fn new(id: &AggregateId, result: CommandResult<BankAccount>) -> Self {
        Self {
            id: id.to_string(),
            version: result.version.as_i64(),
            events: result.events.iter().map(DomainEvent::event_type).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub id: String,
    pub owner: Option<String>,
    pub status: AccountStatus,
    pub balance: u64,
    pub transactions: u64,
    pub version: i64,
}

/// POST /accounts/{id}/open
#[tracing::instrument(skip(state, req))]
pub async fn open<S: EventStore + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let id = AggregateId::from(id);
    let result = state
        .accounts
        .execute(&id, OpenAccount { owner: req.owner })
        .await?;
    Ok((StatusCode::CREATED, Json(CommandResponse::new(&id, result))))
}

/// POST /accounts/{id}/deposit
#[tracing::instrument(skip(state, req))]
pub async fn deposit<S: EventStore + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let id = AggregateId::from(id);
    let result = state
        .accounts
        .execute(&id, Deposit { amount: req.amount })
        .await?;
    Ok(Json(CommandResponse::new(&id, result)))
}

/// POST /accounts/{id}/withdraw
#[tracing::instrument(skip(state, req))]
pub async fn withdraw<S: EventStore + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let id = AggregateId::from(id);
    let result = state
        .accounts
        .execute(&id, Withdraw { amount: req.amount })
        .await?;
    Ok(Json(CommandResponse::new(&id, result)))
}

/// POST /accounts/{id}/close
#[tracing::instrument(skip(state))]
pub async fn close<S: EventStore + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let id = AggregateId::from(id);
    let result = state.accounts.execute(&id, CloseAccount).await?;
    Ok(Json(CommandResponse::new(&id, result)))
}

/// GET /accounts/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let id = AggregateId::from(id);
    // Reads never start a process for an account that was never written.
    let stream = StreamId::for_aggregate(BankAccount::aggregate_type(), &id);
    if !state.accounts.store().stream_exists(&stream).await? {
        return Err(ApiError::NotFound(format!("Account {id} not found")));
    }

    let (account, version) = state
        .accounts
        .aggregate_state_with_version::<BankAccount>(&id)
        .await?;
    if account.status() == AccountStatus::Unopened {
        return Err(ApiError::NotFound(format!("Account {id} not found")));
    }

    Ok(Json(AccountResponse {
        id: id.to_string(),
        owner: account.owner().map(str::to_owned),
        status: account.status(),
        balance: account.balance(),
        transactions: account.transactions(),
        version: version.as_i64(),
    }))
}
