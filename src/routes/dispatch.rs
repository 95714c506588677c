use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    dispatcher::{DispatchReport, DispatchRequest},
    domain::{EmailAddress, MailboxName, Recipient, SenderSpec},
    startup::AppState,
};

#[derive(Deserialize)]
pub struct DispatchPayload {
    pub senders: Vec<SenderSpec>,
    pub recipients: Vec<RecipientPayload>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub quota: Option<usize>,
}

#[derive(Deserialize)]
pub struct RecipientPayload {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Any further string fields ride along as personalization values,
    /// e.g. `location`, `role`, `company`.
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl TryFrom<RecipientPayload> for Recipient {
    type Error = String;

    fn try_from(value: RecipientPayload) -> Result<Self, Self::Error> {
        let email = EmailAddress::parse(value.email)?;
        let name = value.name.map(MailboxName::parse).transpose()?;
        Ok(Self {
            email,
            name,
            fields: value.fields,
        })
    }
}

#[tracing::instrument(
    name = "Handling a bulk dispatch request",
    skip(app_state, payload),
    fields(
        sender_count = payload.senders.len(),
        recipient_count = payload.recipients.len(),
    )
)]
pub async fn send_emails(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<DispatchPayload>,
) -> Result<Json<DispatchReport>, DispatchError> {
    let request = parse_request(payload, app_state.default_quota)?;
    let report = app_state.dispatcher.dispatch(&request).await;
    Ok(Json(report))
}

/// Input-level checks: anything rejected here aborts the run before a single
/// message is attempted.
fn parse_request(
    payload: DispatchPayload,
    default_quota: usize,
) -> Result<DispatchRequest, DispatchError> {
    if payload.senders.is_empty() {
        return Err(DispatchError::EmptySenders);
    }
    if payload.recipients.is_empty() {
        return Err(DispatchError::EmptyRecipients);
    }
    let quota = payload.quota.unwrap_or(default_quota);
    if quota == 0 {
        return Err(DispatchError::ZeroQuota);
    }
    let recipients = payload
        .recipients
        .into_iter()
        .map(Recipient::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(DispatchError::InvalidRecipient)?;

    Ok(DispatchRequest {
        senders: payload.senders,
        recipients,
        subject: payload.subject,
        body: payload.body,
        quota,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("the sender list is empty")]
    EmptySenders,
    #[error("the recipient list is empty")]
    EmptyRecipients,
    #[error("the per-sender quota must be at least 1")]
    ZeroQuota,
    #[error("invalid recipient, {0}")]
    InvalidRecipient(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            DispatchError::EmptySenders => {
                tracing::error!("{}", DispatchError::EmptySenders);
                StatusCode::BAD_REQUEST
            }
            DispatchError::EmptyRecipients => {
                tracing::error!("{}", DispatchError::EmptyRecipients);
                StatusCode::BAD_REQUEST
            }
            DispatchError::ZeroQuota => {
                tracing::error!("{}", DispatchError::ZeroQuota);
                StatusCode::BAD_REQUEST
            }
            DispatchError::InvalidRecipient(e) => {
                tracing::error!("{}", DispatchError::InvalidRecipient(e));
                StatusCode::BAD_REQUEST
            }
        }
        .into_response()
    }
}
