//! Long-Polling Transport Handler
//!
//! `POST /cometd`: the body is one Bayeux message or an array, the reply is
//! always an array. A connect in the batch holds the response open until the
//! scheduler resumes it.

use axum::{extract::State, Json};
use axum_extra::extract::cookie::CookieJar;

use crate::application::services::{BayeuxService, TransportContext};
use crate::domain::entities::{Message, MessageBatch};
use crate::presentation::http::extractors::BrowserCookie;
use crate::shared::error::BayeuxError;
use crate::startup::AppState;

/// Handle one long-polling request
pub async fn handle_batch(
    State(state): State<AppState>,
    browser: BrowserCookie,
    body: axum::body::Bytes,
) -> Result<(CookieJar, Json<Vec<Message>>), BayeuxError> {
    let batch: MessageBatch = serde_json::from_slice(&body)?;
    let messages = batch.into_vec();
    if messages.is_empty() {
        return Err(BayeuxError::ProtocolViolation("empty message batch".to_string()));
    }

    let (browser_id, jar) = browser.ensure();
    let ctx = TransportContext::long_polling(Some(browser_id));

    tracing::trace!(count = messages.len(), "Long-polling batch received");
    let replies = state.server.handle(messages, &ctx).await;

    Ok((jar, Json(replies)))
}
