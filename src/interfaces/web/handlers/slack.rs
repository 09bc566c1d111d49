use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};
use url::form_urlencoded;

use super::super::AppState;
use super::decisions::apply_decision;
use crate::core::metrics::SLACK_INTERACTIONS;
use crate::core::render::{ACCEPT_ACTION_ID, REJECT_ACTION_ID};
use crate::core::workflow::DecisionRequest;

const MAX_CLOCK_SKEW_SECS: u64 = 300;

pub(crate) fn verify_slack_signature(
    headers: &HeaderMap,
    body: &[u8],
    signing_secret: &str,
    now_secs: u64,
) -> bool {
    use hmac::Mac;
    use sha2::Sha256;
    type HmacSha256 = hmac::Hmac<Sha256>;

    let Some(timestamp) = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    match timestamp.parse::<u64>() {
        Ok(ts) if now_secs.abs_diff(ts) <= MAX_CLOCK_SKEW_SECS => {}
        _ => return false,
    }

    let Some(sig) = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    // Constant-time comparison
    if sig.len() != expected.len() {
        return false;
    }
    sig.as_bytes()
        .iter()
        .zip(expected.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Pulls the `payload` field out of an `application/x-www-form-urlencoded` body.
pub(crate) fn form_payload(body: &[u8]) -> Option<String> {
    form_urlencoded::parse(body)
        .find(|(key, _)| key == "payload")
        .map(|(_, value)| value.into_owned())
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    user: Option<InteractionUser>,
    #[serde(default)]
    actions: Vec<InteractionAction>,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct InteractionAction {
    #[serde(default)]
    action_id: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ButtonValue {
    workflow_id: String,
    phase: String,
}

/// Maps a button click onto a decision. `None` for interactions we don't own.
pub(crate) fn decision_from_payload(raw: &str) -> Result<Option<DecisionRequest>, String> {
    let payload: InteractionPayload =
        serde_json::from_str(raw).map_err(|e| format!("invalid interaction payload: {}", e))?;
    if payload.kind != "block_actions" {
        return Ok(None);
    }
    let Some(action) = payload.actions.first() else {
        return Ok(None);
    };
    let verb = match action.action_id.as_str() {
        ACCEPT_ACTION_ID => "accept",
        REJECT_ACTION_ID => "reject",
        _ => return Ok(None),
    };
    let button: ButtonValue = serde_json::from_str(&action.value)
        .map_err(|e| format!("invalid button value: {}", e))?;
    Ok(Some(DecisionRequest {
        workflow_id: button.workflow_id,
        action: verb.to_string(),
        phase: button.phase,
        user_id: payload.user.map(|u| u.id).unwrap_or_default(),
    }))
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

pub async fn interactions_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.incr(SLACK_INTERACTIONS);

    if !state.signing_secret.is_empty() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if !verify_slack_signature(&headers, &body, &state.signing_secret, now) {
            warn!("Rejected Slack interaction with bad signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "success": false, "error": "Invalid signature" })),
            )
                .into_response();
        }
    }

    let Some(raw) = form_payload(&body) else {
        return bad_request("Missing payload field".to_string());
    };
    let request = match decision_from_payload(&raw) {
        Ok(Some(request)) => request,
        Ok(None) => {
            info!("Ignoring unrelated Slack interaction");
            return Json(serde_json::json!({ "success": true, "status": "ignored" }))
                .into_response();
        }
        Err(e) => return bad_request(e),
    };

    apply_decision(&state, &request).await
}
