use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::clock::DayClock;
use crate::domain::{Challenge, ChallengeId, SwipeDirection};
use crate::engine::{EngineError, SessionEngine, SessionSnapshot};
use crate::ledger::Outcome;
use crate::reconcile::CompletionError;
use crate::remote::ChallengeApi;
use crate::store::KeyValueStore;

type Engine<S, C, A> = State<SessionEngine<S, C, A>>;

fn error_body(status: StatusCode, code: &str, message: impl ToString) -> Response {
  (status, Json(json!({ "error": code, "message": message.to_string() }))).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeRequest {
  pub challenge_id: ChallengeId,
  pub direction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
  pub challenge_id: ChallengeId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumRequest {
  pub is_premium: bool,
}

pub async fn get_session<S, C, A>(State(engine): Engine<S, C, A>) -> Json<SessionSnapshot>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.snapshot())
}

pub async fn swipe<S, C, A>(State(engine): Engine<S, C, A>, Json(req): Json<SwipeRequest>) -> Response
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  let Some(direction) = SwipeDirection::from_str(&req.direction) else {
    return error_body(
      StatusCode::BAD_REQUEST,
      "invalid_direction",
      format!("Unknown swipe direction: {}", req.direction),
    );
  };
  Json(engine.swipe(req.challenge_id, direction)).into_response()
}

pub async fn mark_viewed<S, C, A>(State(engine): Engine<S, C, A>, Json(req): Json<ChallengeRequest>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.mark_viewed(req.challenge_id))
}

pub async fn select<S, C, A>(State(engine): Engine<S, C, A>, Json(req): Json<ChallengeRequest>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.select_challenge(req.challenge_id))
}

pub async fn skip<S, C, A>(State(engine): Engine<S, C, A>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.skip())
}

pub async fn complete<S, C, A>(State(engine): Engine<S, C, A>) -> Response
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  match engine.complete_challenge().await {
    Ok(receipt) => Json(receipt).into_response(),
    Err(e @ CompletionError::DailyLimitExceeded) => error_body(StatusCode::CONFLICT, "daily_limit_exceeded", e),
    Err(e @ CompletionError::Pending) => error_body(StatusCode::CONFLICT, "completion_pending", e),
    Err(e @ CompletionError::TransientFailure(_)) => {
      error_body(StatusCode::SERVICE_UNAVAILABLE, "transient_failure", e)
    }
    Err(e @ CompletionError::InvariantViolation(_)) => {
      error_body(StatusCode::BAD_REQUEST, "invariant_violation", e)
    }
  }
}

pub async fn add_favorite<S, C, A>(State(engine): Engine<S, C, A>, Json(challenge): Json<Challenge>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.add_favorite(challenge))
}

pub async fn remove_favorite<S, C, A>(State(engine): Engine<S, C, A>, Path(id): Path<u64>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.remove_favorite(ChallengeId(id)))
}

pub async fn set_premium<S, C, A>(State(engine): Engine<S, C, A>, Json(req): Json<PremiumRequest>) -> Json<Outcome>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Json(engine.set_premium(req.is_premium))
}

pub async fn rollover<S, C, A>(State(engine): Engine<S, C, A>) -> Json<serde_json::Value>
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  let rolled_over = engine.check_rollover();
  Json(json!({ "rolledOver": rolled_over }))
}

pub async fn reset<S, C, A>(State(engine): Engine<S, C, A>) -> Response
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  match engine.reset().await {
    Ok(()) => StatusCode::NO_CONTENT.into_response(),
    Err(e @ EngineError::CompletionPending) => error_body(StatusCode::CONFLICT, "completion_pending", e),
    Err(e @ EngineError::Store(_)) => {
      tracing::error!("Reset failed: {}", e);
      error_body(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e)
    }
  }
}
