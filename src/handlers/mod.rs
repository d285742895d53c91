//! Loopback JSON API over the session engine

pub mod session;

use axum::{
  routing::{delete, get, post},
  Router,
};
use tower_http::trace::TraceLayer;

use crate::clock::DayClock;
use crate::engine::SessionEngine;
use crate::remote::ChallengeApi;
use crate::store::KeyValueStore;

pub fn router<S, C, A>(engine: SessionEngine<S, C, A>) -> Router
where
  S: KeyValueStore,
  C: DayClock,
  A: ChallengeApi,
{
  Router::new()
    .route("/session", get(session::get_session::<S, C, A>))
    .route("/swipe", post(session::swipe::<S, C, A>))
    .route("/viewed", post(session::mark_viewed::<S, C, A>))
    .route("/select", post(session::select::<S, C, A>))
    .route("/skip", post(session::skip::<S, C, A>))
    .route("/complete", post(session::complete::<S, C, A>))
    .route("/favorites", post(session::add_favorite::<S, C, A>))
    .route("/favorites/{id}", delete(session::remove_favorite::<S, C, A>))
    .route("/premium", post(session::set_premium::<S, C, A>))
    .route("/rollover", post(session::rollover::<S, C, A>))
    .route("/reset", post(session::reset::<S, C, A>))
    .layer(TraceLayer::new_for_http())
    .with_state(engine)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EngineConfig;
  use crate::remote::RemoteError;
  use crate::store::MemoryStore;
  use crate::testing::{ManualDayClock, ScriptedApi};
  use axum::http::StatusCode;
  use axum_test::TestServer;
  use serde_json::{json, Value};
  use std::sync::Arc;

  async fn server_with(api: ScriptedApi) -> TestServer {
    let engine = SessionEngine::start(
      Arc::new(MemoryStore::new()),
      ManualDayClock::new("2024-05-01"),
      Arc::new(api),
      EngineConfig::default(),
    )
    .await
    .unwrap();
    TestServer::new(router(engine)).unwrap()
  }

  #[tokio::test]
  async fn test_get_session_on_fresh_day() {
    let server = server_with(ScriptedApi::default()).await;
    let response = server.get("/session").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["day"], "2024-05-01");
    assert_eq!(body["phase"], "fresh");
    assert_eq!(body["remaining"]["swipes"], 15);
    assert_eq!(body["completionPending"], false);
  }

  #[tokio::test]
  async fn test_swipe_returns_outcome() {
    let server = server_with(ScriptedApi::default()).await;
    let response = server
      .post("/swipe")
      .json(&json!({ "challengeId": 3, "direction": "left" }))
      .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({ "status": "applied" }));

    let body: Value = server.get("/session").await.json();
    assert_eq!(body["swipesUsedToday"], 1);
    assert_eq!(body["viewed"], json!([3]));
  }

  #[tokio::test]
  async fn test_bad_direction_is_rejected() {
    let server = server_with(ScriptedApi::default()).await;
    let response = server
      .post("/swipe")
      .json(&json!({ "challengeId": 3, "direction": "up" }))
      .await;
    response.assert_status(StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_skip_without_active_is_denied() {
    let server = server_with(ScriptedApi::default()).await;
    let body: Value = server.post("/skip").await.json();
    assert_eq!(body, json!({ "status": "denied", "reason": "no_active_challenge" }));
  }

  #[tokio::test]
  async fn test_complete_flow() {
    let server = server_with(ScriptedApi::accepting(4, 12)).await;
    server.post("/select").json(&json!({ "challengeId": 42 })).await.assert_status_ok();

    let response = server.post("/complete").await;
    response.assert_status_ok();
    let receipt: Value = response.json();
    assert_eq!(receipt["streak"], 4);
    assert_eq!(receipt["confirmed"], true);

    let body: Value = server.get("/session").await.json();
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["completedCount"], 12);
  }

  #[tokio::test]
  async fn test_complete_limit_maps_to_conflict() {
    let server = server_with(ScriptedApi::rejecting(RemoteError::LimitReached)).await;
    server.post("/select").json(&json!({ "challengeId": 42 })).await;

    let response = server.post("/complete").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "daily_limit_exceeded");

    let body: Value = server.get("/session").await.json();
    assert_eq!(body["activeChallenge"], 42);
  }

  #[tokio::test]
  async fn test_complete_transient_maps_to_unavailable() {
    let server = server_with(ScriptedApi::rejecting(RemoteError::Transport("offline".to_string()))).await;
    server.post("/select").json(&json!({ "challengeId": 42 })).await;

    let response = server.post("/complete").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["error"], "transient_failure");
  }

  #[tokio::test]
  async fn test_favorites_round_trip() {
    let server = server_with(ScriptedApi::default()).await;
    let outcome: Value = server
      .post("/favorites")
      .json(&json!({ "id": 9, "title": "Plank", "category": "fitness" }))
      .await
      .json();
    assert_eq!(outcome["status"], "applied");

    let body: Value = server.get("/session").await.json();
    assert_eq!(body["favorites"][0]["title"], "Plank");

    server.delete("/favorites/9").await.assert_status_ok();
    let body: Value = server.get("/session").await.json();
    assert_eq!(body["favorites"], json!([]));
  }

  #[tokio::test]
  async fn test_premium_and_reset() {
    let server = server_with(ScriptedApi::default()).await;
    server.post("/premium").json(&json!({ "isPremium": true })).await.assert_status_ok();
    let body: Value = server.get("/session").await.json();
    assert_eq!(body["isPremium"], true);
    assert_eq!(body["remaining"]["swipes"], Value::Null);

    server.post("/reset").await.assert_status(StatusCode::NO_CONTENT);
    let body: Value = server.get("/session").await.json();
    assert_eq!(body["isPremium"], false);
  }

  #[tokio::test]
  async fn test_rollover_reports_unchanged_day() {
    let server = server_with(ScriptedApi::default()).await;
    let body: Value = server.post("/rollover").await.json();
    assert_eq!(body, json!({ "rolledOver": false }));
  }
}
