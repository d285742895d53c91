//! HTTP client for the challenge service

use reqwest::{Method, RequestBuilder, Response, StatusCode};

use super::{ChallengeApi, ProfileStats, RemoteError};
use crate::config::RemoteSettings;
use crate::domain::ChallengeId;

/// Longest error body kept in `RemoteError::Http`
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct HttpChallengeApi {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
}

impl HttpChallengeApi {
  pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
    let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
    Ok(Self {
      client,
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      token: settings.token.clone(),
    })
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    let req = self.client.request(method, format!("{}{}", self.base_url, path));
    match &self.token {
      Some(token) => req.bearer_auth(token),
      None => req,
    }
  }
}

/// True if an error body says the daily completion limit was hit
fn mentions_daily_limit(body: &str) -> bool {
  let lower = body.to_ascii_lowercase();
  lower.contains("already completed") || lower.contains("daily limit") || lower.contains("limit reached")
}

async fn error_for(response: Response) -> RemoteError {
  let status = response.status();
  let mut body = response.text().await.unwrap_or_default();

  if status == StatusCode::CONFLICT
    || status == StatusCode::TOO_MANY_REQUESTS
    || (status.is_client_error() && mentions_daily_limit(&body))
  {
    return RemoteError::LimitReached;
  }

  if body.len() > MAX_ERROR_BODY {
    let mut cut = MAX_ERROR_BODY;
    while !body.is_char_boundary(cut) {
      cut -= 1;
    }
    body.truncate(cut);
  }
  RemoteError::Http {
    status: status.as_u16(),
    message: body,
  }
}

impl ChallengeApi for HttpChallengeApi {
  async fn complete_challenge(&self, id: ChallengeId) -> Result<(), RemoteError> {
    let response = self
      .request(Method::POST, &format!("/challenges/{}/complete", id))
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(error_for(response).await);
    }
    Ok(())
  }

  async fn fetch_stats(&self) -> Result<ProfileStats, RemoteError> {
    let response = self.request(Method::GET, "/profile/stats").send().await?;

    if !response.status().is_success() {
      return Err(error_for(response).await);
    }
    let stats = response
      .json::<ProfileStats>()
      .await
      .map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::extract::Path;
  use axum::http::{HeaderMap, StatusCode as AxumStatus};
  use axum::routing::{get, post};
  use axum::{Json, Router};
  use std::time::Duration;

  async fn complete(Path(id): Path<u64>) -> (AxumStatus, String) {
    match id {
      1 => (AxumStatus::NO_CONTENT, String::new()),
      2 => (AxumStatus::CONFLICT, String::new()),
      3 => (
        AxumStatus::BAD_REQUEST,
        r#"{"detail": "You have already completed a challenge today"}"#.to_string(),
      ),
      _ => (AxumStatus::INTERNAL_SERVER_ERROR, "boom".to_string()),
    }
  }

  async fn stats(headers: HeaderMap) -> Result<Json<serde_json::Value>, AxumStatus> {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer t0k3n") {
      return Err(AxumStatus::UNAUTHORIZED);
    }
    Ok(Json(serde_json::json!({
      "streak": 6,
      "total_completed": 21,
      "daily_stats": [{"date": "2024-05-02", "completed": 1}]
    })))
  }

  async fn spawn_mock_server() -> String {
    let app = Router::new()
      .route("/api/challenges/{id}/complete", post(complete))
      .route("/api/profile/stats", get(stats));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/", addr)
  }

  fn client(base_url: String, token: Option<&str>) -> HttpChallengeApi {
    HttpChallengeApi::new(&RemoteSettings {
      base_url,
      token: token.map(str::to_string),
      timeout: Duration::from_secs(5),
    })
    .unwrap()
  }

  #[tokio::test]
  async fn test_complete_success() {
    let api = client(spawn_mock_server().await, None);
    assert_eq!(api.complete_challenge(ChallengeId(1)).await, Ok(()));
  }

  #[tokio::test]
  async fn test_conflict_maps_to_limit_reached() {
    let api = client(spawn_mock_server().await, None);
    assert_eq!(api.complete_challenge(ChallengeId(2)).await, Err(RemoteError::LimitReached));
  }

  #[tokio::test]
  async fn test_limit_message_maps_to_limit_reached() {
    let api = client(spawn_mock_server().await, None);
    assert_eq!(api.complete_challenge(ChallengeId(3)).await, Err(RemoteError::LimitReached));
  }

  #[tokio::test]
  async fn test_server_error_is_http_error() {
    let api = client(spawn_mock_server().await, None);
    assert_eq!(
      api.complete_challenge(ChallengeId(99)).await,
      Err(RemoteError::Http {
        status: 500,
        message: "boom".to_string()
      })
    );
  }

  #[tokio::test]
  async fn test_fetch_stats_sends_bearer_token() {
    let base = spawn_mock_server().await;

    let stats = client(base.clone(), Some("t0k3n")).fetch_stats().await.unwrap();
    assert_eq!(stats.streak, 6);
    assert_eq!(stats.total_completed, 21);
    assert_eq!(stats.daily_stats.len(), 1);

    let unauthorized = client(base, None).fetch_stats().await;
    assert!(matches!(unauthorized, Err(RemoteError::Http { status: 401, .. })));
  }

  #[tokio::test]
  async fn test_unreachable_server_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(format!("http://{}", addr), None);
    assert!(matches!(
      api.complete_challenge(ChallengeId(1)).await,
      Err(RemoteError::Transport(_))
    ));
  }

  #[test]
  fn test_mentions_daily_limit() {
    assert!(mentions_daily_limit("Daily limit reached"));
    assert!(mentions_daily_limit("challenge ALREADY COMPLETED today"));
    assert!(!mentions_daily_limit("challenge not found"));
  }
}
