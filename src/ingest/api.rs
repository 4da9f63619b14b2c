//! Eternal Return open-API client.
//!
//! Base: https://open-api.bser.io/
//!
//! Endpoints used:
//! - GET /v1/games/{game_id}            - all participations of one match
//! - GET /v1/user/games/{user_id}       - one page of a user's match history
//! - GET /v1/user/nickname?query=...    - nickname -> user id lookup
//!
//! Authentication is a per-request `x-api-key` header.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::FetchError;
use crate::model::UserIdentity;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        // Walk back to a char boundary; cutting mid-codepoint panics.
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("…");
    }
    s
}

#[derive(Debug, Clone)]
pub struct ErApiClient {
    base_url: String,
    http: Client,
    api_key: String,
}

impl ErApiClient {
    pub fn new(base_url: &str, api_key: String, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let timeout_secs = timeout_secs.unwrap_or(15);
        let http = Client::builder()
            .user_agent("ErGameData/1.0")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            http,
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("x-api-key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status,
                body: truncate_for_log(body, 512),
            });
        }
        serde_json::from_str(&body).map_err(|e| FetchError::Shape {
            url,
            detail: format!("invalid JSON body: {e}"),
        })
    }

    /// All raw participation objects of one match.
    pub async fn fetch_match(&self, game_id: i64) -> Result<Vec<Value>, FetchError> {
        let path = format!("v1/games/{game_id}");
        let payload = self.get_json(&path, &[]).await?;
        match payload.get("userGames").and_then(Value::as_array) {
            Some(arr) => Ok(arr.clone()),
            None => Err(FetchError::Shape {
                url: format!("{}/{path}", self.base_url),
                detail: "response has no userGames array".to_string(),
            }),
        }
    }

    /// One page of a user's match history plus the cursor for the next page.
    pub async fn fetch_user_matches(
        &self,
        user_id: i64,
        next: Option<i64>,
    ) -> Result<(Vec<Value>, Option<i64>), FetchError> {
        let path = format!("v1/user/games/{user_id}");
        let mut query = Vec::new();
        if let Some(cursor) = next {
            query.push(("next", cursor.to_string()));
        }
        let payload = self.get_json(&path, &query).await?;
        let games = payload
            .get("userGames")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = payload.get("next").and_then(Value::as_i64);
        Ok((games, next))
    }

    /// Resolve a nickname to a user identity; unknown nicknames are `None`,
    /// not errors.
    pub async fn fetch_user_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<UserIdentity>, FetchError> {
        let path = "v1/user/nickname";
        let query = [("query", nickname.to_string())];
        let payload = match self.get_json(path, &query).await {
            Ok(v) => v,
            Err(FetchError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let Some(user) = payload.get("user") else {
            return Ok(None);
        };
        let identity =
            serde_json::from_value::<UserIdentity>(user.clone()).map_err(|e| FetchError::Shape {
                url: format!("{}/{path}", self.base_url),
                detail: format!("unexpected user object: {e}"),
            })?;
        Ok(Some(identity))
    }
}
