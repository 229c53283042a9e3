//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all musicmind-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    // ========================================================================
    // Server
    // ========================================================================

    /// GET /
    pub async fn get_home(&self) -> Response {
        self.get("/").await
    }

    /// GET /metrics on the metrics listener
    pub async fn get_metrics(&self, metrics_url: &str) -> Response {
        self.client
            .get(format!("{}/metrics", metrics_url))
            .send()
            .await
            .expect("Metrics request failed")
    }

    // ========================================================================
    // Music Endpoints
    // ========================================================================

    /// POST /v1/music
    pub async fn submit_answers(&self, user_id: &str, user_name: &str, answers: &[f64]) -> Response {
        self.post_json(
            "/v1/music",
            json!({
                "userId": user_id,
                "userName": user_name,
                "answers": answers,
            }),
        )
        .await
    }

    /// Submits `ANSWERS` and asserts success. Returns the stored record.
    pub async fn submit_valid(&self, user_id: &str, user_name: &str) -> serde_json::Value {
        let response = self.submit_answers(user_id, user_name, &ANSWERS).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::OK,
            "Submission for {} failed",
            user_id
        );
        response.json().await.expect("Invalid user record")
    }

    /// GET /v1/music/{id}
    pub async fn get_user(&self, user_id: &str) -> Response {
        self.get(&format!("/v1/music/{}", user_id)).await
    }

    /// GET /v1/music/{query}/{min}/{max}
    pub async fn list_users(&self, query: &str, min: usize, max: usize) -> Response {
        self.get(&format!("/v1/music/{}/{}/{}", query, min, max))
            .await
    }

    /// POST /v1/music/play
    pub async fn record_play(&self, player: &str, played: &str) -> Response {
        self.post_json(
            "/v1/music/play",
            json!({ "player": player, "played": played }),
        )
        .await
    }

    /// POST /v1/music/share
    pub async fn record_share(&self, sharer: &str, shared: &str) -> Response {
        self.post_json(
            "/v1/music/share",
            json!({ "sharer": sharer, "shared": shared }),
        )
        .await
    }

    /// GET /v1/music/video/{token}
    pub async fn compose_video(&self, token: &str) -> Response {
        self.get(&format!("/v1/music/video/{}", token)).await
    }

    // ========================================================================
    // Corpus Endpoints
    // ========================================================================

    /// GET /v1/corpus
    pub async fn get_corpus(&self) -> Response {
        self.get("/v1/corpus").await
    }

    /// GET /v1/corpus/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/corpus/jobs/{}", job_id)).await
    }
}
