use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use murmur_types::api::{BriefInfoRequest, BriefInfosRequest};
use murmur_types::models::UserBriefInfo;
use murmur_types::{Error, Result};

/// Brief user profiles, as seen by `sender_id`.
#[async_trait]
pub trait ProfileClient: Send + Sync {
    /// Profile of `sender_id` for display to `recipient_id`.
    async fn brief_info(&self, sender_id: &str, recipient_id: &str) -> Result<UserBriefInfo>;
    async fn brief_infos(
        &self,
        sender_id: &str,
        recipient_ids: &[String],
    ) -> Result<Vec<UserBriefInfo>>;
}

/// JSON-over-HTTP client for the profile service.
pub struct HttpProfileClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpProfileClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(Error::internal)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        match resp.status() {
            s if s.is_success() => resp.json().await.map_err(classify),
            StatusCode::NOT_FOUND => Err(Error::not_found(format!("profile at {}", path))),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                Err(Error::UpstreamTransient(format!("profile service unavailable ({})", resp.status())))
            }
            s => Err(Error::UpstreamPermanent(format!("profile service returned {}", s))),
        }
    }
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::UpstreamTransient(format!("profile service: {}", e))
    } else if e.is_decode() {
        Error::UpstreamPermanent(format!("profile service sent bad body: {}", e))
    } else {
        Error::UpstreamPermanent(format!("profile service: {}", e))
    }
}

#[async_trait]
impl ProfileClient for HttpProfileClient {
    async fn brief_info(&self, sender_id: &str, recipient_id: &str) -> Result<UserBriefInfo> {
        self.post(
            "/v1/profile/brief",
            &BriefInfoRequest {
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
            },
        )
        .await
    }

    async fn brief_infos(
        &self,
        sender_id: &str,
        recipient_ids: &[String],
    ) -> Result<Vec<UserBriefInfo>> {
        if recipient_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.post(
            "/v1/profile/briefs",
            &BriefInfosRequest {
                sender_id: sender_id.to_string(),
                recipient_ids: recipient_ids.to_vec(),
            },
        )
        .await
    }
}
