//! Typed client for the `/api/incidents/` REST resource.
//!
//! Reads degrade to empty results when no credential is available; writes
//! fail with [`SyncError::MissingCredential`] before touching the network.

use crate::credentials::{bare_token, TokenSource};
use crate::error::{Result, SyncError};
use crate::polling::{format_since, UpdateSource};
use crate::triage;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use incident_model::{
    validate_incident_data, Classification, FlagReason, Incident, IncidentData, IncidentFlag,
    IncidentPage, IncidentStatus, IncidentUpdate, Severity, UpdateBatch,
};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 10.0;

/// Filters for [`IncidentApi::list_incidents`]. Unset fields are omitted.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IncidentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IncidentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
}

#[derive(Serialize)]
struct NewIncident<'a> {
    #[serde(flatten)]
    data: &'a IncidentData,
    classification: Classification,
}

#[derive(Serialize)]
struct NewUpdate<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct NewFlag<'a> {
    reason: FlagReason,
    description: &'a str,
}

#[derive(Clone)]
pub struct IncidentApi {
    base: Url,
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl IncidentApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Self::with_client(base_url, tokens, client)
    }

    pub fn with_client(
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| SyncError::InvalidEndpoint {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidEndpoint {
                url: base_url.to_string(),
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            client,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| SyncError::InvalidEndpoint {
                url: format!("{}{path}", self.base),
                reason: e.to_string(),
            })
    }

    fn authorization(&self) -> Option<String> {
        self.tokens
            .token()
            .map(|token| format!("Bearer {}", bare_token(&token)))
    }

    /// Authenticated read; `None` without a credential.
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let Some(auth) = self.authorization() else {
            debug!("no credential; returning empty result");
            return Ok(None);
        };
        let response = request.header(AUTHORIZATION, auth).send().await?;
        decode(response).await.map(Some)
    }

    async fn submit<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let auth = self.authorization().ok_or(SyncError::MissingCredential)?;
        let response = request.header(AUTHORIZATION, auth).send().await?;
        decode(response).await
    }

    /// Validates and classifies `data`, then creates the incident.
    pub async fn create_incident(&self, data: &IncidentData) -> Result<Incident> {
        validate_incident_data(data)?;
        let body = NewIncident {
            data,
            classification: triage::classify(data),
        };
        let url = self.endpoint("api/incidents/")?;
        self.submit(self.client.post(url).json(&body)).await
    }

    pub async fn list_incidents(&self, query: &IncidentQuery) -> Result<IncidentPage> {
        let url = self.endpoint("api/incidents/")?;
        Ok(self
            .fetch(self.client.get(url).query(query))
            .await?
            .unwrap_or_default())
    }

    /// `None` when the incident does not exist or there is no credential.
    pub async fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        let url = self.endpoint(&format!("api/incidents/{id}/"))?;
        match self.fetch(self.client.get(url)).await {
            Err(SyncError::Status { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    pub async fn update_incident(&self, id: i64, patch: &IncidentPatch) -> Result<Incident> {
        let url = self.endpoint(&format!("api/incidents/{id}/"))?;
        self.submit(self.client.put(url).json(patch)).await
    }

    pub async fn add_update(&self, id: i64, content: &str) -> Result<IncidentUpdate> {
        let url = self.endpoint(&format!("api/incidents/{id}/add_update/"))?;
        self.submit(self.client.post(url).json(&NewUpdate { content }))
            .await
    }

    pub async fn flag_incident(
        &self,
        id: i64,
        reason: FlagReason,
        description: &str,
    ) -> Result<IncidentFlag> {
        let url = self.endpoint(&format!("api/incidents/{id}/flag/"))?;
        self.submit(self.client.post(url).json(&NewFlag {
            reason,
            description,
        }))
        .await
    }

    pub async fn resolve_incident(&self, id: i64) -> Result<Incident> {
        let url = self.endpoint(&format!("api/incidents/{id}/resolve/"))?;
        self.submit(self.client.post(url).json(&serde_json::json!({})))
            .await
    }

    pub async fn incident_updates(&self, id: i64) -> Result<Vec<IncidentUpdate>> {
        let url = self.endpoint(&format!("api/incidents/{id}/updates/"))?;
        Ok(self.fetch(self.client.get(url)).await?.unwrap_or_default())
    }

    pub async fn incident_flags(&self, id: i64) -> Result<Vec<IncidentFlag>> {
        let url = self.endpoint(&format!("api/incidents/{id}/flags/"))?;
        Ok(self.fetch(self.client.get(url)).await?.unwrap_or_default())
    }

    /// Incidents within `radius_km` (default 10) of a point.
    pub async fn nearby(&self, lat: f64, lng: f64, radius_km: Option<f64>) -> Result<Vec<Incident>> {
        let url = self.endpoint("api/incidents/nearby/")?;
        let radius = radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM);
        let request = self
            .client
            .get(url)
            .query(&[("lat", lat), ("lng", lng), ("radius", radius)]);
        Ok(self.fetch(request).await?.unwrap_or_default())
    }

    /// Everything changed since `since`. Without a credential this is an
    /// empty batch stamped `since`.
    pub async fn check_updates(&self, since: DateTime<Utc>) -> Result<UpdateBatch> {
        let request = self.check_updates_request(since)?;
        Ok(self.fetch(request).await?.unwrap_or(UpdateBatch {
            timestamp: since,
            updates: Vec::new(),
        }))
    }

    fn check_updates_request(&self, since: DateTime<Utc>) -> Result<RequestBuilder> {
        let url = self.endpoint("api/incidents/check_updates/")?;
        Ok(self
            .client
            .get(url)
            .query(&[("since", format_since(since))]))
    }
}

impl UpdateSource for IncidentApi {
    fn updates_since(
        &self,
        since: DateTime<Utc>,
        token: &str,
    ) -> BoxFuture<'static, Result<UpdateBatch>> {
        let request = self
            .check_updates_request(since)
            .map(|r| r.header(AUTHORIZATION, format!("Bearer {}", bare_token(token))));
        Box::pin(async move { decode::<UpdateBatch>(request?.send().await?).await })
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SyncError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
