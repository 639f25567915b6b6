//! Remote document store client.
//!
//! The cloud keeps one JSON document per user. [`HttpDocumentStore`] talks to
//! the StudyHub document service; [`MemoryDocumentStore`] keeps documents in
//! process and follows the same merge rules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use studyhub_engine::{deep_merge, AggregateSnapshot, UserId};

use crate::error::{Result, SyncError};

/// How a put combines with the stored document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Deep-merge into the stored document instead of replacing it
    pub merge: bool,
}

impl PutOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }

    pub fn replace() -> Self {
        Self { merge: false }
    }
}

#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Fetch a user's document, `None` when it does not exist.
    async fn get_document(&self, user_id: &str) -> Result<Option<AggregateSnapshot>>;

    async fn put_document(
        &self,
        user_id: &str,
        snapshot: &AggregateSnapshot,
        options: PutOptions,
    ) -> Result<()>;

    /// Replace top-level fields of an existing document.
    ///
    /// Returns `false` when the document does not exist.
    async fn update_fields(&self, user_id: &str, fields: Map<String, Value>) -> Result<bool>;
}

/// Client for the document service's `/users/{id}/document` resource.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// `{base}/users/{user_id}/document` with the user id percent-encoded.
    pub fn document_url(&self, user_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["users", user_id, "document"]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn status_error(response: reqwest::Response) -> SyncError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SyncError::RemoteStatus { status, body }
}

#[async_trait]
impl RemoteDocumentStore for HttpDocumentStore {
    async fn get_document(&self, user_id: &str) -> Result<Option<AggregateSnapshot>> {
        let url = self.document_url(user_id)?;
        let response = self.authorize(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let document: Value = response.json().await?;
        Ok(Some(AggregateSnapshot::from_value(document)?))
    }

    async fn put_document(
        &self,
        user_id: &str,
        snapshot: &AggregateSnapshot,
        options: PutOptions,
    ) -> Result<()> {
        let url = self.document_url(user_id)?;
        let merge = if options.merge { "true" } else { "false" };
        let request = self.client.put(url).query(&[("merge", merge)]).json(snapshot);
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        tracing::debug!(user_id, merge = options.merge, "document uploaded");
        Ok(())
    }

    async fn update_fields(&self, user_id: &str, fields: Map<String, Value>) -> Result<bool> {
        let url = self.document_url(user_id)?;
        let response = self
            .authorize(self.client.patch(url).json(&fields))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(status_error(response).await),
        }
    }
}

/// In-process document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<UserId, Map<String, Value>>,
    put_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user's document.
    pub fn insert(&self, user_id: impl Into<UserId>, snapshot: &AggregateSnapshot) -> Result<()> {
        let document = into_object(snapshot)?;
        self.documents.insert(user_id.into(), document);
        Ok(())
    }

    /// Stored document as raw JSON.
    pub fn document(&self, user_id: &str) -> Option<Value> {
        self.documents
            .get(user_id)
            .map(|doc| Value::Object(doc.value().clone()))
    }

    /// Number of `put_document` calls received, failed ones included.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Make every call fail, as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

fn into_object(snapshot: &AggregateSnapshot) -> Result<Map<String, Value>> {
    match snapshot.clone().into_value()? {
        Value::Object(map) => Ok(map),
        _ => Err(studyhub_engine::Error::InvalidSnapshot("snapshot is not an object".into()).into()),
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn get_document(&self, user_id: &str) -> Result<Option<AggregateSnapshot>> {
        self.check_available()?;
        match self.document(user_id) {
            Some(document) => Ok(Some(AggregateSnapshot::from_value(document)?)),
            None => Ok(None),
        }
    }

    async fn put_document(
        &self,
        user_id: &str,
        snapshot: &AggregateSnapshot,
        options: PutOptions,
    ) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let incoming = into_object(snapshot)?;
        let mut entry = self.documents.entry(user_id.to_string()).or_default();
        if options.merge {
            deep_merge(entry.value_mut(), incoming);
        } else {
            *entry.value_mut() = incoming;
        }
        Ok(())
    }

    async fn update_fields(&self, user_id: &str, fields: Map<String, Value>) -> Result<bool> {
        self.check_available()?;
        match self.documents.get_mut(user_id) {
            Some(mut document) => {
                document.value_mut().extend(fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
