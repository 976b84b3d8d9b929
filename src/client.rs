//! Client side of the sync protocol.
//!
//! A [`SyncClient`] keeps a cached [`Snapshot`] of one document. Mutations
//! are queued one at a time; each may paint a provisional state first, but
//! the server's snapshot always replaces the cache wholesale. After a
//! failed mutation the client re-fetches instead of undoing its guess; if
//! that re-fetch fails too, the cache is marked stale.
//!
//! The same client runs over HTTP ([`HttpTransport`]) or directly against an
//! in-process [`AnnotationService`] ([`LocalTransport`]).

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::activation::{apply_plan, plan_activation};
use crate::error::AnnotateError;
use crate::models::{
    ActivateRequest, ActivationOutcome, BlockRef, DocumentRequest, Snapshot, ToggleRequest,
};
use crate::service::AnnotationService;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Local(#[from] AnnotateError),

    /// The mutation failed and so did the re-fetch that followed it.
    #[error("{mutation}; re-fetch also failed: {refetch}")]
    StaleCache {
        mutation: Box<ClientError>,
        refetch: Box<ClientError>,
    },
}

/// Server access used by [`SyncClient`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_blocks(&self, document_id: i64) -> Result<Snapshot, ClientError>;

    async fn activate_block(&self, request: &ActivateRequest) -> Result<Snapshot, ClientError>;

    async fn toggle_sentence_starter(&self, request: &ToggleRequest)
        -> Result<Snapshot, ClientError>;

    async fn renumber(&self, document_id: i64) -> Result<Snapshot, ClientError>;
}

// ============ HTTP ============

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => ("unknown".to_string(), body),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_blocks(&self, document_id: i64) -> Result<Snapshot, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/api/blocks/{}", document_id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn activate_block(&self, request: &ActivateRequest) -> Result<Snapshot, ClientError> {
        let response = self
            .client
            .post(self.url("/api/activate-block"))
            .json(request)
            .send()
            .await?;
        let outcome: ActivationOutcome = Self::decode(response).await?;
        Ok(outcome.snapshot)
    }

    async fn toggle_sentence_starter(
        &self,
        request: &ToggleRequest,
    ) -> Result<Snapshot, ClientError> {
        let response = self
            .client
            .post(self.url("/api/toggle-sentence-starter"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn renumber(&self, document_id: i64) -> Result<Snapshot, ClientError> {
        let response = self
            .client
            .post(self.url("/api/renumber"))
            .json(&DocumentRequest { document_id })
            .send()
            .await?;
        Self::decode(response).await
    }
}

// ============ In-process ============

pub struct LocalTransport {
    service: Arc<AnnotationService>,
}

impl LocalTransport {
    pub fn new(service: Arc<AnnotationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn get_blocks(&self, document_id: i64) -> Result<Snapshot, ClientError> {
        Ok(self.service.get_blocks(document_id).await?)
    }

    async fn activate_block(&self, request: &ActivateRequest) -> Result<Snapshot, ClientError> {
        let outcome = self
            .service
            .activate_block(request.document_id, &request.block, request.is_activating)
            .await?;
        Ok(outcome.snapshot)
    }

    async fn toggle_sentence_starter(
        &self,
        request: &ToggleRequest,
    ) -> Result<Snapshot, ClientError> {
        Ok(self
            .service
            .toggle_sentence_starter(request.document_id, &request.block, request.word_number)
            .await?)
    }

    async fn renumber(&self, document_id: i64) -> Result<Snapshot, ClientError> {
        Ok(self.service.renumber(document_id).await?)
    }
}

// ============ Sync client ============

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientView {
    pub snapshot: Option<Snapshot>,
    /// The snapshot holds a local guess not yet confirmed by the server.
    pub provisional: bool,
    /// The last re-fetch failed; the snapshot may be out of date.
    pub stale: bool,
    pub last_error: Option<String>,
}

enum Mutation {
    Activate(ActivateRequest),
    Toggle(ToggleRequest),
    Renumber,
}

pub struct SyncClient<T: Transport> {
    transport: T,
    document_id: i64,
    /// Held for the whole of a mutation; tokio's mutex wakes waiters in FIFO order.
    queue: tokio::sync::Mutex<()>,
    view: Mutex<ClientView>,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(transport: T, document_id: i64) -> Self {
        Self {
            transport,
            document_id,
            queue: tokio::sync::Mutex::new(()),
            view: Mutex::new(ClientView::default()),
        }
    }

    pub fn document_id(&self) -> i64 {
        self.document_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn view(&self) -> ClientView {
        self.lock_view().clone()
    }

    fn lock_view(&self) -> std::sync::MutexGuard<'_, ClientView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, snapshot: Snapshot) {
        let mut view = self.lock_view();
        view.snapshot = Some(snapshot);
        view.provisional = false;
        view.stale = false;
    }

    /// Load the authoritative snapshot into the cache. On failure the cache
    /// is kept but marked stale.
    pub async fn refresh(&self) -> Result<Snapshot, ClientError> {
        let _turn = self.queue.lock().await;
        match self.transport.get_blocks(self.document_id).await {
            Ok(snapshot) => {
                self.replace(snapshot.clone());
                self.lock_view().last_error = None;
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(document_id = self.document_id, error = %err, "refresh failed");
                let mut view = self.lock_view();
                view.stale = true;
                view.provisional = false;
                view.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn activate(&self, block: BlockRef, is_activating: bool) -> Result<Snapshot, ClientError> {
        self.run(Mutation::Activate(ActivateRequest {
            document_id: self.document_id,
            block,
            is_activating,
        }))
        .await
    }

    pub async fn toggle_starter(&self, block: BlockRef, word_number: i64) -> Result<Snapshot, ClientError> {
        self.run(Mutation::Toggle(ToggleRequest {
            document_id: self.document_id,
            block,
            word_number,
        }))
        .await
    }

    pub async fn renumber(&self) -> Result<Snapshot, ClientError> {
        self.run(Mutation::Renumber).await
    }

    async fn run(&self, mutation: Mutation) -> Result<Snapshot, ClientError> {
        let _turn = self.queue.lock().await;
        self.paint_provisional(&mutation);

        let result = match &mutation {
            Mutation::Activate(request) => self.transport.activate_block(request).await,
            Mutation::Toggle(request) => self.transport.toggle_sentence_starter(request).await,
            Mutation::Renumber => self.transport.renumber(self.document_id).await,
        };

        match result {
            Ok(snapshot) => {
                self.replace(snapshot.clone());
                self.lock_view().last_error = None;
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(document_id = self.document_id, error = %err, "mutation failed, re-fetching");
                self.lock_view().last_error = Some(err.to_string());
                match self.transport.get_blocks(self.document_id).await {
                    Ok(snapshot) => {
                        self.replace(snapshot);
                        Err(err)
                    }
                    Err(refetch) => {
                        let mut view = self.lock_view();
                        view.stale = true;
                        view.provisional = false;
                        Err(ClientError::StaleCache {
                            mutation: Box::new(err),
                            refetch: Box::new(refetch),
                        })
                    }
                }
            }
        }
    }

    /// Apply the expected effect of `mutation` to the cached snapshot.
    /// Sentence numbers are left alone; only the server assigns them.
    fn paint_provisional(&self, mutation: &Mutation) {
        let mut view = self.lock_view();
        let Some(snapshot) = view.snapshot.as_mut() else {
            return;
        };
        let painted = match mutation {
            Mutation::Activate(request) => {
                let all: Vec<_> = snapshot.iter_blocks().cloned().collect();
                match all.iter().find(|b| request.block.matches(b)) {
                    Some(target) => {
                        let plan = plan_activation(&all, target, request.is_activating);
                        for page in snapshot.blocks.iter_mut() {
                            apply_plan(page, &plan);
                        }
                        !plan.is_noop()
                    }
                    None => false,
                }
            }
            Mutation::Toggle(request) => {
                let block_id = snapshot.find_block(&request.block).map(|b| b.block_id);
                match snapshot
                    .words
                    .iter_mut()
                    .find(|w| Some(w.block_id) == block_id && w.word_number == request.word_number)
                {
                    Some(word) => {
                        word.is_sentence_starter = !word.is_sentence_starter;
                        true
                    }
                    None => false,
                }
            }
            Mutation::Renumber => false,
        };
        if painted {
            view.provisional = true;
        }
    }
}
