//! HTTP routes
//!
//! Synchronous endpoints answer JSON, with errors as `{"error": ...}` and a
//! status derived from the error kind. Webhook endpoints always answer 200
//! once the request reached them; malformed payloads are only logged.

use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use signflow_core::{
    CreateOutcome, DocumentId, DocumentService, EnvelopeId, NewDocument, OwnerId, SignerId,
    SigningError, StoreError,
};
use signflow_sync::{IngestAck, PollEntry, ReconciliationEngine, SyncError, WebhookIngest};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::hyper::body::{Buf, Bytes};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
const MAX_BODY_BYTES: u64 = 256 * 1024;

const OWNER_HEADER: &str = "x-owner-id";

/// Streamed body went past [`MAX_BODY_BYTES`]
#[derive(Debug)]
struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

/// Connection failed while the body was being read
#[derive(Debug)]
struct BodyUnreadable;

impl warp::reject::Reject for BodyUnreadable {}

/// Shared handles for request handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: DocumentService,
    pub engine: Arc<ReconciliationEngine>,
    pub ingest: WebhookIngest,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    #[serde(default)]
    identity_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachEnvelopeRequest {
    envelope_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollRequest {
    #[serde(default)]
    document_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PollBody {
    busy: bool,
    results: BTreeMap<String, PollEntry>,
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    received: bool,
    duplicate: bool,
}

/// Handler failure, rendered as `{"error": ...}`
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Signing(SigningError),
    Sync(SyncError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Signing(err) => signing_status(err),
            Self::Sync(SyncError::Signing(err)) => signing_status(err),
            Self::Sync(SyncError::Provider(_)) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Signing(err) => err.to_string(),
            Self::Sync(err) => err.to_string(),
        }
    }

    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message(), "request failed");
        }
        json_reply(&ErrorBody { error: self.message() }, status)
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        Self::Signing(err)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err)
    }
}

fn signing_status(err: &SigningError) -> StatusCode {
    match err {
        SigningError::DocumentNotFound(_) | SigningError::SignerNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        SigningError::DocumentCancelled(_) => StatusCode::GONE,
        SigningError::InvalidTransition { .. }
        | SigningError::EnvelopeConflict { .. }
        | SigningError::Store(StoreError::EnvelopeTaken { .. }) => StatusCode::CONFLICT,
        SigningError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
        SigningError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

fn respond<T: Serialize>(result: Result<T, ApiError>, status: StatusCode) -> Response {
    match result {
        Ok(value) => json_reply(&value, status),
        Err(err) => err.into_response(),
    }
}

fn parse_document_id(raw: &str) -> Result<DocumentId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid document id: '{raw}'")))
}

fn parse_signer_id(raw: &str) -> Result<SignerId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid signer id: '{raw}'")))
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn owner() -> impl Filter<Extract = (OwnerId,), Error = Rejection> + Clone {
    warp::header::<String>(OWNER_HEADER).map(OwnerId::new)
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Whole body, capped while streaming so chunked senders need no Content-Length
fn raw_body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::stream().and_then(read_capped)
}

async fn read_capped(
    stream: impl Stream<Item = Result<impl Buf, warp::Error>> + Send,
) -> Result<Bytes, Rejection> {
    futures::pin_mut!(stream);
    let mut body = Vec::new();
    while let Some(mut chunk) = stream.try_next().await.map_err(|err| {
        tracing::debug!(error = %err, "request body read failed");
        warp::reject::custom(BodyUnreadable)
    })? {
        let len = chunk.remaining();
        if (body.len() + len) as u64 > MAX_BODY_BYTES {
            return Err(warp::reject::custom(BodyTooLarge));
        }
        body.extend_from_slice(&chunk.copy_to_bytes(len));
    }
    Ok(Bytes::from(body))
}

/// Every route, with rejections rendered as JSON
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path!("healthz").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "version": signflow_core::VERSION,
        }))
    });

    // Optional header keeps a missing owner from falling through to the id route
    let limit = warp::path!("v1" / "documents" / "limit")
        .and(warp::get())
        .and(warp::header::optional::<String>(OWNER_HEADER))
        .and(with_state(state.clone()))
        .then(document_limit);

    let create = warp::path!("v1" / "documents")
        .and(warp::post())
        .and(owner())
        .and(json_body::<NewDocument>())
        .and(with_state(state.clone()))
        .then(create_document);

    let get = warp::path!("v1" / "documents" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .then(get_document);

    let sign = warp::path!("v1" / "documents" / String / "signers" / String / "sign")
        .and(warp::post())
        .and(raw_body())
        .and(with_state(state.clone()))
        .then(record_signature);

    let cancel = warp::path!("v1" / "documents" / String / "cancel")
        .and(warp::post())
        .and(with_state(state.clone()))
        .then(cancel_document);

    let envelope = warp::path!("v1" / "documents" / String / "envelope")
        .and(warp::post())
        .and(json_body::<AttachEnvelopeRequest>())
        .and(with_state(state.clone()))
        .then(attach_envelope);

    let provider_webhook = warp::path!("v1" / "webhooks" / "provider")
        .and(warp::post())
        .and(raw_body())
        .and(with_state(state.clone()))
        .then(provider_webhook);

    let carrier_webhook = warp::path!("v1" / "webhooks" / "carrier")
        .and(warp::post())
        .and(raw_body())
        .and(with_state(state.clone()))
        .then(carrier_webhook);

    let poll = warp::path!("v1" / "sync" / "poll")
        .and(warp::post())
        .and(json_body::<PollRequest>())
        .and(with_state(state))
        .then(poll);

    health
        .or(limit)
        .or(create)
        .or(get)
        .or(sign)
        .or(cancel)
        .or(envelope)
        .or(provider_webhook)
        .or(carrier_webhook)
        .or(poll)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

async fn document_limit(owner: Option<String>, state: AppState) -> Response {
    let Some(owner) = owner.map(OwnerId::new) else {
        return ApiError::BadRequest(format!("Missing request header \"{OWNER_HEADER}\""))
            .into_response();
    };
    let result = state.service.document_limit(&owner).await.map_err(ApiError::from);
    respond(result, StatusCode::OK)
}

async fn create_document(owner: OwnerId, request: NewDocument, state: AppState) -> Response {
    match state.service.create_document(owner, request).await {
        Ok(CreateOutcome::Created(record)) => json_reply(&record, StatusCode::CREATED),
        Ok(CreateOutcome::QuotaExceeded(status)) => json_reply(&status, StatusCode::FORBIDDEN),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn get_document(id: String, state: AppState) -> Response {
    let result = async {
        let id = parse_document_id(&id)?;
        Ok(state.service.get_document(id).await?)
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn record_signature(id: String, signer: String, body: Bytes, state: AppState) -> Response {
    let result = async {
        let id = parse_document_id(&id)?;
        let signer = parse_signer_id(&signer)?;
        let request: SignRequest = if body.is_empty() {
            SignRequest::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?
        };
        Ok(state
            .service
            .record_signature(id, signer, request.identity_number)
            .await?)
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn cancel_document(id: String, state: AppState) -> Response {
    let result = async {
        let id = parse_document_id(&id)?;
        Ok(state.service.cancel(id).await?)
    }
    .await;
    respond(result, StatusCode::OK)
}

async fn attach_envelope(id: String, request: AttachEnvelopeRequest, state: AppState) -> Response {
    let result = async {
        let id = parse_document_id(&id)?;
        let envelope = request.envelope_id.trim();
        if envelope.is_empty() {
            return Err(ApiError::BadRequest("envelopeId is empty".into()));
        }
        Ok(state
            .service
            .attach_envelope(id, EnvelopeId::new(envelope))
            .await?)
    }
    .await;
    respond(result, StatusCode::OK)
}

fn webhook_reply(ack: IngestAck) -> Response {
    json_reply(
        &WebhookBody {
            received: true,
            duplicate: ack == IngestAck::Duplicate,
        },
        StatusCode::OK,
    )
}

async fn provider_webhook(body: Bytes, state: AppState) -> Response {
    webhook_reply(state.ingest.provider(&body).await)
}

async fn carrier_webhook(body: Bytes, state: AppState) -> Response {
    webhook_reply(state.ingest.carrier(&body).await)
}

async fn poll(request: PollRequest, state: AppState) -> Response {
    let mut results = BTreeMap::new();
    let mut ids = Vec::with_capacity(request.document_ids.len());
    for raw in request.document_ids {
        match raw.parse::<DocumentId>() {
            Ok(id) => ids.push(id),
            Err(_) => {
                results.insert(
                    raw,
                    PollEntry {
                        changed: false,
                        new_status: None,
                    },
                );
            }
        }
    }

    let result = state.engine.poll(&ids).await.map_err(ApiError::from).map(|response| {
        results.extend(
            response
                .results
                .into_iter()
                .map(|(id, entry)| (id.to_string(), entry)),
        );
        PollBody {
            busy: response.busy,
            results,
        }
    });
    respond(result, StatusCode::OK)
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(missing) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, missing.to_string())
    } else if let Some(body) = err.find::<warp::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, body.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some()
        || err.find::<BodyTooLarge>().is_some()
    {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content-length required".to_string())
    } else if err.find::<BodyUnreadable>().is_some() {
        (StatusCode::BAD_REQUEST, "request body could not be read".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(json_reply(&ErrorBody { error: message }, status))
}
