//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CartResponse, ChatRequest, ChatResponse, CheckpointListResponse, CheckpointResponse,
    CheckpointSummary, ConversationListResponse, ConversationResponse, CreateConversationRequest,
    ErrorResponse, ForkRequest, ForkResponse, HistoryQuery, ModelsResponse, ProductQuery,
    ProductsResponse, ReviewResponse,
};
use super::AppState;
use crate::runtime::tool_call_json;
use crate::state_machine::{review_question, Event, ReviewDecision};
use crate::store::{Checkpoint, Conversation, StoreError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Local, Timelike};
use rand::seq::SliceRandom;
use serde_json::{json, Value};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversations
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/new", post(create_conversation))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/by-slug/:slug", get(get_by_slug))
        // User actions
        .route("/api/conversations/:id/chat", post(send_chat))
        .route("/api/conversations/:id/review", post(submit_review))
        // SSE streaming
        .route("/api/conversations/:id/stream", get(stream_conversation))
        // Checkpoint history and forking
        .route("/api/conversations/:id/checkpoints", get(list_checkpoints))
        .route("/api/checkpoints/:id", get(get_checkpoint))
        .route("/api/checkpoints/:id/fork", post(fork_checkpoint))
        // Shop
        .route("/api/products", get(list_products))
        .route("/api/conversations/:id/cart", get(get_cart))
        // Model info
        .route("/api/models", get(list_models))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state.runtime.store().list_conversations()?;

    let json_convs: Vec<Value> = conversations
        .into_iter()
        .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
        .collect();

    Ok(Json(ConversationListResponse {
        conversations: json_convs,
    }))
}

async fn create_conversation(
    State(state): State<AppState>,
    body: Option<Json<CreateConversationRequest>>,
) -> Result<Json<ConversationResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let id = uuid::Uuid::new_v4().to_string();

    let conversation = match &request.slug {
        Some(slug) => state.runtime.store().create_conversation(&id, slug)?,
        None => {
            // Generated slugs can collide; retry with a suffix
            let slug = generate_slug();
            match state.runtime.store().create_conversation(&id, &slug) {
                Ok(conv) => conv,
                Err(StoreError::SlugExists(_)) => {
                    let suffixed = format!("{slug}-{}", short_suffix());
                    state.runtime.store().create_conversation(&id, &suffixed)?
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok(Json(snapshot_response(&state, conversation)?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state.runtime.store().get_conversation(&id)?;
    Ok(Json(snapshot_response(&state, conversation)?))
}

async fn get_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state.runtime.store().get_conversation_by_slug(&slug)?;
    Ok(Json(snapshot_response(&state, conversation)?))
}

/// Build the conversation view from its latest checkpoint
fn snapshot_response(
    state: &AppState,
    conversation: Conversation,
) -> Result<ConversationResponse, AppError> {
    let checkpoint = state.runtime.store().latest_checkpoint(&conversation.id)?;
    let (conv_state, transcript) =
        checkpoint.map_or_else(Default::default, |c: Checkpoint| (c.state, c.transcript));

    let pending_review = conv_state.pending_review().map(|tool| {
        json!({
            "question": review_question(tool),
            "tool_call": tool_call_json(tool),
        })
    });

    Ok(ConversationResponse {
        conversation: serde_json::to_value(conversation).unwrap_or(Value::Null),
        transcript: transcript
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
        state: serde_json::to_value(conv_state).unwrap_or(Value::Null),
        pending_review,
    })
}

// ============================================================
// User actions
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }

    state
        .runtime
        .send_event(&id, Event::UserMessage { text: request.text })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

async fn submit_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<ReviewResponse>, AppError> {
    state
        .runtime
        .send_event(&id, Event::Review { decision })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ReviewResponse { accepted: true }))
}

// ============================================================
// SSE streaming
// ============================================================

async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let conversation = state.runtime.store().get_conversation(&id)?;
    let snapshot = snapshot_response(&state, conversation)?;

    let init = crate::runtime::SseEvent::Init {
        conversation: snapshot.conversation,
        transcript: snapshot.transcript,
        state: snapshot.state,
        pending_review: snapshot.pending_review,
    };

    let rx = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    Ok(sse_stream(init, rx).into_response())
}

// ============================================================
// Checkpoint history and forking
// ============================================================

async fn list_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CheckpointListResponse>, AppError> {
    // 404 on unknown conversations rather than an empty history
    state.runtime.store().get_conversation(&id)?;

    let checkpoints = state.runtime.store().list_checkpoints(&id, query.limit)?;
    let summaries = checkpoints
        .into_iter()
        .map(|c| CheckpointSummary {
            id: c.id,
            sequence_id: c.sequence_id,
            state: serde_json::to_value(&c.state).unwrap_or(Value::Null),
            message_count: c.transcript.len(),
            created_at: c.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(CheckpointListResponse {
        checkpoints: summaries,
    }))
}

async fn get_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointResponse>, AppError> {
    let checkpoint = state.runtime.store().get_checkpoint(&id)?;
    Ok(Json(CheckpointResponse {
        checkpoint: serde_json::to_value(checkpoint).unwrap_or(Value::Null),
    }))
}

async fn fork_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ForkRequest>>,
) -> Result<Json<ForkResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let new_id = uuid::Uuid::new_v4().to_string();
    let slug = request
        .slug
        .unwrap_or_else(|| format!("{}-{}", generate_slug(), short_suffix()));

    let (conversation, checkpoint) = state.runtime.store().fork_conversation(&id, &new_id, &slug)?;

    Ok(Json(ForkResponse {
        conversation: serde_json::to_value(conversation).unwrap_or(Value::Null),
        checkpoint_id: checkpoint.id,
    }))
}

// ============================================================
// Shop
// ============================================================

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductsResponse>, AppError> {
    let products = match query.q {
        Some(q) if !q.is_empty() => state.runtime.store().search_products(&q, 50)?,
        _ => state.runtime.store().list_products()?,
    };

    Ok(Json(ProductsResponse {
        products: products
            .into_iter()
            .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
            .collect(),
    }))
}

async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CartResponse>, AppError> {
    state.runtime.store().get_conversation(&id)?;
    let items = state.runtime.store().cart_items(&id)?;

    let total_cents = items
        .iter()
        .map(|i| i.price_cents * i64::from(i.quantity))
        .sum();

    Ok(Json(CartResponse {
        items: items
            .into_iter()
            .map(|i| serde_json::to_value(i).unwrap_or(Value::Null))
            .collect(),
        total_cents,
    }))
}

// ============================================================
// Model info and version
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let registry = state.runtime.llm_registry();
    Json(ModelsResponse {
        models: registry.available_models(),
        default: registry.default_model_id().to_string(),
    })
}

async fn get_version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

// ============================================================
// Errors
// ============================================================

/// Handler-level error with HTTP mapping
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConversationNotFound(_)
            | StoreError::CheckpointNotFound(_)
            | StoreError::ProductNotFound(_) => AppError::NotFound(e.to_string()),
            StoreError::SlugExists(_) => AppError::Conflict(e.to_string()),
            StoreError::Sqlite(_) | StoreError::Serde(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

// ============================================================
// Slug generation
// ============================================================

fn generate_slug() -> String {
    let now = Local::now();

    let day = match now.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    };

    let time = match now.hour() {
        6..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };

    let words = &[
        "cedar", "harbor", "juniper", "maple", "prairie", "willow", "ember", "breeze", "summit",
        "cove", "aspen", "garnet", "linen", "saffron", "cobalt", "drift",
    ];

    let mut rng = rand::thread_rng();
    let word = words.choose(&mut rng).copied().unwrap_or("cedar");

    format!("{day}-{time}-{word}")
}

fn short_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id.chars().take(6).collect()
}
