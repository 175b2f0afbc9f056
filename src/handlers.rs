use crate::error::ApiError;
use crate::models::*;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

// POST /v1/session/initialize
pub async fn initialize(
    State(state): State<AppState>,
    Json(body): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let result = state.sessions.initialize(body.rsa_public_key).await?;
    Ok(Json(result))
}

// GET /v1/session/state
pub async fn get_connection_state(
    State(state): State<AppState>,
) -> Json<ConnectionStateResponse> {
    Json(state.sessions.connection_state().await)
}

// POST /v1/session/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let result = state.sessions.disconnect().await?;
    Ok(Json(result))
}

// POST /v1/products/query
pub async fn get_products(
    State(state): State<AppState>,
    Json(body): Json<GetProductsRequest>,
) -> Result<Json<ProductsResponse>, ApiError> {
    let result = state.sessions.get_products(body).await?;
    Ok(Json(result))
}

// POST /v1/purchases
//
// Held open across the billing UI round-trip; the response is the terminal
// purchase outcome, while intermediate states arrive on /v1/events.
pub async fn purchase_product(
    State(state): State<AppState>,
    Json(body): Json<PurchaseProductRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let result = state.sessions.purchase_product(body).await?;
    Ok(Json(result))
}

// POST /v1/purchases/consume
pub async fn consume_product(
    State(state): State<AppState>,
    Json(body): Json<ConsumeProductRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let result = state.sessions.consume_product(body).await?;
    Ok(Json(result))
}

// GET /v1/purchases
pub async fn get_purchase_info(
    State(state): State<AppState>,
) -> Result<Json<PurchasesResponse>, ApiError> {
    let result = state.sessions.get_purchase_info().await?;
    Ok(Json(result))
}

// GET /v1/events
//
// SSE stream of `purchaseStateChanged` payloads. A subscriber that lags
// behind the channel capacity skips the missed events and keeps the stream.
pub async fn purchase_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.sessions.subscribe();

    let stream = BroadcastStream::new(receiver).filter_map(|event| match event {
        Ok(event) => match SseEvent::default()
            .event("purchaseStateChanged")
            .json_data(&event)
        {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(e) => {
                tracing::warn!("dropping unserializable purchase event: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("event subscriber lagged, skipped {} events", skipped);
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
