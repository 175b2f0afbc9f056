use crate::billing::{BillingBackend, BillingHandle, DisconnectSignal, FlowOutcome};
use crate::error::ApiError;
use crate::models::*;
use crate::security::SecurityCheck;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum SessionState {
    NotInitialized,
    Connected(BillingHandle),
    Disconnected,
}

#[derive(Debug)]
struct Slot {
    // bumped on every successful connect so a stale disconnect watcher
    // cannot flip a session it no longer belongs to
    epoch: u64,
    state: SessionState,
}

/// Owns the one live billing session and mediates every purchase-related
/// request against it. Results come back as the JSON shapes in `models`;
/// purchase-state transitions are additionally broadcast to subscribers.
pub struct SessionManager {
    backend: Arc<dyn BillingBackend>,
    slot: Arc<RwLock<Slot>>,
    // serializes connect/disconnect transitions so two initialize calls
    // cannot interleave their backend round trips
    transition: Mutex<()>,
    purchase_in_flight: AtomicBool,
    events: broadcast::Sender<PurchaseEvent>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn BillingBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            slot: Arc::new(RwLock::new(Slot {
                epoch: 0,
                state: SessionState::NotInitialized,
            })),
            transition: Mutex::new(()),
            purchase_in_flight: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribe to the `purchaseStateChanged` channel.
    pub fn subscribe(&self) -> broadcast::Receiver<PurchaseEvent> {
        self.events.subscribe()
    }

    pub async fn initialize(
        &self,
        rsa_public_key: Option<String>,
    ) -> Result<InitializeResponse, ApiError> {
        let security = SecurityCheck::from_key(rsa_public_key.as_deref())?;

        let _transition = self.transition.lock().await;

        // a fresh initialize replaces any previous session; drop the old
        // handle first so the service is not left holding two channels
        let previous = {
            let mut slot = self.slot.write().await;
            match std::mem::replace(&mut slot.state, SessionState::NotInitialized) {
                SessionState::Connected(handle) => Some(handle),
                _ => None,
            }
        };
        if let Some(handle) = previous {
            if let Err(e) = self.backend.disconnect(&handle).await {
                tracing::debug!("disconnect of replaced session failed: {}", e);
            }
        }

        let (handle, signal) = self
            .backend
            .connect(&security)
            .await
            .map_err(|e| ApiError::ConnectionFailed(format!("Connection failed: {}", e)))?;

        let epoch = {
            let mut slot = self.slot.write().await;
            slot.epoch += 1;
            slot.state = SessionState::Connected(handle);
            slot.epoch
        };
        self.watch_disconnect(epoch, signal);

        tracing::info!("billing session connected");
        Ok(InitializeResponse {
            connected: true,
            state: ConnectionState::Connected,
        })
    }

    pub async fn get_products(
        &self,
        request: GetProductsRequest,
    ) -> Result<ProductsResponse, ApiError> {
        let handle = self.connected_handle().await?;
        let skus = parse_skus(request.skus)?;

        let products = self
            .backend
            .sku_details(&handle, &skus)
            .await
            .map_err(|e| ApiError::QueryFailed(format!("Failed to get products: {}", e)))?;

        Ok(ProductsResponse {
            state: "QUERY_SUCCEEDED".to_string(),
            products,
        })
    }

    /// Runs one purchase flow end to end. The call stays open across the
    /// billing UI round-trip; every terminal branch both broadcasts an event
    /// and settles the caller, while `PURCHASE_BEGAN` only broadcasts.
    pub async fn purchase_product(
        &self,
        request: PurchaseProductRequest,
    ) -> Result<PurchaseResponse, ApiError> {
        let handle = self.connected_handle().await?;

        let product_id = match request.product_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(ApiError::InvalidArgument(
                    "Product ID is required".to_string(),
                ))
            }
        };

        let _flow_guard = self.acquire_purchase_slot()?;

        let intent = PurchaseIntent {
            product_id: product_id.clone(),
            payload: request.payload.unwrap_or_default(),
            dynamic_price_token: request.dynamic_price_token,
        };

        let flow = match self.backend.begin_purchase(&handle, &intent).await {
            Ok(flow) => flow,
            Err(e) => {
                self.emit(PurchaseEvent::failed_to_begin(e.to_string()));
                return Err(ApiError::PurchaseBeginFailed(format!(
                    "Failed to begin purchase: {}",
                    e
                )));
            }
        };
        self.emit(PurchaseEvent::began(&product_id));

        match self.backend.await_purchase(&handle, &flow).await {
            Ok(FlowOutcome::Purchased(purchase)) => {
                self.emit(PurchaseEvent::purchased(purchase.clone()));
                Ok(PurchaseResponse {
                    state: PurchaseState::Purchased,
                    purchase,
                })
            }
            Ok(FlowOutcome::Cancelled) => {
                self.emit(PurchaseEvent::cancelled());
                Err(ApiError::PurchaseCancelled(
                    "Purchase cancelled by user".to_string(),
                ))
            }
            Ok(FlowOutcome::Failed(message)) => {
                self.emit(PurchaseEvent::failed(message.clone()));
                Err(ApiError::PurchaseFailed(format!(
                    "Purchase failed: {}",
                    message
                )))
            }
            Err(e) => {
                self.emit(PurchaseEvent::failed(e.to_string()));
                Err(ApiError::PurchaseFailed(format!("Purchase failed: {}", e)))
            }
        }
    }

    pub async fn consume_product(
        &self,
        request: ConsumeProductRequest,
    ) -> Result<ConsumeResponse, ApiError> {
        let handle = self.connected_handle().await?;

        let token = match request.token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(ApiError::InvalidArgument(
                    "Purchase token is required".to_string(),
                ))
            }
        };

        self.backend
            .consume(&handle, &token)
            .await
            .map_err(|e| ApiError::ConsumeFailed(format!("Consume failed: {}", e)))?;

        Ok(ConsumeResponse {
            state: "CONSUMED".to_string(),
            consumed: true,
        })
    }

    pub async fn get_purchase_info(&self) -> Result<PurchasesResponse, ApiError> {
        let handle = self.connected_handle().await?;

        // reported order is kept as-is
        let purchases = self
            .backend
            .purchased_products(&handle)
            .await
            .map_err(|e| ApiError::QueryFailed(format!("Query failed: {}", e)))?;

        Ok(PurchasesResponse {
            state: "QUERY_SUCCEEDED".to_string(),
            purchases,
        })
    }

    pub async fn connection_state(&self) -> ConnectionStateResponse {
        let slot = self.slot.read().await;
        let state = match slot.state {
            SessionState::NotInitialized => ConnectionState::NotInitialized,
            SessionState::Connected(_) => ConnectionState::Connected,
            SessionState::Disconnected => ConnectionState::Disconnected,
        };
        ConnectionStateResponse { state }
    }

    pub async fn disconnect(&self) -> Result<DisconnectResponse, ApiError> {
        let _transition = self.transition.lock().await;

        let handle = {
            let mut slot = self.slot.write().await;
            match std::mem::replace(&mut slot.state, SessionState::Disconnected) {
                SessionState::NotInitialized => {
                    slot.state = SessionState::NotInitialized;
                    return Err(ApiError::NotInitialized(
                        "Not connected to Bazaar service".to_string(),
                    ));
                }
                SessionState::Connected(handle) => Some(handle),
                SessionState::Disconnected => None,
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = self.backend.disconnect(&handle).await {
                tracing::debug!("backend disconnect failed: {}", e);
            }
        }

        Ok(DisconnectResponse {
            state: ConnectionState::Disconnected,
            disconnected: true,
        })
    }

    /// Best-effort cleanup on host shutdown; reports to nobody.
    pub async fn teardown(&self) {
        let _transition = self.transition.lock().await;

        let handle = {
            let mut slot = self.slot.write().await;
            match std::mem::replace(&mut slot.state, SessionState::Disconnected) {
                SessionState::Connected(handle) => Some(handle),
                other => {
                    slot.state = other;
                    None
                }
            }
        };

        if let Some(handle) = handle {
            tracing::info!("tearing down billing session");
            if let Err(e) = self.backend.disconnect(&handle).await {
                tracing::debug!("teardown disconnect failed: {}", e);
            }
        }
    }

    async fn connected_handle(&self) -> Result<BillingHandle, ApiError> {
        let slot = self.slot.read().await;
        match &slot.state {
            SessionState::NotInitialized => Err(ApiError::NotInitialized(
                "Payment not initialized. Call initialize() first.".to_string(),
            )),
            SessionState::Disconnected => Err(ApiError::NotConnected(
                "Not connected to Bazaar service".to_string(),
            )),
            SessionState::Connected(handle) => Ok(handle.clone()),
        }
    }

    fn acquire_purchase_slot(&self) -> Result<PurchaseSlotGuard<'_>, ApiError> {
        if self
            .purchase_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ApiError::PurchaseInFlight(
                "Another purchase is already in progress".to_string(),
            ));
        }
        Ok(PurchaseSlotGuard(&self.purchase_in_flight))
    }

    fn emit(&self, event: PurchaseEvent) {
        tracing::debug!(state = ?event.state, "purchase state changed");
        // a send error only means nobody is subscribed right now
        let _ = self.events.send(event);
    }

    fn watch_disconnect(&self, epoch: u64, signal: DisconnectSignal) {
        let slot = Arc::clone(&self.slot);
        let events = self.events.clone();
        tokio::spawn(async move {
            let reason = match signal.await {
                Ok(reason) => reason,
                // watcher went away without a notice; nothing to report
                Err(_) => return,
            };
            {
                let mut slot = slot.write().await;
                if slot.epoch != epoch {
                    // a newer session already replaced this one
                    return;
                }
                slot.state = SessionState::Disconnected;
            }
            tracing::warn!("billing session dropped: {}", reason);
            let _ = events.send(PurchaseEvent::disconnected(reason));
        });
    }
}

struct PurchaseSlotGuard<'a>(&'a AtomicBool);

impl Drop for PurchaseSlotGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn parse_skus(skus: Option<Value>) -> Result<Vec<String>, ApiError> {
    let skus =
        skus.ok_or_else(|| ApiError::InvalidArgument("SKUs list is required".to_string()))?;
    let items = skus
        .as_array()
        .ok_or_else(|| ApiError::InvalidArgument("SKUs list is required".to_string()))?;

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(sku) => out.push(sku.to_string()),
            None => {
                return Err(ApiError::InvalidArgument(format!(
                    "Invalid SKU format at index {}",
                    i
                )))
            }
        }
    }
    Ok(out)
}
