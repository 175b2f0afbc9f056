use crate::models::*;
use crate::security::SecurityCheck;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing service unreachable: {0}")]
    Transport(String),

    #[error("{0}")]
    Service(String),
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Transport(err.to_string())
    }
}

/// Opaque session handle issued by the billing service on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingHandle(String);

impl BillingHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies one launched purchase flow on the billing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(flow: impl Into<String>) -> Self {
        Self(flow.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Terminal outcome of a purchase flow, reported after the user decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Purchased(PurchaseRecord),
    Cancelled,
    Failed(String),
}

/// Fires at most once, when the billing service drops the session after
/// connect. A dropped sender means the watcher died without a notice.
pub type DisconnectSignal = oneshot::Receiver<String>;

/// The external billing collaborator. Each method is one settle point: it
/// returns exactly once with the terminal result of that round trip. The
/// purchase flow is split in two so the UI round-trip on the device maps to
/// its own await.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    async fn connect(
        &self,
        security: &SecurityCheck,
    ) -> Result<(BillingHandle, DisconnectSignal), BillingError>;

    async fn sku_details(
        &self,
        handle: &BillingHandle,
        skus: &[String],
    ) -> Result<Vec<ProductDetails>, BillingError>;

    /// Launches the billing UI flow. Returning `Ok` means the flow is
    /// confirmed on screen; the outcome comes from [`Self::await_purchase`].
    async fn begin_purchase(
        &self,
        handle: &BillingHandle,
        intent: &PurchaseIntent,
    ) -> Result<FlowId, BillingError>;

    async fn await_purchase(
        &self,
        handle: &BillingHandle,
        flow: &FlowId,
    ) -> Result<FlowOutcome, BillingError>;

    async fn consume(&self, handle: &BillingHandle, token: &str) -> Result<(), BillingError>;

    async fn purchased_products(
        &self,
        handle: &BillingHandle,
    ) -> Result<Vec<PurchaseRecord>, BillingError>;

    async fn disconnect(&self, handle: &BillingHandle) -> Result<(), BillingError>;
}

fn flow_outcome(result: FlowResult) -> Result<FlowOutcome, BillingError> {
    match result.status.as_str() {
        "purchased" => {
            let purchase = result.purchase.ok_or_else(|| {
                BillingError::Service("purchase result without a record".to_string())
            })?;
            Ok(FlowOutcome::Purchased(purchase))
        }
        "cancelled" => Ok(FlowOutcome::Cancelled),
        "failed" => Ok(FlowOutcome::Failed(
            result
                .message
                .unwrap_or_else(|| "purchase failed".to_string()),
        )),
        other => Err(BillingError::Service(format!(
            "unknown purchase status: {}",
            other
        ))),
    }
}

/// JSON-RPC client for the billing service.
pub struct BillingRpc {
    client: Client,
    url: String,
    request_id: Arc<AtomicU64>,
}

impl BillingRpc {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call<T, R>(&self, method: &str, params: T) -> Result<R, BillingError>
    where
        T: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let rpc_response: JsonRpcResponse<R> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(BillingError::Service(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| BillingError::Service("Empty response".to_string()))
    }

    // Methods that return null on success need their own path; a missing
    // result is fine for these.
    async fn call_unit<T>(&self, method: &str, params: T) -> Result<(), BillingError>
    where
        T: serde::Serialize,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let rpc_response: JsonRpcResponse<serde_json::Value> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(BillingError::Service(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        Ok(())
    }

    /// Long poll that resolves when the service drops the session. Runs on
    /// its own task so the connect caller is not held up.
    fn spawn_disconnect_watch(&self, handle: &BillingHandle) -> DisconnectSignal {
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let url = self.url.clone();
        let request_id = Arc::clone(&self.request_id);
        let handle = handle.clone();

        tokio::spawn(async move {
            let request = JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: request_id.fetch_add(1, Ordering::SeqCst),
                method: "connection.watch".to_string(),
                params: vec![handle.as_str().to_string()],
            };

            let notice = async {
                let response = client.post(&url).json(&request).send().await?;
                let rpc_response: JsonRpcResponse<DisconnectNotice> = response.json().await?;
                Ok::<_, reqwest::Error>(rpc_response.result)
            };

            let reason = match notice.await {
                Ok(Some(notice)) => notice.reason,
                Ok(None) => "Disconnected from Bazaar service".to_string(),
                // transport failure on the watch also means the service is gone
                Err(e) => e.to_string(),
            };
            let _ = tx.send(reason);
        });

        rx
    }
}

#[async_trait]
impl BillingBackend for BillingRpc {
    async fn connect(
        &self,
        security: &SecurityCheck,
    ) -> Result<(BillingHandle, DisconnectSignal), BillingError> {
        let opened: SessionOpened = self.call("connection.open", vec![security]).await?;
        let handle = BillingHandle::new(opened.handle);
        let signal = self.spawn_disconnect_watch(&handle);
        Ok((handle, signal))
    }

    async fn sku_details(
        &self,
        handle: &BillingHandle,
        skus: &[String],
    ) -> Result<Vec<ProductDetails>, BillingError> {
        self.call("catalog.skuDetails", (handle.as_str(), skus))
            .await
    }

    async fn begin_purchase(
        &self,
        handle: &BillingHandle,
        intent: &PurchaseIntent,
    ) -> Result<FlowId, BillingError> {
        let began: FlowBegan = self
            .call("purchase.begin", (handle.as_str(), intent))
            .await?;
        Ok(FlowId::new(began.flow))
    }

    async fn await_purchase(
        &self,
        handle: &BillingHandle,
        flow: &FlowId,
    ) -> Result<FlowOutcome, BillingError> {
        let result: FlowResult = self
            .call("purchase.await", (handle.as_str(), flow.as_str()))
            .await?;
        flow_outcome(result)
    }

    async fn consume(&self, handle: &BillingHandle, token: &str) -> Result<(), BillingError> {
        self.call_unit("purchase.consume", (handle.as_str(), token))
            .await
    }

    async fn purchased_products(
        &self,
        handle: &BillingHandle,
    ) -> Result<Vec<PurchaseRecord>, BillingError> {
        self.call("purchase.list", vec![handle.as_str().to_string()])
            .await
    }

    async fn disconnect(&self, handle: &BillingHandle) -> Result<(), BillingError> {
        self.call_unit("connection.close", vec![handle.as_str().to_string()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: &str, purchase: Option<PurchaseRecord>, message: Option<&str>) -> FlowResult {
        FlowResult {
            status: status.to_string(),
            purchase,
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_flow_outcome_purchased() {
        let json = r#"{"status":"purchased","purchase":{"orderId":"o","purchaseToken":"t","payload":"","packageName":"p","purchaseTime":1,"productId":"sku"}}"#;
        let parsed: FlowResult = serde_json::from_str(json).unwrap();
        match flow_outcome(parsed).unwrap() {
            FlowOutcome::Purchased(record) => assert_eq!(record.product_id, "sku"),
            other => panic!("expected purchased, got {:?}", other),
        }
    }

    #[test]
    fn test_flow_outcome_purchased_without_record_is_an_error() {
        let outcome = flow_outcome(result("purchased", None, None));
        assert!(matches!(outcome, Err(BillingError::Service(_))));
    }

    #[test]
    fn test_flow_outcome_cancelled_and_failed() {
        assert_eq!(
            flow_outcome(result("cancelled", None, None)).unwrap(),
            FlowOutcome::Cancelled
        );
        assert_eq!(
            flow_outcome(result("failed", None, Some("item unavailable"))).unwrap(),
            FlowOutcome::Failed("item unavailable".to_string())
        );
    }

    #[test]
    fn test_flow_outcome_unknown_status() {
        let outcome = flow_outcome(result("exploded", None, None));
        assert!(matches!(outcome, Err(BillingError::Service(_))));
    }

    #[test]
    fn test_purchase_intent_wire_shape() {
        let intent = PurchaseIntent {
            product_id: "sku1".to_string(),
            payload: String::new(),
            dynamic_price_token: None,
        };
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["productId"], "sku1");
        assert_eq!(json["payload"], "");
        assert!(json.get("dynamicPriceToken").is_none());
    }
}
