use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============ Billing Core Types ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductDetails {
    pub sku: String,
    pub title: String,
    pub price: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub order_id: String,
    pub purchase_token: String,
    pub payload: String,
    pub package_name: String,
    pub purchase_time: i64,
    pub product_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    NotInitialized,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseState {
    PurchaseBegan,
    FailedToBegin,
    Purchased,
    Cancelled,
    Failed,
    Disconnected,
}

/// Payload broadcast on the `purchaseStateChanged` channel. The auxiliary
/// fields vary by state, so absent ones are left off the wire entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    pub state: PurchaseState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<PurchaseRecord>,
}

impl PurchaseEvent {
    fn new(state: PurchaseState) -> Self {
        Self {
            state,
            product_id: None,
            message: None,
            purchase: None,
        }
    }

    pub fn began(product_id: &str) -> Self {
        Self {
            product_id: Some(product_id.to_string()),
            ..Self::new(PurchaseState::PurchaseBegan)
        }
    }

    pub fn failed_to_begin(message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::new(PurchaseState::FailedToBegin)
        }
    }

    pub fn purchased(purchase: PurchaseRecord) -> Self {
        Self {
            purchase: Some(purchase),
            ..Self::new(PurchaseState::Purchased)
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: Some("Purchase cancelled by user".to_string()),
            ..Self::new(PurchaseState::Cancelled)
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::new(PurchaseState::Failed)
        }
    }

    pub fn disconnected(message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::new(PurchaseState::Disconnected)
        }
    }
}

// ============ API Request Types ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(default)]
    pub rsa_public_key: Option<String>,
}

/// `skus` stays a raw JSON value so a missing list, a non-list, and a
/// non-string element can each be reported precisely instead of as a
/// generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct GetProductsRequest {
    #[serde(default)]
    pub skus: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseProductRequest {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub dynamic_price_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsumeProductRequest {
    #[serde(default)]
    pub token: Option<String>,
}

// ============ API Response Types ============

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub connected: bool,
    pub state: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub state: String, // "QUERY_SUCCEEDED"
    pub products: Vec<ProductDetails>,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub state: PurchaseState,
    pub purchase: PurchaseRecord,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub state: String, // "CONSUMED"
    pub consumed: bool,
}

#[derive(Debug, Serialize)]
pub struct PurchasesResponse {
    pub state: String, // "QUERY_SUCCEEDED"
    pub purchases: Vec<PurchaseRecord>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStateResponse {
    pub state: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub state: ConnectionState,
    pub disconnected: bool,
}

// ============ Billing RPC Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest<T> {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: T,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Purchase request forwarded to the billing service. An absent caller
/// payload is forwarded as the empty string, matching the store SDK.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseIntent {
    pub product_id: String,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_price_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionOpened {
    pub handle: String,
}

/// Result of the `connection.watch` long poll, delivered once when the
/// billing service drops the session.
#[derive(Debug, Deserialize)]
pub struct DisconnectNotice {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FlowBegan {
    pub flow: String,
}

#[derive(Debug, Deserialize)]
pub struct FlowResult {
    pub status: String, // "purchased", "cancelled", "failed"
    #[serde(default)]
    pub purchase: Option<PurchaseRecord>,
    #[serde(default)]
    pub message: Option<String>,
}
