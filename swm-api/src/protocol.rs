//! The request/response JSON payloads exchanged between a client and a
//! sub-wallet, prior to NIP-44 encryption. Shaped like an NWC nip47
//! payload: a method name, a loosely typed params/result payload, and a
//! separate error slot.

use serde::{Deserialize, Serialize};

/// The standard payment-wallet request set this multiplexer demuxes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodName {
    GetBalance,
    GetInfo,
    MakeInvoice,
    PayInvoice,
    LookupInvoice,
}

/// A decrypted request payload, addressed to one sub-wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: MethodName,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A decrypted response payload, to be NIP-44 encrypted back to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result_type: MethodName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ErrorPayload>,
}

impl Response {
    pub fn ok(result_type: MethodName, result: serde_json::Value) -> Self {
        Self {
            result_type,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(result_type: MethodName, error: crate::error::ErrorPayload) -> Self {
        Self {
            result_type,
            result: None,
            error: Some(error),
        }
    }
}

/// Params for `make_invoice`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeInvoiceParams {
    #[serde(rename = "amount")]
    pub amount_msats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u32>,
}

/// Result for `make_invoice`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeInvoiceResult {
    pub invoice: String,
    pub payment_hash: String,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Params for `pay_invoice`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayInvoiceParams {
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "amount")]
    pub amount_msats: Option<u64>,
}

/// Result for `pay_invoice`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayInvoiceResult {
    pub preimage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees_paid: Option<u64>,
}

/// Params for `lookup_invoice`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupInvoiceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
}

/// Result for `lookup_invoice` and for `get_balance`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupInvoiceResult {
    pub invoice: Option<String>,
    pub payment_hash: Option<String>,
    pub amount: u64,
    pub state: InvoiceStateWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<i64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStateWire {
    Pending,
    Settled,
    Failed,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetBalanceResult {
    pub balance: u64,
}

/// A server-initiated push, NIP-44 encrypted the same way a `Response` is,
/// but not solicited by any `Request` — sent the moment the event it
/// describes commits on the core's side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification_type", rename_all = "snake_case")]
pub enum Notification {
    PaymentReceived {
        #[serde(skip_serializing_if = "Option::is_none")]
        payment_hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        invoice: Option<String>,
        amount: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        settled_at: Option<i64>,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = Request {
            method: MethodName::MakeInvoice,
            params: serde_json::to_value(MakeInvoiceParams {
                amount_msats: 1000,
                description: Some("coffee".to_string()),
                description_hash: None,
                expiry: Some(3600),
            })
            .unwrap(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn response_without_error_omits_the_field() {
        let resp = Response::ok(
            MethodName::GetBalance,
            serde_json::to_value(GetBalanceResult { balance: 500_000 })
                .unwrap(),
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
    }

    #[test]
    fn payment_received_notification_roundtrips_and_tags_its_type() {
        let notification = Notification::PaymentReceived {
            payment_hash: Some("hash-1".to_string()),
            invoice: None,
            amount: 500_000,
            settled_at: Some(1_700_000_000),
        };
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"notification_type\":\"payment_received\""));
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(notification, back);
    }
}
