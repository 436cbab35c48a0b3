//! Payme JSON-RPC webhooks.
//!
//! The `check` endpoint answers `CheckPerformTransaction`; the `perform`
//! endpoint takes `PerformTransaction` and the provider's own abort,
//! `CancelTransaction`. Requests carry `Authorization: Basic
//! base64("Paycom:<secretKey>")`. Every reply is HTTP 200; failures travel in
//! the JSON-RPC `error` member.

use base64::Engine;
use serde_json::{json, Value};

use super::{ErrorCode, InboundRequest, Phase, Provider, ProviderAdapter, ProviderReply};
use crate::credentials::ProviderSecrets;
use crate::engine::{Completion, IdPolicy, Outcome, SettlementEngine};
use crate::error::PayError;
use crate::security::constant_time_eq;

/// Basic-auth login Payme always sends.
const LOGIN: &str = "Paycom";

/// Settlement state reported for a performed transaction.
const STATE_PERFORMED: i64 = 2;

fn vocabulary(code: ErrorCode) -> (i64, &'static str) {
    match code {
        ErrorCode::SignatureInvalid => (-32504, "Insufficient privilege"),
        ErrorCode::MethodNotSupported => (-32601, "Method not found"),
        ErrorCode::MalformedRequest => (-32600, "Invalid request"),
        ErrorCode::OrderNotFound => (-31050, "Order not found"),
        ErrorCode::AlreadyPaid => (-31051, "Order already paid"),
        ErrorCode::UpstreamCancelled => (-31008, "Transaction cancelled"),
        ErrorCode::InternalError => (-32400, "System error"),
    }
}

/// JSON-RPC envelope. `params` is validated per method.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

impl RpcCall {
    pub fn parse(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let obj = value.as_object()?;
        Some(Self {
            id: obj.get("id").cloned().unwrap_or(Value::Null),
            method: obj.get("method")?.as_str()?.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Transaction parameters shared by all three methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    /// Payme's own transaction id, when sent.
    pub transaction_id: Option<String>,
    pub order_id: String,
    pub amount: i64,
    pub reason: Option<i64>,
}

impl TransactionParams {
    fn parse(params: &Value, require_amount: bool) -> Option<Self> {
        let order_id = match params.get("account")?.get("order_id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let amount = match params.get("amount") {
            Some(v) => v.as_i64().filter(|a| *a >= 0)?,
            None if !require_amount => 0,
            None => return None,
        };
        Some(Self {
            transaction_id: params.get("id").and_then(Value::as_str).map(str::to_string),
            order_id,
            amount,
            reason: params.get("reason").and_then(Value::as_i64),
        })
    }
}

/// Adapter for Payme's check/perform JSON-RPC endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaymeAdapter;

impl PaymeAdapter {
    pub fn new() -> Self {
        Self
    }

    fn result(id: &Value, result: Value, outcome: &'static str) -> ProviderReply {
        ProviderReply {
            status: 200,
            body: json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            outcome,
        }
    }

    fn error(id: &Value, code: ErrorCode, data: Option<Value>) -> ProviderReply {
        let (wire, message) = vocabulary(code);
        let mut error = json!({ "code": wire, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        ProviderReply {
            status: 200,
            body: json!({ "jsonrpc": "2.0", "id": id, "error": error }),
            outcome: code.label(),
        }
    }

    fn translate(
        call: &RpcCall,
        params: &TransactionParams,
        phase: Phase,
        result: Result<Outcome, PayError>,
    ) -> ProviderReply {
        match result {
            Ok(Outcome::Allow) => Self::result(&call.id, json!({ "allow": true }), "allow"),
            Ok(Outcome::Settled { id, settled_at, .. }) => Self::result(
                &call.id,
                json!({
                    "transaction": id,
                    "perform_time": settled_at.timestamp_millis(),
                    "state": STATE_PERFORMED,
                }),
                "settled",
            ),
            Ok(Outcome::OrderNotFound) => Self::error(&call.id, ErrorCode::OrderNotFound, None),
            Ok(Outcome::AlreadyPaid) => Self::error(&call.id, ErrorCode::AlreadyPaid, None),
            Ok(Outcome::Cancelled { code }) => {
                Self::error(&call.id, ErrorCode::UpstreamCancelled, Some(json!(code)))
            }
            Err(e) => {
                tracing::error!(
                    provider = "payme",
                    phase = phase.as_str(),
                    order_id = %params.order_id,
                    error = %e,
                    "payme webhook failed"
                );
                Self::error(&call.id, ErrorCode::InternalError, None)
            }
        }
    }

    /// Parse the envelope and authenticate. `Err` carries the finished reply.
    fn admit(
        &self,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> Result<RpcCall, ProviderReply> {
        let Some(call) = RpcCall::parse(request.body) else {
            return Err(self.reject(request, ErrorCode::MalformedRequest));
        };
        if !self.authenticate(request, secrets) {
            tracing::warn!(provider = "payme", method = %call.method, "payme authorization failed");
            return Err(Self::error(&call.id, ErrorCode::SignatureInvalid, None));
        }
        Ok(call)
    }
}

impl ProviderAdapter for PaymeAdapter {
    fn provider(&self) -> Provider {
        Provider::Payme
    }

    fn authenticate(&self, request: &InboundRequest<'_>, secrets: &ProviderSecrets) -> bool {
        let Some(encoded) = request
            .authorization
            .and_then(|h| h.trim().strip_prefix("Basic "))
        else {
            return false;
        };
        let presented = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .unwrap_or_default();
        let expected = format!("{LOGIN}:{}", secrets.secret_key);
        constant_time_eq(&presented, expected.as_bytes())
    }

    async fn prepare(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> ProviderReply {
        let call = match self.admit(request, secrets) {
            Ok(call) => call,
            Err(reply) => return reply,
        };
        if call.method != "CheckPerformTransaction" {
            return Self::error(&call.id, ErrorCode::MethodNotSupported, None);
        }
        let Some(params) = TransactionParams::parse(&call.params, true) else {
            return Self::error(&call.id, ErrorCode::MalformedRequest, None);
        };

        let result = engine
            .prepare(Provider::Payme, &params.order_id, params.amount)
            .await;
        Self::translate(&call, &params, Phase::Prepare, result)
    }

    async fn complete(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> ProviderReply {
        let call = match self.admit(request, secrets) {
            Ok(call) => call,
            Err(reply) => return reply,
        };
        let cancelling = match call.method.as_str() {
            "PerformTransaction" => false,
            "CancelTransaction" => true,
            _ => return Self::error(&call.id, ErrorCode::MethodNotSupported, None),
        };
        let Some(params) = TransactionParams::parse(&call.params, !cancelling) else {
            return Self::error(&call.id, ErrorCode::MalformedRequest, None);
        };

        let upstream_error = if cancelling {
            // A cancel without a non-zero reason would otherwise settle the order.
            match params.reason.filter(|r| *r != 0) {
                Some(reason) => Some(reason),
                None => return Self::error(&call.id, ErrorCode::MalformedRequest, None),
            }
        } else {
            None
        };

        let result = engine
            .complete(Completion {
                provider: Provider::Payme,
                order_id: params.order_id.clone(),
                amount: params.amount,
                upstream_error,
                id_policy: IdPolicy::OrderId,
            })
            .await;
        Self::translate(&call, &params, Phase::Complete, result)
    }

    fn reject(&self, request: &InboundRequest<'_>, code: ErrorCode) -> ProviderReply {
        let id = serde_json::from_slice::<Value>(request.body)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        Self::error(&id, code, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SettlementLedger;
    use crate::order::fixtures::*;
    use crate::test_support::fixture;

    const SECRET: &str = "payme-merchant-key";

    fn secrets() -> ProviderSecrets {
        ProviderSecrets {
            secret_key: SECRET.to_string(),
            ..Default::default()
        }
    }

    fn basic(secret: &str) -> String {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("Paycom:{secret}"));
        format!("Basic {token}")
    }

    fn rpc(method: &str, params: Value) -> Vec<u8> {
        json!({ "id": 77, "method": method, "params": params })
            .to_string()
            .into_bytes()
    }

    fn order_params(order_id: &str) -> Value {
        json!({ "id": "pm-1", "amount": 500000, "account": { "order_id": order_id } })
    }

    #[tokio::test]
    async fn check_then_perform() {
        let f = fixture();
        f.copies.insert(copy("ABC123")).unwrap();
        let adapter = PaymeAdapter::new();
        let auth = basic(SECRET);

        let body = rpc("CheckPerformTransaction", order_params("ABC123"));
        let reply = adapter
            .prepare(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["jsonrpc"], "2.0");
        assert_eq!(reply.body["id"], 77);
        assert_eq!(reply.body["result"]["allow"], true);

        let body = rpc("PerformTransaction", order_params("ABC123"));
        let reply = adapter
            .complete(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["result"]["transaction"], "ABC123");
        assert_eq!(reply.body["result"]["state"], 2);
        assert!(reply.body["result"]["perform_time"].as_i64().unwrap() > 0);
        assert_eq!(f.ledger.inner.get("ABC123").unwrap().unwrap().amount, 500000);
        assert!(f.copies.is_empty());

        let reply = adapter
            .complete(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["error"]["code"], -31051);
        assert_eq!(reply.body["error"]["message"], "Order already paid");
    }

    #[tokio::test]
    async fn unknown_order() {
        let f = fixture();
        let auth = basic(SECRET);
        let body = rpc("CheckPerformTransaction", order_params("ZZZ"));
        let reply = PaymeAdapter::new()
            .prepare(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -31050);
        assert_eq!(f.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn cancel_reports_reason_without_settling() {
        let f = fixture();
        f.prints.insert(print_job("ABC123")).unwrap();
        let auth = basic(SECRET);

        let mut params = order_params("ABC123");
        params["reason"] = json!(5);
        let body = rpc("CancelTransaction", params);
        let reply = PaymeAdapter::new()
            .complete(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -31008);
        assert_eq!(reply.body["error"]["data"], 5);
        assert_eq!(f.prints.len(), 1);
        assert_eq!(f.ledger.calls(), 0);

        let body = rpc("CancelTransaction", order_params("ABC123"));
        let reply = PaymeAdapter::new()
            .complete(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -32600);
        assert_eq!(f.prints.len(), 1);
    }

    #[tokio::test]
    async fn wrong_credentials_touch_nothing() {
        let f = fixture();
        f.prints.insert(print_job("ABC123")).unwrap();
        let adapter = PaymeAdapter::new();
        let body = rpc("PerformTransaction", order_params("ABC123"));

        for header in [None, Some(basic("guess")), Some("Bearer x".to_string())] {
            let reply = adapter
                .complete(
                    &f.engine,
                    &InboundRequest::new(header.as_deref(), &body),
                    &secrets(),
                )
                .await;
            assert_eq!(reply.status, 200);
            assert_eq!(reply.body["error"]["code"], -32504);
            assert_eq!(reply.body["error"]["message"], "Insufficient privilege");
        }
        assert_eq!(f.locator_calls(), 0);
        assert_eq!(f.ledger.calls(), 0);
        assert_eq!(f.prints.len(), 1);
    }

    #[tokio::test]
    async fn method_routing() {
        let f = fixture();
        let adapter = PaymeAdapter::new();
        let auth = basic(SECRET);

        let body = rpc("PerformTransaction", order_params("ABC123"));
        let reply = adapter
            .prepare(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -32601);

        let body = rpc("CheckTransaction", order_params("ABC123"));
        let reply = adapter
            .complete(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -32601);
        assert_eq!(f.locator_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_requests() {
        let f = fixture();
        let adapter = PaymeAdapter::new();
        let auth = basic(SECRET);

        let reply = adapter
            .prepare(&f.engine, &InboundRequest::new(Some(&auth), b"[1,2"), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -32600);
        assert_eq!(reply.body["id"], Value::Null);

        let body = rpc("CheckPerformTransaction", json!({ "amount": 100 }));
        let reply = adapter
            .prepare(&f.engine, &InboundRequest::new(Some(&auth), &body), &secrets())
            .await;
        assert_eq!(reply.body["error"]["code"], -32600);
        assert_eq!(reply.body["id"], 77);
    }

    #[test]
    fn internal_error_stays_http_200() {
        let reply = PaymeAdapter::new().reject(
            &InboundRequest::new(None, br#"{"id": 3}"#),
            ErrorCode::InternalError,
        );
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["id"], 3);
        assert_eq!(reply.body["error"]["code"], -32400);
        assert_eq!(reply.body["error"]["message"], "System error");
    }
}
