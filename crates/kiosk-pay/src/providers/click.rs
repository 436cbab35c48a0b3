//! Click two-phase webhook protocol.
//!
//! Click calls `prepare` (`action = 0`) to ask whether an order is payable,
//! then `complete` (`action = 1`) with the outcome of the charge. Both
//! requests are signed: `sign_string` is the hex MD5 of
//! `click_trans_id ‖ service_id ‖ secret_key ‖ merchant_trans_id ‖ [merchant_prepare_id] ‖ amount ‖ action ‖ sign_time`,
//! with the tenant's secret key inside the concatenation. Fields are
//! concatenated exactly as they appear in the request.

use md5::{Digest, Md5};
use serde_json::{json, Map, Value};

use super::{ErrorCode, InboundRequest, Phase, Provider, ProviderAdapter, ProviderReply};
use crate::credentials::ProviderSecrets;
use crate::engine::{Completion, IdPolicy, Outcome, SettlementEngine};
use crate::security::constant_time_eq;

const ACTION_PREPARE: &str = "0";
const ACTION_COMPLETE: &str = "1";

/// Wire code and note for a taxonomy error.
fn vocabulary(code: ErrorCode) -> (i64, &'static str) {
    match code {
        ErrorCode::SignatureInvalid => (-1, "SIGN CHECK FAILED!"),
        ErrorCode::MethodNotSupported => (-3, "Action not found"),
        ErrorCode::AlreadyPaid => (-4, "Already paid"),
        ErrorCode::OrderNotFound => (-5, "Order not found"),
        ErrorCode::InternalError => (-7, "Failed to update order"),
        ErrorCode::MalformedRequest => (-8, "Error in request from click"),
        // Cancelled completes echo the upstream code instead of -9.
        ErrorCode::UpstreamCancelled => (-9, "Transaction cancelled"),
    }
}

/// A parsed click webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickRequest {
    pub click_trans_id: String,
    pub service_id: String,
    pub click_paydoc_id: Option<String>,
    /// The order id.
    pub merchant_trans_id: String,
    pub merchant_prepare_id: Option<String>,
    /// Amount exactly as sent, used for the signature.
    pub amount_raw: String,
    pub amount: i64,
    pub action: String,
    pub error: i64,
    pub error_note: Option<String>,
    pub sign_time: String,
    pub sign_string: String,
}

/// String or number field, rendered as text.
fn text(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer, or a decimal whose fractional part is all zeros.
fn parse_amount(raw: &str) -> Option<i64> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    if !fraction.chars().all(|c| c == '0') {
        return None;
    }
    let amount: i64 = whole.parse().ok()?;
    (amount >= 0).then_some(amount)
}

impl ClickRequest {
    /// Parse a webhook body. `None` if it is not a JSON object or lacks a required field.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let body = value.as_object()?;

        let amount_raw = text(body, "amount")?;
        let amount = parse_amount(&amount_raw)?;
        let error = match text(body, "error") {
            Some(e) => e.parse().ok()?,
            None => 0,
        };

        Some(Self {
            click_trans_id: text(body, "click_trans_id")?,
            service_id: text(body, "service_id")?,
            click_paydoc_id: text(body, "click_paydoc_id"),
            merchant_trans_id: text(body, "merchant_trans_id").filter(|s| !s.is_empty())?,
            merchant_prepare_id: text(body, "merchant_prepare_id"),
            amount_raw,
            amount,
            action: text(body, "action")?,
            error,
            error_note: text(body, "error_note"),
            sign_time: text(body, "sign_time")?,
            sign_string: text(body, "sign_string")?,
        })
    }

    /// The exact string hashed into `sign_string`. Contains the secret.
    pub fn signed_payload(&self, secret_key: &str) -> String {
        let mut payload = String::new();
        payload.push_str(&self.click_trans_id);
        payload.push_str(&self.service_id);
        payload.push_str(secret_key);
        payload.push_str(&self.merchant_trans_id);
        if let Some(prepare_id) = &self.merchant_prepare_id {
            payload.push_str(prepare_id);
        }
        payload.push_str(&self.amount_raw);
        payload.push_str(&self.action);
        payload.push_str(&self.sign_time);
        payload
    }

    /// Lowercase hex MD5 that a genuine request carries as `sign_string`.
    pub fn expected_signature(&self, secret_key: &str) -> String {
        hex::encode(Md5::digest(self.signed_payload(secret_key).as_bytes()))
    }

    fn verify(&self, secrets: &ProviderSecrets) -> bool {
        let expected = self.expected_signature(&secrets.secret_key);
        let signature_ok = constant_time_eq(
            expected.as_bytes(),
            self.sign_string.trim().to_ascii_lowercase().as_bytes(),
        );
        let service_ok = match &secrets.service_id {
            Some(expected) => constant_time_eq(self.service_id.as_bytes(), expected.as_bytes()),
            None => true,
        };
        signature_ok && service_ok
    }
}

/// Adapter for Click's prepare/complete webhooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClickAdapter;

impl ClickAdapter {
    pub fn new() -> Self {
        Self
    }

    fn reply(ids: &Map<String, Value>, code: i64, note: &str, outcome: &'static str) -> ProviderReply {
        let mut body = ids.clone();
        body.insert("error".to_string(), json!(code));
        body.insert("error_note".to_string(), json!(note));
        ProviderReply {
            status: 200,
            body: Value::Object(body),
            outcome,
        }
    }

    fn error(ids: &Map<String, Value>, code: ErrorCode) -> ProviderReply {
        let (wire, note) = vocabulary(code);
        let mut reply = Self::reply(ids, wire, note, code.label());
        if code == ErrorCode::InternalError {
            reply.status = 500;
        }
        reply
    }

    /// Identifiers echoed back on every reply.
    fn echo(request: &ClickRequest) -> Map<String, Value> {
        let mut ids = Map::new();
        ids.insert("click_trans_id".to_string(), json!(request.click_trans_id));
        ids.insert("merchant_trans_id".to_string(), json!(request.merchant_trans_id));
        ids
    }

    fn translate(
        request: &ClickRequest,
        phase: Phase,
        result: Result<Outcome, crate::error::PayError>,
    ) -> ProviderReply {
        let mut ids = Self::echo(request);
        match result {
            Ok(Outcome::Allow) => {
                ids.insert(
                    "merchant_prepare_id".to_string(),
                    json!(request.merchant_trans_id),
                );
                Self::reply(&ids, 0, "Success", "allow")
            }
            Ok(Outcome::Settled { id, .. }) => {
                ids.insert("merchant_confirm_id".to_string(), json!(id));
                Self::reply(&ids, 0, "Success", "settled")
            }
            Ok(Outcome::OrderNotFound) => Self::error(&ids, ErrorCode::OrderNotFound),
            Ok(Outcome::AlreadyPaid) => Self::error(&ids, ErrorCode::AlreadyPaid),
            Ok(Outcome::Cancelled { code }) => {
                let (_, note) = vocabulary(ErrorCode::UpstreamCancelled);
                Self::reply(&ids, code, note, ErrorCode::UpstreamCancelled.label())
            }
            Err(e) => {
                tracing::error!(
                    provider = "click",
                    phase = phase.as_str(),
                    order_id = %request.merchant_trans_id,
                    error = %e,
                    "click webhook failed"
                );
                Self::error(&ids, ErrorCode::InternalError)
            }
        }
    }

    /// Parse, authenticate and check the action. `Err` carries the finished reply.
    fn admit(
        &self,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
        expected_action: &str,
    ) -> Result<ClickRequest, ProviderReply> {
        let Some(parsed) = ClickRequest::parse(request.body) else {
            return Err(self.reject(request, ErrorCode::MalformedRequest));
        };
        if !parsed.verify(secrets) {
            tracing::warn!(
                provider = "click",
                order_id = %parsed.merchant_trans_id,
                "click signature check failed"
            );
            return Err(Self::error(&Self::echo(&parsed), ErrorCode::SignatureInvalid));
        }
        if parsed.action != expected_action {
            return Err(Self::error(&Self::echo(&parsed), ErrorCode::MethodNotSupported));
        }
        Ok(parsed)
    }
}

impl ProviderAdapter for ClickAdapter {
    fn provider(&self) -> Provider {
        Provider::Click
    }

    fn authenticate(&self, request: &InboundRequest<'_>, secrets: &ProviderSecrets) -> bool {
        ClickRequest::parse(request.body)
            .map(|parsed| parsed.verify(secrets))
            .unwrap_or(false)
    }

    async fn prepare(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> ProviderReply {
        let parsed = match self.admit(request, secrets, ACTION_PREPARE) {
            Ok(parsed) => parsed,
            Err(reply) => return reply,
        };
        let result = engine
            .prepare(Provider::Click, &parsed.merchant_trans_id, parsed.amount)
            .await;
        Self::translate(&parsed, Phase::Prepare, result)
    }

    async fn complete(
        &self,
        engine: &SettlementEngine,
        request: &InboundRequest<'_>,
        secrets: &ProviderSecrets,
    ) -> ProviderReply {
        let parsed = match self.admit(request, secrets, ACTION_COMPLETE) {
            Ok(parsed) => parsed,
            Err(reply) => return reply,
        };
        let result = engine
            .complete(Completion {
                provider: Provider::Click,
                order_id: parsed.merchant_trans_id.clone(),
                amount: parsed.amount,
                upstream_error: Some(parsed.error),
                id_policy: IdPolicy::Generated,
            })
            .await;
        Self::translate(&parsed, Phase::Complete, result)
    }

    fn reject(&self, request: &InboundRequest<'_>, code: ErrorCode) -> ProviderReply {
        // Echo whatever identifiers survive in an unparseable body.
        let ids = match serde_json::from_slice::<Value>(request.body) {
            Ok(Value::Object(body)) => ["click_trans_id", "merchant_trans_id"]
                .into_iter()
                .filter_map(|key| text(&body, key).map(|v| (key.to_string(), json!(v))))
                .collect(),
            _ => Map::new(),
        };
        Self::error(&ids, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SettlementLedger;
    use crate::order::fixtures::*;
    use crate::test_support::fixture;

    const SECRET: &str = "click-secret-key";

    fn secrets() -> ProviderSecrets {
        ProviderSecrets {
            secret_key: SECRET.to_string(),
            service_id: Some("31337".to_string()),
            ..Default::default()
        }
    }

    fn signed(action: u8, order_id: &str, error: i64) -> Vec<u8> {
        let mut body = json!({
            "click_trans_id": "9001",
            "service_id": "31337",
            "click_paydoc_id": "555",
            "merchant_trans_id": order_id,
            "amount": "5000.00",
            "action": action,
            "error": error,
            "error_note": "",
            "sign_time": "2026-10-19 12:00:00",
            "sign_string": "",
        });
        if action == 1 {
            body["merchant_prepare_id"] = json!(order_id);
        }
        let request = ClickRequest::parse(body.to_string().as_bytes()).unwrap();
        body["sign_string"] = json!(request.expected_signature(SECRET));
        body.to_string().into_bytes()
    }

    fn inbound(body: &[u8]) -> InboundRequest<'_> {
        InboundRequest::new(None, body)
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount("5000"), Some(5000));
        assert_eq!(parse_amount("5000.00"), Some(5000));
        assert_eq!(parse_amount("5000.50"), None);
        assert_eq!(parse_amount("-1"), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn numeric_fields_are_accepted() {
        let body = json!({
            "click_trans_id": 9001,
            "service_id": 31337,
            "merchant_trans_id": "ABC123",
            "amount": 5000,
            "action": 0,
            "sign_time": "t",
            "sign_string": "00",
        });
        let parsed = ClickRequest::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.click_trans_id, "9001");
        assert_eq!(parsed.amount, 5000);
        assert_eq!(parsed.signed_payload("key"), "900131337keyABC12350000t");
    }

    #[test]
    fn signature_is_md5_with_secret_inside() {
        let body = json!({
            "click_trans_id": "1",
            "service_id": "2",
            "merchant_trans_id": "3",
            "amount": "4",
            "action": "0",
            "sign_time": "5",
            "sign_string": "",
        });
        let parsed = ClickRequest::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.signed_payload("secret"), "12secret3405");
        assert_eq!(
            parsed.expected_signature("secret"),
            "8220356b0b2ae6db328a7c8841016085"
        );
        assert_ne!(
            parsed.expected_signature("secret"),
            parsed.expected_signature("other")
        );
    }

    #[test]
    fn uppercase_signature_is_accepted() {
        let body = signed(0, "ABC123", 0);
        let mut value: Value = serde_json::from_slice(&body).unwrap();
        let upper = value["sign_string"].as_str().unwrap().to_ascii_uppercase();
        value["sign_string"] = json!(upper);
        let body = value.to_string().into_bytes();
        assert!(ClickAdapter::new().authenticate(&inbound(&body), &secrets()));
    }

    #[tokio::test]
    async fn prepare_then_complete() {
        let f = fixture();
        f.prints.insert(print_job("ABC123")).unwrap();
        let adapter = ClickAdapter::new();

        let body = signed(0, "ABC123", 0);
        let reply = adapter.prepare(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["error"], 0);
        assert_eq!(reply.body["merchant_prepare_id"], "ABC123");
        assert_eq!(reply.outcome, "allow");
        assert_eq!(f.prints.len(), 1);

        let body = signed(1, "ABC123", 0);
        let reply = adapter.complete(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.body["error"], 0);
        assert_eq!(reply.body["error_note"], "Success");
        let confirm_id = reply.body["merchant_confirm_id"].as_str().unwrap();
        assert_eq!(
            f.ledger.inner.get_by_order("ABC123").unwrap().unwrap().id,
            confirm_id
        );

        let reply = adapter.complete(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.body["error"], -4);
        assert_eq!(reply.outcome, "already_paid");
    }

    #[tokio::test]
    async fn unknown_order() {
        let f = fixture();
        let adapter = ClickAdapter::new();

        let body = signed(0, "ZZZ", 0);
        let reply = adapter.prepare(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.body["error"], -5);
        assert_eq!(reply.body["error_note"], "Order not found");

        let body = signed(1, "ZZZ", 0);
        let reply = adapter.complete(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.body["error"], -5);
    }

    #[tokio::test]
    async fn upstream_error_passes_through() {
        let f = fixture();
        f.prints.insert(print_job("ABC123")).unwrap();

        let body = signed(1, "ABC123", -1);
        let reply = ClickAdapter::new()
            .complete(&f.engine, &inbound(&body), &secrets())
            .await;
        assert_eq!(reply.body["error"], -1);
        assert_eq!(reply.body["error_note"], "Transaction cancelled");
        assert_eq!(f.ledger.calls(), 0);
        assert_eq!(f.prints.len(), 1);
    }

    #[tokio::test]
    async fn bad_signature_touches_nothing() {
        let f = fixture();
        f.prints.insert(print_job("ABC123")).unwrap();
        let adapter = ClickAdapter::new();

        let mut body: Value = serde_json::from_slice(&signed(1, "ABC123", 0)).unwrap();
        body["amount"] = json!("1.00");
        let body = body.to_string().into_bytes();

        let reply = adapter.complete(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["error"], -1);
        assert_eq!(reply.body["error_note"], "SIGN CHECK FAILED!");
        assert_eq!(f.locator_calls(), 0);
        assert_eq!(f.ledger.calls(), 0);
        assert!(!adapter.authenticate(&inbound(&body), &secrets()));
    }

    #[tokio::test]
    async fn wrong_service_id_fails_authentication() {
        let f = fixture();
        let body = signed(0, "ABC123", 0);
        let mut other = secrets();
        other.service_id = Some("1".to_string());

        let adapter = ClickAdapter::new();
        assert!(adapter.authenticate(&inbound(&body), &secrets()));
        assert!(!adapter.authenticate(&inbound(&body), &other));

        let reply = adapter.prepare(&f.engine, &inbound(&body), &other).await;
        assert_eq!(reply.body["error"], -1);
        assert_eq!(f.locator_calls(), 0);
    }

    #[tokio::test]
    async fn wrong_action_and_malformed_body() {
        let f = fixture();
        let adapter = ClickAdapter::new();

        let body = signed(1, "ABC123", 0);
        let reply = adapter.prepare(&f.engine, &inbound(&body), &secrets()).await;
        assert_eq!(reply.body["error"], -3);

        let reply = adapter
            .complete(&f.engine, &inbound(b"{\"click_trans_id\": 1}"), &secrets())
            .await;
        assert_eq!(reply.body["error"], -8);
        assert_eq!(reply.body["click_trans_id"], "1");
        assert_eq!(f.locator_calls(), 0);
    }

    #[test]
    fn internal_error_is_http_500() {
        let reply = ClickAdapter::new().reject(&inbound(b"not json"), ErrorCode::InternalError);
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body["error"], -7);
        assert_eq!(reply.body["error_note"], "Failed to update order");
    }
}
