use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::clients::PaymentProviderError;
use crate::stripe_types::Event;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `Stripe-Signature` headers and parses the signed event
#[derive(Clone)]
pub struct WebhookVerifier {
    webhook_secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(webhook_secret: String, tolerance_secs: i64) -> Self {
        Self {
            webhook_secret,
            tolerance_secs,
        }
    }

    pub fn construct_event(&self, payload: &str, signature: &str) -> Result<Event, PaymentProviderError> {
        self.verify_at(payload, signature, Utc::now().timestamp())?;
        serde_json::from_str(payload).map_err(|e| {
            PaymentProviderError::WebhookVerification(format!("Failed to parse event: {}", e))
        })
    }

    fn verify_at(&self, payload: &str, signature: &str, now: i64) -> Result<(), PaymentProviderError> {
        let mut timestamp = "";
        let mut signatures = Vec::new();

        for element in signature.split(',') {
            if let Some(t) = element.trim().strip_prefix("t=") {
                timestamp = t;
            } else if let Some(s) = element.trim().strip_prefix("v1=") {
                signatures.push(s);
            }
        }

        if timestamp.is_empty() || signatures.is_empty() {
            return Err(PaymentProviderError::WebhookVerification(
                "Invalid signature format".to_string(),
            ));
        }

        let ts: i64 = timestamp.parse().map_err(|_| {
            PaymentProviderError::WebhookVerification("Invalid signature timestamp".to_string())
        })?;
        let within_tolerance = now
            .checked_sub(ts)
            .map(i64::unsigned_abs)
            .is_some_and(|skew| skew <= self.tolerance_secs.unsigned_abs());
        if !within_tolerance {
            return Err(PaymentProviderError::WebhookVerification(
                "Signature timestamp outside the tolerance zone".to_string(),
            ));
        }

        let expected = self.sign(timestamp, payload)?;
        let matched = signatures
            .iter()
            .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

        if matched {
            Ok(())
        } else {
            Err(PaymentProviderError::WebhookVerification(
                "Signature verification failed".to_string(),
            ))
        }
    }

    fn sign(&self, timestamp: &str, payload: &str) -> Result<String, PaymentProviderError> {
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|e| PaymentProviderError::WebhookVerification(format!("HMAC error: {}", e)))?;
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build a valid header for `payload`. Used by tests and local tooling.
    pub fn signature_header(&self, payload: &str, timestamp: i64) -> Result<String, PaymentProviderError> {
        let ts = timestamp.to_string();
        Ok(format!("t={},v1={}", ts, self.sign(&ts, payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"id":"evt_1","type":"payment_intent.succeeded","created":1,"data":{"object":{}}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test".to_string(), 300)
    }

    #[test]
    fn accepts_valid_signature() {
        let v = verifier();
        let header = v.signature_header(PAYLOAD, 1_700_000_000).unwrap();
        assert!(v.verify_at(PAYLOAD, &header, 1_700_000_010).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let v = verifier();
        let header = v.signature_header(PAYLOAD, 1_700_000_000).unwrap();
        let tampered = PAYLOAD.replace("evt_1", "evt_2");
        assert!(v.verify_at(&tampered, &header, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let v = verifier();
        let header = v.signature_header(PAYLOAD, 1_700_000_000).unwrap();
        assert!(v.verify_at(PAYLOAD, &header, 1_700_000_000 + 301).is_err());
    }

    #[test]
    fn rejects_extreme_timestamp() {
        let v = verifier();
        let now = 1_700_000_000;
        assert!(v.verify_at(PAYLOAD, &format!("t={},v1=00", i64::MIN), now).is_err());
        assert!(v.verify_at(PAYLOAD, &format!("t={},v1=00", i64::MAX), -now).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        let v = verifier();
        assert!(v.verify_at(PAYLOAD, "garbage", 0).is_err());
        assert!(v.verify_at(PAYLOAD, "t=abc,v1=00", 0).is_err());
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let v = verifier();
        let header = v.signature_header(PAYLOAD, 1_700_000_000).unwrap();
        let with_rotated = format!("{},v1=deadbeef", header);
        assert!(v.verify_at(PAYLOAD, &with_rotated, 1_700_000_000).is_ok());
    }
}
