use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Razorpay scheme: HMAC-SHA256 of the raw body, hex-encoded in the
/// `X-Razorpay-Signature` header. Comparison is constant-time via the Mac.
pub fn verify_hmac_sha256_hex(payload: &[u8], signature_hex: &str, secret: &str) -> bool {
    let expected = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Stripe scheme: the `Stripe-Signature` header carries `t=<ts>,v1=<hex>`
/// pairs and the signed payload is `<ts>.<raw body>`.
pub fn verify_stripe_signature(payload: &[u8], header: &str, secret: &str) -> bool {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value.to_string()),
            Some(("v1", value)) => candidates.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = match timestamp {
        Some(timestamp) => timestamp,
        None => return false,
    };
    if candidates.is_empty() {
        return false;
    }

    let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + payload.len());
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(payload);

    candidates
        .iter()
        .any(|candidate| verify_hmac_sha256_hex(&signed_payload, candidate, secret))
}

/// Decodes the claims segment of a JWS compact token without verifying the
/// signature. App Store notifications arrive on a channel Apple already
/// authenticates; we only need the payload.
pub fn decode_jws_payload(jws: &str) -> Result<serde_json::Value> {
    let mut segments = jws.split('.');
    let (_header, payload) = match (segments.next(), segments.next(), segments.next()) {
        (Some(header), Some(payload), Some(_signature)) => (header, payload),
        _ => return Err(anyhow!("JWS token does not have three segments")),
    };
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| anyhow!("JWS payload is not base64url: {err}"))?;
    serde_json::from_slice(&decoded).map_err(|err| anyhow!("JWS payload is not JSON: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.paid"}"#;

    #[test]
    fn verifies_razorpay_hex_signature() {
        let signature = "e2464620590701b7c49d194af8d9ac6f1e1b2be20a8af67d71cf0d3fd6dc4803";
        assert!(verify_hmac_sha256_hex(
            PAYLOAD,
            signature,
            "rzp_webhook_secret"
        ));
        assert!(!verify_hmac_sha256_hex(PAYLOAD, signature, "wrong_secret"));
        assert!(!verify_hmac_sha256_hex(PAYLOAD, "zz-not-hex", "rzp_webhook_secret"));
    }

    #[test]
    fn verifies_stripe_timestamped_signature() {
        let header = "t=1700000000,v1=46dc069361a7691082640523fa33fe5d6c8c88d5f5e257cdf8cf11539d166595";
        assert!(verify_stripe_signature(
            PAYLOAD,
            header,
            "whsec_test_secret"
        ));
        assert!(!verify_stripe_signature(PAYLOAD, header, "whsec_other"));
        // Tampered timestamp breaks the signed payload.
        let tampered = "t=1700000001,v1=46dc069361a7691082640523fa33fe5d6c8c88d5f5e257cdf8cf11539d166595";
        assert!(!verify_stripe_signature(
            PAYLOAD,
            tampered,
            "whsec_test_secret"
        ));
        assert!(!verify_stripe_signature(PAYLOAD, "v1=abc", "whsec_test_secret"));
    }

    #[test]
    fn decodes_jws_claims_segment() {
        let jws = "eyJhbGciOiAiRVMyNTYifQ.eyJub3RpZmljYXRpb25UeXBlIjogIkRJRF9SRU5FVyIsICJub3RpZmljYXRpb25VVUlEIjogInV1aWQtMSJ9.sig";
        let claims = decode_jws_payload(jws).unwrap();
        assert_eq!(claims["notificationType"], "DID_RENEW");
        assert_eq!(claims["notificationUUID"], "uuid-1");
    }

    #[test]
    fn rejects_malformed_jws() {
        assert!(decode_jws_payload("only.two").is_err());
        assert!(decode_jws_payload("a.!!!.c").is_err());
    }
}
