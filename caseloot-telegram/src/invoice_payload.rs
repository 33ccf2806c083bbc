//! The `invoicePayload` codec (spec §9 Open Questions: the platform's
//! invoice payload is an opaque string we control). A compact,
//! tamper-evident encoding: `caseId|userId|nonce` signed with an
//! HMAC-SHA256 over `FAIRNESS_KEY`, truncated to 16 bytes and hex-encoded,
//! so a successful-payment webhook can recover `(caseId, userId, nonce)`
//! without a side lookup and without trusting the platform to echo it back
//! unmodified.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIG_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub case_id: String,
    pub user_id: i64,
    pub nonce: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InvoicePayloadError {
    #[error("invoice payload is not valid JSON")]
    Malformed,
    #[error("invoice payload signature does not match")]
    SignatureMismatch,
}

fn sign(key: &SecretString, case_id: &str, user_id: i64, nonce: &str) -> String {
    let message = format!("{case_id}|{user_id}|{nonce}");
    let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let full = mac.finalize().into_bytes();
    base16ct::lower::encode_string(&full[..SIG_BYTES])
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "caseId")]
    case_id: String,
    #[serde(rename = "userId")]
    user_id: i64,
    nonce: String,
    sig: String,
}

/// Encode `{caseId, userId, nonce}` into the opaque string handed to the
/// platform's `createInvoiceLink` call.
pub fn encode_invoice_payload(key: &SecretString, payload: &InvoicePayload) -> String {
    let sig = sign(key, &payload.case_id, payload.user_id, &payload.nonce);
    let envelope = Envelope {
        case_id: payload.case_id.clone(),
        user_id: payload.user_id,
        nonce: payload.nonce.clone(),
        sig,
    };
    serde_json::to_string(&envelope).expect("invoice payload envelope always serializes")
}

/// Decode and verify an `invoicePayload` string received back on a
/// successful-payment update. A mismatched signature means the payload was
/// tampered with (or signed under a different `FAIRNESS_KEY`), never a
/// value the RNG draw should be trusted to use.
pub fn decode_invoice_payload(key: &SecretString, raw: &str) -> Result<InvoicePayload, InvoicePayloadError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(|_| InvoicePayloadError::Malformed)?;
    let expected = sign(key, &envelope.case_id, envelope.user_id, &envelope.nonce);

    if expected.as_bytes().ct_eq(envelope.sig.as_bytes()).unwrap_u8() != 1 {
        return Err(InvoicePayloadError::SignatureMismatch);
    }

    Ok(InvoicePayload { case_id: envelope.case_id, user_id: envelope.user_id, nonce: envelope.nonce })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::new("f".repeat(64).into())
    }

    #[test]
    fn round_trips_through_encode_and_decode() {
        let payload = InvoicePayload { case_id: "case-1".into(), user_id: 424242, nonce: "nonce-a".into() };
        let encoded = encode_invoice_payload(&key(), &payload);
        let decoded = decode_invoice_payload(&key(), &encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn tampered_case_id_fails_verification() {
        let payload = InvoicePayload { case_id: "case-1".into(), user_id: 424242, nonce: "nonce-a".into() };
        let encoded = encode_invoice_payload(&key(), &payload);
        let tampered = encoded.replace("case-1", "case-2");
        let err = decode_invoice_payload(&key(), &tampered).unwrap_err();
        assert!(matches!(err, InvoicePayloadError::SignatureMismatch));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let payload = InvoicePayload { case_id: "case-1".into(), user_id: 1, nonce: "n".into() };
        let encoded = encode_invoice_payload(&key(), &payload);
        let other_key = SecretString::new("0".repeat(64).into());
        let err = decode_invoice_payload(&other_key, &encoded).unwrap_err();
        assert!(matches!(err, InvoicePayloadError::SignatureMismatch));
    }
}
