//! Web-view `initData` verification (spec §6): the one piece of user-facing
//! auth that doesn't flow through the bot API at all. Every `/api/miniapp/*`
//! handler calls [`verify_init_data`] before trusting the query string a
//! Telegram web-view front-end attaches to its requests.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum InitDataError {
    #[error("initData is missing the hash field")]
    MissingHash,
    #[error("initData is missing the user field")]
    MissingUser,
    #[error("initData user field is not valid JSON")]
    MalformedUser,
    #[error("initData hash does not match the computed signature")]
    SignatureMismatch,
}

/// The claims downstream handlers are allowed to trust once verification
/// passes: just enough to rate-limit and attribute draws to a user.
#[derive(Debug, Clone)]
pub struct InitDataContext {
    pub user_id: i64,
    pub auth_date: i64,
    pub chat_type: Option<String>,
}

/// Verify a web-view `initData` query string against the bot token.
///
/// `pairs` is the initData's `key=value` pairs already URL-decoded (as
/// produced by parsing the query string); this function owns only the
/// signing/comparison step, not URL decoding, which belongs to whatever web
/// framework extracts the query string.
pub fn verify_init_data(bot_token: &SecretString, pairs: &[(String, String)]) -> Result<InitDataContext, InitDataError> {
    let mut hash = None;
    let mut data_pairs: Vec<(&str, &str)> = Vec::with_capacity(pairs.len());

    for (key, value) in pairs {
        if key == "hash" {
            hash = Some(value.as_str());
        } else {
            data_pairs.push((key.as_str(), value.as_str()));
        }
    }
    let hash = hash.ok_or(InitDataError::MissingHash)?;

    data_pairs.sort_unstable_by_key(|(k, _)| *k);
    let data_check_string = data_pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    // secret_key = HMAC-SHA256("WebAppData", bot_token), then the check
    // string is signed with that derived key, per the platform's spec.
    let mut secret_mac =
        HmacSha256::new_from_slice(b"WebAppData").expect("HMAC accepts any key length");
    secret_mac.update(bot_token.expose_secret().as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).expect("HMAC accepts any key length");
    mac.update(data_check_string.as_bytes());
    let computed = base16ct::lower::encode_string(&mac.finalize().into_bytes());

    if computed.as_bytes().ct_eq(hash.as_bytes()).unwrap_u8() != 1 {
        return Err(InitDataError::SignatureMismatch);
    }

    let user_raw = data_pairs
        .iter()
        .find(|(k, _)| *k == "user")
        .map(|(_, v)| *v)
        .ok_or(InitDataError::MissingUser)?;
    let user_json: serde_json::Value =
        serde_json::from_str(user_raw).map_err(|_| InitDataError::MalformedUser)?;
    let user_id = user_json
        .get("id")
        .and_then(serde_json::Value::as_i64)
        .ok_or(InitDataError::MalformedUser)?;

    let auth_date = data_pairs
        .iter()
        .find(|(k, _)| *k == "auth_date")
        .and_then(|(_, v)| v.parse::<i64>().ok())
        .unwrap_or(0);
    let chat_type = data_pairs
        .iter()
        .find(|(k, _)| *k == "chat_type")
        .map(|(_, v)| v.to_string());

    Ok(InitDataContext { user_id, auth_date, chat_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(bot_token: &str, pairs: &[(&str, &str)]) -> String {
        let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret_mac.update(bot_token.as_bytes());
        let secret_key = secret_mac.finalize().into_bytes();

        let mut sorted: Vec<_> = pairs.to_vec();
        sorted.sort_unstable_by_key(|(k, _)| *k);
        let check_string = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\n");

        let mut mac = HmacSha256::new_from_slice(&secret_key).unwrap();
        mac.update(check_string.as_bytes());
        base16ct::lower::encode_string(&mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies_and_exposes_claims() {
        let token = SecretString::new("123456:TEST-TOKEN".into());
        let user = r#"{"id":424242,"first_name":"Ada"}"#;
        let fields = [("auth_date", "1700000000"), ("query_id", "AAAbbb"), ("user", user)];
        let hash = sign("123456:TEST-TOKEN", &fields);

        let mut pairs: Vec<(String, String)> =
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        pairs.push(("hash".to_string(), hash));

        let ctx = verify_init_data(&token, &pairs).unwrap();
        assert_eq!(ctx.user_id, 424242);
        assert_eq!(ctx.auth_date, 1_700_000_000);
    }

    #[test]
    fn tampering_without_recomputing_hash_fails() {
        let token = SecretString::new("123456:TEST-TOKEN".into());
        let user = r#"{"id":424242,"first_name":"Ada"}"#;
        let fields = [("auth_date", "1700000000"), ("query_id", "AAAbbb"), ("user", user)];
        let hash = sign("123456:TEST-TOKEN", &fields);

        let pairs: Vec<(String, String)> = vec![
            ("auth_date".to_string(), "1700000000".to_string()),
            ("query_id".to_string(), "tampered".to_string()),
            ("user".to_string(), user.to_string()),
            ("hash".to_string(), hash),
        ];

        let err = verify_init_data(&token, &pairs).unwrap_err();
        assert!(matches!(err, InitDataError::SignatureMismatch));
    }

    #[test]
    fn missing_hash_is_rejected() {
        let token = SecretString::new("123456:TEST-TOKEN".into());
        let pairs = vec![("auth_date".to_string(), "1700000000".to_string())];
        let err = verify_init_data(&token, &pairs).unwrap_err();
        assert!(matches!(err, InitDataError::MissingHash));
    }
}
