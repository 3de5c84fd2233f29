//! ID-token claim decoding
//!
//! Claims are read from the JWT payload segment without verifying the
//! signature. Tokens only ever arrive from the issuer's token endpoint over
//! TLS, and the claims are used for display, never for authorization.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const ISSUER: &str = "iss";
pub const SUBJECT: &str = "sub";
pub const NAME: &str = "name";
pub const PREFERRED_USERNAME: &str = "preferred_username";
pub const AUTH_TIME: &str = "auth_time";
pub const ISSUED_AT: &str = "iat";
pub const UPDATED_AT: &str = "updated_at";

/// Decode the payload of a compact JWT into a flat claim map.
pub fn decode_id_token(id_token: &str) -> Result<BTreeMap<String, String>> {
    let payload = id_token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| Error::CredentialParse("ID token has no payload segment".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::CredentialParse(format!("ID token payload is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(flatten(map)),
        Ok(_) => Err(Error::CredentialParse(
            "ID token payload is not a JSON object".into(),
        )),
        Err(e) => Err(Error::CredentialParse(format!(
            "ID token payload is not JSON: {e}"
        ))),
    }
}

/// Flatten a JSON object into string claims.
///
/// Strings pass through, numbers and booleans are stringified, nested values
/// keep their compact JSON text and nulls are dropped.
pub fn flatten(map: Map<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn encode_test_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
