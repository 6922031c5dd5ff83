use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SCHEME_VERSION: &str = "formrelay.1";

/// Parsed `Hawk id="..", ts="..", nonce="..", mac=".."` header.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureHeader {
    pub id: Uuid,
    pub ts: i64,
    pub nonce: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignatureError {
    Malformed(&'static str),
    Stale,
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::Malformed(what) => write!(f, "Malformed signature: {what}"),
            SignatureError::Stale => write!(f, "Signature timestamp outside allowed window"),
            SignatureError::Mismatch => write!(f, "Signature does not match"),
        }
    }
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let params = header
            .trim()
            .strip_prefix("Hawk ")
            .ok_or(SignatureError::Malformed("expected Hawk scheme"))?;

        let (mut id, mut ts, mut nonce, mut mac) = (None, None, None, None);
        for part in params.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(SignatureError::Malformed("expected key=\"value\""))?;
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or(SignatureError::Malformed("values must be quoted"))?;
            match key {
                "id" => id = Some(value),
                "ts" => ts = Some(value),
                "nonce" => nonce = Some(value),
                "mac" => mac = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            id: id
                .ok_or(SignatureError::Malformed("missing id"))?
                .parse()
                .map_err(|_| SignatureError::Malformed("id is not a client id"))?,
            ts: ts
                .ok_or(SignatureError::Malformed("missing ts"))?
                .parse()
                .map_err(|_| SignatureError::Malformed("ts is not a number"))?,
            nonce: nonce.ok_or(SignatureError::Malformed("missing nonce"))?.to_string(),
            mac: mac.ok_or(SignatureError::Malformed("missing mac"))?.to_string(),
        })
    }

    /// Check timestamp freshness and the mac over the request.
    pub fn verify(
        &self,
        access_key: &str,
        method: &str,
        path_and_query: &str,
        body: &[u8],
        now: i64,
        max_skew_secs: i64,
    ) -> Result<(), SignatureError> {
        if (now - self.ts).abs() > max_skew_secs {
            return Err(SignatureError::Stale);
        }

        let expected = compute_mac(access_key, self.ts, &self.nonce, method, path_and_query, body);
        if expected.as_bytes().ct_eq(self.mac.as_bytes()).into() {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

pub fn compute_mac(
    access_key: &str,
    ts: i64,
    nonce: &str,
    method: &str,
    path_and_query: &str,
    body: &[u8],
) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    let normalized = format!(
        "{SCHEME_VERSION}\n{ts}\n{nonce}\n{}\n{path_and_query}\n{body_hash}\n",
        method.to_uppercase()
    );

    let mut mac = HmacSha256::new_from_slice(access_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(normalized.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Header value a client sends for this request.
pub fn sign(
    client_id: Uuid,
    access_key: &str,
    method: &str,
    path_and_query: &str,
    body: &[u8],
    ts: i64,
    nonce: &str,
) -> String {
    let mac = compute_mac(access_key, ts, nonce, method, path_and_query, body);
    format!(r#"Hawk id="{client_id}", ts="{ts}", nonce="{nonce}", mac="{mac}""#)
}
