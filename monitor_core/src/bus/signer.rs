//! The credential-bootstrap request signer. Per §1, OAuth signing over HTTP
//! is a black-box request function at the architecture level: everything
//! that needs a signed request talks to `RequestSigner`, never to OAuth1
//! specifically. `HmacSha1Signer` is the one concrete implementation the
//! crate ships, constructing a standard two-legged OAuth1 signature.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;
use url::Url;

/// A request ready to send: the fully qualified URL and the `Authorization`
/// header value to attach.
pub struct SignedRequest {
    pub url: String,
    pub authorization_header: String,
}

/// Signs an outbound HTTPS GET for the credential bootstrap. Implementations
/// other than the shipped HMAC-SHA1 one are the operator's integration to
/// provide; nothing downstream of this trait assumes OAuth1.
pub trait RequestSigner: Send + Sync {
    fn sign_get(&self, url: &str) -> SignedRequest;
}

/// Two-legged OAuth1-HMAC-SHA1 signer using a consumer key/secret (the
/// operator's access token pair). There is no resource-owner token leg,
/// matching the "two-legged" framing in spec §6.
pub struct HmacSha1Signer {
    consumer_key: String,
    consumer_secret: String,
}

impl HmacSha1Signer {
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    fn nonce() -> String {
        let mut rng = rand::rng();
        (0..32)
            .map(|_| {
                let n: u8 = rng.random_range(0..62);
                match n {
                    0..=9 => (b'0' + n) as char,
                    10..=35 => (b'a' + (n - 10)) as char,
                    _ => (b'A' + (n - 36)) as char,
                }
            })
            .collect()
    }

    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs()
    }
}

fn percent_encode(s: &str) -> String {
    // RFC 3986 unreserved set, matching OAuth1's required encoding.
    const UNRESERVED: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if UNRESERVED.as_bytes().contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl RequestSigner for HmacSha1Signer {
    fn sign_get(&self, url: &str) -> SignedRequest {
        let parsed = Url::parse(url).expect("bootstrap URL must be absolute");

        let mut oauth_params: BTreeMap<String, String> = BTreeMap::new();
        oauth_params.insert("oauth_consumer_key".to_string(), self.consumer_key.clone());
        oauth_params.insert("oauth_nonce".to_string(), Self::nonce());
        oauth_params.insert(
            "oauth_signature_method".to_string(),
            "HMAC-SHA1".to_string(),
        );
        oauth_params.insert("oauth_timestamp".to_string(), Self::timestamp().to_string());
        oauth_params.insert("oauth_version".to_string(), "1.0".to_string());

        let mut all_params: BTreeMap<String, String> = oauth_params.clone();
        for (k, v) in parsed.query_pairs() {
            all_params.insert(k.into_owned(), v.into_owned());
        }

        let base_url = format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
            parsed.path()
        );

        let normalized_params = all_params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "GET&{}&{}",
            percent_encode(&base_url),
            percent_encode(&normalized_params)
        );

        // Two-legged: no token secret, so the signing key is consumer_secret&.
        let signing_key = format!("{}&", percent_encode(&self.consumer_secret));

        let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(base_string.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        oauth_params.insert("oauth_signature".to_string(), signature);

        let realm = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        let header_params = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        SignedRequest {
            url: url.to_string(),
            authorization_header: format!("OAuth realm=\"{realm}\", {header_params}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_request_carries_oauth_header_fields() {
        let signer = HmacSha1Signer::new("key123", "secret456");
        let signed = signer.sign_get("https://example.com/amqp/account?hostname=host1");
        assert!(signed.authorization_header.starts_with("OAuth realm=\"https://example.com\""));
        assert!(signed.authorization_header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(signed.authorization_header.contains("oauth_consumer_key=\"key123\""));
        assert!(signed.authorization_header.contains("oauth_signature="));
    }

    #[test]
    fn signature_changes_with_url() {
        let signer = HmacSha1Signer::new("key123", "secret456");
        let a = signer.sign_get("https://example.com/amqp/account?hostname=host1");
        let b = signer.sign_get("https://example.com/amqp/account?hostname=host2");
        assert_ne!(a.authorization_header, b.authorization_header);
    }
}
