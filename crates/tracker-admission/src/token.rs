//! Signed bearer tokens.
//!
//! Tokens are HS256 JWTs carrying the standard `sub`, `iat` and `exp` claims
//! plus an open set of application claims flattened into the payload. The one
//! application claim admission cares about is [`TOKEN_VERSION_CLAIM`], the
//! credential generation the token was minted under.
//!
//! Validation uses zero clock leeway: a token is expired as soon as `exp`
//! lies in the past.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AdmissionError;

/// Claim holding the credential generation a token was issued under.
pub const TOKEN_VERSION_CLAIM: &str = "tokenVersion";

/// Registered claims the codec manages itself; callers cannot override them.
const RESERVED_CLAIMS: [&str; 3] = ["sub", "iat", "exp"];

/// Wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    iat: u64,
    exp: u64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// The authenticated identity extracted from a verified token.
///
/// Inserted into request extensions on admission so handlers can read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    subject: String,
    claims: Map<String, Value>,
    issued_at: SystemTime,
    expires_at: SystemTime,
}

impl Principal {
    /// User id (`sub`).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Application claims, without `sub`, `iat` or `exp`.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Look up a single application claim.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Credential generation the token carries, if present and a non-negative integer.
    pub fn token_version(&self) -> Option<u64> {
        self.claim(TOKEN_VERSION_CLAIM).and_then(Value::as_u64)
    }

    /// When the token was issued.
    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    /// When the token stops being valid.
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }
}

impl TryFrom<TokenClaims> for Principal {
    type Error = AdmissionError;

    /// Fails for timestamps the platform clock cannot represent.
    fn try_from(claims: TokenClaims) -> Result<Self, Self::Error> {
        let at = |secs: u64| {
            UNIX_EPOCH
                .checked_add(Duration::from_secs(secs))
                .ok_or(AdmissionError::MalformedToken)
        };
        Ok(Self {
            issued_at: at(claims.iat)?,
            expires_at: at(claims.exp)?,
            subject: claims.sub,
            claims: claims.extra,
        })
    }
}

/// Signs and verifies bearer tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec for the given signing key.
    pub fn new(signing_key: &SecretString) -> Self {
        let secret = signing_key.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token for `subject` at credential generation `version`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Signing`] if the payload cannot be signed.
    pub fn issue(
        &self,
        subject: &str,
        version: u64,
        ttl: Duration,
    ) -> Result<String, AdmissionError> {
        let mut claims = Map::new();
        claims.insert(TOKEN_VERSION_CLAIM.to_owned(), Value::from(version));
        self.encode(subject, claims, ttl)
    }

    /// Sign `claims` for `subject`, valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Signing`] if the payload cannot be signed.
    pub fn encode(
        &self,
        subject: &str,
        claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, AdmissionError> {
        self.encode_at(subject, claims, SystemTime::now(), ttl)
    }

    /// Sign `claims` for `subject` as if issued at `issued_at`.
    ///
    /// Timestamps are truncated to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Signing`] if the payload cannot be signed.
    pub fn encode_at(
        &self,
        subject: &str,
        mut claims: Map<String, Value>,
        issued_at: SystemTime,
        ttl: Duration,
    ) -> Result<String, AdmissionError> {
        for reserved in RESERVED_CLAIMS {
            claims.remove(reserved);
        }

        let iat = issued_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let payload = TokenClaims {
            sub: subject.to_owned(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
            extra: claims,
        };

        encode(&Header::new(Algorithm::HS256), &payload, &self.encoding_key)
            .map_err(|e| AdmissionError::Signing(e.to_string()))
    }

    /// Verify a token's signature and expiry and extract its principal.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::MissingToken`] for an empty credential
    /// - [`AdmissionError::BadSignature`] when the signature does not verify
    /// - [`AdmissionError::Expired`] when `exp` is in the past
    /// - [`AdmissionError::MalformedToken`] for anything that does not parse
    pub fn decode(&self, token: &str) -> Result<Principal, AdmissionError> {
        if token.is_empty() {
            return Err(AdmissionError::MissingToken);
        }

        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                debug!(error = %e, "token rejected");
                match e.kind() {
                    ErrorKind::InvalidSignature => AdmissionError::BadSignature,
                    ErrorKind::ExpiredSignature => AdmissionError::Expired,
                    _ => AdmissionError::MalformedToken,
                }
            },
        )?;

        data.claims.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(&SecretString::new(secret.to_owned()))
    }

    #[test]
    fn test_issue_then_decode_preserves_subject_and_version() {
        let codec = codec("test-signing-key");
        let token = codec.issue("user-42", 3, Duration::from_secs(600)).unwrap();

        let principal = codec.decode(&token).unwrap();
        assert_eq!(principal.subject(), "user-42");
        assert_eq!(principal.token_version(), Some(3));
        assert!(principal.expires_at() > SystemTime::now());
    }

    #[test]
    fn test_application_claims_survive_and_reserved_are_ignored() {
        let codec = codec("test-signing-key");
        let mut claims = Map::new();
        claims.insert("email".into(), json!("ada@example.com"));
        claims.insert("sub".into(), json!("someone-else"));
        claims.insert(TOKEN_VERSION_CLAIM.into(), json!(1));

        let token = codec.encode("user-1", claims, Duration::from_secs(60)).unwrap();
        let principal = codec.decode(&token).unwrap();

        assert_eq!(principal.subject(), "user-1");
        assert_eq!(principal.claim("email"), Some(&json!("ada@example.com")));
        assert!(principal.claim("sub").is_none());
    }

    #[test]
    fn test_expired_token() {
        let codec = codec("test-signing-key");
        let issued = SystemTime::now() - Duration::from_secs(3600);
        let token = codec
            .encode_at("user-1", Map::new(), issued, Duration::from_secs(60))
            .unwrap();

        assert!(matches!(codec.decode(&token), Err(AdmissionError::Expired)));
    }

    #[test]
    fn test_unrepresentable_expiry_is_malformed() {
        let codec = codec("test-signing-key");
        // exp saturates to u64::MAX, past anything SystemTime can hold
        let token = codec
            .encode("user-1", Map::new(), Duration::from_secs(u64::MAX))
            .unwrap();

        assert!(matches!(codec.decode(&token), Err(AdmissionError::MalformedToken)));
    }

    #[test]
    fn test_wrong_key_is_bad_signature() {
        let token = codec("key-a").issue("user-1", 1, Duration::from_secs(60)).unwrap();
        let result = codec("key-b").decode(&token);
        assert!(matches!(result, Err(AdmissionError::BadSignature)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = codec("test-signing-key");
        for input in ["not-a-jwt", "a.b.c", "Bearer"] {
            assert!(
                matches!(codec.decode(input), Err(AdmissionError::MalformedToken)),
                "{input}"
            );
        }
    }

    #[test]
    fn test_empty_token_is_missing() {
        let codec = codec("test-signing-key");
        assert!(matches!(codec.decode(""), Err(AdmissionError::MissingToken)));
    }

    #[test]
    fn test_token_version_must_be_integer() {
        let codec = codec("test-signing-key");
        let mut claims = Map::new();
        claims.insert(TOKEN_VERSION_CLAIM.into(), json!("3"));
        let token = codec.encode("user-1", claims, Duration::from_secs(60)).unwrap();

        assert_eq!(codec.decode(&token).unwrap().token_version(), None);
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let rendered = format!("{:?}", codec("super-secret-value"));
        assert!(!rendered.contains("super-secret-value"));
    }
}
