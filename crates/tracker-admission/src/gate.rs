//! Bearer-token authentication with revocation and sliding renewal.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::{debug, error, warn};

use crate::error::AdmissionError;
use crate::revocation::RevocationCache;
use crate::route::Access;
use crate::token::{Principal, TokenCodec};

/// Result of a successful authentication.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    /// `None` for an anonymous caller on a public route
    pub principal: Option<Principal>,
    /// Replacement token with a fresh expiry, when renewal is enabled
    pub renewed_token: Option<String>,
}

/// Extract the bearer credential from an `Authorization` header.
///
/// Returns `Ok(None)` when no header is present. The scheme is matched
/// case-insensitively and surrounding whitespace is ignored.
///
/// # Errors
///
/// - [`AdmissionError::MalformedToken`] when the header is not a Bearer credential
/// - [`AdmissionError::MissingToken`] when the Bearer credential is empty
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AdmissionError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AdmissionError::MalformedToken)?
        .trim();

    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AdmissionError::MalformedToken);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AdmissionError::MissingToken);
    }
    Ok(Some(token))
}

/// Decides whether a request carries a valid, current token.
#[derive(Debug, Clone)]
pub struct AuthenticationGate {
    codec: Arc<TokenCodec>,
    revocation: Arc<RevocationCache>,
    renewal_ttl: Option<Duration>,
}

impl AuthenticationGate {
    pub fn new(codec: Arc<TokenCodec>, revocation: Arc<RevocationCache>) -> Self {
        Self {
            codec,
            revocation,
            renewal_ttl: None,
        }
    }

    /// Reissue every accepted token with a fresh `ttl`.
    pub fn with_renewal(mut self, ttl: Duration) -> Self {
        self.renewal_ttl = Some(ttl);
        self
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn revocation(&self) -> &Arc<RevocationCache> {
        &self.revocation
    }

    /// Authenticate a request.
    ///
    /// Public routes admit callers without a credential. A credential that
    /// is presented is always validated, whatever the route.
    ///
    /// # Errors
    ///
    /// Any credential failure ([`AdmissionError::is_authentication_failure`]),
    /// or [`AdmissionError::RevocationUnavailable`] when the current generation
    /// cannot be read.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        access: Access,
    ) -> Result<GateOutcome, AdmissionError> {
        let token = match bearer_token(headers) {
            Ok(Some(token)) => token,
            Ok(None) if access == Access::Public => return Ok(GateOutcome::default()),
            Ok(None) => return Err(AdmissionError::MissingToken),
            Err(AdmissionError::MissingToken) if access == Access::Public => {
                return Ok(GateOutcome::default());
            }
            Err(e) => return Err(e),
        };

        let principal = self.codec.decode(token)?;
        self.check_generation(&principal).await?;
        debug!(user_id = %principal.subject(), "token accepted");

        let renewed_token = self.renew(&principal);
        Ok(GateOutcome {
            principal: Some(principal),
            renewed_token,
        })
    }

    async fn check_generation(&self, principal: &Principal) -> Result<(), AdmissionError> {
        let user_id = principal.subject();
        let Some(claimed) = principal.token_version() else {
            warn!(user_id, "token carries no generation");
            return Err(AdmissionError::StaleToken);
        };

        let current = self
            .revocation
            .get_version(user_id)
            .await
            .map_err(|e| {
                let err = AdmissionError::from(e);
                if let AdmissionError::RevocationUnavailable(detail) = &err {
                    error!(user_id, error = %detail, "revocation source unavailable");
                }
                err
            })?;

        if claimed != current {
            warn!(user_id, claimed, current, "stale token generation");
            return Err(AdmissionError::StaleToken);
        }
        Ok(())
    }

    fn renew(&self, principal: &Principal) -> Option<String> {
        let ttl = self.renewal_ttl?;
        match self
            .codec
            .encode(principal.subject(), principal.claims().clone(), ttl)
        {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(user_id = %principal.subject(), error = %e, "token renewal failed");
                None
            }
        }
    }
}
