use std::sync::Arc;

use {
    axum::{
        extract::FromRequestParts,
        http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    },
    chatrelay_auth::{Identity, TokenError, TokenService},
    tracing::{debug, warn},
};

use crate::{api::ApiError, state::GatewayState};

/// Why a token was refused, for logs.
pub fn rejection_reason(err: &TokenError) -> &'static str {
    match err {
        TokenError::InvalidToken => "token_invalid",
        TokenError::Expired { .. } => "token_expired",
        TokenError::Encoding(_) => "token_encoding",
    }
}

/// Verify a session token. Forged or malformed tokens are logged at `warn`,
/// expired ones at `debug`.
pub fn verify_token(tokens: &TokenService, token: &str) -> Result<Identity, TokenError> {
    tokens.verify(token).inspect_err(|e| {
        let reason = rejection_reason(e);
        match e {
            TokenError::Expired { expired_at } => {
                debug!(reason, %expired_at, "rejected session token")
            },
            _ => warn!(reason, "rejected session token"),
        }
    })
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticated caller of a REST handler.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<Arc<GatewayState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            debug!(reason = "token_missing", path = %parts.uri.path(), "rejected request");
            return Err(ApiError::Unauthorized("missing bearer token"));
        };
        let identity = verify_token(&state.tokens, token)
            .map_err(|_| ApiError::Unauthorized("invalid or expired token"))?;
        Ok(Self(identity))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn verify_token_maps_errors() {
        let tokens = TokenService::new("k", 1);
        let good = tokens.issue(1, "a").unwrap();
        assert_eq!(verify_token(&tokens, &good).unwrap().id, 1);

        let err = verify_token(&tokens, "v2.local.AAAA").unwrap_err();
        assert_eq!(rejection_reason(&err), "token_invalid");
    }
}
