use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use murmur_crypto::TokenValidator;

use crate::error::ApiError;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// The authenticated user id, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(validator): State<Arc<TokenValidator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    let user_id = validator
        .validate(token)
        .map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Token for a WebSocket upgrade: the `token` query parameter, else the `access_token` cookie.
pub fn ws_token(query: Option<String>, jar: &CookieJar) -> Option<String> {
    query
        .filter(|t| !t.is_empty())
        .or_else(|| jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::Cookie;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn query_token_wins_over_cookie() {
        let jar = CookieJar::new().add(Cookie::new(ACCESS_TOKEN_COOKIE, "from-cookie"));
        assert_eq!(ws_token(Some("from-query".into()), &jar).as_deref(), Some("from-query"));
        assert_eq!(ws_token(None, &jar).as_deref(), Some("from-cookie"));
        assert_eq!(ws_token(Some(String::new()), &CookieJar::new()), None);
    }
}
