//! Owner identity for upload requests.
//!
//! The service sits behind an authenticating proxy that sets `X-User-Id`.
//! The value is used verbatim as a storage key segment, so it is restricted
//! to a conservative character set.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

pub const PRINCIPAL_HEADER: &str = "x-user-id";
const MAX_PRINCIPAL_LEN: usize = 128;

/// Authenticated owner extracted from the `X-User-Id` header.
///
/// Missing, empty or malformed values are rejected with 401.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal(pub String);

impl Principal {
    pub fn id(&self) -> &str {
        &self.0
    }
}

fn is_valid_principal(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_PRINCIPAL_LEN
        && value != "."
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| is_valid_principal(value));

        match principal {
            Some(id) => Ok(Principal(id.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Missing or invalid X-User-Id header",
            )
                .into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(value: Option<&str>) -> Result<Principal, Response> {
        let mut builder = Request::builder();
        if let Some(value) = value {
            builder = builder.header("X-User-Id", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Principal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_principal_from_header() {
        let principal = extract(Some("user-42")).await.unwrap();
        assert_eq!(principal.id(), "user-42");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let rejection = extract(None).await.unwrap_err();
        assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_values_unsafe_for_storage_keys() {
        for value in ["", "..", "john..doe", "a/b", "a\\b", "spaces here"] {
            assert!(extract(Some(value)).await.is_err(), "{:?} accepted", value);
        }
        assert_eq!(extract(Some("john.doe")).await.unwrap().id(), "john.doe");
    }
}
