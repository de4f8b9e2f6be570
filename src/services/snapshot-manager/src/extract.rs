//! Request extractors
//!
//! Wrappers over axum's `Query` and `Json` that reject malformed input as
//! [`SnapshotError::Validation`], so every 400 carries the same error body.

use crate::error::SnapshotError;

use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

/// Query string extractor with a JSON error body
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = SnapshotError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// JSON body extractor with a JSON error body
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = SnapshotError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use snapshot_shared::{DeleteOldSnapshotsRequest, SummaryQuery};

    #[tokio::test]
    async fn test_bad_query_is_a_validation_error() {
        let request = axum::http::Request::builder()
            .uri("/summary?from=yesterday")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let rejected = ApiQuery::<SummaryQuery>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(rejected, SnapshotError::Validation { .. }));
        assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_json_is_a_validation_error() {
        let request = axum::http::Request::builder()
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"subscription_id": 5}"#))
            .unwrap();

        let rejected = ApiJson::<DeleteOldSnapshotsRequest>::from_request(request, &())
            .await
            .unwrap_err();
        assert!(matches!(rejected, SnapshotError::Validation { ref field, .. } if field == "body"));
    }
}
