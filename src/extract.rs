//! JSON body extractor that reports failures as `AppError`

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::AppError;

/// Like `axum::Json`, but malformed bodies produce the service's error shape
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(JsonRejection::MissingJsonContentType(rejection)) => {
                Err(AppError::UnsupportedMediaType(rejection.body_text()))
            }
            Err(rejection) => Err(AppError::ValidationError(rejection.body_text())),
        }
    }
}
