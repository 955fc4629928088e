use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::util::constant_time_cmp;
use crate::util::env::Var;
use crate::var;

/// Guards operator-only routes (season reset). The external scheduler sends
/// the shared token in the Authorization header.
pub async fn verify_internal_ident(req: Request, next: Next) -> Result<Response, StatusCode> {
    let headers = req.headers().clone();
    let authorized_header = headers
        .get(AUTHORIZATION)
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let internal_token = var!(Var::InternalToken)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !constant_time_cmp(authorized_header, internal_token) {
        Err(StatusCode::UNAUTHORIZED)
    } else {
        Ok(next.run(req).await)
    }
}
