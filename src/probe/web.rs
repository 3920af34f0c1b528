use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::links::LinkState;
use crate::probe::engine::Authorizer;
use crate::probe::errors::ProbeError;
use crate::probe::types::{
    LinkVerdict, LinksRequest, ProbeRequest, ProbeResponse, Principal, RequestContext, RequestData,
};

pub fn router(authorizer: Arc<Authorizer>) -> Router {
    Router::new()
        .route("/v1/probe", post(handle_probe))
        .route("/v1/probe/links", post(handle_links))
        .route("/healthz", get(health))
        .with_state(authorizer)
}

/// Rebuild the caller's request context; the current handler is named by
/// the client since there is no in-flight handler on this side.
fn request_context(
    authorizer: &Authorizer,
    current: &str,
    principal: Principal,
    request: RequestData,
) -> Result<RequestContext, ProbeError> {
    let host = authorizer.host();
    let handler = host
        .create_handler(current, &request)
        .ok_or_else(|| ProbeError::HandlerNotFound {
            host: host.name().to_string(),
            name: current.to_string(),
        })?;
    Ok(RequestContext::new(handler, principal, request))
}

async fn handle_probe(
    State(authorizer): State<Arc<Authorizer>>,
    Json(req): Json<ProbeRequest>,
) -> impl IntoResponse {
    let ctx = match request_context(&authorizer, &req.current, req.principal, req.request) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    match authorizer
        .is_action_authorized_async(&ctx, &req.action, req.handler.as_deref())
        .await
    {
        Ok(allowed) => Json(ProbeResponse { allowed }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_links(
    State(authorizer): State<Arc<Authorizer>>,
    Json(req): Json<LinksRequest>,
) -> impl IntoResponse {
    let ctx = match request_context(&authorizer, &req.current, req.principal, req.request) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let mut verdicts = Vec::with_capacity(req.links.len());
    for link in req.links {
        let allowed = match authorizer
            .is_action_authorized_async(&ctx, &link.action, link.handler.as_deref())
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => return e.into_response(),
        };
        verdicts.push(LinkVerdict {
            link: LinkState::from_verdict(allowed, link.hide),
            action: link.action,
            handler: link.handler,
            allowed,
        });
    }
    Json(verdicts).into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
