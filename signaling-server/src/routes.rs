use std::sync::Arc;

use log::warn;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::signaling::{self, SignalingContext};

#[derive(Debug)]
struct OriginRejected;

impl warp::reject::Reject for OriginRejected {}

/// Accepts requests without an `Origin` header, and any origin when `allowed` is empty.
fn origin_allowed(
    allowed: Arc<Vec<String>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("origin")
        .and_then(move |origin: Option<String>| {
            let allowed = allowed.clone();
            async move {
                match origin {
                    Some(origin)
                        if !allowed.is_empty() && !allowed.iter().any(|a| *a == origin) =>
                    {
                        warn!("rejecting websocket from origin {}", origin);
                        Err(warp::reject::custom(OriginRejected))
                    }
                    _ => Ok(()),
                }
            }
        })
        .untuple_one()
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Rejection> {
    if rejection.find::<OriginRejected>().is_some() {
        Ok(warp::reply::with_status(
            "origin not allowed",
            StatusCode::FORBIDDEN,
        ))
    } else {
        Err(rejection)
    }
}

/// `GET /<ws_path>` upgraded to a websocket and handed to a new signaling session.
pub fn signaling_route(
    ws_path: String,
    allowed_origins: Arc<Vec<String>>,
    ctx: SignalingContext,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ctx = warp::any().map(move || ctx.clone());
    warp::path(ws_path)
        .and(warp::path::end())
        .and(origin_allowed(allowed_origins))
        .and(warp::ws())
        .and(ctx)
        .map(|ws: warp::ws::Ws, ctx: SignalingContext| {
            ws.on_upgrade(move |socket| signaling::client_connected(socket, ctx))
        })
        .recover(handle_rejection)
}
