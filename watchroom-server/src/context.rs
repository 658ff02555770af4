use std::sync::Arc;

use axum::extract::FromRef;
use watchroom_collab::Collab;

use crate::ratelimit::RateLimiter;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
    pub limiter: RateLimiter,
}
