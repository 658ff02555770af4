use axum::response::IntoResponse;
use axum::Json;
use utoipa::OpenApi;

use crate::http;
use crate::ws;

#[derive(OpenApi)]
#[openapi(
    paths(
        http::search,
        http::suggestions,
        http::playlist,
        http::related,
        http::check_embeddable,
        ws::handle_upgrade,
    ),
    components(schemas(
        http::SearchRequest,
        http::SuggestionsRequest,
        http::PlaylistRequest,
        http::RelatedRequest,
        http::CheckEmbeddableRequest,
        http::CheckEmbeddableEntry,
    )),
    tags(
        (name = "catalog", description = "Video catalog lookups backing queue and playlist commands"),
        (name = "realtime", description = "The WebSocket connection clients use for room commands and events"),
    ),
    info(description = "watchroom-server exposes the HTTP and WebSocket surface of a synchronized video room")
)]
struct ApiDoc;

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
