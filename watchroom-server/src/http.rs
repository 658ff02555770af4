use axum::extract::State;
use axum::routing::post;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use watchroom_collab::{Page, Video};

use crate::context::ServerContext;
use crate::errors::ServerResult;
use crate::Router;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub continuation: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SuggestionsRequest {
    pub query: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaylistRequest {
    #[serde(rename = "playlistUrlOrId")]
    pub reference: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRequest {
    pub video_id: String,
    #[serde(default)]
    pub continuation: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckEmbeddableRequest {
    pub video_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckEmbeddableEntry {
    pub video_id: String,
    pub can_embed: bool,
}

#[utoipa::path(
    post,
    path = "/search",
    tag = "catalog",
    request_body = SearchRequest,
    responses((status = 200, description = "A page of matching videos"))
)]
pub(crate) async fn search(
    State(context): State<ServerContext>,
    Json(body): Json<SearchRequest>,
) -> ServerResult<Json<Page<Video>>> {
    let page = context
        .collab
        .dispatcher
        .adapter()
        .search(&body.query, body.continuation)
        .await?;

    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/suggestions",
    tag = "catalog",
    request_body = SuggestionsRequest,
    responses((status = 200, description = "Autocomplete suggestions for a partial query"))
)]
pub(crate) async fn suggestions(
    State(context): State<ServerContext>,
    Json(body): Json<SuggestionsRequest>,
) -> ServerResult<Json<Vec<String>>> {
    let suggestions = context.collab.dispatcher.adapter().suggestions(&body.query).await?;
    Ok(Json(suggestions))
}

#[utoipa::path(
    post,
    path = "/playlist",
    tag = "catalog",
    request_body = PlaylistRequest,
    responses((status = 200, description = "The videos of an external playlist, expanded"))
)]
pub(crate) async fn playlist(
    State(context): State<ServerContext>,
    Json(body): Json<PlaylistRequest>,
) -> ServerResult<Json<Vec<Video>>> {
    let videos = context
        .collab
        .dispatcher
        .adapter()
        .playlist(&body.reference)
        .await?;

    Ok(Json(videos))
}

#[utoipa::path(
    post,
    path = "/related",
    tag = "catalog",
    request_body = RelatedRequest,
    responses((status = 200, description = "A page of videos related to the given one"))
)]
pub(crate) async fn related(
    State(context): State<ServerContext>,
    Json(body): Json<RelatedRequest>,
) -> ServerResult<Json<Page<Video>>> {
    let page = context
        .collab
        .dispatcher
        .adapter()
        .related(&body.video_id, body.continuation)
        .await?;

    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/check-embeddable",
    tag = "catalog",
    request_body = CheckEmbeddableRequest,
    responses((status = 200, description = "Per-video embeddability verdicts", body = [CheckEmbeddableEntry]))
)]
pub(crate) async fn check_embeddable(
    State(context): State<ServerContext>,
    Json(body): Json<CheckEmbeddableRequest>,
) -> ServerResult<Json<Vec<CheckEmbeddableEntry>>> {
    let adapter = context.collab.dispatcher.adapter();
    let mut results = Vec::with_capacity(body.video_ids.len());

    for video_id in body.video_ids {
        let can_embed = adapter.is_embeddable(&video_id).await?;
        results.push(CheckEmbeddableEntry { video_id, can_embed });
    }

    Ok(Json(results))
}

pub fn router() -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/suggestions", post(suggestions))
        .route("/playlist", post(playlist))
        .route("/related", post(related))
        .route("/check-embeddable", post(check_embeddable))
}
