use crate::server::{
    Result, ServerError, ServerRouter, SharedStore,
    json::{Data, Json, Message, PostDetail},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use postboard_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
};
use serde::Deserialize;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(get_latest_post)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
}

#[derive(TypedPath)]
#[typed_path("/posts")]
struct PostsPath;

async fn list_posts(_: PostsPath, State(store): State<SharedStore>) -> Json<Data<Vec<Post>>> {
    let posts = store.read().await.list_all().to_vec();

    Json(Data { data: posts })
}

async fn create_post(
    _: PostsPath,
    State(store): State<SharedStore>,
    Json(content): Json<PostContent>,
) -> Result<(StatusCode, Json<Data<Post>>)> {
    let post = store.write().await.append(content)?;
    info!(id = %post.id, "Created post");

    Ok((StatusCode::CREATED, Json(Data { data: post })))
}

#[derive(TypedPath)]
#[typed_path("/posts/latest")]
struct LatestPostPath;

async fn get_latest_post(
    _: LatestPostPath,
    State(store): State<SharedStore>,
) -> Result<Json<PostDetail<Post>>> {
    let post = store
        .read()
        .await
        .latest()
        .cloned()
        .ok_or(ServerError::NoPosts)?;

    Ok(Json(PostDetail { post_detail: post }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(store): State<SharedStore>,
) -> Result<Json<PostDetail<Post>>> {
    let post = store
        .read()
        .await
        .find_by_id(id)
        .cloned()
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(PostDetail { post_detail: post }))
}

async fn update_post(
    PostPath { id }: PostPath,
    State(store): State<SharedStore>,
    Json(content): Json<PostContent>,
) -> Result<Json<Message>> {
    let mut store = store.write().await;
    let index = store
        .find_index_by_id(id)
        .ok_or(ServerError::PostByIdMissing(id))?;
    store.replace_at(index, content)?;
    info!(%id, "Updated post");

    Ok(Json(Message {
        message: format!("Post with ID {id} successfully updated"),
    }))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(store): State<SharedStore>,
) -> Result<StatusCode> {
    let mut store = store.write().await;
    let index = store
        .find_index_by_id(id)
        .ok_or(ServerError::PostByIdMissing(id))?;
    store.remove_at(index)?;
    info!(%id, "Post with ID {id} successfully deleted");

    Ok(StatusCode::NO_CONTENT)
}
