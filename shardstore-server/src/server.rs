use crate::config::Config;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use shardstore_core::{
    ApiResponse, BlockExistsResponse, BlockStore, CommitResponse, DeleteFileQuery, ListFilesQuery,
    MetadataError, MetadataStore, ModifyFileRequest, Result, StoreBlockResponse, StoreError,
    build_http_client, remote_shards,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub struct BlockServerState {
    pub index: usize,
    pub store: BlockStore,
}

#[derive(Debug, Serialize)]
struct MetadataHealth {
    status: &'static str,
    shard_count: usize,
}

#[derive(Debug, Serialize)]
struct BlockHealth {
    status: &'static str,
    shard_index: usize,
    block_count: usize,
}

pub async fn run_metadata_server(config: Config) -> Result<()> {
    let client = build_http_client(config.client.request_timeout())?;
    let shards = remote_shards(&client, &config.shard_endpoints())?;
    tracing::info!("Metadata service tracking {} shard(s)", shards.len());

    let store = Arc::new(MetadataStore::new(shards));
    let listener = TcpListener::bind(&config.metadata.bind_addr).await?;
    tracing::info!("Metadata service listening on {}", config.metadata.bind_addr);

    serve(listener, metadata_router(store)).await
}

pub async fn run_block_server(config: Config, index: usize) -> Result<()> {
    let block_config = config.block_store(index)?.clone();
    let store = BlockStore::new(block_config.data_dir.clone())?;
    tracing::info!(
        "Block store {} serving {:?} ({} blocks on disk)",
        index,
        block_config.data_dir,
        store.block_count().await?
    );

    let state = Arc::new(BlockServerState { index, store });
    let listener = TcpListener::bind(&block_config.bind_addr).await?;
    tracing::info!("Block store {} listening on {}", index, block_config.bind_addr);

    serve(listener, block_router(state)).await
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn metadata_router(store: Arc<MetadataStore>) -> Router {
    Router::new()
        .route("/health", get(metadata_health))
        .route("/files", get(list_files))
        .route(
            "/files/:filename",
            get(read_file).put(modify_file).delete(delete_file),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

pub fn block_router(state: Arc<BlockServerState>) -> Router {
    Router::new()
        .route("/health", get(block_health))
        .route("/blocks/:hash", get(get_block).put(put_block))
        .route("/blocks/:hash/exists", get(block_exists))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(error: &StoreError) -> StatusCode {
    match error {
        StoreError::Rejected(MetadataError::FileNotFound) => StatusCode::NOT_FOUND,
        StoreError::Rejected(_) => StatusCode::CONFLICT,
        StoreError::BlockNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidRequest(_)
        | StoreError::HashMismatch { .. }
        | StoreError::ShardOutOfRange { .. } => StatusCode::BAD_REQUEST,
        StoreError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: StoreError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }

    let body = match error {
        StoreError::Rejected(rejection) => ApiResponse::<()>::rejected(rejection),
        other => ApiResponse::<()>::failure(other.to_string()),
    };
    (status, Json(body)).into_response()
}

fn ok_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

async fn metadata_health(State(store): State<Arc<MetadataStore>>) -> Response {
    ok_response(MetadataHealth {
        status: "ok",
        shard_count: store.shards().len(),
    })
}

async fn list_files(
    State(store): State<Arc<MetadataStore>>,
    Query(query): Query<ListFilesQuery>,
) -> Response {
    ok_response(
        store
            .list_files(&query.prefix, query.limit, query.include_tombstoned)
            .await,
    )
}

async fn read_file(
    State(store): State<Arc<MetadataStore>>,
    Path(filename): Path<String>,
) -> Response {
    match store.read_file(&filename).await {
        Ok(snapshot) => ok_response(snapshot),
        Err(error) => error_response(error),
    }
}

async fn modify_file(
    State(store): State<Arc<MetadataStore>>,
    Path(filename): Path<String>,
    Json(request): Json<ModifyFileRequest>,
) -> Response {
    match store
        .modify_file(&filename, request.version, request.hashlist)
        .await
    {
        Ok(version) => ok_response(CommitResponse { version }),
        Err(error) => error_response(error),
    }
}

async fn delete_file(
    State(store): State<Arc<MetadataStore>>,
    Path(filename): Path<String>,
    Query(query): Query<DeleteFileQuery>,
) -> Response {
    match store.delete_file(&filename, query.version).await {
        Ok(version) => ok_response(CommitResponse { version }),
        Err(error) => error_response(error),
    }
}

async fn block_health(State(state): State<Arc<BlockServerState>>) -> Response {
    match state.store.block_count().await {
        Ok(block_count) => ok_response(BlockHealth {
            status: "ok",
            shard_index: state.index,
            block_count,
        }),
        Err(error) => error_response(error),
    }
}

async fn block_exists(
    State(state): State<Arc<BlockServerState>>,
    Path(hash): Path<String>,
) -> Response {
    match state.store.has_block(&hash).await {
        Ok(exists) => ok_response(BlockExistsResponse { exists }),
        Err(error) => error_response(error),
    }
}

async fn put_block(
    State(state): State<Arc<BlockServerState>>,
    Path(hash): Path<String>,
    body: Bytes,
) -> Response {
    match state.store.store_block(&hash, body).await {
        Ok(result) => ok_response(StoreBlockResponse {
            hash,
            reused: result.reused,
        }),
        Err(error) => error_response(error),
    }
}

async fn get_block(
    State(state): State<Arc<BlockServerState>>,
    Path(hash): Path<String>,
) -> Response {
    match state.store.get_block(&hash).await {
        Ok(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}
