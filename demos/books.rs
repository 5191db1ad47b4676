//! A tiny in-memory books API with the access log installed.
//!
//! ```text
//! cargo run --example books
//! curl -X POST -H 'content-type: application/json' -d '{"title":"Dune","author":"Herbert"}' http://localhost:8080/api/v1/books
//! curl http://localhost:8080/api/v2/books/7
//! tail -f logs/*/log_*.log
//! ```

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bucketlog::{AccessLogConfig, AccessLogLayer};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize)]
struct Book {
    id: u64,
    title: String,
    author: String,
}

#[derive(Debug, Deserialize)]
struct NewBook {
    title: String,
    author: String,
}

#[derive(Default)]
struct Shelf {
    next_id: u64,
    books: BTreeMap<u64, Book>,
}

type AppState = Arc<Mutex<Shelf>>;

fn not_found(id: u64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("book {id} not found") })),
    )
        .into_response()
}

async fn list_books(State(shelf): State<AppState>) -> Json<Vec<Book>> {
    let shelf = shelf.lock().unwrap();
    Json(shelf.books.values().cloned().collect())
}

async fn create_book(State(shelf): State<AppState>, Json(new): Json<NewBook>) -> Response {
    let mut shelf = shelf.lock().unwrap();
    if shelf.books.values().any(|b| b.title == new.title) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "title already exists" })),
        )
            .into_response();
    }
    shelf.next_id += 1;
    let book = Book {
        id: shelf.next_id,
        title: new.title,
        author: new.author,
    };
    shelf.books.insert(book.id, book.clone());
    (StatusCode::CREATED, Json(book)).into_response()
}

async fn get_book(State(shelf): State<AppState>, Path(id): Path<u64>) -> Response {
    match shelf.lock().unwrap().books.get(&id) {
        Some(book) => Json(book.clone()).into_response(),
        None => not_found(id),
    }
}

async fn delete_book(State(shelf): State<AppState>, Path(id): Path<u64>) -> Response {
    match shelf.lock().unwrap().books.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(id),
    }
}

fn books_routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(list_books).post(create_book))
        .route("/books/:id", get(get_book).delete(delete_book))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bucketlog=debug")),
        )
        .init();

    let config = AccessLogConfig::from_env();
    info!(root = %config.root.display(), max_body_bytes = config.max_body_bytes, "Access log configured");

    let app = Router::new()
        .nest("/api/v1", books_routes())
        .nest("/api/v2", books_routes())
        .with_state(AppState::default())
        .layer(CatchPanicLayer::new())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(AccessLogLayer::new(config))
                .into_inner(),
        );

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Books demo listening on http://localhost:{port}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
