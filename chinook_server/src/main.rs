//! Chinook catalog server: artists, albums, tracks and playlists as JSON API endpoints.
//!
//! Run from repo root: `cargo run -p chinook-server`
//! Models are read from `MODELS_PATH` (default `chinook_server/models.json`).
//! `/health`, `/ready` and `/version` sit beside the API under `/api`.

use restless::{
    apply_migrations, ensure_database_exists, load_from_path, resolve, ApiManager, ApiOptions,
    ManagerSettings, ProcessingError, ProcessorKey,
};
use axum::http::{Method, StatusCode};
use tokio::net::TcpListener;

mod health;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("restless=info,chinook_server=info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/chinook".into());
    let models_path = std::env::var("MODELS_PATH").unwrap_or_else(|_| "chinook_server/models.json".into());
    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let config = load_from_path(&models_path).await?;
    apply_migrations(&pool, &config).await?;
    let schema = resolve(&config)?;

    let mut manager = ApiManager::with_settings(pool.clone(), schema, ManagerSettings::from_env());
    let all = [Method::GET, Method::POST, Method::PATCH, Method::DELETE];

    manager.create_api(
        "Artist",
        ApiOptions {
            allow_to_many_replacement: true,
            ..ApiOptions::with_methods(&all)
        },
    )?;

    let mut albums = ApiOptions::with_methods(&all);
    albums.includes = vec!["artist".into()];
    albums.additional_attributes = Some(vec!["ArtistId".into()]);
    manager.create_api("Album", albums)?;

    let mut tracks = ApiOptions::with_methods(&all);
    tracks.page_size = Some(25);
    tracks.max_page_size = Some(500);
    tracks.allow_delete_from_to_many_relationships = true;
    tracks.preprocessors.add(ProcessorKey::DeleteResource, |_args| {
        Err(ProcessingError::new(StatusCode::FORBIDDEN, "tracks are removed through their album").with_title("Forbidden"))
    });
    manager.create_api("Track", tracks)?;

    manager.create_api(
        "Playlist",
        ApiOptions {
            allow_to_many_replacement: true,
            allow_delete_from_to_many_relationships: true,
            ..ApiOptions::with_methods(&all)
        },
    )?;

    let app = manager.init_app(health::routes(pool));
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Chinook server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
