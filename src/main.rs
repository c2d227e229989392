use axum::{routing, Router};
use storefront::{api::v1, app::AppState, config::Config};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "storefront=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr = config.listen_addr;

    let app_state = AppState::new(config).await?;
    app_state.run_migration().await?;

    let api = Router::new().nest(
        "/v1",
        Router::new()
            .nest(
                "/auth",
                Router::new()
                    .route("/login", routing::post(v1::auth::login))
                    .route("/logout", routing::post(v1::auth::logout))
                    .route("/register", routing::post(v1::auth::register))
                    .route("/refresh", routing::post(v1::auth::refresh_access_token)),
            )
            .route(
                "/profile",
                routing::get(v1::profile::show).put(v1::profile::update),
            )
            .route("/verification", routing::post(v1::verification::request))
            .route(
                "/verification/confirm",
                routing::post(v1::verification::confirm),
            )
            .nest(
                "/account",
                Router::new()
                    .route(
                        "/",
                        routing::get(v1::account::index).post(v1::account::create),
                    )
                    .route(
                        "/:id",
                        routing::get(v1::account::show)
                            .put(v1::account::update)
                            .delete(v1::account::delete),
                    ),
            ),
    );

    let app = Router::new()
        .nest("/api", api)
        .fallback_service(
            ServeDir::new("public").fallback(ServeFile::new("public/dist/index.html")),
        )
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
