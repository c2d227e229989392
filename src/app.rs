use axum::extract::FromRef;

use crate::{
    api::v1::{
        token::{JwtState, RefreshTokenCollection},
        user::UserCollection,
    },
    config::Config,
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,
    pub config: Config,

    pub mongo_client: mongodb::Client,
    pub token_collection: RefreshTokenCollection,
    pub user_collection: UserCollection,
    pub migrate_collection: MigrationCollection,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let argon = argon2::Argon2::default();
        let jwt_state = JwtState::new(&config.jwt)?;

        let mongo_client_opt = mongodb::options::ClientOptions::parse(&config.mongodb_uri).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(&config.database_name);
        tracing::debug!("using database {}", config.database_name);

        Ok(Self {
            argon,
            jwt_state,

            mongo_client,
            token_collection: RefreshTokenCollection(db.collection("refresh_tokens").into()),
            user_collection: UserCollection(db.collection("users").into()),
            migrate_collection: MigrationCollection(db.collection("migrations").into()),

            config,
        })
    }

    pub async fn new_from_env() -> Result<Self, anyhow::Error> {
        Self::new(Config::from_env()?).await
    }
}
