use std::collections::HashSet;

use bson::oid::ObjectId;
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, error::Error, mongo_ext::Collection};

#[derive(Serialize, Deserialize)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
    pub applied_at: bson::DateTime,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MigrationCollection {
    pub async fn insert_version(&self, version: i64) -> Result<(), Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
                applied_at: bson::DateTime::now(),
            },
            None,
        )
        .await
        .map(|_| ())
        .map_err(Into::into)
    }

    pub async fn applied_versions(&self) -> Result<HashSet<i64>, Error> {
        Ok(self
            .collect_all(None)
            .await?
            .into_iter()
            .map(|it| it.version)
            .collect())
    }
}

fn unique_index(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

impl AppState {
    async fn v1_migrate(&self) -> Result<(), Error> {
        self.migrate_collection
            .create_index(unique_index(bson::doc! { "version": 1 }), None)
            .await?;

        self.user_collection
            .create_index(unique_index(bson::doc! { "email": 1 }), None)
            .await?;

        self.token_collection
            .create_index(
                IndexModel::builder()
                    .keys(bson::doc! { "user_id": 1 })
                    .build(),
                None,
            )
            .await?;

        Ok(())
    }

    pub async fn run_migration(&self) -> Result<(), Error> {
        let applied = self.migrate_collection.applied_versions().await?;

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                let version: i64 = $version;
                if !applied.contains(&version) {
                    tracing::debug!("running migration version {}", version);
                    self.$fun().await?;
                    self.migrate_collection.insert_version(version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);

        Ok(())
    }
}
