use std::ops::{Deref, DerefMut};

use bson::oid::ObjectId;
use mongodb::error::{ErrorKind, WriteFailure};
use serde::de::DeserializeOwned;

use crate::error::Error;

pub const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Collection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn find_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(bson::doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    pub async fn update_one_by_id(
        &self,
        id: ObjectId,
        update: impl Into<mongodb::options::UpdateModifications>,
    ) -> Result<mongodb::results::UpdateResult, Error> {
        self.update_one(bson::doc! { "_id": id }, update, None)
            .await
            .map_err(Into::into)
    }

    pub async fn find_one_and_update_by_id(
        &self,
        id: ObjectId,
        update: impl Into<mongodb::options::UpdateModifications>,
    ) -> Result<Option<T>, mongodb::error::Error> {
        self.find_one_and_update(
            bson::doc! { "_id": id },
            update,
            mongodb::options::FindOneAndUpdateOptions::builder()
                .return_document(mongodb::options::ReturnDocument::After)
                .build(),
        )
        .await
    }

    pub async fn delete_one_by_id(&self, id: ObjectId) -> Result<bool, Error> {
        self.delete_one(bson::doc! { "_id": id }, None)
            .await
            .map(|it| it.deleted_count > 0)
            .map_err(Into::into)
    }

    pub async fn collect_all(
        &self,
        filter: impl Into<Option<bson::Document>>,
    ) -> Result<Vec<T>, Error> {
        let mut cursor = self.find(filter, None).await?;

        let mut vec = vec![];

        while cursor.advance().await? {
            vec.push(cursor.deserialize_current()?);
        }

        Ok(vec)
    }
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(err)) => err.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(err) => err.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

pub fn map_duplicate_key(field: &str) -> impl FnOnce(mongodb::error::Error) -> Error + '_ {
    move |err| {
        if is_duplicate_key(&err) {
            Error::DuplicateKey(field.to_string())
        } else {
            err.into()
        }
    }
}
