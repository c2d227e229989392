use argon2::Argon2;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    api::v1::user::{update_user, UserCollection, UserModel, UserPatch},
    error::Error,
};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
}

impl From<&UserModel> for ProfileFields {
    fn from(value: &UserModel) -> Self {
        Self {
            name: value.name.clone(),
            email: value.email.clone(),
            phone: value.phone.clone(),
            department: value.department.clone(),
            bio: value.bio.clone(),
        }
    }
}

impl From<&ProfileFields> for UserPatch {
    fn from(value: &ProfileFields) -> Self {
        // send every field so cleared optional values are cleared in the store
        Self {
            name: Some(value.name.clone()),
            email: Some(value.email.clone()),
            phone: Some(value.phone.clone().unwrap_or_default()),
            department: Some(value.department.clone().unwrap_or_default()),
            bio: Some(value.bio.clone().unwrap_or_default()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Email,
    Phone,
    Department,
    Bio,
}

impl ProfileFields {
    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        let value = value.into();
        let optional = || Some(value.clone()).filter(|it| !it.is_empty());

        match field {
            ProfileField::Name => self.name = value.clone(),
            ProfileField::Email => self.email = value.clone(),
            ProfileField::Phone => self.phone = optional(),
            ProfileField::Department => self.department = optional(),
            ProfileField::Bio => self.bio = optional(),
        }
    }
}

#[axum::async_trait]
pub trait ProfileBackend: Send + Sync {
    async fn update_profile(&self, fields: &ProfileFields) -> Result<ProfileFields, Error>;
}

#[derive(Clone)]
pub struct AccountProfileBackend {
    pub users: UserCollection,
    pub argon: Argon2<'static>,
    pub id: ObjectId,
}

#[axum::async_trait]
impl ProfileBackend for AccountProfileBackend {
    async fn update_profile(&self, fields: &ProfileFields) -> Result<ProfileFields, Error> {
        let model = update_user(&self.users, &self.argon, self.id, fields.into()).await?;

        Ok(ProfileFields::from(&model))
    }
}

pub struct ProfileEditor<B> {
    backend: B,
    authoritative: ProfileFields,
    draft: Option<ProfileFields>,
}

impl<B> ProfileEditor<B>
where
    B: ProfileBackend,
{
    pub fn new(backend: B, authoritative: ProfileFields) -> Self {
        Self {
            backend,
            authoritative,
            draft: None,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.draft.is_some()
    }

    pub fn displayed(&self) -> &ProfileFields {
        self.draft.as_ref().unwrap_or(&self.authoritative)
    }

    pub fn authoritative(&self) -> &ProfileFields {
        &self.authoritative
    }

    pub fn draft_mut(&mut self) -> &mut ProfileFields {
        self.draft.get_or_insert_with(|| self.authoritative.clone())
    }

    pub fn begin_edit(&mut self) {
        if self.draft.is_none() {
            self.draft = Some(self.authoritative.clone());
        }
    }

    pub fn set_field(&mut self, field: ProfileField, value: impl Into<String>) {
        self.draft_mut().set(field, value);
    }

    pub fn cancel(&mut self) {
        if self.draft.take().is_some() {
            tracing::debug!("profile edit cancelled");
        }
    }

    /// Commits the draft. On failure the draft and the authoritative values are
    /// left as they were so the edit can be corrected and retried.
    pub async fn save(&mut self) -> Result<&ProfileFields, Error> {
        let Some(draft) = self.draft.as_ref() else {
            return Ok(&self.authoritative);
        };

        let saved = self.backend.update_profile(draft).await?;

        tracing::debug!("profile saved");
        self.authoritative = saved;
        self.draft = None;

        Ok(&self.authoritative)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use crate::api::v1::{tests::bootstrap, user::UserRole};

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<ProfileFields>>,
        reject_email: Option<String>,
    }

    #[axum::async_trait]
    impl ProfileBackend for FakeBackend {
        async fn update_profile(&self, fields: &ProfileFields) -> Result<ProfileFields, Error> {
            self.calls.lock().unwrap().push(fields.clone());

            if self.reject_email.as_deref() == Some(fields.email.as_str()) {
                return Err(Error::DuplicateKey("email".to_string()));
            }

            Ok(ProfileFields {
                email: fields.email.to_lowercase(),
                ..fields.clone()
            })
        }
    }

    fn fields() -> ProfileFields {
        ProfileFields {
            name: "Jane".to_string(),
            email: "jane@test.com".to_string(),
            phone: Some("0800".to_string()),
            department: None,
            bio: None,
        }
    }

    #[test]
    fn test_cancel_restores_authoritative_values() {
        let mut editor = ProfileEditor::new(FakeBackend::default(), fields());

        editor.begin_edit();
        editor.set_field(ProfileField::Name, "J");
        editor.set_field(ProfileField::Name, "Ja");
        editor.set_field(ProfileField::Phone, "");
        editor.set_field(ProfileField::Bio, "hello");
        assert_eq!(editor.displayed().name, "Ja");
        assert_eq!(editor.displayed().phone, None);

        editor.cancel();

        assert!(!editor.is_editing());
        assert_eq!(editor.displayed(), &fields());
        assert!(editor.backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_begin_edit_keeps_existing_draft() {
        let mut editor = ProfileEditor::new(FakeBackend::default(), fields());

        editor.set_field(ProfileField::Department, "Sales");
        editor.begin_edit();
        editor.draft_mut().bio = Some("hello".to_string());

        assert!(editor.is_editing());
        assert_eq!(editor.displayed().bio.as_deref(), Some("hello"));
        assert_eq!(editor.displayed().department.as_deref(), Some("Sales"));
        assert_eq!(editor.authoritative(), &fields());
    }

    #[tokio::test]
    async fn test_save_replaces_authoritative_values() {
        let mut editor = ProfileEditor::new(FakeBackend::default(), fields());

        editor.set_field(ProfileField::Email, "Jane@Example.com");
        let saved = editor.save().await.unwrap().clone();

        assert_eq!(saved.email, "jane@example.com");
        assert!(!editor.is_editing());
        assert_eq!(editor.authoritative(), &saved);
        assert_eq!(editor.displayed(), &saved);
        assert_eq!(editor.backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_without_draft_skips_backend() {
        let mut editor = ProfileEditor::new(FakeBackend::default(), fields());

        let saved = editor.save().await.unwrap().clone();

        assert_eq!(saved, fields());
        assert!(editor.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_draft() {
        let backend = FakeBackend {
            reject_email: Some("taken@test.com".to_string()),
            ..Default::default()
        };
        let mut editor = ProfileEditor::new(backend, fields());

        editor.set_field(ProfileField::Email, "taken@test.com");
        let err = editor.save().await.unwrap_err();

        assert_matches!(err, Error::DuplicateKey(_));
        assert!(editor.is_editing());
        assert_eq!(editor.displayed().email, "taken@test.com");
        assert_eq!(editor.authoritative(), &fields());

        editor.cancel();
        assert_eq!(editor.displayed(), &fields());
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_account_backend() {
        let bootstrap = bootstrap().await;
        let other = bootstrap
            .derive("other@test.com", "password", UserRole::User)
            .await;

        let backend = AccountProfileBackend {
            users: bootstrap.app_state.user_collection.clone(),
            argon: bootstrap.app_state.argon.clone(),
            id: bootstrap.user_id(),
        };
        let mut editor = ProfileEditor::new(backend, ProfileFields::from(&bootstrap.user_model));

        editor.set_field(ProfileField::Email, other.user_email());
        let err = editor.save().await.unwrap_err();
        assert_matches!(err, Error::DuplicateKey(_));
        assert_eq!(editor.authoritative(), &ProfileFields::from(&bootstrap.user_model));

        editor.cancel();
        editor.set_field(ProfileField::Department, "Warehouse");
        editor.set_field(ProfileField::Name, "Renamed");
        editor.save().await.unwrap();

        let stored = bootstrap.reload_user().await;
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.department.as_deref(), Some("Warehouse"));
        assert_eq!(stored.created_at, bootstrap.user_model.created_at);
        assert_eq!(editor.authoritative(), &ProfileFields::from(&stored));
    }
}
