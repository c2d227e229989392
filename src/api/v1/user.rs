use argon2::Argon2;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::{Duration, OffsetDateTime};
use validator::Validate;

use crate::{
    error::{Error, VerificationFailure},
    mongo_ext::{map_duplicate_key, Collection},
    util::{hash_password, normalize_email, now, verify_password, FormattedDateTime, ObjectIdString},
};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub password: String,

    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub otp: Option<Otp>,

    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

pub const MAX_OTP_ATTEMPTS: u32 = 5;

pub const OTP_RESEND_INTERVAL: Duration = Duration::minutes(1);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Otp {
    pub code: String,
    pub issued_at: bson::DateTime,
    pub expires_at: bson::DateTime,
    #[serde(default)]
    pub attempts: u32,
}

impl Otp {
    pub fn issue(argon: &Argon2, code: &str, expires_at: OffsetDateTime) -> Result<Self, Error> {
        Ok(Self {
            code: hash_password(argon, code)?,
            issued_at: now().into(),
            expires_at: expires_at.into(),
            attempts: 0,
        })
    }

    pub fn is_expired_at(&self, at: OffsetDateTime) -> bool {
        bson::DateTime::from(at) >= self.expires_at
    }

    pub fn can_reissue_at(&self, at: OffsetDateTime) -> bool {
        self.is_expired_at(at)
            || at >= self.issued_at.to_time_0_3() + OTP_RESEND_INTERVAL
    }

    pub fn check(
        &self,
        argon: &Argon2,
        code: &str,
        at: OffsetDateTime,
    ) -> Result<(), VerificationFailure> {
        if self.is_expired_at(at) {
            return Err(VerificationFailure::Expired);
        }

        if self.attempts > MAX_OTP_ATTEMPTS {
            return Err(VerificationFailure::TooManyAttempts);
        }

        if !verify_password(argon, code.trim(), &self.code) {
            if self.attempts >= MAX_OTP_ATTEMPTS {
                return Err(VerificationFailure::TooManyAttempts);
            }

            return Err(VerificationFailure::InvalidCode);
        }

        Ok(())
    }
}

impl UserModel {
    pub fn new(
        name: String,
        email: String,
        password: String,
        role: UserRole,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            name,
            email,
            password,
            role,
            is_verified: false,
            otp: None,
            phone: None,
            department: None,
            bio: None,
            created_at: created_at.into(),
            updated_at: created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResponse {
    pub id: ObjectIdString,

    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub verification_expires_at: Option<FormattedDateTime>,

    pub phone: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for UserResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            role: value.role,
            is_verified: value.is_verified,
            verification_expires_at: value.otp.map(|it| it.expires_at.into()),

            phone: value.phone,
            department: value.department,
            bio: value.bio,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate, Debug, Clone)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    pub role: UserRole,
}

impl CreateUserRequest {
    fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
            ..self
        }
    }
}

/// Partial update of an account. `None` leaves a field untouched; an empty
/// string clears `phone`, `department` or `bio`.
#[derive(Validate, Debug, Clone, Default)]
pub struct UserPatch {
    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: Option<String>,

    pub role: Option<UserRole>,

    #[validate(length(max = 32))]
    pub phone: Option<String>,

    #[validate(length(max = 124))]
    pub department: Option<String>,

    #[validate(length(max = 1024))]
    pub bio: Option<String>,
}

impl UserPatch {
    fn normalized(self) -> Self {
        Self {
            name: self.name.map(|it| it.trim().to_string()),
            email: self.email.as_deref().map(normalize_email),
            phone: self.phone.map(|it| it.trim().to_string()),
            department: self.department.map(|it| it.trim().to_string()),
            bio: self.bio.map(|it| it.trim().to_string()),
            ..self
        }
    }

    /// The `$set` body for this patch. `created_at` is never part of it.
    /// A new address drops the verified flag and any pending code.
    pub fn into_set_document(
        self,
        argon: &Argon2,
        current_email: &str,
        updated_at: OffsetDateTime,
    ) -> Result<bson::Document, Error> {
        let mut set = bson::doc! {
            "updated_at": bson::DateTime::from(updated_at),
        };

        if let Some(name) = self.name {
            set.insert("name", name);
        }

        if let Some(email) = self.email {
            if email != current_email {
                set.insert("is_verified", false);
                set.insert("otp", bson::Bson::Null);
            }
            set.insert("email", email);
        }

        if let Some(password) = self.password {
            set.insert("password", hash_password(argon, &password)?);
        }

        if let Some(role) = self.role {
            set.insert("role", bson::to_bson(&role)?);
        }

        for (key, value) in [
            ("phone", self.phone),
            ("department", self.department),
            ("bio", self.bio),
        ] {
            if let Some(value) = value {
                let value = Some(value).filter(|it| !it.is_empty());
                set.insert(key, value);
            }
        }

        Ok(set)
    }
}

impl UserCollection {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.find_one(bson::doc! { "email": normalize_email(email) }, None)
            .await
            .map_err(Into::into)
    }

    pub async fn email_taken(&self, email: &str, except: Option<ObjectId>) -> Result<bool, Error> {
        let mut filter = bson::doc! { "email": email };

        if let Some(id) = except {
            filter.insert("_id", bson::doc! { "$ne": id });
        }

        let count = self.count_documents(filter, None).await?;

        Ok(count > 0)
    }

    pub async fn set_verification(&self, id: ObjectId, otp: &Otp) -> Result<(), Error> {
        let result = self
            .update_one_by_id(
                id,
                bson::doc! {
                    "$set": {
                        "otp": bson::to_bson(otp)?,
                        "updated_at": bson::DateTime::from(now()),
                    }
                },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::NoResource);
        }

        Ok(())
    }

    pub async fn clear_verification(&self, id: ObjectId) -> Result<(), Error> {
        let result = self
            .update_one_by_id(
                id,
                bson::doc! {
                    "$set": {
                        "otp": bson::Bson::Null,
                        "updated_at": bson::DateTime::from(now()),
                    }
                },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::NoResource);
        }

        Ok(())
    }

    /// Counts one confirmation attempt against the pending code and returns
    /// it. `None` when no code is pending or its attempts are used up.
    pub async fn take_verification_attempt(&self, id: ObjectId) -> Result<Option<Otp>, Error> {
        let model = self
            .find_one_and_update(
                bson::doc! {
                    "_id": id,
                    "otp.attempts": { "$lt": i64::from(MAX_OTP_ATTEMPTS) },
                },
                bson::doc! {
                    "$inc": { "otp.attempts": 1 },
                },
                mongodb::options::FindOneAndUpdateOptions::builder()
                    .return_document(mongodb::options::ReturnDocument::After)
                    .build(),
            )
            .await?;

        Ok(model.and_then(|it| it.otp))
    }

    pub async fn mark_verified(&self, id: ObjectId) -> Result<UserModel, Error> {
        self.find_one_and_update_by_id(
            id,
            bson::doc! {
                "$set": {
                    "is_verified": true,
                    "otp": bson::Bson::Null,
                    "updated_at": bson::DateTime::from(now()),
                }
            },
        )
        .await?
        .ok_or(Error::NoResource)
    }

    pub async fn delete_user(&self, id: ObjectId) -> Result<(), Error> {
        if !self.delete_one_by_id(id).await? {
            return Err(Error::NoResource);
        }

        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(email = %request.email))]
pub async fn create_user(
    users: &UserCollection,
    argon: &Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    let request = request.normalized();
    request
        .validate()
        .tap_err(|_| tracing::debug!("rejected invalid account"))?;

    if users.email_taken(&request.email, None).await? {
        return Err(Error::DuplicateKey("email".to_string()))
            .tap_err(|_| tracing::debug!("email already registered"));
    }

    let model = UserModel::new(
        request.name,
        request.email,
        hash_password(argon, &request.password)?,
        request.role,
        now(),
    );

    users
        .insert_one(&model, None)
        .await
        .map_err(map_duplicate_key("email"))?;

    tracing::debug!(id = %model.id, "account created");

    Ok(model)
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn update_user(
    users: &UserCollection,
    argon: &Argon2<'_>,
    id: ObjectId,
    patch: UserPatch,
) -> Result<UserModel, Error> {
    let patch = patch.normalized();
    patch.validate()?;

    let current = users
        .find_one_by_id(id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried updating non existing account"))?;

    if let Some(email) = &patch.email {
        if email != &current.email && users.email_taken(email, Some(id)).await? {
            return Err(Error::DuplicateKey("email".to_string()))
                .tap_err(|_| tracing::debug!("email already registered"));
        }
    }

    let set = patch.into_set_document(argon, &current.email, now())?;

    tracing::debug!("updating account {:?}", set.keys().collect::<Vec<_>>());
    users
        .find_one_and_update_by_id(id, bson::doc! { "$set": set })
        .await
        .map_err(map_duplicate_key("email"))?
        .ok_or(Error::NoResource)
}
