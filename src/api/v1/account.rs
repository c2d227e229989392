use argon2::Argon2;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    util::{JsonBody, PathObjectId},
};

use super::{
    auth::UserAccess,
    user::{
        create_user, update_user, CreateUserRequest, UserCollection, UserPatch, UserResponse,
        UserRole,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub accounts: Vec<UserResponse>,
}

pub async fn index(
    user: UserAccess,
    State(accounts): State<UserCollection>,
) -> Result<Json<IndexResponse>, Error> {
    user.require_admin()?;

    let accounts = accounts
        .collect_all(None)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(IndexResponse { accounts }))
}

pub async fn show(
    user: UserAccess,
    State(accounts): State<UserCollection>,
    PathObjectId(account_id): PathObjectId,
) -> Result<Json<UserResponse>, Error> {
    user.require_admin()?;

    let account = accounts
        .find_one_by_id(account_id)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(account.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct AccountRequest {
    pub name: String,

    pub email: String,

    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    #[serde(default)]
    pub role: UserRole,
}

#[tracing::instrument(skip_all, fields(user = ?user))]
pub async fn create(
    user: UserAccess,
    State(accounts): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    JsonBody(request): JsonBody<AccountRequest>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    user.require_admin()?;
    request.validate()?;

    let insert = create_user(
        &accounts,
        &argon,
        CreateUserRequest {
            name: request.name,
            email: request.email,
            password: request.password,
            role: request.role,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(insert.into())))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateRequest {
    pub name: Option<String>,

    pub email: Option<String>,

    pub password: Option<String>,

    #[validate(must_match = "password")]
    pub confirm_password: Option<String>,

    pub role: Option<UserRole>,

    pub phone: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
}

impl From<UpdateRequest> for UserPatch {
    fn from(value: UpdateRequest) -> Self {
        Self {
            name: value.name,
            email: value.email,
            password: value.password,
            role: value.role,
            phone: value.phone,
            department: value.department,
            bio: value.bio,
        }
    }
}

#[tracing::instrument(skip_all, fields(user = ?user, id = %account_id))]
pub async fn update(
    user: UserAccess,
    State(accounts): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    PathObjectId(account_id): PathObjectId,
    JsonBody(request): JsonBody<UpdateRequest>,
) -> Result<Json<UserResponse>, Error> {
    user.require_admin()?;
    request.validate()?;

    let account = update_user(&accounts, &argon, account_id, request.into()).await?;

    Ok(Json(account.into()))
}

#[tracing::instrument(skip_all, fields(user = ?user, id = %account_id))]
pub async fn delete(
    user: UserAccess,
    State(accounts): State<UserCollection>,
    PathObjectId(account_id): PathObjectId,
) -> Result<StatusCode, Error> {
    user.require_admin()?;

    accounts
        .delete_user(account_id)
        .await
        .tap_err(|_| tracing::debug!("tried deleting non existing account"))?;

    tracing::debug!("account deleted");

    Ok(StatusCode::NO_CONTENT)
}
