use argon2::Argon2;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{error::Error, util::JsonBody};

use super::{
    auth::UserAccess,
    user::{update_user, UserCollection, UserModel, UserPatch, UserResponse},
};

pub async fn show(user: UserModel) -> Json<UserResponse> {
    Json(user.into())
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub bio: Option<String>,
}

impl From<ProfileUpdateRequest> for UserPatch {
    fn from(value: ProfileUpdateRequest) -> Self {
        Self {
            name: value.name,
            email: value.email,
            phone: value.phone,
            department: value.department,
            bio: value.bio,
            ..Default::default()
        }
    }
}

#[tracing::instrument(skip_all, fields(id = %user.id))]
pub async fn update(
    user: UserAccess,
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    JsonBody(request): JsonBody<ProfileUpdateRequest>,
) -> Result<Json<UserResponse>, Error> {
    let model = update_user(&users, &argon, user.id, request.into()).await?;

    Ok(Json(model.into()))
}
