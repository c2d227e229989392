use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, Cookie, Header, SetCookie},
    http::{request::Parts, HeaderValue, StatusCode},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::{Error, UnauthorizedType},
    util::{verify_password, FormattedDateTime, JsonBody},
};

use super::{
    token::{
        create_refresh_token, decode_access_token, decode_refresh_token, generate_access_token,
        JwtState, RefreshTokenClaims, RefreshTokenCollection,
    },
    user::{create_user, CreateUserRequest, UserCollection, UserModel, UserResponse, UserRole},
};

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

#[derive(Debug)]
pub struct UserAccess {
    pub id: ObjectId,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            role: token.claims.user_role,
        })
    }

    pub fn require_admin(&self) -> Result<(), Error> {
        match self.role {
            UserRole::Admin => Ok(()),
            UserRole::User => Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!(id = %self.id, "admin access denied")),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

#[derive(Debug)]
pub struct RefreshToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshToken
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("cookie not found"))?;

        let refresh_token = cookie
            .get(REFRESH_TOKEN_COOKIE)
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("token not found"))?;

        Ok(Self(refresh_token.to_string()))
    }
}

#[derive(Debug)]
pub struct RefreshClaim(pub RefreshTokenClaims, pub String);

impl RefreshClaim {
    pub fn from_token(jwt_state: &JwtState, refresh_token: String) -> Result<Self, Error> {
        let token = decode_refresh_token(jwt_state, &refresh_token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

        Ok(Self(token.claims, refresh_token))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshClaim
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RefreshToken(refresh_token) = parts.extract::<RefreshToken>().await?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, refresh_token)
    }
}

impl UserModel {
    pub async fn from_id(id: ObjectId, users: &UserCollection) -> Result<Self, Error> {
        users
            .find_one_by_id(id)
            .await?
            .ok_or(Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserModel
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        Self::from_id(access.id, &users).await
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    pub name: String,

    pub email: String,

    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,
}

#[tracing::instrument(skip_all)]
pub async fn register(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    request.validate()?;

    let model = create_user(
        &users,
        &argon,
        CreateUserRequest {
            name: request.name,
            email: request.email,
            password: request.password,
            role: UserRole::User,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(model.into())))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

fn refresh_token_cookie(refresh_token: &str) -> Result<TypedHeader<SetCookie>, Error> {
    let value = HeaderValue::from_str(&format!(
        "{REFRESH_TOKEN_COOKIE}={refresh_token}; HttpOnly; Path=/"
    ))
    .map_err(|_| Error::CustomStr(StatusCode::INTERNAL_SERVER_ERROR, "invalid cookie value"))?;

    SetCookie::decode(&mut [value].iter())
        .map(TypedHeader)
        .map_err(|_| Error::CustomStr(StatusCode::INTERNAL_SERVER_ERROR, "invalid cookie value"))
}

#[tracing::instrument(skip_all)]
pub async fn login(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<LoginResponse>), Error> {
    let user = users.find_by_email(&request.email).await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(UnauthorizedType::WrongEmailOrPassword))
                .tap_err(|_| tracing::debug!("failed login attempt"))
        }
    };

    let refresh_token = create_refresh_token(&jwt_state, &argon, &refresh_tokens, &user).await?;
    let access_token = generate_access_token(&jwt_state, &user)?;

    tracing::debug!(id = %user.id, "logged in");

    Ok((
        refresh_token_cookie(&refresh_token)?,
        Json(LoginResponse {
            refresh_token,
            access_token: access_token.token,
            expired_at: access_token.expired_at.into(),
        }),
    ))
}

pub async fn logout(
    State(refresh_tokens): State<RefreshTokenCollection>,
    RefreshClaim(claim, _): RefreshClaim,
) -> Result<(), Error> {
    refresh_tokens
        .find_one_by_id(claim.sub.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    refresh_tokens.delete_one_by_id(claim.sub.0).await?;

    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

pub async fn refresh_access_token(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<Json<RefreshAccessTokenResponse>, Error> {
    let model = refresh_tokens
        .find_one_by_id(claim.sub.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    if claim.is_expired() || !verify_password(&argon, &refresh_token, &model.token) {
        refresh_tokens.delete_one_by_id(claim.sub.0).await?;

        return Err(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("revoked refresh token {}", claim.sub));
    }

    let user = users
        .find_one_by_id(claim.user_id.0)
        .await?
        .ok_or(Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(RefreshAccessTokenResponse {
        access_token: access_token.token,
        expired_at: access_token.expired_at.into(),
    }))
}
