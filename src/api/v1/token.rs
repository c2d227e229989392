use argon2::Argon2;
use bson::oid::ObjectId;
use jsonwebtoken::TokenData;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{
    config::JwtKeys,
    error::Error,
    mongo_ext::Collection,
    util::{hash_password, ObjectIdString},
};

use super::user::{UserModel, UserRole};

pub const ACCESS_TOKEN_TTL: Duration = Duration::minutes(10);
pub const REFRESH_TOKEN_TTL: Duration = Duration::weeks(1);

#[derive(Clone)]
pub struct JwtState {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,
}

impl JwtState {
    pub fn new(keys: &JwtKeys) -> Result<Self, Error> {
        let (algorithm, encoding_key, decoding_key) = match keys {
            JwtKeys::Rsa {
                private_pem,
                public_pem,
            } => (
                jsonwebtoken::Algorithm::RS256,
                jsonwebtoken::EncodingKey::from_rsa_pem(private_pem)?,
                jsonwebtoken::DecodingKey::from_rsa_pem(public_pem)?,
            ),
            JwtKeys::Hmac(secret) => (
                jsonwebtoken::Algorithm::HS256,
                jsonwebtoken::EncodingKey::from_secret(secret),
                jsonwebtoken::DecodingKey::from_secret(secret),
            ),
        };

        let header = jsonwebtoken::Header::new(algorithm);
        // expiry is checked by the claims so expired tokens still decode
        let mut validation = jsonwebtoken::Validation::new(algorithm);
        validation.validate_exp = false;

        Ok(Self {
            header,
            validation,

            encoding_key,
            decoding_key,
        })
    }
}

#[derive(Clone)]
pub struct RefreshTokenCollection(pub Collection<RefreshTokenModel>);

impl std::ops::Deref for RefreshTokenCollection {
    type Target = Collection<RefreshTokenModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshTokenClaims {
    pub sub: ObjectIdString,
    pub user_id: ObjectIdString,
    pub exp: i64,
}

impl RefreshTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshTokenModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub token: String,
    pub expired_at: bson::DateTime,
}

pub async fn create_refresh_token(
    jwt_state: &JwtState,
    argon: &Argon2<'_>,
    refresh_tokens: &RefreshTokenCollection,
    user: &UserModel,
) -> Result<String, Error> {
    let (model, token) = generate_refresh_token_model(jwt_state, argon, user)?;

    refresh_tokens.insert_one(model, None).await?;

    Ok(token)
}

pub fn generate_refresh_token_model(
    jwt_state: &JwtState,
    argon: &Argon2,
    user: &UserModel,
) -> Result<(RefreshTokenModel, String), Error> {
    let expired_at = current_timestamp() + REFRESH_TOKEN_TTL;

    generate_refresh_token_model_with_exp(jwt_state, argon, user, expired_at)
}

pub fn generate_refresh_token_model_with_exp(
    jwt_state: &JwtState,
    argon: &Argon2,
    user: &UserModel,
    expired_at: OffsetDateTime,
) -> Result<(RefreshTokenModel, String), Error> {
    let id = ObjectId::new();
    let token = generate_refresh_token_string(jwt_state, id, user.id, expired_at.unix_timestamp())?;

    Ok((
        RefreshTokenModel {
            id,
            user_id: user.id,
            token: hash_password(argon, &token)?,
            expired_at: expired_at.into(),
        },
        token,
    ))
}

pub fn generate_refresh_token_string(
    jwt_state: &JwtState,
    id: ObjectId,
    user_id: ObjectId,
    exp: i64,
) -> Result<String, Error> {
    let claims = RefreshTokenClaims {
        sub: id.into(),
        user_id: user_id.into(),
        exp,
    };

    jsonwebtoken::encode(&jwt_state.header, &claims, &jwt_state.encoding_key).map_err(Into::into)
}

pub fn decode_refresh_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<RefreshTokenClaims>, Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation).map_err(Into::into)
}

#[derive(Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: ObjectIdString,
    pub user_role: UserRole,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

pub struct GenerateAccessTokenResponse {
    pub expired_at: OffsetDateTime,
    pub token: String,
}

pub fn generate_access_token(
    jwt_state: &JwtState,
    user: &UserModel,
) -> Result<GenerateAccessTokenResponse, Error> {
    let expired_at = current_timestamp() + ACCESS_TOKEN_TTL;
    let token = generate_access_token_with_exp(jwt_state, user, expired_at.unix_timestamp())?;

    Ok(GenerateAccessTokenResponse { expired_at, token })
}

pub fn generate_access_token_with_exp(
    jwt_state: &JwtState,
    user: &UserModel,
    exp: i64,
) -> Result<String, Error> {
    jsonwebtoken::encode(
        &jwt_state.header,
        &AccessTokenClaims {
            sub: user.id.into(),
            user_role: user.role,
            exp,
        },
        &jwt_state.encoding_key,
    )
    .map_err(Into::into)
}

pub fn decode_access_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<AccessTokenClaims>, Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation).map_err(Into::into)
}
