use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path},
    http::{request::Parts, Request},
    Json,
};
use bson::oid::ObjectId;
use password_hash::rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ObjectIdString(#[serde(with = "object_id_string")] pub ObjectId);

impl From<ObjectId> for ObjectIdString {
    fn from(value: ObjectId) -> Self {
        Self(value)
    }
}

impl From<ObjectIdString> for ObjectId {
    fn from(value: ObjectIdString) -> Self {
        value.0
    }
}

impl std::ops::Deref for ObjectIdString {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::cmp::PartialEq for ObjectIdString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl std::cmp::Eq for ObjectIdString {}

impl std::cmp::PartialEq<ObjectId> for ObjectIdString {
    fn eq(&self, other: &ObjectId) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for ObjectIdString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ObjectIdString> for bson::Bson {
    fn from(value: ObjectIdString) -> Self {
        value.0.into()
    }
}

mod object_id_string {
    use bson::oid::ObjectId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl From<bson::DateTime> for FormattedDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self(value.into())
    }
}

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathObjectId(pub ObjectId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathObjectId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state).await?;

        id.parse()
            .map(Self)
            .map_err(|_| Error::NoResource)
    }
}

/// JSON request body whose rejections are reported as [`Error::ValidationError`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<T, S, B> FromRequest<S, B> for JsonBody<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;

        Ok(Self(value))
    }
}

pub fn verify_password(argon: &Argon2, password: &str, hashed: &str) -> bool {
    let hashed = match PasswordHash::new(hashed) {
        Ok(hashed) => hashed,
        Err(_) => return false,
    };

    argon.verify_password(password.as_bytes(), &hashed).is_ok()
}

pub fn hash_password(argon: &Argon2, password: &str) -> Result<String, Error> {
    let salt = password_hash::SaltString::generate(&mut OsRng);

    argon
        .hash_password(password.as_bytes(), &salt)
        .map(|it| it.to_string())
        .map_err(Into::into)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub const OTP_DIGITS: usize = 6;

pub fn generate_otp_code() -> String {
    let code = OsRng.next_u32() % 10u32.pow(OTP_DIGITS as u32);

    format!("{:0width$}", code, width = OTP_DIGITS)
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::body::Body;

    use super::*;

    #[derive(Deserialize, Debug)]
    struct Credentials {
        email: String,
        #[allow(dead_code)]
        password: String,
    }

    fn json_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_json_body() {
        let JsonBody(credentials) = JsonBody::<Credentials>::from_request(
            json_request(r#"{"email":"a@test.com","password":"password"}"#),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(credentials.email, "a@test.com");

        let err = JsonBody::<Credentials>::from_request(json_request(r#"{"email":"a@test.com"}"#), &())
            .await
            .unwrap_err();
        assert_matches!(&err, Error::ValidationError(errors) if errors.field_errors().contains_key("body"));
        assert_eq!(err.to_string_variant(), "ValidationError");

        let err = JsonBody::<Credentials>::from_request(json_request("not json"), &())
            .await
            .unwrap_err();
        assert_matches!(err, Error::ValidationError(_));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Foo@Example.COM "), "foo@example.com");
        assert_eq!(normalize_email("bar@example.com"), "bar@example.com");
    }

    #[test]
    fn test_generate_otp_code() {
        for _ in 0..32 {
            let code = generate_otp_code();
            assert_eq!(code.len(), OTP_DIGITS);
            assert!(code.chars().all(|it| it.is_ascii_digit()));
        }
    }

    #[test]
    fn test_hash_password() {
        let argon = Argon2::default();

        let hashed = hash_password(&argon, "password").unwrap();

        assert_ne!(hashed, "password");
        assert!(verify_password(&argon, "password", &hashed));
        assert!(!verify_password(&argon, "wrongpassword", &hashed));
        assert!(!verify_password(&argon, "password", "not a phc string"));
    }

    #[test]
    fn test_object_id_string() {
        let id = ObjectId::new();

        let json = serde_json::to_string(&ObjectIdString(id)).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let parsed: ObjectIdString = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
