use argon2::Argon2;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    config::Config,
    error::{Error, VerificationFailure},
    util::{generate_otp_code, now, FormattedDateTime, JsonBody},
};

use super::user::{Otp, UserCollection, UserModel, UserResponse};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerificationIssued {
    pub expires_at: FormattedDateTime,
}

#[tracing::instrument(skip_all, fields(id = %user.id))]
pub async fn request(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    State(config): State<Config>,
    user: UserModel,
) -> Result<Json<VerificationIssued>, Error> {
    if user.is_verified {
        return Err(VerificationFailure::AlreadyVerified.into());
    }

    if let Some(pending) = &user.otp {
        if !pending.can_reissue_at(now()) {
            return Err(VerificationFailure::ResendTooSoon.into());
        }
    }

    let code = generate_otp_code();
    let expires_at = now() + config.otp_ttl;
    let otp = Otp::issue(&argon, &code, expires_at)?;

    users.set_verification(user.id, &otp).await?;

    tracing::debug!(email = %user.email, "verification code issued");
    // delivery is handled outside this service
    tracing::trace!(code = %code, "verification code");

    Ok(Json(VerificationIssued {
        expires_at: otp.expires_at.into(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfirmRequest {
    pub code: String,
}

#[tracing::instrument(skip_all, fields(id = %user.id))]
pub async fn confirm(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    user: UserModel,
    JsonBody(request): JsonBody<ConfirmRequest>,
) -> Result<Json<UserResponse>, Error> {
    if user.is_verified {
        return Err(VerificationFailure::AlreadyVerified.into());
    }

    if user.otp.is_none() {
        return Err(VerificationFailure::NotPending.into());
    }

    let Some(otp) = users.take_verification_attempt(user.id).await? else {
        users.clear_verification(user.id).await?;

        return Err(VerificationFailure::TooManyAttempts.into());
    };

    match otp.check(&argon, &request.code, now()) {
        Ok(()) => {}
        Err(failure @ (VerificationFailure::Expired | VerificationFailure::TooManyAttempts)) => {
            users.clear_verification(user.id).await?;

            return Err(Error::from(failure))
                .tap_err(|_| tracing::debug!("discarded verification code"));
        }
        Err(failure) => {
            return Err(Error::from(failure)).tap_err(|_| tracing::debug!("wrong verification code"));
        }
    }

    let user = users.mark_verified(user.id).await?;

    tracing::debug!("account verified");

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::State, Json};
    use time::Duration;

    use crate::{
        api::v1::{
            tests::bootstrap,
            user::{Otp, MAX_OTP_ATTEMPTS},
        },
        error::{Error, VerificationFailure},
        util::{now, JsonBody},
    };

    use super::ConfirmRequest;

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_request_then_confirm() {
        let bootstrap = bootstrap().await;

        let Json(issued) = super::request(
            bootstrap.user_collection(),
            bootstrap.argon(),
            State(bootstrap.app_state.config.clone()),
            bootstrap.user_model.clone(),
        )
        .await
        .unwrap();
        assert!(issued.expires_at.0 > now());

        let user = bootstrap.reload_user().await;
        let otp = user.otp.clone().expect("code should be pending");
        assert_eq!(bson::DateTime::from(issued.expires_at.0), otp.expires_at);

        // replace the random code with a known one
        let known = Otp::issue(&bootstrap.app_state.argon, "424242", now() + Duration::minutes(5))
            .unwrap();
        bootstrap
            .app_state
            .user_collection
            .set_verification(user.id, &known)
            .await
            .unwrap();

        let err = super::confirm(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.reload_user().await,
            JsonBody(ConfirmRequest {
                code: "000000".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Verification(VerificationFailure::InvalidCode));
        assert!(bootstrap.reload_user().await.otp.is_some());

        let Json(response) = super::confirm(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.reload_user().await,
            JsonBody(ConfirmRequest {
                code: "424242".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(response.is_verified);
        assert!(response.verification_expires_at.is_none());

        let user = bootstrap.reload_user().await;
        assert!(user.is_verified);
        assert!(user.otp.is_none());
        assert_eq!(user.created_at, bootstrap.user_model.created_at);

        let err = super::request(
            bootstrap.user_collection(),
            bootstrap.argon(),
            State(bootstrap.app_state.config.clone()),
            user,
        )
        .await
        .unwrap_err();
        assert_matches!(
            err,
            Error::Verification(VerificationFailure::AlreadyVerified)
        );
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_confirm_expired_code() {
        let bootstrap = bootstrap().await;

        let expired = Otp::issue(&bootstrap.app_state.argon, "424242", now() - Duration::seconds(1))
            .unwrap();
        bootstrap
            .app_state
            .user_collection
            .set_verification(bootstrap.user_id(), &expired)
            .await
            .unwrap();

        let err = super::confirm(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.reload_user().await,
            JsonBody(ConfirmRequest {
                code: "424242".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Verification(VerificationFailure::Expired));

        let user = bootstrap.reload_user().await;
        assert!(!user.is_verified);
        assert!(user.otp.is_none());
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_confirm_without_pending_code() {
        let bootstrap = bootstrap().await;

        let err = super::confirm(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.reload_user().await,
            JsonBody(ConfirmRequest {
                code: "424242".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Verification(VerificationFailure::NotPending));
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_wrong_codes_discard_pending_code() {
        let bootstrap = bootstrap().await;

        let known = Otp::issue(&bootstrap.app_state.argon, "424242", now() + Duration::minutes(5))
            .unwrap();
        bootstrap
            .app_state
            .user_collection
            .set_verification(bootstrap.user_id(), &known)
            .await
            .unwrap();

        for attempt in 1..=MAX_OTP_ATTEMPTS {
            let err = super::confirm(
                bootstrap.user_collection(),
                bootstrap.argon(),
                bootstrap.reload_user().await,
                JsonBody(ConfirmRequest {
                    code: "000000".to_string(),
                }),
            )
            .await
            .unwrap_err();

            if attempt < MAX_OTP_ATTEMPTS {
                assert_matches!(err, Error::Verification(VerificationFailure::InvalidCode));
                let pending = bootstrap.reload_user().await.otp.unwrap();
                assert_eq!(pending.attempts, attempt);
            } else {
                assert_matches!(
                    err,
                    Error::Verification(VerificationFailure::TooManyAttempts)
                );
            }
        }

        let user = bootstrap.reload_user().await;
        assert!(user.otp.is_none());

        let err = super::confirm(
            bootstrap.user_collection(),
            bootstrap.argon(),
            user,
            JsonBody(ConfirmRequest {
                code: "424242".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Verification(VerificationFailure::NotPending));
        assert!(!bootstrap.reload_user().await.is_verified);
    }

    #[tokio::test]
    #[ignore = "requires MONGODB_URI"]
    async fn test_request_is_rate_limited() {
        let bootstrap = bootstrap().await;

        let Json(issued) = super::request(
            bootstrap.user_collection(),
            bootstrap.argon(),
            State(bootstrap.app_state.config.clone()),
            bootstrap.reload_user().await,
        )
        .await
        .unwrap();
        assert!(issued.expires_at.0 > now());

        let err = super::request(
            bootstrap.user_collection(),
            bootstrap.argon(),
            State(bootstrap.app_state.config.clone()),
            bootstrap.reload_user().await,
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Verification(VerificationFailure::ResendTooSoon));
    }
}
