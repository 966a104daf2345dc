//! Registration and login endpoints

use crate::api::auth::schemas::{AuthRequest, AuthResponse, Credentials};
use crate::core::error::ChatError;
use crate::core::traits::AuthService;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use di::Ref;
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", post(login_or_register))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

/// Single entry point used by the login form: `isRegister` picks the action.
async fn login_or_register(
    Inject(auth_service): Inject<dyn AuthService>,
    Json(request): Json<AuthRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    let credentials = Credentials {
        email: request.email,
        password: request.password,
    };

    if request.is_register {
        do_register(auth_service, credentials).await
    } else {
        do_login(auth_service, credentials).await
    }
}

async fn register(
    Inject(auth_service): Inject<dyn AuthService>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    do_register(auth_service, credentials).await
}

async fn login(
    Inject(auth_service): Inject<dyn AuthService>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    do_login(auth_service, credentials).await
}

async fn do_register(
    auth_service: Ref<dyn AuthService>,
    credentials: Credentials,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    let user_id = auth_service
        .register(&credentials.email, &credentials.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            msg: "Usuario registrado correctamente. Ahora inicia sesión.".to_owned(),
            user_id,
            access_token: None,
            token_type: None,
        }),
    ))
}

async fn do_login(
    auth_service: Ref<dyn AuthService>,
    credentials: Credentials,
) -> Result<(StatusCode, Json<AuthResponse>), ChatError> {
    let session = auth_service
        .login(&credentials.email, &credentials.password)
        .await?;

    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            msg: format!("Bienvenido {}", credentials.email.trim()),
            user_id: session.user_id,
            access_token: Some(session.access_token),
            token_type: Some("bearer"),
        }),
    ))
}

pub mod schemas {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct Credentials {
        pub email: String,
        pub password: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct AuthRequest {
        pub email: String,
        pub password: String,
        #[serde(default)]
        pub is_register: bool,
    }

    #[derive(Serialize, Debug)]
    pub struct AuthResponse {
        pub msg: String,
        pub user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub access_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub token_type: Option<&'static str>,
    }
}
