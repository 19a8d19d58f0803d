//! OpenAPI documentation.

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::handlers::auth_handler::{LoginRequest, RegisterRequest};
use crate::handlers::health_handler::HealthResponse;
use crate::handlers::user_handler::RefreshTokenRequest;
use crate::response::MessageResponse;
use domain::{TokenPair, UserResponse};

/// API documentation struct.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::auth_handler::register,
        crate::handlers::auth_handler::login,
        crate::handlers::user_handler::get_current_user,
        crate::handlers::user_handler::refresh_token,
        crate::handlers::user_handler::logout,
        crate::handlers::health_handler::health_check,
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            RefreshTokenRequest,
            TokenPair,
            UserResponse,
            MessageResponse,
            HealthResponse,
        )
    ),
    modifiers(&SecurityAddon),
    servers((url = "/api/v1")),
    tags(
        (name = "Authentication", description = "Registration and login"),
        (name = "Users", description = "Session management for the signed-in user"),
        (name = "Health", description = "Liveness of the credential store"),
    )
)]
pub struct ApiDoc;

/// Security scheme modifier.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
