mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::AuthUser;
pub use error::AppError;

use axum::Router;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::users())
        .merge(routes::auth())
        .merge(routes::appointments())
        .merge(routes::schedule())
        .merge(routes::notifications())
        .with_state(state)
}
