use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::app::appointments::{AppointmentError, AppointmentService};
use crate::app::auth::AuthService;
use crate::app::notifications::NotificationService;
use crate::app::schedule::ScheduleService;
use crate::domain::appointment::Appointment;
use crate::domain::notification::Notification;
use crate::domain::user::User;
use crate::http::{AppError, AuthUser};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.db.ping().await.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Users & sessions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_provider: bool,
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<User>, AppError> {
    const MAX_PASSWORD_LEN: usize = 128;

    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.password.len() < 6 {
        return Err(AppError::bad_request(
            "password must be at least 6 characters",
        ));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request(
            "password must be at most 128 characters",
        ));
    }

    let service = auth_service(&state);
    let user = service
        .signup(
            payload.name,
            payload.email,
            payload.password,
            payload.is_provider,
        )
        .await
        .map_err(|err| {
            if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() {
                if let Some(db_err) = sqlx_err.as_database_error() {
                    if db_err.code().as_deref() == Some("23505")
                        && db_err.constraint().unwrap_or_default().contains("users_email_key")
                    {
                        return AppError::conflict("email already in use");
                    }
                }
            }
            tracing::error!(error = ?err, "failed to create user");
            AppError::internal("failed to create user")
        })?;

    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.email.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }

    let service = auth_service(&state);
    let tokens = service
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    // unknown email and wrong password intentionally collapse into one answer
    let tokens = tokens.ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    Ok(Json(AuthTokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_expires_at: tokens.access_expires_at,
        refresh_expires_at: tokens.refresh_expires_at,
    }))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let service = auth_service(&state);
    let tokens = service
        .refresh(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to refresh token");
            AppError::internal("failed to refresh token")
        })?;

    let tokens = tokens.ok_or_else(|| AppError::unauthorized("invalid refresh token"))?;

    Ok(Json(AuthTokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_expires_at: tokens.access_expires_at,
        refresh_expires_at: tokens.refresh_expires_at,
    }))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    let service = auth_service(&state);
    let revoked = service
        .revoke_refresh_token(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to revoke token");
            AppError::internal("failed to revoke token")
        })?;

    if revoked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::unauthorized("invalid refresh token"))
    }
}

pub async fn get_current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let service = auth_service(&state);
    let user = service
        .get_current_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to load current user");
            AppError::internal("failed to load current user")
        })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub canceled_at: Option<OffsetDateTime>,
    pub past: bool,
    pub cancelable: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Display names resolved at response time, depending on who is asking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_name: Option<String>,
}

impl AppointmentResponse {
    fn new(appointment: &Appointment, now: OffsetDateTime) -> Self {
        Self {
            id: appointment.id,
            requester_id: appointment.requester_id,
            provider_id: appointment.provider_id,
            scheduled_at: appointment.scheduled_at,
            canceled_at: appointment.state.canceled_at(),
            past: appointment.is_past(now),
            cancelable: appointment.is_cancelable(now),
            created_at: appointment.created_at,
            provider_name: None,
            requester_name: None,
        }
    }
}

fn map_appointment_error(context: &'static str) -> impl Fn(AppointmentError) -> AppError {
    move |err| {
        let message = err.to_string();
        match err {
            AppointmentError::Db(err) => {
                tracing::error!(error = ?err, "{}", context);
                AppError::internal(context)
            }
            AppointmentError::NotFound => AppError::not_found(message),
            AppointmentError::NotOwner => AppError::forbidden(message),
            AppointmentError::SlotTaken
            | AppointmentError::AlreadyCanceled
            | AppointmentError::TooLateToCancel => AppError::conflict(message),
            AppointmentError::InvalidProvider
            | AppointmentError::PastDate
            | AppointmentError::SelfBooking => AppError::bad_request(message),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateAppointmentRequest {
    pub provider_id: Uuid,
    pub date: String,
}

pub async fn create_appointment(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let requested_at = OffsetDateTime::parse(&payload.date, &Rfc3339)
        .map_err(|_| AppError::bad_request("date must be an RFC 3339 timestamp"))?;

    let service = AppointmentService::new(state.db.clone(), state.queue.clone(), state.locale);
    let appointment = service
        .book(auth.user_id, payload.provider_id, requested_at)
        .await
        .map_err(map_appointment_error("failed to create appointment"))?;

    let now = OffsetDateTime::now_utc();
    Ok(Json(AppointmentResponse::new(&appointment, now)))
}

pub async fn list_appointments(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<AppointmentResponse>>, AppError> {
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = AppointmentService::new(state.db.clone(), state.queue.clone(), state.locale);
    let mut booked = service
        .list_for_requester(auth.user_id, cursor, limit + 1)
        .await
        .map_err(map_appointment_error("failed to list appointments"))?;

    let next_cursor = if booked.len() > limit as usize {
        booked.pop().map(|last| {
            (last.appointment.scheduled_at, last.appointment.id)
        })
    } else {
        None
    };

    let now = OffsetDateTime::now_utc();
    let items = booked
        .into_iter()
        .map(|entry| {
            let mut response = AppointmentResponse::new(&entry.appointment, now);
            response.provider_name = Some(entry.provider_name);
            response
        })
        .collect();

    Ok(Json(ListResponse {
        items,
        next_cursor: encode_cursor(next_cursor),
    }))
}

pub async fn cancel_appointment(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let service = AppointmentService::new(state.db.clone(), state.queue.clone(), state.locale);
    let appointment = service
        .cancel(auth.user_id, id)
        .await
        .map_err(map_appointment_error("failed to cancel appointment"))?;

    let now = OffsetDateTime::now_utc();
    Ok(Json(AppointmentResponse::new(&appointment, now)))
}

// ---------------------------------------------------------------------------
// Provider schedule
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ScheduleQuery {
    pub date: String,
}

pub async fn provider_schedule(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Vec<AppointmentResponse>>, AppError> {
    let format = format_description!("[year]-[month]-[day]");
    let date = Date::parse(&query.date, &format)
        .map_err(|_| AppError::bad_request("date must be YYYY-MM-DD"))?;

    let service = ScheduleService::new(state.db.clone());
    let agenda = service
        .day_agenda(auth.user_id, date)
        .await
        .map_err(map_appointment_error("failed to load schedule"))?;

    let now = OffsetDateTime::now_utc();
    let items = agenda
        .into_iter()
        .map(|entry| {
            let mut response = AppointmentResponse::new(&entry.appointment, now);
            response.requester_name = Some(entry.requester_name);
            response
        })
        .collect();

    Ok(Json(items))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Notification>>, AppError> {
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = NotificationService::new(state.db.clone());
    let mut notifications = service
        .list(auth.user_id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list notifications");
            AppError::internal("failed to list notifications")
        })?;

    let next_cursor = if notifications.len() > limit as usize {
        notifications.pop().map(|last| (last.created_at, last.id))
    } else {
        None
    };

    Ok(Json(ListResponse {
        items: notifications,
        next_cursor: encode_cursor(next_cursor),
    }))
}

pub async fn mark_notification_read(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = NotificationService::new(state.db.clone());
    let updated = service.mark_read(id, auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to mark notification read");
        AppError::internal("failed to mark notification read")
    })?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("notification not found"))
    }
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.paseto_refresh_key,
        state.access_ttl_minutes,
        state.refresh_ttl_days,
    )
}
