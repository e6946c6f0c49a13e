use sqlx::postgres::PgRow;
use sqlx::Row;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::app::notifications::NotificationService;
use crate::app::providers::ProviderDirectory;
use crate::domain::appointment::{Appointment, AppointmentState};
use crate::domain::slot::{self, Locale};
use crate::infra::db::Db;
use crate::infra::queue::QueueClient;
use crate::jobs::cancellation_mailer::CancellationJob;

/// Caller-recoverable rejections of a booking, cancellation or agenda
/// request. `Db` carries transient infrastructure failures and is the only
/// variant that is not a domain decision.
#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("a valid provider id is required")]
    InvalidProvider,
    #[error("appointment date must be in the future")]
    PastDate,
    #[error("the provider already has an appointment on this slot")]
    SlotTaken,
    #[error("provider and requester have to be different")]
    SelfBooking,
    #[error("appointment not found")]
    NotFound,
    #[error("appointment belongs to another user")]
    NotOwner,
    #[error("appointment is already canceled")]
    AlreadyCanceled,
    #[error("cancellation requires at least 2 hours notice")]
    TooLateToCancel,
    #[error("database error")]
    Db(#[from] sqlx::Error),
}

/// An appointment as the requester sees it, with the provider's display name
/// resolved.
#[derive(Debug, Clone)]
pub struct RequesterAppointment {
    pub appointment: Appointment,
    pub provider_name: String,
}

#[derive(Clone)]
pub struct AppointmentService {
    db: Db,
    queue: QueueClient,
    providers: ProviderDirectory,
    notifications: NotificationService,
    locale: Locale,
}

impl AppointmentService {
    pub fn new(db: Db, queue: QueueClient, locale: Locale) -> Self {
        let providers = ProviderDirectory::new(db.clone());
        let notifications = NotificationService::new(db.clone());
        Self {
            db,
            queue,
            providers,
            notifications,
            locale,
        }
    }

    /// Admit a booking for the hour slot containing `requested_at`.
    ///
    /// Checks run in a fixed order and the first violation wins. The active
    /// (provider, slot) pre-read only orders the error; the admission itself
    /// is decided by the partial unique index, so the loser of a concurrent
    /// race still surfaces as `SlotTaken`.
    pub async fn book(
        &self,
        requester_id: Uuid,
        provider_id: Uuid,
        requested_at: OffsetDateTime,
    ) -> Result<Appointment, AppointmentError> {
        self.providers
            .find_provider(provider_id)
            .await?
            .ok_or(AppointmentError::InvalidProvider)?;

        let slot_start = slot::truncate_to_hour(requested_at);
        let now = OffsetDateTime::now_utc();
        if slot_start < now {
            return Err(AppointmentError::PastDate);
        }

        let taken: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM appointments \
             WHERE provider_id = $1 AND scheduled_at = $2 AND canceled_at IS NULL",
        )
        .bind(provider_id)
        .bind(slot_start)
        .fetch_optional(self.db.pool())
        .await?;
        if taken.is_some() {
            return Err(AppointmentError::SlotTaken);
        }

        if provider_id == requester_id {
            return Err(AppointmentError::SelfBooking);
        }

        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO appointments (id, requester_id, provider_id, scheduled_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, requester_id, provider_id, scheduled_at, canceled_at, created_at",
        )
        .bind(id)
        .bind(requester_id)
        .bind(provider_id)
        .bind(slot_start)
        .fetch_one(self.db.pool())
        .await
        .map_err(|err| {
            if is_slot_conflict(&err) {
                AppointmentError::SlotTaken
            } else {
                AppointmentError::Db(err)
            }
        })?;
        let appointment = appointment_from_row(&row);

        // The booking is the durable fact of record; a failed announcement
        // is logged and retried out of band, never rolled into the result.
        if let Err(err) = self.announce_booking(provider_id, requester_id, slot_start).await {
            warn!(
                error = ?err,
                appointment_id = %appointment.id,
                "failed to append booking notification"
            );
        }

        Ok(appointment)
    }

    async fn announce_booking(
        &self,
        provider_id: Uuid,
        requester_id: Uuid,
        slot_start: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let requester_name = self
            .providers
            .display_name(requester_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("requester {} not found", requester_id))?;

        let formatted = slot::format_for_display(slot_start, self.locale);
        let content = match self.locale {
            Locale::Pt => format!(
                "Agendamento realizado para {} para {}",
                requester_name, formatted
            ),
            Locale::En => format!(
                "Appointment scheduled for {} for {}",
                requester_name, formatted
            ),
        };

        self.notifications.append(provider_id, &content).await?;
        Ok(())
    }

    /// Cancel an appointment the requester owns, given at least 2 hours of
    /// notice. Load, checks and the soft-delete run in one transaction under
    /// `FOR UPDATE`, so a racing second cancel deterministically sees
    /// `AlreadyCanceled`. The mail job is enqueued only after commit.
    pub async fn cancel(
        &self,
        requester_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "SELECT a.id, a.requester_id, a.provider_id, a.scheduled_at, a.canceled_at, \
                    a.created_at, \
                    p.name AS provider_name, p.email AS provider_email, \
                    r.name AS requester_name \
             FROM appointments a \
             JOIN users p ON p.id = a.provider_id \
             JOIN users r ON r.id = a.requester_id \
             WHERE a.id = $1 \
             FOR UPDATE OF a",
        )
        .bind(appointment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(AppointmentError::NotFound);
        };

        let appointment = appointment_from_row(&row);
        if appointment.requester_id != requester_id {
            tx.rollback().await?;
            return Err(AppointmentError::NotOwner);
        }
        if !appointment.state.is_active() {
            tx.rollback().await?;
            return Err(AppointmentError::AlreadyCanceled);
        }

        let now = OffsetDateTime::now_utc();
        if now >= slot::cancellation_deadline(appointment.scheduled_at) {
            tx.rollback().await?;
            return Err(AppointmentError::TooLateToCancel);
        }

        let job = CancellationJob {
            appointment_id,
            provider_email: row.get("provider_email"),
            provider_name: row.get("provider_name"),
            requester_name: row.get("requester_name"),
            scheduled_at: appointment.scheduled_at,
        };

        let row = sqlx::query(
            "UPDATE appointments SET canceled_at = $2 \
             WHERE id = $1 \
             RETURNING id, requester_id, provider_id, scheduled_at, canceled_at, created_at",
        )
        .bind(appointment_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let canceled = appointment_from_row(&row);

        tx.commit().await?;

        // The cancellation is durable at this point. A queue outage only
        // delays the notice, so the failure is logged, not surfaced.
        if let Err(err) = self.queue.enqueue_cancellation(&job).await {
            warn!(
                error = ?err,
                appointment_id = %appointment_id,
                "failed to enqueue cancellation mail job"
            );
        }

        Ok(canceled)
    }

    /// The requester's upcoming active appointments, ascending by slot.
    pub async fn list_for_requester(
        &self,
        requester_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RequesterAppointment>, AppointmentError> {
        let rows = match cursor {
            Some((scheduled_at, appointment_id)) => {
                sqlx::query(
                    "SELECT a.id, a.requester_id, a.provider_id, a.scheduled_at, a.canceled_at, \
                            a.created_at, p.name AS provider_name \
                     FROM appointments a \
                     JOIN users p ON p.id = a.provider_id \
                     WHERE a.requester_id = $1 \
                       AND a.canceled_at IS NULL \
                       AND (a.scheduled_at > $2 OR (a.scheduled_at = $2 AND a.id > $3)) \
                     ORDER BY a.scheduled_at ASC, a.id ASC \
                     LIMIT $4",
                )
                .bind(requester_id)
                .bind(scheduled_at)
                .bind(appointment_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT a.id, a.requester_id, a.provider_id, a.scheduled_at, a.canceled_at, \
                            a.created_at, p.name AS provider_name \
                     FROM appointments a \
                     JOIN users p ON p.id = a.provider_id \
                     WHERE a.requester_id = $1 \
                       AND a.canceled_at IS NULL \
                     ORDER BY a.scheduled_at ASC, a.id ASC \
                     LIMIT $2",
                )
                .bind(requester_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| RequesterAppointment {
                appointment: appointment_from_row(row),
                provider_name: row.get("provider_name"),
            })
            .collect())
    }
}

pub(crate) fn appointment_from_row(row: &PgRow) -> Appointment {
    let canceled_at: Option<OffsetDateTime> = row.get("canceled_at");
    Appointment {
        id: row.get("id"),
        requester_id: row.get("requester_id"),
        provider_id: row.get("provider_id"),
        scheduled_at: row.get("scheduled_at"),
        state: AppointmentState::from_db(canceled_at),
        created_at: row.get("created_at"),
    }
}

fn is_slot_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some("appointments_provider_slot_active_key")
        })
        .unwrap_or(false)
}
