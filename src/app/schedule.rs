use sqlx::Row;
use time::Date;
use uuid::Uuid;

use crate::app::appointments::{appointment_from_row, AppointmentError};
use crate::app::providers::ProviderDirectory;
use crate::domain::appointment::Appointment;
use crate::domain::slot;
use crate::infra::db::Db;

/// One agenda row: the appointment plus who booked it.
#[derive(Debug, Clone)]
pub struct AgendaEntry {
    pub appointment: Appointment,
    pub requester_name: String,
}

#[derive(Clone)]
pub struct ScheduleService {
    db: Db,
    providers: ProviderDirectory,
}

impl ScheduleService {
    pub fn new(db: Db) -> Self {
        let providers = ProviderDirectory::new(db.clone());
        Self { db, providers }
    }

    /// A provider's full agenda for one calendar day (UTC), canceled rows
    /// included, ascending by slot.
    pub async fn day_agenda(
        &self,
        provider_id: Uuid,
        date: Date,
    ) -> Result<Vec<AgendaEntry>, AppointmentError> {
        if !self.providers.is_provider(provider_id).await? {
            return Err(AppointmentError::InvalidProvider);
        }

        let (start, end) = slot::day_bounds(date);
        let rows = sqlx::query(
            "SELECT a.id, a.requester_id, a.provider_id, a.scheduled_at, a.canceled_at, \
                    a.created_at, r.name AS requester_name \
             FROM appointments a \
             JOIN users r ON r.id = a.requester_id \
             WHERE a.provider_id = $1 \
               AND a.scheduled_at >= $2 \
               AND a.scheduled_at <= $3 \
             ORDER BY a.scheduled_at ASC, a.id ASC",
        )
        .bind(provider_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| AgendaEntry {
                appointment: appointment_from_row(row),
                requester_name: row.get("requester_name"),
            })
            .collect())
    }
}
