use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::slot;

#[derive(Debug, Clone)]
pub struct Appointment {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_at: OffsetDateTime,
    pub state: AppointmentState,
    pub created_at: OffsetDateTime,
}

/// Soft-delete state. `Active -> Canceled` is the only transition and it is
/// terminal; rows are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentState {
    Active,
    Canceled { canceled_at: OffsetDateTime },
}

impl AppointmentState {
    pub fn from_db(canceled_at: Option<OffsetDateTime>) -> Self {
        match canceled_at {
            Some(canceled_at) => Self::Canceled { canceled_at },
            None => Self::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn canceled_at(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Active => None,
            Self::Canceled { canceled_at } => Some(*canceled_at),
        }
    }
}

impl Appointment {
    pub fn is_past(&self, now: OffsetDateTime) -> bool {
        self.scheduled_at < now
    }

    /// Still active and strictly before the lead-time deadline.
    pub fn is_cancelable(&self, now: OffsetDateTime) -> bool {
        self.state.is_active() && now < slot::cancellation_deadline(self.scheduled_at)
    }
}
