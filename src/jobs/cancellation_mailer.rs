use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::slot::Locale;
use crate::infra::{mailer::MailSender, queue::QueueClient};

/// Everything the cancellation notice needs travels in the message; the
/// worker never reads the database after dequeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationJob {
    pub appointment_id: Uuid,
    pub provider_email: String,
    pub provider_name: String,
    pub requester_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
}

const POLL_WAIT_SECONDS: i32 = 10;
const IDLE_SLEEP_MS: u64 = 200;
const ERROR_BACKOFF_MS: u64 = 1000;

enum ProcessingOutcome {
    Completed,
    RetryLater,
}

pub async fn run(queue: QueueClient, mailer: MailSender, locale: Locale) -> Result<()> {
    info!(queue = queue.queue_name(), "cancellation mailer started");
    loop {
        match queue.receive_cancellation(POLL_WAIT_SECONDS).await {
            Ok(Some(message)) => {
                let outcome = match process_job(&mailer, &message.job, locale).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(
                            error = ?err,
                            appointment_id = %message.job.appointment_id,
                            "failed to send cancellation notice"
                        );
                        ProcessingOutcome::RetryLater
                    }
                };

                match outcome {
                    ProcessingOutcome::Completed => {
                        if let Err(err) = queue.delete_message(&message.receipt_handle).await {
                            warn!(error = ?err, "failed to delete queue message");
                        }
                    }
                    // the message stays on the queue and comes back after
                    // the visibility timeout
                    ProcessingOutcome::RetryLater => {}
                }
            }
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(IDLE_SLEEP_MS)).await;
            }
            Err(err) => {
                warn!(error = ?err, "queue receive failed, backing off");
                tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
            }
        }
    }
}

async fn process_job(
    mailer: &MailSender,
    job: &CancellationJob,
    locale: Locale,
) -> Result<ProcessingOutcome> {
    mailer
        .send_cancellation_notice(
            &job.appointment_id.to_string(),
            &job.provider_email,
            &job.provider_name,
            &job.requester_name,
            job.scheduled_at,
            locale,
        )
        .await?;

    info!(appointment_id = %job.appointment_id, "cancellation notice sent");
    Ok(ProcessingOutcome::Completed)
}
