pub mod cancellation_mailer;
