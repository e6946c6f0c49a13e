//! Booking and cancellation engine tests.
//!
//! Admission checks, the (provider, slot) uniqueness contract, lead-time
//! cancellation rules and the side effects of both operations.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

fn hours_from_now(hours: i64) -> String {
    (OffsetDateTime::now_utc() + Duration::hours(hours))
        .format(&Rfc3339)
        .unwrap()
}

// ===========================================================================
// Booking admission
// ===========================================================================

#[tokio::test]
async fn book_appointment_success() {
    let app = app().await;
    let provider = app.create_provider("barber_ana").await;
    let requester = app.create_user("client_rui").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(4) }),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.error_message());
    let body = resp.json();
    assert_eq!(body["requester_id"].as_str().unwrap(), requester.id.to_string());
    assert_eq!(body["provider_id"].as_str().unwrap(), provider.id.to_string());
    assert!(body["canceled_at"].is_null());
    assert_eq!(body["past"].as_bool(), Some(false));
    assert_eq!(body["cancelable"].as_bool(), Some(true));

    // slots are hour-granular: minutes and seconds are discarded
    let scheduled_at =
        OffsetDateTime::parse(body["scheduled_at"].as_str().unwrap(), &Rfc3339).unwrap();
    assert_eq!(scheduled_at.minute(), 0);
    assert_eq!(scheduled_at.second(), 0);
}

#[tokio::test]
async fn booking_notifies_the_provider() {
    let app = app().await;
    let provider = app.create_provider("barber_bia").await;
    let requester = app.create_user("client_ines").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(5) }),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app.get("/notifications", Some(&provider.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let items = resp.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);

    let content = items[0]["content"].as_str().unwrap();
    assert!(content.starts_with("Agendamento realizado para client_ines"));
    assert!(content.contains(" para dia "));
    assert!(items[0]["read_at"].is_null());
}

#[tokio::test]
async fn book_rejects_non_provider() {
    let app = app().await;
    let requester = app.create_user("client_leo").await;
    let not_a_provider = app.create_user("client_tom").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": not_a_provider.id.to_string(), "date": hours_from_now(4) }),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "a valid provider id is required");
}

#[tokio::test]
async fn book_rejects_unknown_provider() {
    let app = app().await;
    let requester = app.create_user("client_gil").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": Uuid::new_v4().to_string(), "date": hours_from_now(4) }),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "a valid provider id is required");
}

#[tokio::test]
async fn book_rejects_past_date() {
    let app = app().await;
    let provider = app.create_provider("barber_gui").await;
    let requester = app.create_user("client_eva").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(-2) }),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "appointment date must be in the future");
}

#[tokio::test]
async fn book_rejects_taken_slot() {
    let app = app().await;
    let provider = app.create_provider("barber_hugo").await;
    let first = app.create_user("client_nora").await;
    let second = app.create_user("client_otto").await;
    let date = hours_from_now(6);

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": date }),
            Some(&first.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": date }),
            Some(&second.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(
        resp.error_message(),
        "the provider already has an appointment on this slot"
    );
}

#[tokio::test]
async fn canceled_slot_can_be_rebooked() {
    let app = app().await;
    let provider = app.create_provider("barber_iva").await;
    let first = app.create_user("client_pia").await;
    let second = app.create_user("client_quim").await;
    let date = hours_from_now(8);

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": date }),
            Some(&first.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let appointment_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&first.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    // only active rows hold the slot
    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": date }),
            Some(&second.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.error_message());
}

#[tokio::test]
async fn book_rejects_self_booking() {
    let app = app().await;
    let provider = app.create_provider("barber_joel").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(4) }),
            Some(&provider.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.error_message(),
        "provider and requester have to be different"
    );
}

#[tokio::test]
async fn book_rejects_malformed_date() {
    let app = app().await;
    let provider = app.create_provider("barber_kai").await;
    let requester = app.create_user("client_rita").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": "next tuesday" }),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "date must be an RFC 3339 timestamp");
}

#[tokio::test]
async fn book_requires_authentication() {
    let app = app().await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": Uuid::new_v4().to_string(), "date": hours_from_now(4) }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn cancel_with_enough_notice_succeeds() {
    let app = app().await;
    let provider = app.create_provider("barber_lia").await;
    let requester = app.create_user("client_sam").await;

    // 3h out leaves more than the required 2h of notice
    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(3) }),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let appointment_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK, "{}", resp.error_message());
    let body = resp.json();
    assert!(body["canceled_at"].is_string());
    assert_eq!(body["cancelable"].as_bool(), Some(false));
}

#[tokio::test]
async fn cancel_inside_lead_time_window_fails() {
    let app = app().await;
    let provider = app.create_provider("barber_mia").await;
    let requester = app.create_user("client_tea").await;

    // the next hour's slot starts less than 2h from now
    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(1) }),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let appointment_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(
        resp.error_message(),
        "cancellation requires at least 2 hours notice"
    );
}

#[tokio::test]
async fn cancel_requires_ownership() {
    let app = app().await;
    let provider = app.create_provider("barber_noa").await;
    let owner = app.create_user("client_uma").await;
    let stranger = app.create_user("client_vera").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(5) }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let appointment_id = resp.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&stranger.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "appointment belongs to another user");
}

#[tokio::test]
async fn cancel_unknown_appointment() {
    let app = app().await;
    let requester = app.create_user("client_walt").await;

    let resp = app
        .delete(
            &format!("/appointments/{}", Uuid::new_v4()),
            Some(&requester.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "appointment not found");
}

#[tokio::test]
async fn cancel_enqueues_exactly_one_mail_job() {
    let app = app().await;
    let provider = app.create_provider("barber_omar").await;
    let requester = app.create_user("client_yara").await;

    let resp = app
        .post_json(
            "/appointments",
            json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(7) }),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let appointment_id =
        Uuid::parse_str(resp.json()["id"].as_str().unwrap()).unwrap();

    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let jobs = app.drain_cancellation_jobs().await;
    let mine: Vec<_> = jobs
        .iter()
        .filter(|job| job.appointment_id == appointment_id)
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].provider_email, provider.email);
    assert_eq!(mine[0].provider_name, "barber_omar");
    assert_eq!(mine[0].requester_name, "client_yara");

    // a second cancel fails deterministically and never re-enqueues
    let resp = app
        .delete(
            &format!("/appointments/{}", appointment_id),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "appointment is already canceled");

    let jobs = app.drain_cancellation_jobs().await;
    assert!(jobs.iter().all(|job| job.appointment_id != appointment_id));
}

// ===========================================================================
// Requester listing
// ===========================================================================

#[tokio::test]
async fn list_appointments_ascending_and_active_only() {
    let app = app().await;
    let provider = app.create_provider("barber_paulo").await;
    let requester = app.create_user("client_zoe").await;

    for hours in [9, 5, 12] {
        let resp = app
            .post_json(
                "/appointments",
                json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(hours) }),
                Some(&requester.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    // cancel the middle one; it must disappear from the listing
    let resp = app.get("/appointments", Some(&requester.access_token)).await;
    let items = resp.json()["items"].as_array().unwrap().clone();
    let canceled_id = items[1]["id"].as_str().unwrap().to_string();
    let resp = app
        .delete(
            &format!("/appointments/{}", canceled_id),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app.get("/appointments", Some(&requester.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item["id"] != canceled_id.as_str()));
    assert!(items
        .iter()
        .all(|item| item["provider_name"].as_str() == Some("barber_paulo")));

    let slots: Vec<OffsetDateTime> = items
        .iter()
        .map(|item| {
            OffsetDateTime::parse(item["scheduled_at"].as_str().unwrap(), &Rfc3339).unwrap()
        })
        .collect();
    assert!(slots[0] < slots[1]);
}

#[tokio::test]
async fn list_appointments_paginates_with_cursor() {
    let app = app().await;
    let provider = app.create_provider("barber_rosa").await;
    let requester = app.create_user("client_alba").await;

    for hours in [4, 5, 6] {
        let resp = app
            .post_json(
                "/appointments",
                json!({ "provider_id": provider.id.to_string(), "date": hours_from_now(hours) }),
                Some(&requester.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    let resp = app
        .get("/appointments?limit=2", Some(&requester.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    let cursor = body["next_cursor"].as_str().expect("cursor present").to_string();

    let resp = app
        .get(
            &format!("/appointments?limit=2&cursor={}", cursor),
            Some(&requester.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert!(body["next_cursor"].is_null());
}
