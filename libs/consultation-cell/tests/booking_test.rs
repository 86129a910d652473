use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consultation_cell::models::{BookConsultationRequest, ConsultationError, ConsultationStatus};
use consultation_cell::services::booking::ConsultationBookingService;
use shared_utils::test_utils::{MockStoreResponses, TestActor, TestConfig};

fn booking_service(mock_server: &MockServer) -> ConsultationBookingService {
    let config = TestConfig::with_base_url(&mock_server.uri()).to_app_config();
    ConsultationBookingService::new(&config)
}

fn future_date() -> String {
    (Utc::now() + Duration::days(30))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

fn book_request(doctor_id: Uuid, date: &str, slots: &str) -> BookConsultationRequest {
    BookConsultationRequest {
        doctor_id,
        date: date.to_string(),
        slots: slots.to_string(),
        discount_code: None,
        symptoms: Some("Recurring headaches".to_string()),
        medical_note: None,
    }
}

// Doctor lookup used for pricing
async fn setup_doctor_mock(mock_server: &MockServer, doctor_id: Uuid, fee_per_slot: i64) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::doctor_row(doctor_id, fee_per_slot, 0)),
        )
        .mount(mock_server)
        .await;
}

// Uncontended advisory lock: insert succeeds, release succeeds
async fn setup_lock_mocks(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "booking_lock" }])),
        )
        .mount(mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .mount(mock_server)
        .await;
}

async fn setup_schedule_mock(mock_server: &MockServer, doctor_id: Uuid, date: &str, slots: Vec<u16>) {
    Mock::given(method("GET"))
        .and(path(format!("/schedule/schedules/{}", doctor_id)))
        .and(query_param("date", date))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available": true,
            "slots": slots
        })))
        .mount(mock_server)
        .await;
}

// Consultations already holding slots on the requested day
async fn setup_day_mock(mock_server: &MockServer, doctor_id: Uuid, date: &str, rows: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("date", format!("eq.{}", date)))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(mock_server)
        .await;
}

// Serves both the patient profile lookup and the wallet balance read
async fn setup_patient_mock(mock_server: &MockServer, patient_id: Uuid, balance: i64) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient_id, balance)),
        )
        .mount(mock_server)
        .await;
}

// Best-effort reservation event; the booking never waits for it
async fn setup_reservation_mock(mock_server: &MockServer, doctor_id: Uuid) {
    Mock::given(method("POST"))
        .and(path(format!("/schedule/schedules/{}/reservations", doctor_id)))
        .respond_with(ResponseTemplate::new(200))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_booking_creates_a_pending_consultation() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_reservation_mock(&mock_server, doctor_id).await;

    // Conditional debit of 2 x 100_000 against the balance read above
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(query_param("wallet_balance", "eq.500000"))
        .and(body_json(json!({ "wallet_balance": 300_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockStoreResponses::empty()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::consultation_row(
                Uuid::new_v4(),
                patient.id,
                doctor_id,
                &date,
                "28-29",
                200_000,
                "pending",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let booked = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await
        .unwrap();

    assert_eq!(booked.status, ConsultationStatus::Pending);
    assert_eq!(booked.price, 200_000);
    assert_eq!(booked.slots, vec![28, 29]);
}

#[tokio::test]
async fn test_booking_rejects_bad_dates() {
    let config = TestConfig::default().to_app_config();
    let service = ConsultationBookingService::new(&config);
    let patient = TestActor::patient().to_actor();
    let doctor_id = Uuid::new_v4();

    let result = service
        .book(&patient, book_request(doctor_id, "not-a-date", "10"))
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidDate(_)));

    let result = service
        .book(&patient, book_request(doctor_id, "14/09/2026", "10"))
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidDate(_)));

    let result = service
        .book(&patient, book_request(doctor_id, "2020-02-02", "10"))
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidDate(msg)) if msg.contains("past"));
}

#[tokio::test]
async fn test_booking_rejects_bad_slots() {
    let config = TestConfig::default().to_app_config();
    let service = ConsultationBookingService::new(&config);
    let patient = TestActor::patient().to_actor();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    let result = service
        .book(&patient, book_request(doctor_id, &date, "a-b"))
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidSlots(_)));

    let result = service
        .book(&patient, book_request(doctor_id, &date, ""))
        .await;
    assert_matches!(result, Err(ConsultationError::ValidationError(_)));

    // Slot 50 does not exist on a 48-slot day
    let result = service
        .book(&patient, book_request(doctor_id, &date, "46-50"))
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidSlots(_)));
}

#[tokio::test]
async fn test_booking_fails_when_doctor_is_unknown() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(
            &patient.to_actor(),
            book_request(doctor_id, &future_date(), "10"),
        )
        .await;

    assert_matches!(result, Err(ConsultationError::DoctorNotFound));
}

#[tokio::test]
async fn test_booking_requires_a_published_schedule() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_lock_mocks(&mock_server).await;

    Mock::given(method("GET"))
        .and(path(format!("/schedule/schedules/{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available": false,
            "slots": []
        })))
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "10"))
        .await;

    assert_matches!(result, Err(ConsultationError::ScheduleNotPublished));
}

#[tokio::test]
async fn test_booking_refuses_taken_slots() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;

    // Slot 29 already belongs to a confirmed consultation
    setup_day_mock(
        &mock_server,
        doctor_id,
        &date,
        json!([MockStoreResponses::consultation_row(
            Uuid::new_v4(),
            Uuid::new_v4(),
            doctor_id,
            &date,
            "29-30",
            200_000,
            "confirmed",
        )]),
    )
    .await;

    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    // The wallet must stay untouched when the check fails
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::SlotUnavailable));
}

#[tokio::test]
async fn test_booking_refuses_overdrafts() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 100_000).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::InsufficientFunds));
}

#[tokio::test]
async fn test_booking_applies_a_discount() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_reservation_mock(&mock_server, doctor_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/discounts"))
        .and(query_param("code", "eq.WELCOME10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::discount_row("WELCOME10", "percent", 10, 24)),
        )
        .mount(&mock_server)
        .await;

    // 200_000 minus 10 percent: the debit is the discounted price
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 320_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 320_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::consultation_row(
                Uuid::new_v4(),
                patient.id,
                doctor_id,
                &date,
                "28-29",
                180_000,
                "pending",
            )
        ])))
        .mount(&mock_server)
        .await;

    let mut request = book_request(doctor_id, &date, "28-29");
    request.discount_code = Some("WELCOME10".to_string());

    let service = booking_service(&mock_server);
    let booked = service.book(&patient.to_actor(), request).await.unwrap();

    assert_eq!(booked.price, 180_000);
}

#[tokio::test]
async fn test_booking_rejects_expired_discounts() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/discounts"))
        .and(query_param("code", "eq.OLDCODE"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::discount_row("OLDCODE", "vnd", 50_000, -1)),
        )
        .mount(&mock_server)
        .await;

    let mut request = book_request(doctor_id, &future_date(), "10");
    request.discount_code = Some("OLDCODE".to_string());

    let service = booking_service(&mock_server);
    let result = service.book(&patient.to_actor(), request).await;

    assert_matches!(result, Err(ConsultationError::DiscountExpired));
}

#[tokio::test]
async fn test_booking_rejects_unknown_discounts() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/discounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;

    let mut request = book_request(doctor_id, &future_date(), "10");
    request.discount_code = Some("NOSUCHCODE".to_string());

    let service = booking_service(&mock_server);
    let result = service.book(&patient.to_actor(), request).await;

    assert_matches!(result, Err(ConsultationError::DiscountNotFound));
}

#[tokio::test]
async fn test_booking_refunds_when_slot_claim_conflicts() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    // The debit lands first
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 300_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // A concurrent booking won the unique constraint on one of the slots
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"consultation_slots_doctor_id_date_slot_key\""
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // So the debit must come back
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 700_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 700_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // And nothing gets persisted
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::SlotUnavailable));
}

#[tokio::test]
async fn test_booking_refunds_when_claim_store_fails() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 300_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // The claims store falls over outright, no uniqueness conflict involved
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The debit still comes back
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 700_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 700_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::BookingFailed(_)));
}

#[tokio::test]
async fn test_booking_rolls_back_when_insert_fails() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 300_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&mock_server)
        .await;

    // Rollback drops the claims and returns the debit
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(body_json(json!({ "wallet_balance": 700_000 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 700_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::BookingFailed(_)));
}

#[tokio::test]
async fn test_booking_retries_wallet_races() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_reservation_mock(&mock_server, doctor_id).await;

    // First conditional write returns no rows: somebody moved the balance.
    // The retry reads again and wins.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(query_param("wallet_balance", "eq.500000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(query_param("wallet_balance", "eq.500000"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::consultation_row(
                Uuid::new_v4(),
                patient.id,
                doctor_id,
                &date,
                "28-29",
                200_000,
                "pending",
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let booked = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await
        .unwrap();

    assert_eq!(booked.status, ConsultationStatus::Pending);
}

#[tokio::test]
async fn test_booking_fails_when_wallet_races_exhaust_retries() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_lock_mocks(&mock_server).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    // Every conditional write returns no rows: somebody keeps moving the
    // balance first, until the retries run out
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .and(query_param("wallet_balance", "eq.500000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .expect(3)
        .mount(&mock_server)
        .await;

    // Nothing gets claimed or persisted without the debit
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::DatabaseError(msg)) if msg.contains("losing races"));
}

#[tokio::test]
async fn test_booking_gives_up_when_day_stays_locked() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;

    // Another instance holds the day lock and its lease has not run out
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"booking_locks_lock_key_key\""
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "expires_at": (Utc::now() + Duration::seconds(25)).to_rfc3339()
        }])))
        .mount(&mock_server)
        .await;

    // The critical section never starts
    Mock::given(method("GET"))
        .and(path(format!("/schedule/schedules/{}", doctor_id)))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await;

    assert_matches!(result, Err(ConsultationError::SlotUnavailable));
}

#[tokio::test]
async fn test_booking_recovers_expired_locks() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_schedule_mock(&mock_server, doctor_id, &date, vec![28, 29, 30]).await;
    setup_day_mock(&mock_server, doctor_id, &date, MockStoreResponses::empty()).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_reservation_mock(&mock_server, doctor_id).await;

    // First insert collides with a stale lock row, the retry takes it
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"booking_locks_lock_key_key\""
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "booking_lock" }])),
        )
        .mount(&mock_server)
        .await;

    // The holder timed out 2 minutes ago
    Mock::given(method("GET"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "expires_at": (Utc::now() - Duration::seconds(120)).to_rfc3339()
        }])))
        .mount(&mock_server)
        .await;

    // One delete for the stale row, one for our own release
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockStoreResponses::empty()))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/patients"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockStoreResponses::patient_row(patient.id, 300_000)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockStoreResponses::empty()))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::consultation_row(
                Uuid::new_v4(),
                patient.id,
                doctor_id,
                &date,
                "28-29",
                200_000,
                "pending",
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = booking_service(&mock_server);
    let booked = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28-29"))
        .await
        .unwrap();

    assert_eq!(booked.status, ConsultationStatus::Pending);
}

#[tokio::test]
async fn test_booking_times_out_with_hanging_schedule_service() {
    let mock_server = MockServer::start().await;
    let patient = TestActor::patient();
    let doctor_id = Uuid::new_v4();
    let date = future_date();

    setup_doctor_mock(&mock_server, doctor_id, 100_000).await;
    setup_patient_mock(&mock_server, patient.id, 500_000).await;
    setup_lock_mocks(&mock_server).await;

    Mock::given(method("GET"))
        .and(path(format!("/schedule/schedules/{}", doctor_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "available": true, "slots": [28, 29] }))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut test_config = TestConfig::with_base_url(&mock_server.uri());
    test_config.collaborator_timeout_seconds = 1;
    let service = ConsultationBookingService::new(&test_config.to_app_config());

    let result = service
        .book(&patient.to_actor(), book_request(doctor_id, &date, "28"))
        .await;

    assert_matches!(result, Err(ConsultationError::UpstreamTimeout));
}
