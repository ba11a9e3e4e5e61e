mod common;

use chrono::Duration;
use common::*;
use faceattend::attendance::{self as resolver, AttendanceOutcome};
use faceattend::db::attendance::{self, AttendanceStatus, AuditAction, Method};
use faceattend::error::AttendError;

#[tokio::test]
async fn first_sighting_within_threshold_is_present() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;

    let outcome = resolver::record_confirmed(&pool, &session, student, 0.88, t0() + minutes(3))
        .await
        .unwrap();

    match outcome {
        AttendanceOutcome::CheckedIn { record } => {
            assert_eq!(record.status, AttendanceStatus::Present);
            assert_eq!(record.method, Method::Auto);
            assert_eq!(record.check_in_time, Some(t0() + minutes(3)));
            assert!((record.confidence.unwrap() - 0.88).abs() < 1e-6);
        }
        other => panic!("expected CheckedIn, got {:?}", other),
    }

    let audit = attendance::list_audit_by_session(&pool, session.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::In);
    assert!(!audit[0].is_suspicious);
}

#[tokio::test]
async fn late_boundary_is_inclusive_for_present() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    // 15 minute late threshold from the fixture.
    let session = seed_active_session(&pool, course_id).await;

    let on_time = seed_enrolled_student(&pool, course_id, "S-1").await;
    let late = seed_enrolled_student(&pool, course_id, "S-2").await;

    // Exactly at starts_at + threshold: still PRESENT.
    let at_cutoff = t0() + minutes(15);
    let outcome = resolver::record_confirmed(&pool, &session, on_time, 0.9, at_cutoff)
        .await
        .unwrap();
    assert_eq!(outcome.record().status, AttendanceStatus::Present);

    // One second past the cutoff: LATE.
    let outcome =
        resolver::record_confirmed(&pool, &session, late, 0.9, at_cutoff + Duration::seconds(1))
            .await
            .unwrap();
    assert_eq!(outcome.record().status, AttendanceStatus::Late);
}

#[tokio::test]
async fn repeat_sighting_is_a_re_entry_not_a_second_row() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;

    resolver::record_confirmed(&pool, &session, student, 0.80, t0() + minutes(2))
        .await
        .unwrap();
    let outcome = resolver::record_confirmed(&pool, &session, student, 0.92, t0() + minutes(10))
        .await
        .unwrap();

    let record = match outcome {
        AttendanceOutcome::ReEntry { record } => record,
        other => panic!("expected ReEntry, got {:?}", other),
    };

    // One canonical row, timestamps and confidence refreshed.
    assert_eq!(record.last_seen_time, Some(t0() + minutes(10)));
    assert!((record.confidence.unwrap() - 0.92).abs() < 1e-6);
    let rows = attendance::list_by_session(&pool, session.id).await.unwrap();
    assert_eq!(rows.len(), 1);

    // Audit trail: the original IN, then a suspicious OUT/IN pair.
    let audit = attendance::list_audit_by_session(&pool, session.id).await.unwrap();
    let actions: Vec<_> = audit.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::In, AuditAction::Out, AuditAction::In]
    );
    assert!(!audit[0].is_suspicious);
    assert!(audit[1].is_suspicious);
    assert!(audit[2].is_suspicious);
}

#[tokio::test]
async fn re_entry_never_lowers_confidence() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;

    resolver::record_confirmed(&pool, &session, student, 0.95, t0() + minutes(2))
        .await
        .unwrap();
    let outcome = resolver::record_confirmed(&pool, &session, student, 0.40, t0() + minutes(5))
        .await
        .unwrap();

    assert!((outcome.record().confidence.unwrap() - 0.95).abs() < 1e-6);
}

#[tokio::test]
async fn unenrolled_identity_is_flagged_as_intruder() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let stranger = seed_student(&pool, "X-1").await;

    let outcome = resolver::record_confirmed(&pool, &session, stranger, 0.85, t0() + minutes(4))
        .await
        .unwrap();

    match outcome {
        AttendanceOutcome::Intruder { record } => {
            assert_eq!(record.status, AttendanceStatus::Intruder);
        }
        other => panic!("expected Intruder, got {:?}", other),
    }

    let audit = attendance::list_audit_by_session(&pool, session.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Intruder);
    assert!(audit[0].is_suspicious);
}

#[tokio::test]
async fn manual_marking_creates_once_and_respects_enrollment() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;
    let stranger = seed_student(&pool, "X-1").await;

    let (record, created) =
        resolver::mark_manual(&pool, &session, student, None, Some("front desk"), t0() + minutes(1))
            .await
            .unwrap();
    assert!(created);
    assert_eq!(record.status, AttendanceStatus::Present);
    assert_eq!(record.method, Method::Manual);

    // Marking again returns the canonical row untouched.
    let (_, created_again) =
        resolver::mark_manual(&pool, &session, student, None, None, t0() + minutes(2))
            .await
            .unwrap();
    assert!(!created_again);

    // Unenrolled students cannot be marked manually.
    let denied =
        resolver::mark_manual(&pool, &session, stranger, None, None, t0() + minutes(2)).await;
    assert!(matches!(denied, Err(AttendError::InvalidRequest(_))));

    // Nor can INTRUDER be assigned by hand.
    let forged = resolver::mark_manual(
        &pool,
        &session,
        student,
        Some(AttendanceStatus::Intruder),
        None,
        t0() + minutes(2),
    )
    .await;
    assert!(matches!(forged, Err(AttendError::InvalidRequest(_))));
}

#[tokio::test]
async fn manual_late_is_computed_from_the_same_cutoff() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;

    let (record, _) = resolver::mark_manual(
        &pool,
        &session,
        student,
        None,
        None,
        t0() + minutes(16),
    )
    .await
    .unwrap();

    assert_eq!(record.status, AttendanceStatus::Late);
}

#[tokio::test]
async fn upsert_race_loser_adopts_the_existing_row() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let student = seed_enrolled_student(&pool, course_id, "S-1").await;

    // Simulate the race: the row appears between the resolver's existence
    // check and its insert. The constraint-backed insert must not error and
    // must hand back the canonical record.
    let (first, created) = attendance::insert_or_get(
        &pool,
        session.id,
        student,
        AttendanceStatus::Present,
        Some(t0() + minutes(1)),
        Some(0.7),
        Method::Auto,
        None,
    )
    .await
    .unwrap();
    assert!(created);

    let (second, created) = attendance::insert_or_get(
        &pool,
        session.id,
        student,
        AttendanceStatus::Late,
        Some(t0() + minutes(20)),
        Some(0.9),
        Method::Auto,
        None,
    )
    .await
    .unwrap();
    assert!(!created);
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, AttendanceStatus::Present);

    let rows = attendance::list_by_session(&pool, session.id).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn csv_export_contains_one_line_per_record() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let a = seed_enrolled_student(&pool, course_id, "S-1").await;
    let b = seed_enrolled_student(&pool, course_id, "S-2").await;

    resolver::record_confirmed(&pool, &session, a, 0.9, t0() + minutes(1))
        .await
        .unwrap();
    resolver::record_confirmed(&pool, &session, b, 0.8, t0() + minutes(20))
        .await
        .unwrap();

    let mut buffer = Vec::new();
    let rows = faceattend::export::write_session_csv(&pool, session.id, &mut buffer)
        .await
        .unwrap();
    assert_eq!(rows, 2);

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("student_code,name,status"));
    assert!(lines[1].contains("S-1"));
    assert!(lines[1].contains("PRESENT"));
    assert!(lines[2].contains("S-2"));
    assert!(lines[2].contains("LATE"));
}
