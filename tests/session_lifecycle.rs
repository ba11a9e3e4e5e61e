mod common;

use common::*;
use faceattend::attendance as resolver;
use faceattend::config::SessionConfig;
use faceattend::db::attendance::{self, AttendanceStatus};
use faceattend::db::courses;
use faceattend::db::sessions::{self, NewSession, SessionStatus};
use faceattend::error::AttendError;
use faceattend::scheduler;

fn sweep_config() -> SessionConfig {
    SessionConfig {
        sweep_interval_seconds: 60,
        creation_window_seconds: 120,
        default_late_threshold_minutes: 5,
        absentee_buffer_minutes: 5,
    }
}

#[tokio::test]
async fn creation_picks_status_from_start_time() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    let live = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0(),
            ends_at: t0() + minutes(60),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await
    .unwrap();
    assert_eq!(live.status, SessionStatus::Active);

    let future = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(120),
            ends_at: t0() + minutes(180),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await
    .unwrap();
    assert_eq!(future.status, SessionStatus::Scheduled);
}

#[tokio::test]
async fn creation_rejects_bad_time_ranges() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    let inverted = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(60),
            ends_at: t0() + minutes(30),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await;
    assert!(matches!(inverted, Err(AttendError::InvalidRequest(_))));

    let in_the_past = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() - minutes(120),
            ends_at: t0() - minutes(60),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await;
    assert!(matches!(in_the_past, Err(AttendError::InvalidRequest(_))));
}

#[tokio::test]
async fn overlapping_active_session_blocks_creation() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    // ACTIVE 10:30 - 11:30, evaluated at 10:45.
    let now = t0() + minutes(45);
    sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(30),
            ends_at: t0() + minutes(90),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        now,
    )
    .await
    .unwrap();

    // 10:00 - 11:00 overlaps the active window and is refused.
    let overlapping = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0(),
            ends_at: t0() + minutes(60),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        now,
    )
    .await;
    assert!(matches!(
        overlapping,
        Err(AttendError::SessionConflict { .. })
    ));

    // 11:30 - 12:30 touches the active window without overlapping it.
    let touching = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(90),
            ends_at: t0() + minutes(150),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        now,
    )
    .await;
    assert!(touching.is_ok());
}

#[tokio::test]
async fn scheduled_session_blocks_only_immediately_active_creation() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    // SCHEDULED 11:00 - 12:00.
    sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(60),
            ends_at: t0() + minutes(120),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await
    .unwrap();

    // A new session starting now and running into that window competes for
    // the recognition stream and is refused.
    let starts_live = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0(),
            ends_at: t0() + minutes(90),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await;
    assert!(matches!(
        starts_live,
        Err(AttendError::SessionConflict { .. })
    ));

    // Another future session over the same window is allowed to queue up.
    let also_scheduled = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(70),
            ends_at: t0() + minutes(110),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await;
    assert!(also_scheduled.is_ok());
}

#[tokio::test]
async fn sweep_activates_due_and_completes_expired() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    let session = sessions::create_session(
        &pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0() + minutes(30),
            ends_at: t0() + minutes(90),
            late_threshold_minutes: 5,
            auto_created: false,
        },
        t0(),
    )
    .await
    .unwrap();
    assert_eq!(session.status, SessionStatus::Scheduled);

    // Before the window opens, nothing happens.
    assert_eq!(sessions::activate_due(&pool, t0() + minutes(29)).await.unwrap(), 0);

    assert_eq!(sessions::activate_due(&pool, t0() + minutes(31)).await.unwrap(), 1);
    let session = sessions::get_session(&pool, session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);

    assert_eq!(sessions::end_expired(&pool, t0() + minutes(89)).await.unwrap(), 0);
    assert_eq!(sessions::end_expired(&pool, t0() + minutes(90)).await.unwrap(), 1);
    let session = sessions::get_session(&pool, session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn transitions_are_guarded_no_ops_when_repeated() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;

    // Already active: manual activate does nothing.
    assert!(!sessions::activate(&pool, session.id, t0()).await.unwrap());

    // First end applies and truncates ends_at; the second is a no-op.
    let end_time = t0() + minutes(20);
    assert!(sessions::end_manual(&pool, session.id, end_time).await.unwrap());
    assert!(!sessions::end_manual(&pool, session.id, end_time + minutes(1)).await.unwrap());

    let session = sessions::get_session(&pool, session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.ends_at, end_time);

    // Terminal sessions cannot be cancelled.
    assert!(!sessions::cancel(&pool, session.id, end_time).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn absentee_sweep_marks_only_unseen_enrolled_students() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;

    let seen = seed_enrolled_student(&pool, course_id, "S-1").await;
    let missing_a = seed_enrolled_student(&pool, course_id, "S-2").await;
    let missing_b = seed_enrolled_student(&pool, course_id, "S-3").await;
    let unenrolled = seed_student(&pool, "S-4").await;

    resolver::record_confirmed(&pool, &session, seen, 0.91, t0() + minutes(2))
        .await
        .unwrap();

    // Due time is starts + 15 (late threshold) + 5 (buffer) = 10:20.
    let config = sweep_config();
    let early = scheduler::sweep_tick(&pool, &config, t0() + minutes(19)).await;
    assert_eq!(early.absentee_sessions, 0);

    let stats = scheduler::sweep_tick(&pool, &config, t0() + minutes(21)).await;
    assert_eq!(stats.absentee_sessions, 1);
    assert_eq!(stats.students_marked_absent, 2);

    let record = |student| attendance::get(&pool, session.id, student);
    assert_eq!(record(seen).await.unwrap().unwrap().status, AttendanceStatus::Present);
    assert_eq!(record(missing_a).await.unwrap().unwrap().status, AttendanceStatus::Absent);
    assert_eq!(record(missing_b).await.unwrap().unwrap().status, AttendanceStatus::Absent);
    assert!(record(unenrolled).await.unwrap().is_none());

    // The pass also finalizes the session.
    let session = sessions::get_session(&pool, session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.absentees_marked_at.is_some());

    // Running the sweep again changes nothing.
    let again = scheduler::sweep_tick(&pool, &config, t0() + minutes(25)).await;
    assert_eq!(again.absentee_sessions, 0);
    assert_eq!(again.students_marked_absent, 0);
}

#[tokio::test]
async fn absentee_pass_skips_cancelled_sessions() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;
    let session = seed_active_session(&pool, course_id).await;
    let enrolled = seed_enrolled_student(&pool, course_id, "S-1").await;

    assert!(sessions::cancel(&pool, session.id, t0() + minutes(1)).await.unwrap());

    let stats = scheduler::sweep_tick(&pool, &sweep_config(), t0() + minutes(30)).await;
    assert_eq!(stats.absentee_sessions, 0);

    assert!(attendance::get(&pool, session.id, enrolled).await.unwrap().is_none());
    let session = sessions::get_session(&pool, session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn timetable_sweep_creates_one_session_per_slot() {
    let pool = test_pool().await;
    let course_id = seed_course(&pool, "CS101").await;

    // t0 is a Monday at 10:00 UTC.
    courses::upsert_time_slot(&pool, course_id, "MONDAY", 1, "10:00", "11:20", 5)
        .await
        .unwrap();

    let config = sweep_config();
    let stats = scheduler::sweep_tick(&pool, &config, t0() + minutes(1)).await;
    assert_eq!(stats.sessions_created, 1);

    let sessions = sessions::list_sessions(&pool, None, None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Active);
    assert!(sessions[0].auto_created);

    // The next tick inside the window must not duplicate it.
    let stats = scheduler::sweep_tick(&pool, &config, t0() + minutes(2)).await;
    assert_eq!(stats.sessions_created, 0);

    // A tick long after the window opened creates nothing either.
    sessions::end_manual(&pool, sessions[0].id, t0() + minutes(3)).await.unwrap();
    let stats = scheduler::sweep_tick(&pool, &config, t0() + minutes(30)).await;
    assert_eq!(stats.sessions_created, 0);
}
