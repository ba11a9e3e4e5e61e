//! Shared fixtures for the integration tests.

use chrono::{DateTime, TimeZone, Utc};
use faceattend::db::{self, courses, sessions, students};
use faceattend::db::sessions::{NewSession, Session};
use faceattend::db::students::NewStudent;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// In-memory database with the full schema. One connection, because each
/// `:memory:` connection is its own database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma should apply");

    db::create_schema(&pool).await.expect("schema should build");
    pool
}

/// A fixed reference instant so tests are independent of the wall clock:
/// 2026-03-02 10:00:00 UTC, a Monday.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

pub fn minutes(m: i64) -> chrono::Duration {
    chrono::Duration::minutes(m)
}

pub async fn seed_course(pool: &SqlitePool, code: &str) -> i64 {
    courses::create_course(pool, code, &format!("Course {}", code), Some("Dr. Vega"))
        .await
        .expect("course should insert")
        .id
}

pub async fn seed_student(pool: &SqlitePool, code: &str) -> i64 {
    students::create_student(
        pool,
        &NewStudent {
            name: format!("Student {}", code),
            student_code: code.to_string(),
            department: None,
            email: None,
        },
    )
    .await
    .expect("student should insert")
    .id
}

pub async fn seed_enrolled_student(pool: &SqlitePool, course_id: i64, code: &str) -> i64 {
    let student_id = seed_student(pool, code).await;
    courses::enroll_student(pool, course_id, student_id)
        .await
        .expect("enrollment should insert");
    student_id
}

/// An ACTIVE session anchored to the real clock, for flows that go through
/// handlers calling `Utc::now()` themselves. Started one minute ago, so a
/// check-in right now is comfortably inside the late threshold.
pub async fn seed_live_session(pool: &SqlitePool, course_id: i64) -> Session {
    let now = Utc::now();
    sessions::create_session(
        pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: now - minutes(1),
            ends_at: now + minutes(59),
            late_threshold_minutes: 15,
            auto_created: false,
        },
        now,
    )
    .await
    .expect("session should insert")
}

/// An ACTIVE session that started at `t0` and runs for an hour, with a
/// 15 minute late threshold.
pub async fn seed_active_session(pool: &SqlitePool, course_id: i64) -> Session {
    sessions::create_session(
        pool,
        &NewSession {
            course_id,
            time_slot_id: None,
            starts_at: t0(),
            ends_at: t0() + minutes(60),
            late_threshold_minutes: 15,
            auto_created: false,
        },
        t0(),
    )
    .await
    .expect("session should insert")
}
