use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Intruder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Method {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum AuditAction {
    In,
    Out,
    Intruder,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub check_in_time: Option<DateTime<Utc>>,
    pub last_seen_time: Option<DateTime<Utc>>,
    pub status: AttendanceStatus,
    pub confidence: Option<f64>,
    pub method: Method,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub action: AuditAction,
    pub similarity: Option<f64>,
    pub is_suspicious: bool,
    pub created_at: DateTime<Utc>,
}

const RECORD_COLUMNS: &str = "id, session_id, student_id, check_in_time, last_seen_time, \
     status, confidence, method, note";

pub async fn get(
    pool: &SqlitePool,
    session_id: i64,
    student_id: i64,
) -> Result<Option<AttendanceRecord>> {
    let record = sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {} FROM attendance WHERE session_id = ? AND student_id = ?",
        RECORD_COLUMNS
    ))
    .bind(session_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Insert the canonical row for (session, student). The unique constraint
/// is the backstop against a concurrent duplicate: when the insert loses
/// that race, the already-present row is re-read and returned as canonical.
///
/// Returns the record and whether this call created it.
#[allow(clippy::too_many_arguments)]
pub async fn insert_or_get(
    pool: &SqlitePool,
    session_id: i64,
    student_id: i64,
    status: AttendanceStatus,
    check_in_time: Option<DateTime<Utc>>,
    confidence: Option<f64>,
    method: Method,
    note: Option<&str>,
) -> Result<(AttendanceRecord, bool)> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance
            (session_id, student_id, check_in_time, last_seen_time, status, confidence, method, note)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (session_id, student_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(student_id)
    .bind(check_in_time)
    .bind(check_in_time)
    .bind(status)
    .bind(confidence)
    .bind(method)
    .bind(note)
    .execute(pool)
    .await?;

    let created = result.rows_affected() > 0;
    let record = sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {} FROM attendance WHERE session_id = ? AND student_id = ?",
        RECORD_COLUMNS
    ))
    .bind(session_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;

    Ok((record, created))
}

/// Refresh `last_seen_time` on a repeat sighting; confidence only moves up.
pub async fn touch_seen(
    pool: &SqlitePool,
    session_id: i64,
    student_id: i64,
    confidence: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE attendance
        SET last_seen_time = ?,
            confidence = MAX(COALESCE(confidence, 0), ?)
        WHERE session_id = ? AND student_id = ?
        "#,
    )
    .bind(now)
    .bind(confidence)
    .bind(session_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark every listed student ABSENT unless they already have a row.
pub async fn mark_absent_missing(
    pool: &SqlitePool,
    session_id: i64,
    student_ids: &[i64],
) -> Result<u64> {
    let mut marked = 0u64;

    for &student_id in student_ids {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance (session_id, student_id, status, method, note)
            VALUES (?, ?, 'ABSENT', 'AUTO', 'Not detected during session')
            ON CONFLICT (session_id, student_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(student_id)
        .execute(pool)
        .await?;

        marked += result.rows_affected();
    }

    Ok(marked)
}

pub async fn list_by_session(pool: &SqlitePool, session_id: i64) -> Result<Vec<AttendanceRecord>> {
    let records = sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {} FROM attendance WHERE session_id = ? ORDER BY check_in_time ASC",
        RECORD_COLUMNS
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn list_by_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
    let day_start: DateTime<Utc> =
        DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc);
    let day_end = day_start + chrono::Duration::days(1);

    let records = sqlx::query_as::<_, AttendanceRecord>(&format!(
        r#"
        SELECT {} FROM attendance
        WHERE session_id IN (SELECT id FROM sessions WHERE starts_at >= ? AND starts_at < ?)
        ORDER BY check_in_time ASC
        "#,
        RECORD_COLUMNS
    ))
    .bind(day_start)
    .bind(day_end)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn insert_audit(
    pool: &SqlitePool,
    session_id: i64,
    student_id: i64,
    action: AuditAction,
    similarity: Option<f64>,
    is_suspicious: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_events (session_id, student_id, action, similarity, is_suspicious, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id)
    .bind(student_id)
    .bind(action)
    .bind(similarity)
    .bind(is_suspicious)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_audit_by_session(
    pool: &SqlitePool,
    session_id: i64,
) -> Result<Vec<AuditEvent>> {
    let events = sqlx::query_as::<_, AuditEvent>(
        "SELECT id, session_id, student_id, action, similarity, is_suspicious, created_at
         FROM audit_events WHERE session_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(events)
}
