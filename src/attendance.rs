//! Attendance resolver: turns a confirmed identity into exactly one
//! canonical record per (session, student), with the re-entry and intruder
//! paths feeding the append-only audit log.

use crate::db::attendance::{self, AttendanceRecord, AttendanceStatus, AuditAction, Method};
use crate::db::courses;
use crate::db::sessions::Session;
use crate::error::{AttendError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

#[derive(Debug)]
pub enum AttendanceOutcome {
    /// First confirmed sighting of an enrolled student this session.
    CheckedIn { record: AttendanceRecord },
    /// The student already has a row; logged as a suspicious OUT/IN pair.
    ReEntry { record: AttendanceRecord },
    /// Confirmed identity that is not enrolled in the session's course.
    Intruder { record: AttendanceRecord },
}

impl AttendanceOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            AttendanceOutcome::CheckedIn { record }
            | AttendanceOutcome::ReEntry { record }
            | AttendanceOutcome::Intruder { record } => record,
        }
    }
}

/// Resolve a stabilizer-confirmed sighting against the active session.
pub async fn record_confirmed(
    pool: &SqlitePool,
    session: &Session,
    student_id: i64,
    similarity: f32,
    now: DateTime<Utc>,
) -> Result<AttendanceOutcome> {
    let similarity = similarity as f64;

    if attendance::get(pool, session.id, student_id).await?.is_some() {
        return reenter(pool, session, student_id, similarity, now).await;
    }

    if !courses::is_enrolled(pool, session.course_id, student_id).await? {
        warn!(
            session_id = session.id,
            student_id, "unenrolled individual confirmed during session"
        );
        let (record, _) = attendance::insert_or_get(
            pool,
            session.id,
            student_id,
            AttendanceStatus::Intruder,
            Some(now),
            Some(similarity),
            Method::Auto,
            Some("Not enrolled in this course"),
        )
        .await?;
        attendance::insert_audit(
            pool,
            session.id,
            student_id,
            AuditAction::Intruder,
            Some(similarity),
            true,
            now,
        )
        .await?;
        return Ok(AttendanceOutcome::Intruder { record });
    }

    let status = if now > session.late_cutoff() {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    };

    let (record, created) = attendance::insert_or_get(
        pool,
        session.id,
        student_id,
        status,
        Some(now),
        Some(similarity),
        Method::Auto,
        None,
    )
    .await?;

    if !created {
        // Lost the insert race to a near-simultaneous sighting; the row we
        // just read back is canonical, so treat this one as a re-entry.
        return reenter(pool, session, student_id, similarity, now).await;
    }

    attendance::insert_audit(
        pool,
        session.id,
        student_id,
        AuditAction::In,
        Some(similarity),
        false,
        now,
    )
    .await?;
    info!(
        session_id = session.id,
        student_id,
        status = ?record.status,
        "attendance recorded"
    );

    Ok(AttendanceOutcome::CheckedIn { record })
}

async fn reenter(
    pool: &SqlitePool,
    session: &Session,
    student_id: i64,
    similarity: f64,
    now: DateTime<Utc>,
) -> Result<AttendanceOutcome> {
    attendance::touch_seen(pool, session.id, student_id, similarity, now).await?;

    attendance::insert_audit(
        pool,
        session.id,
        student_id,
        AuditAction::Out,
        Some(similarity),
        true,
        now,
    )
    .await?;
    attendance::insert_audit(
        pool,
        session.id,
        student_id,
        AuditAction::In,
        Some(similarity),
        true,
        now,
    )
    .await?;

    let record = attendance::get(pool, session.id, student_id)
        .await?
        .ok_or(AttendError::NotFound {
            what: "AttendanceRecord",
            id: student_id,
        })?;

    info!(
        session_id = session.id,
        student_id, "re-entry within session"
    );

    Ok(AttendanceOutcome::ReEntry { record })
}

/// Manual marking by an operator: same enrollment and late rules, no
/// stabilizer involved. Returns the record and whether this call created it.
pub async fn mark_manual(
    pool: &SqlitePool,
    session: &Session,
    student_id: i64,
    status: Option<AttendanceStatus>,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(AttendanceRecord, bool)> {
    if !courses::is_enrolled(pool, session.course_id, student_id).await? {
        return Err(AttendError::InvalidRequest(format!(
            "Student {} is not enrolled in course {}",
            student_id, session.course_id
        )));
    }

    let status = match status {
        Some(AttendanceStatus::Intruder) => {
            return Err(AttendError::InvalidRequest(
                "INTRUDER cannot be assigned manually".into(),
            ))
        }
        Some(explicit) => explicit,
        None => {
            if now > session.late_cutoff() {
                AttendanceStatus::Late
            } else {
                AttendanceStatus::Present
            }
        }
    };

    let check_in = if status == AttendanceStatus::Absent {
        None
    } else {
        Some(now)
    };

    let (record, created) = attendance::insert_or_get(
        pool,
        session.id,
        student_id,
        status,
        check_in,
        None,
        Method::Manual,
        note,
    )
    .await?;

    if created {
        attendance::insert_audit(
            pool,
            session.id,
            student_id,
            AuditAction::In,
            None,
            false,
            now,
        )
        .await?;
    }

    Ok((record, created))
}
