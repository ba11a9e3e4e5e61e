use crate::error::{AttendError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(SessionStatus::Scheduled),
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "CANCELLED" => Ok(SessionStatus::Cancelled),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    pub course_id: i64,
    pub time_slot_id: Option<i64>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub late_threshold_minutes: i64,
    pub status: SessionStatus,
    pub auto_created: bool,
    pub absentees_marked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Check-ins strictly after this instant count as LATE.
    pub fn late_cutoff(&self) -> DateTime<Utc> {
        self.starts_at + Duration::minutes(self.late_threshold_minutes)
    }

    /// When the one-shot absentee pass becomes due.
    pub fn absentee_due_at(&self, buffer_minutes: i64) -> DateTime<Utc> {
        self.late_cutoff() + Duration::minutes(buffer_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub course_id: i64,
    pub time_slot_id: Option<i64>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub late_threshold_minutes: i64,
    pub auto_created: bool,
}

const SESSION_COLUMNS: &str = "id, course_id, time_slot_id, starts_at, ends_at, \
     late_threshold_minutes, status, auto_created, absentees_marked_at";

/// Create a session, rejecting overlaps that would compete for the
/// recognition stream: an ACTIVE session always conflicts, a SCHEDULED one
/// only when the new session would itself start ACTIVE. Touching intervals
/// do not overlap.
pub async fn create_session(
    pool: &SqlitePool,
    new: &NewSession,
    now: DateTime<Utc>,
) -> Result<Session> {
    if new.ends_at <= new.starts_at {
        return Err(AttendError::InvalidRequest(
            "End time must be after start time".into(),
        ));
    }
    if new.ends_at <= now {
        return Err(AttendError::InvalidRequest(
            "End time cannot be in the past".into(),
        ));
    }

    let status = if new.starts_at <= now {
        SessionStatus::Active
    } else {
        SessionStatus::Scheduled
    };

    // A session that starts live immediately also competes with anything
    // scheduled over the same window; a future session only conflicts with
    // what is already live.
    let conflicting: Vec<&str> = if status == SessionStatus::Active {
        vec!["ACTIVE", "SCHEDULED"]
    } else {
        vec!["ACTIVE"]
    };

    let mut tx = pool.begin().await?;

    let overlap = sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions
         WHERE status IN ({}) AND starts_at < ? AND ends_at > ?
         LIMIT 1",
        SESSION_COLUMNS,
        conflicting
            .iter()
            .map(|s| format!("'{}'", s))
            .collect::<Vec<_>>()
            .join(", ")
    ))
    .bind(new.ends_at)
    .bind(new.starts_at)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(existing) = overlap {
        return Err(AttendError::SessionConflict {
            session_id: existing.id,
            status: existing.status.to_string(),
            starts_at: existing.starts_at.to_rfc3339(),
            ends_at: existing.ends_at.to_rfc3339(),
        });
    }

    let id = sqlx::query(
        r#"
        INSERT INTO sessions
            (course_id, time_slot_id, starts_at, ends_at, late_threshold_minutes,
             status, auto_created, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.course_id)
    .bind(new.time_slot_id)
    .bind(new.starts_at)
    .bind(new.ends_at)
    .bind(new.late_threshold_minutes)
    .bind(status)
    .bind(new.auto_created)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    get_session(pool, id).await
}

pub async fn get_session(pool: &SqlitePool, id: i64) -> Result<Session> {
    sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AttendError::NotFound {
        what: "Session",
        id,
    })
}

pub async fn list_sessions(
    pool: &SqlitePool,
    status: Option<SessionStatus>,
    date: Option<NaiveDate>,
) -> Result<Vec<Session>> {
    let mut sql = format!("SELECT {} FROM sessions WHERE 1 = 1", SESSION_COLUMNS);
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if date.is_some() {
        sql.push_str(" AND starts_at >= ? AND starts_at < ?");
    }
    sql.push_str(" ORDER BY starts_at DESC");

    let mut query = sqlx::query_as::<_, Session>(&sql);
    if let Some(status) = status {
        query = query.bind(status);
    }
    if let Some(date) = date {
        let day_start = day_start_utc(date);
        query = query.bind(day_start).bind(day_start + Duration::days(1));
    }

    Ok(query.fetch_all(pool).await?)
}

fn day_start_utc(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
}

/// The session live recognition resolves against. Creation rules keep this
/// to at most one; the earliest start wins defensively if not.
pub async fn find_active(pool: &SqlitePool) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions WHERE status = 'ACTIVE' ORDER BY starts_at ASC LIMIT 1",
        SESSION_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Guarded SCHEDULED -> ACTIVE. Returns false when the guard did not hold
/// (already active, completed, cancelled), which callers treat as a no-op.
pub async fn activate(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sessions SET status = 'ACTIVE', updated_at = ? WHERE id = ? AND status = 'SCHEDULED'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Manual end: force-completes an open session immediately and truncates
/// `ends_at` to now. No-op on terminal states.
pub async fn end_manual(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET status = 'COMPLETED', ends_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('SCHEDULED', 'ACTIVE')
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Manual cancel of any non-terminal session.
pub async fn cancel(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET status = 'CANCELLED', updated_at = ?
        WHERE id = ? AND status IN ('SCHEDULED', 'ACTIVE')
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Completion without touching `ends_at`; used by the sweeps.
pub async fn complete_if_open(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sessions SET status = 'COMPLETED', updated_at = ? WHERE id = ? AND status = 'ACTIVE'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Sweep: activate every SCHEDULED session whose window has opened.
pub async fn activate_due(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET status = 'ACTIVE', updated_at = ?
        WHERE status = 'SCHEDULED' AND starts_at <= ? AND ends_at > ?
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Sweep: complete every ACTIVE session past its end time.
pub async fn end_expired(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sessions SET status = 'COMPLETED', updated_at = ?
        WHERE status = 'ACTIVE' AND ends_at <= ?
        "#,
    )
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Sessions whose one-shot absentee pass has not run yet. Cancelled
/// sessions are excluded here, which is what makes a pending absentee task
/// for a cancelled session a no-op.
pub async fn absentee_candidates(pool: &SqlitePool) -> Result<Vec<Session>> {
    let sessions = sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions
         WHERE status IN ('ACTIVE', 'COMPLETED') AND absentees_marked_at IS NULL
         ORDER BY starts_at ASC",
        SESSION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}

/// Claim the absentee pass for a session; only one caller ever wins.
pub async fn claim_absentee_marking(
    pool: &SqlitePool,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sessions SET absentees_marked_at = ?, updated_at = ?
         WHERE id = ? AND absentees_marked_at IS NULL AND status != 'CANCELLED'",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Whether a SCHEDULED/ACTIVE session already exists for a slot within a
/// day; keeps the timetable sweep from creating duplicates.
pub async fn exists_for_slot_between(
    pool: &SqlitePool,
    time_slot_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sessions
            WHERE time_slot_id = ? AND starts_at >= ? AND starts_at < ?
              AND status IN ('SCHEDULED', 'ACTIVE')
        )
        "#,
    )
    .bind(time_slot_id)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

#[derive(Debug, Serialize)]
pub struct StatusOverview {
    pub active: Option<Session>,
    pub next_scheduled: Option<Session>,
    pub last_completed: Option<Session>,
    pub counts: std::collections::HashMap<String, i64>,
}

pub async fn status_overview(pool: &SqlitePool, now: DateTime<Utc>) -> Result<StatusOverview> {
    let active = find_active(pool).await?;

    let next_scheduled = sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions WHERE status = 'SCHEDULED' AND starts_at >= ?
         ORDER BY starts_at ASC LIMIT 1",
        SESSION_COLUMNS
    ))
    .bind(now)
    .fetch_optional(pool)
    .await?;

    let last_completed = sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions WHERE status = 'COMPLETED' ORDER BY ends_at DESC LIMIT 1",
        SESSION_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM sessions GROUP BY status")
            .fetch_all(pool)
            .await?;

    Ok(StatusOverview {
        active,
        next_scheduled,
        last_completed,
        counts: rows.into_iter().collect(),
    })
}
