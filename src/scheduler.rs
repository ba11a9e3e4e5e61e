//! Background session sweeps: timetable auto-creation, activation,
//! expiration, and the one-shot absentee pass. One parameterless tick drives
//! all four; a tokio interval task calls it every `sweep_interval_seconds`.

use crate::config::SessionConfig;
use crate::db::{attendance, courses, sessions};
use crate::db::sessions::NewSession;
use crate::error::{AttendError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sessions_created: u64,
    pub sessions_activated: u64,
    pub sessions_completed: u64,
    pub absentee_sessions: u64,
    pub students_marked_absent: u64,
}

/// Run the periodic sweep until the process exits.
pub async fn run(pool: SqlitePool, config: SessionConfig) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.sweep_interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        interval_seconds = config.sweep_interval_seconds,
        "session sweep started"
    );

    loop {
        interval.tick().await;
        let stats = sweep_tick(&pool, &config, Utc::now()).await;
        if stats != SweepStats::default() {
            info!(?stats, "sweep tick applied changes");
        }
    }
}

/// One full sweep. Each step is independent; a failure in one is logged and
/// the remaining steps still run.
pub async fn sweep_tick(pool: &SqlitePool, config: &SessionConfig, now: DateTime<Utc>) -> SweepStats {
    let mut stats = SweepStats::default();

    match spawn_due_sessions(pool, config, now).await {
        Ok(created) => stats.sessions_created = created,
        Err(e) => error!("timetable session creation failed: {}", e),
    }

    match sessions::activate_due(pool, now).await {
        Ok(activated) => stats.sessions_activated = activated,
        Err(e) => error!("session activation sweep failed: {}", e),
    }

    match sessions::end_expired(pool, now).await {
        Ok(completed) => stats.sessions_completed = completed,
        Err(e) => error!("session expiration sweep failed: {}", e),
    }

    match mark_due_absentees(pool, config, now).await {
        Ok((sessions_swept, students)) => {
            stats.absentee_sessions = sessions_swept;
            stats.students_marked_absent = students;
        }
        Err(e) => error!("absentee sweep failed: {}", e),
    }

    stats
}

/// Auto-create sessions for timetable slots whose start time just passed.
/// At most one session per slot per day.
async fn spawn_due_sessions(
    pool: &SqlitePool,
    config: &SessionConfig,
    now: DateTime<Utc>,
) -> Result<u64> {
    let weekday = now.weekday().to_string().to_uppercase();
    let weekday = match weekday.as_str() {
        "MON" => "MONDAY",
        "TUE" => "TUESDAY",
        "WED" => "WEDNESDAY",
        "THU" => "THURSDAY",
        "FRI" => "FRIDAY",
        "SAT" => "SATURDAY",
        "SUN" => "SUNDAY",
        other => {
            return Err(AttendError::InvalidRequest(format!(
                "Unexpected weekday: {}",
                other
            )))
        }
    };

    let slots = courses::active_slots_for_weekday(pool, weekday).await?;
    if slots.is_empty() {
        return Ok(0);
    }

    let today = now.date_naive();
    let day_start = DateTime::from_naive_utc_and_offset(
        today.and_hms_opt(0, 0, 0).unwrap_or_default(),
        Utc,
    );
    let day_end = day_start + Duration::days(1);
    let mut created = 0u64;

    for slot in slots {
        let (Ok(start_time), Ok(end_time)) = (
            NaiveTime::parse_from_str(&slot.starts, "%H:%M"),
            NaiveTime::parse_from_str(&slot.ends, "%H:%M"),
        ) else {
            error!(slot_id = slot.id, "time slot has unparseable times");
            continue;
        };

        let starts_at = DateTime::from_naive_utc_and_offset(today.and_time(start_time), Utc);
        let ends_at = DateTime::from_naive_utc_and_offset(today.and_time(end_time), Utc);

        // Create only within the window right after the slot opens, so a
        // late server restart does not spawn sessions for long-gone slots.
        let since_start = now - starts_at;
        if since_start < Duration::zero()
            || since_start > Duration::seconds(config.creation_window_seconds)
        {
            continue;
        }

        if sessions::exists_for_slot_between(pool, slot.id, day_start, day_end).await? {
            continue;
        }

        match sessions::create_session(
            pool,
            &NewSession {
                course_id: slot.course_id,
                time_slot_id: Some(slot.id),
                starts_at,
                ends_at,
                late_threshold_minutes: slot.late_threshold_minutes,
                auto_created: true,
            },
            now,
        )
        .await
        {
            Ok(session) => {
                info!(
                    session_id = session.id,
                    course_id = slot.course_id,
                    slot_id = slot.id,
                    "auto-created session from timetable"
                );
                created += 1;
            }
            Err(AttendError::SessionConflict { session_id, .. }) => {
                info!(
                    slot_id = slot.id,
                    conflicting_session = session_id,
                    "slot skipped, conflicting session exists"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Ok(created)
}

/// Run the absentee pass for every session past its due time whose pass has
/// not happened yet. The claim update is the once-only guard; re-reading
/// status via the candidate query makes a pass for a cancelled session a
/// no-op, without any unscheduling machinery.
async fn mark_due_absentees(
    pool: &SqlitePool,
    config: &SessionConfig,
    now: DateTime<Utc>,
) -> Result<(u64, u64)> {
    let mut sessions_swept = 0u64;
    let mut students_marked = 0u64;

    for session in sessions::absentee_candidates(pool).await? {
        if now < session.absentee_due_at(config.absentee_buffer_minutes) {
            continue;
        }

        if !sessions::claim_absentee_marking(pool, session.id, now).await? {
            continue;
        }

        let enrolled = courses::enrolled_student_ids(pool, session.course_id).await?;
        let marked = attendance::mark_absent_missing(pool, session.id, &enrolled).await?;

        sessions::complete_if_open(pool, session.id, now).await?;

        info!(
            session_id = session.id,
            marked_absent = marked,
            "absentee pass finalized session"
        );

        sessions_swept += 1;
        students_marked += marked;
    }

    Ok((sessions_swept, students_marked))
}
