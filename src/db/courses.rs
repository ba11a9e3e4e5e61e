use crate::error::{AttendError, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub professor: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeSlot {
    pub id: i64,
    pub course_id: i64,
    pub weekday: String,
    pub slot_number: i64,
    pub starts: String,
    pub ends: String,
    pub late_threshold_minutes: i64,
    pub is_active: bool,
}

pub async fn create_course(
    pool: &SqlitePool,
    code: &str,
    name: &str,
    professor: Option<&str>,
) -> Result<Course> {
    let id = sqlx::query(
        "INSERT INTO courses (code, name, professor, is_active) VALUES (?, ?, ?, 1)",
    )
    .bind(code)
    .bind(name)
    .bind(professor)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_course(pool, id).await
}

pub async fn get_course(pool: &SqlitePool, id: i64) -> Result<Course> {
    sqlx::query_as::<_, Course>(
        "SELECT id, code, name, professor, is_active FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AttendError::NotFound { what: "Course", id })
}

pub async fn list_courses(pool: &SqlitePool) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT id, code, name, professor, is_active FROM courses ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    Ok(courses)
}

pub async fn enroll_student(pool: &SqlitePool, course_id: i64, student_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO enrollments (course_id, student_id) VALUES (?, ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn unenroll_student(pool: &SqlitePool, course_id: i64, student_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM enrollments WHERE course_id = ? AND student_id = ?")
        .bind(course_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn is_enrolled(pool: &SqlitePool, course_id: i64, student_id: i64) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

pub async fn enrolled_student_ids(pool: &SqlitePool, course_id: i64) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT student_id FROM enrollments WHERE course_id = ? ORDER BY student_id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Create or update the slot at (weekday, slot_number).
pub async fn upsert_time_slot(
    pool: &SqlitePool,
    course_id: i64,
    weekday: &str,
    slot_number: i64,
    starts: &str,
    ends: &str,
    late_threshold_minutes: i64,
) -> Result<TimeSlot> {
    sqlx::query(
        r#"
        INSERT INTO time_slots
            (course_id, weekday, slot_number, starts, ends, late_threshold_minutes, is_active)
        VALUES (?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT (weekday, slot_number) DO UPDATE SET
            course_id = excluded.course_id,
            starts = excluded.starts,
            ends = excluded.ends,
            late_threshold_minutes = excluded.late_threshold_minutes,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(course_id)
    .bind(weekday)
    .bind(slot_number)
    .bind(starts)
    .bind(ends)
    .bind(late_threshold_minutes)
    .execute(pool)
    .await?;

    let slot = sqlx::query_as::<_, TimeSlot>(
        "SELECT id, course_id, weekday, slot_number, starts, ends, late_threshold_minutes, is_active
         FROM time_slots WHERE weekday = ? AND slot_number = ?",
    )
    .bind(weekday)
    .bind(slot_number)
    .fetch_one(pool)
    .await?;

    Ok(slot)
}

pub async fn list_time_slots(pool: &SqlitePool) -> Result<Vec<TimeSlot>> {
    let slots = sqlx::query_as::<_, TimeSlot>(
        r#"
        SELECT id, course_id, weekday, slot_number, starts, ends, late_threshold_minutes, is_active
        FROM time_slots
        ORDER BY CASE weekday
            WHEN 'MONDAY' THEN 1
            WHEN 'TUESDAY' THEN 2
            WHEN 'WEDNESDAY' THEN 3
            WHEN 'THURSDAY' THEN 4
            WHEN 'FRIDAY' THEN 5
            WHEN 'SATURDAY' THEN 6
            WHEN 'SUNDAY' THEN 7
        END, slot_number
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(slots)
}

pub async fn active_slots_for_weekday(pool: &SqlitePool, weekday: &str) -> Result<Vec<TimeSlot>> {
    let slots = sqlx::query_as::<_, TimeSlot>(
        "SELECT id, course_id, weekday, slot_number, starts, ends, late_threshold_minutes, is_active
         FROM time_slots WHERE weekday = ? AND is_active = 1 ORDER BY slot_number",
    )
    .bind(weekday)
    .fetch_all(pool)
    .await?;

    Ok(slots)
}

pub async fn delete_time_slot(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM time_slots WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
