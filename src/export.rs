//! CSV export of a session's attendance sheet.

use crate::error::Result;
use sqlx::{Row, SqlitePool};
use std::io::Write;

/// Write one row per attendance record, joined with student details.
/// Returns the number of data rows written.
pub async fn write_session_csv<W: Write>(
    pool: &SqlitePool,
    session_id: i64,
    writer: W,
) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT s.student_code, s.name, a.status, a.check_in_time, a.last_seen_time,
               a.confidence, a.method
        FROM attendance a
        JOIN students s ON s.id = a.student_id
        WHERE a.session_id = ?
        ORDER BY s.student_code
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "student_code",
        "name",
        "status",
        "check_in_time",
        "last_seen_time",
        "confidence",
        "method",
    ])?;

    let mut written = 0usize;
    for row in &rows {
        let confidence: Option<f64> = row.get("confidence");
        csv_writer.write_record([
            row.get::<String, _>("student_code"),
            row.get::<String, _>("name"),
            row.get::<String, _>("status"),
            row.get::<Option<String>, _>("check_in_time").unwrap_or_default(),
            row.get::<Option<String>, _>("last_seen_time").unwrap_or_default(),
            confidence.map(|c| format!("{:.3}", c)).unwrap_or_default(),
            row.get::<String, _>("method"),
        ])?;
        written += 1;
    }

    csv_writer.flush()?;
    Ok(written)
}
