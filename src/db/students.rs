use crate::engine::{Embedding, GalleryEntry, ScoredTemplate};
use crate::error::{AttendError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub student_code: String,
    pub department: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub student_code: String,
    pub department: Option<String>,
    pub email: Option<String>,
}

pub async fn create_student(pool: &SqlitePool, new: &NewStudent) -> Result<Student> {
    let id = sqlx::query(
        r#"
        INSERT INTO students (name, student_code, department, email, is_active)
        VALUES (?, ?, ?, ?, 1)
        "#,
    )
    .bind(&new.name)
    .bind(&new.student_code)
    .bind(&new.department)
    .bind(&new.email)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_student(pool, id).await
}

pub async fn get_student(pool: &SqlitePool, id: i64) -> Result<Student> {
    sqlx::query_as::<_, Student>(
        "SELECT id, name, student_code, department, email, is_active, created_at
         FROM students WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AttendError::NotFound {
        what: "Student",
        id,
    })
}

pub async fn list_students(pool: &SqlitePool) -> Result<Vec<Student>> {
    let students = sqlx::query_as::<_, Student>(
        "SELECT id, name, student_code, department, email, is_active, created_at
         FROM students ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(students)
}

pub async fn delete_student(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace a student's stored templates with a freshly selected set.
pub async fn replace_embeddings(
    pool: &SqlitePool,
    student_id: i64,
    templates: &[ScoredTemplate],
) -> Result<usize> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM student_embeddings WHERE student_id = ?")
        .bind(student_id)
        .execute(&mut *tx)
        .await?;

    for template in templates {
        let blob = encode_embedding(&template.embedding)?;
        sqlx::query(
            "INSERT INTO student_embeddings (student_id, embedding, quality) VALUES (?, ?, ?)",
        )
        .bind(student_id)
        .bind(blob)
        .bind(template.quality as f64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(templates.len())
}

pub async fn embedding_count(pool: &SqlitePool, student_id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM student_embeddings WHERE student_id = ?")
            .bind(student_id)
            .fetch_one(pool)
            .await?;

    Ok(count)
}

/// Load the recognition gallery: every active student with at least one
/// template, optionally restricted to one course's enrollment.
pub async fn load_gallery(
    pool: &SqlitePool,
    course_id: Option<i64>,
) -> Result<Vec<GalleryEntry>> {
    let rows = match course_id {
        Some(course_id) => {
            sqlx::query(
                r#"
                SELECT s.id, s.name, e.embedding
                FROM students s
                JOIN enrollments en ON en.student_id = s.id AND en.course_id = ?
                JOIN student_embeddings e ON e.student_id = s.id
                WHERE s.is_active = 1
                ORDER BY s.id, e.id
                "#,
            )
            .bind(course_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT s.id, s.name, e.embedding
                FROM students s
                JOIN student_embeddings e ON e.student_id = s.id
                WHERE s.is_active = 1
                ORDER BY s.id, e.id
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut gallery: Vec<GalleryEntry> = Vec::new();
    for row in rows {
        let id: i64 = row.get("id");
        let name: String = row.get("name");
        let blob: Vec<u8> = row.get("embedding");
        let embedding = decode_embedding(&blob)?;

        match gallery.last_mut() {
            Some(entry) if entry.student_id == id => entry.embeddings.push(embedding),
            _ => gallery.push(GalleryEntry {
                student_id: id,
                name,
                embeddings: vec![embedding],
            }),
        }
    }

    Ok(gallery)
}

pub fn encode_embedding(embedding: &Embedding) -> Result<Vec<u8>> {
    bincode::serialize(embedding)
        .map_err(|e| AttendError::Model(format!("Failed to serialize embedding: {}", e)))
}

pub fn decode_embedding(blob: &[u8]) -> Result<Embedding> {
    bincode::deserialize(blob)
        .map_err(|e| AttendError::Model(format!("Failed to deserialize embedding: {}", e)))
}
