use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{APPOINTMENT_COLUMNS, AppState, AppointmentRow, AppointmentStatus, ApiOk, OkData},
    storage::{AttachmentStore, sanitize_file_name},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat/{room_id}", get(get_room))
        .route("/chat/{room_id}/messages", get(list_messages))
        .route("/chat/{room_id}/send", post(send_message))
        .route("/chat/{room_id}/message/{message_id}", delete(delete_message))
        .route("/chat/{room_id}/attachments", post(upload_attachment))
        .route(
            "/chat/{room_id}/attachments/{attachment_id}",
            get(download_attachment),
        )
}

pub const MAX_MESSAGE_CHARS: usize = 4000;

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AttachmentBrief {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageDto {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentBrief>,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    message_id: Uuid,
    sender_id: Uuid,
    sender_name: String,
    content: String,
    sent_at: DateTime<Utc>,
    attachment_id: Option<Uuid>,
    file_name: Option<String>,
    content_type: Option<String>,
    size_bytes: Option<i64>,
}

impl From<MessageRow> for ChatMessageDto {
    fn from(r: MessageRow) -> Self {
        let attachment = match (r.attachment_id, r.file_name, r.content_type, r.size_bytes) {
            (Some(id), Some(file_name), Some(content_type), Some(size_bytes)) => Some(AttachmentBrief {
                id,
                file_name,
                content_type,
                size_bytes,
            }),
            _ => None,
        };
        Self {
            id: r.message_id,
            sender_id: r.sender_id,
            sender_name: r.sender_name,
            content: r.content,
            sent_at: r.sent_at,
            attachment,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoomData {
    pub room_id: String,
    pub appointment_id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub status: AppointmentStatus,
    /// Only accepted appointments take new messages.
    pub open: bool,
    pub messages: Vec<ChatMessageDto>,
}

#[derive(Debug, Serialize)]
pub struct MessagesData {
    pub room_id: String,
    pub messages: Vec<ChatMessageDto>,
}

// sender names resolved from the account table
const MESSAGE_SELECT: &str = r#"
    SELECT m.message_id, m.sender_id, a.name AS sender_name, m.content, m.sent_at,
           m.attachment_id, f.file_name, f.content_type, f.size_bytes
    FROM chat_message m
    JOIN account a ON a.account_id = m.sender_id
    LEFT JOIN chat_attachment f ON f.attachment_id = m.attachment_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRow {
    file_name: String,
    content_type: String,
    storage_key: String,
}

/* ============================================================
   Room access
   ============================================================ */

async fn load_room(state: &AppState, room_id: &str) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE chat_room_id = $1"
    ))
    .bind(room_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("chat room"))
}

/// Admins may read any room; only the two participants may post.
fn ensure_reader(auth: &AuthContext, appt: &AppointmentRow) -> Result<(), ApiError> {
    if auth.is_admin() || appt.involves(auth.account_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you are not a participant of this chat".into(),
        ))
    }
}

fn ensure_writer(auth: &AuthContext, appt: &AppointmentRow) -> Result<(), ApiError> {
    if !appt.involves(auth.account_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you are not a participant of this chat".into(),
        ));
    }
    if appt.status != AppointmentStatus::Accepted {
        return Err(ApiError::Conflict(
            "CHAT_CLOSED",
            format!("appointment is {}; chat is closed", appt.status.as_str()),
        ));
    }
    Ok(())
}

pub(crate) fn validate_content(raw: &str) -> Result<String, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::validation("message content is required"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

fn content_disposition(file_name: &str) -> String {
    format!("attachment; filename=\"{}\"", sanitize_file_name(file_name))
}

async fn fetch_messages(state: &AppState, room_id: &str) -> Result<Vec<ChatMessageDto>, ApiError> {
    let rows: Vec<MessageRow> = sqlx::query_as::<_, MessageRow>(&format!(
        r#"
        {MESSAGE_SELECT}
        WHERE m.room_id = $1
        ORDER BY m.sent_at ASC, m.message_id ASC
        "#
    ))
    .bind(room_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(rows.into_iter().map(ChatMessageDto::from).collect())
}

async fn fetch_message(state: &AppState, message_id: Uuid) -> Result<ChatMessageDto, ApiError> {
    let row: MessageRow = sqlx::query_as::<_, MessageRow>(&format!(
        "{MESSAGE_SELECT} WHERE m.message_id = $1"
    ))
    .bind(message_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("message"))?;

    Ok(row.into())
}

/* ============================================================
   Reading
   ============================================================ */

pub async fn get_room(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(room_id): Path<String>,
) -> Result<Json<ApiOk<RoomData>>, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_reader(&auth, &appt)?;
    let messages = fetch_messages(&state, &room_id).await?;

    Ok(Json(ApiOk::new(RoomData {
        room_id,
        appointment_id: appt.appointment_id,
        user_id: appt.user_id,
        doctor_id: appt.doctor_id,
        doctor_name: appt.doctor_name,
        status: appt.status,
        open: appt.status == AppointmentStatus::Accepted,
        messages,
    })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(room_id): Path<String>,
) -> Result<Json<ApiOk<MessagesData>>, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_reader(&auth, &appt)?;
    let messages = fetch_messages(&state, &room_id).await?;
    Ok(Json(ApiOk::new(MessagesData { room_id, messages })))
}

/* ============================================================
   Writing
   ============================================================ */

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(room_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ApiOk<ChatMessageDto>>, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_writer(&auth, &appt)?;
    let content = validate_content(&req.content)?;

    let message_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO chat_message (message_id, room_id, sender_id, content)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(message_id)
    .bind(&room_id)
    .bind(auth.account_id)
    .bind(content)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(fetch_message(&state, message_id).await?)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((room_id, message_id)): Path<(String, Uuid)>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_reader(&auth, &appt)?;

    #[derive(sqlx::FromRow)]
    struct Owned {
        sender_id: Uuid,
        attachment_id: Option<Uuid>,
    }

    let msg: Owned = sqlx::query_as::<_, Owned>(
        "SELECT sender_id, attachment_id FROM chat_message WHERE message_id = $1 AND room_id = $2",
    )
    .bind(message_id)
    .bind(&room_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("message"))?;

    if msg.sender_id != auth.account_id {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you can only delete your own messages".into(),
        ));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query("DELETE FROM chat_message WHERE message_id = $1")
        .bind(message_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    let storage_key: Option<String> = match msg.attachment_id {
        Some(attachment_id) => sqlx::query_scalar(
            "DELETE FROM chat_attachment WHERE attachment_id = $1 RETURNING storage_key",
        )
        .bind(attachment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?,
        None => None,
    };

    tx.commit().await.map_err(ApiError::db)?;

    if let Some(key) = storage_key {
        remove_files(&state.attachments, &[key]).await;
    }

    Ok(Json(OkData::message("Message deleted")))
}

/// Delete every message and attachment row of `room_ids` on the caller's
/// transaction. Returns the storage keys to remove once it commits.
pub(crate) async fn purge_rooms(
    conn: &mut sqlx::PgConnection,
    room_ids: &[String],
) -> Result<Vec<String>, ApiError> {
    if room_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query("DELETE FROM chat_message WHERE room_id = ANY($1)")
        .bind(room_ids)
        .execute(&mut *conn)
        .await
        .map_err(ApiError::db)?;

    sqlx::query_scalar("DELETE FROM chat_attachment WHERE room_id = ANY($1) RETURNING storage_key")
        .bind(room_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(ApiError::db)
}

pub(crate) async fn remove_files(store: &AttachmentStore, keys: &[String]) {
    for key in keys {
        if let Err(e) = store.remove(key).await {
            tracing::warn!(error = %e, %key, "failed to remove attachment file");
        }
    }
}

/* ============================================================
   Attachments
   ============================================================ */

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::validation(e.body_text())
    }
}

/// Multipart form with a `file` part and an optional `caption` part.
pub async fn upload_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(room_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ApiOk<ChatMessageDto>>, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_writer(&auth, &appt)?;

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut caption: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("caption") => {
                let text = field.text().await.map_err(multipart_error)?;
                caption = Some(validate_content(&text)?);
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, bytes)) = file else {
        return Err(ApiError::validation("multipart field `file` is required"));
    };

    let storage_key = state.attachments.save(&room_id, &bytes).await?;
    let attachment_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();
    let content = caption.unwrap_or_else(|| format!("Sent a file: {file_name}"));

    let stored: Result<(), sqlx::Error> = async {
        let mut tx = state.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_attachment
                (attachment_id, room_id, uploader_id, file_name, content_type, size_bytes, storage_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(attachment_id)
        .bind(&room_id)
        .bind(auth.account_id)
        .bind(&file_name)
        .bind(&content_type)
        .bind(bytes.len() as i64)
        .bind(&storage_key)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chat_message (message_id, room_id, sender_id, content, attachment_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message_id)
        .bind(&room_id)
        .bind(auth.account_id)
        .bind(&content)
        .bind(attachment_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
    .await;

    if let Err(e) = stored {
        // no row points at the file
        if let Err(rm) = state.attachments.remove(&storage_key).await {
            tracing::warn!(error = %rm, key = %storage_key, "failed to remove orphaned attachment");
        }
        return Err(ApiError::db(e));
    }

    tracing::info!(%attachment_id, %room_id, size = bytes.len(), "attachment uploaded");
    Ok(Json(ApiOk::new(fetch_message(&state, message_id).await?)))
}

pub async fn download_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((room_id, attachment_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let appt = load_room(&state, &room_id).await?;
    ensure_reader(&auth, &appt)?;

    let att: AttachmentRow = sqlx::query_as::<_, AttachmentRow>(
        r#"
        SELECT file_name, content_type, storage_key
        FROM chat_attachment
        WHERE attachment_id = $1 AND room_id = $2
        "#,
    )
    .bind(attachment_id)
    .bind(&room_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("attachment"))?;

    let bytes = state.attachments.read(&att.storage_key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, att.content_type),
            (header::CONTENT_DISPOSITION, content_disposition(&att.file_name)),
        ],
        bytes,
    ))
}
