use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, Pool, Postgres, Row};

use crate::metrics;
use crate::queue::{self, JobOptions, JOB_CREATE_NOTIFICATION, QUEUE_NOTIFICATIONS};
use crate::realtime::{self, RealtimeEvent, EVENT_NOTIFICATION};
use crate::views::UserSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    CommentReply,
    Follow,
    AlbumInvite,
    AlbumNewItem,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::CommentReply => "comment_reply",
            Self::Follow => "follow",
            Self::AlbumInvite => "album_invite",
            Self::AlbumNewItem => "album_new_item",
        }
    }

    /// User setting that can silence this type; album activity is always delivered.
    fn setting_column(self) -> Option<&'static str> {
        match self {
            Self::Like => Some("notify_likes"),
            Self::Comment | Self::CommentReply => Some("notify_comments"),
            Self::Follow => Some("notify_follows"),
            Self::AlbumInvite | Self::AlbumNewItem => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub actor_id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub comment_id: Option<String>,
    #[serde(default)]
    pub album_id: Option<String>,
}

impl NewNotification {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            actor_id: actor_id.into(),
            post_id: None,
            comment_id: None,
            album_id: None,
        }
    }

    pub fn with_post(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn with_comment(mut self, comment_id: impl Into<String>) -> Self {
        self.comment_id = Some(comment_id.into());
        self
    }

    pub fn with_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    pub fn is_self_notification(&self) -> bool {
        self.user_id == self.actor_id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub actor: UserSummary,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub album_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    Skipped,
    Queued(String),
    Inserted(NotificationView),
}

/// Creates a notification outside any transaction: queued when the job queue is enabled,
/// otherwise inserted right away.
pub async fn create(
    pool: &Pool<Postgres>,
    queue_enabled: bool,
    notification: &NewNotification,
) -> Result<DeliveryOutcome> {
    if notification.is_self_notification() {
        return Ok(DeliveryOutcome::Skipped);
    }
    if queue_enabled {
        let payload = serde_json::to_value(notification)?;
        let job_id = queue::enqueue(
            pool,
            QUEUE_NOTIFICATIONS,
            JOB_CREATE_NOTIFICATION,
            &payload,
            JobOptions::notifications(),
        )
        .await?;
        return Ok(DeliveryOutcome::Queued(job_id));
    }
    let mut conn = pool.acquire().await?;
    insert(&mut conn, notification).await
}

/// Inserts on `conn`, which may be a transaction, and publishes a realtime event on the
/// same connection.
pub async fn insert(
    conn: &mut PgConnection,
    notification: &NewNotification,
) -> Result<DeliveryOutcome> {
    if notification.is_self_notification() {
        return Ok(DeliveryOutcome::Skipped);
    }

    let recipient = sqlx::query(
        "SELECT notify_likes, notify_comments, notify_follows FROM users WHERE id = $1",
    )
    .bind(&notification.user_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(recipient) = recipient else {
        return Ok(DeliveryOutcome::Skipped);
    };
    if let Some(column) = notification.notification_type.setting_column() {
        let enabled: bool = recipient.try_get(column)?;
        if !enabled {
            return Ok(DeliveryOutcome::Skipped);
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let row = sqlx::query(
        "WITH inserted AS ( \
             INSERT INTO notifications \
             (id, user_id, notification_type, actor_id, post_id, comment_id, album_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, actor_id, created_at) \
         SELECT i.created_at, u.id AS actor_id, u.username AS actor_username, \
                u.avatar_url AS actor_avatar_url \
         FROM inserted i JOIN users u ON u.id = i.actor_id",
    )
    .bind(&id)
    .bind(&notification.user_id)
    .bind(notification.notification_type.as_str())
    .bind(&notification.actor_id)
    .bind(&notification.post_id)
    .bind(&notification.comment_id)
    .bind(&notification.album_id)
    .fetch_one(&mut *conn)
    .await?;

    let view = NotificationView {
        id,
        notification_type: notification.notification_type.as_str().to_string(),
        actor: UserSummary::from_row(&row, "actor_")?,
        post_id: notification.post_id.clone(),
        comment_id: notification.comment_id.clone(),
        album_id: notification.album_id.clone(),
        read: false,
        created_at: row.try_get("created_at")?,
    };

    let data = serde_json::to_value(&view)?;
    realtime::publish(
        &mut *conn,
        &RealtimeEvent::new(&notification.user_id, EVENT_NOTIFICATION, data),
    )
    .await?;
    metrics::inc_notifications_created(notification.notification_type.as_str());
    Ok(DeliveryOutcome::Inserted(view))
}

/// Queue handler for `notifications` jobs.
pub async fn handle_job(pool: &Pool<Postgres>, payload: &Value) -> Result<()> {
    let notification: NewNotification = serde_json::from_value(payload.clone())?;
    let mut conn = pool.acquire().await?;
    insert(&mut conn, &notification).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_camel_case_and_type_key() {
        let notification = NewNotification::new("u1", NotificationType::CommentReply, "u2")
            .with_post("p1")
            .with_comment("c1");
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            value,
            json!({
                "userId": "u1",
                "type": "comment_reply",
                "actorId": "u2",
                "postId": "p1",
                "commentId": "c1",
                "albumId": null,
            })
        );
        let decoded: NewNotification =
            serde_json::from_value(json!({"userId": "u1", "type": "follow", "actorId": "u2"}))
                .unwrap();
        assert_eq!(decoded.notification_type, NotificationType::Follow);
        assert_eq!(decoded.post_id, None);
    }

    #[test]
    fn settings_cover_social_types_only() {
        assert_eq!(NotificationType::Like.setting_column(), Some("notify_likes"));
        assert_eq!(
            NotificationType::CommentReply.setting_column(),
            Some("notify_comments")
        );
        assert_eq!(NotificationType::AlbumInvite.setting_column(), None);
    }

    #[tokio::test]
    async fn self_notifications_are_skipped_before_touching_the_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/heirlink")
            .unwrap();
        let outcome = create(
            &pool,
            true,
            &NewNotification::new("u1", NotificationType::Like, "u1"),
        )
        .await
        .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Skipped);
    }
}
