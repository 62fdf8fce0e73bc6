use anyhow::{anyhow, Result};
use sqlx::{Pool, Postgres, Row};

use super::{relative_path_from_url, MediaStore};
use crate::media::content_type_from_ext;

/// Columns holding upload URLs that move with the files.
const URL_COLUMNS: [(&str, &str); 4] = [
    ("media", "url"),
    ("stories", "media_url"),
    ("users", "avatar_url"),
    ("albums", "cover_url"),
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub uploaded: u64,
    pub already_present: u64,
    pub missing_locally: u64,
    pub unrecognized: u64,
    pub rewritten: u64,
}

/// Copies local uploads referenced from the database into S3 and rewrites their URLs.
pub async fn migrate_to_s3(
    pool: &Pool<Postgres>,
    store: &MediaStore,
    batch_size: i64,
) -> Result<MigrationReport> {
    if !store.is_s3() {
        return Err(anyhow!(
            "S3 is not configured (S3_BUCKET, S3_REGION, S3_ACCESS_KEY_ID, S3_SECRET_ACCESS_KEY)"
        ));
    }
    let batch_size = batch_size.max(1);
    let already_migrated = format!("{}%", store.public_url(""));
    let mut report = MigrationReport::default();

    for (table, column) in URL_COLUMNS {
        tracing::info!(table, column, "migrating upload urls");
        let mut last_id = String::new();
        let mut batch_no = 0u64;
        loop {
            let rows = sqlx::query(&format!(
                "SELECT id, {column} AS url FROM {table} \
                 WHERE {column} IS NOT NULL AND {column} NOT LIKE $1 AND id > $2 \
                 ORDER BY id ASC LIMIT $3"
            ))
            .bind(&already_migrated)
            .bind(&last_id)
            .bind(batch_size)
            .fetch_all(pool)
            .await?;
            if rows.is_empty() {
                break;
            }
            batch_no += 1;

            for row in &rows {
                let id: String = row.try_get("id")?;
                let url: String = row.try_get("url")?;
                last_id = id.clone();

                let Some(key) = relative_path_from_url(&url).filter(|key| !key.contains("..")) else {
                    tracing::warn!(table, %id, %url, "skipping unrecognized upload url");
                    report.unrecognized += 1;
                    continue;
                };
                if !copy_object(store, &key, &mut report).await? {
                    continue;
                }

                sqlx::query(&format!("UPDATE {table} SET {column} = $1 WHERE id = $2"))
                    .bind(store.public_url(&key))
                    .bind(&id)
                    .execute(pool)
                    .await?;
                report.rewritten += 1;
            }
            tracing::info!(table, batch = batch_no, rows = rows.len(), "batch done");
        }
    }

    tracing::info!(?report, "storage migration complete");
    Ok(report)
}

/// Returns false when the local file is missing and the row must keep its URL.
async fn copy_object(store: &MediaStore, key: &str, report: &mut MigrationReport) -> Result<bool> {
    let path = store.upload_dir().join(key);
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "local file missing");
            report.missing_locally += 1;
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    if store.s3_object_exists(key).await? {
        report.already_present += 1;
        return Ok(true);
    }
    store
        .put_s3(key, content, content_type_from_ext(key))
        .await?;
    report.uploaded += 1;
    tracing::info!(%key, "uploaded");
    Ok(true)
}
