use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Up,
    Down,
    Skipped,
}

impl DependencyStatus {
    pub fn is_available(self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl From<bool> for DependencyStatus {
    fn from(up: bool) -> Self {
        if up {
            Self::Up
        } else {
            Self::Down
        }
    }
}

/// The database is mandatory; optional dependencies only degrade health when configured and down.
pub fn is_healthy(db: DependencyStatus, optional: &[DependencyStatus]) -> bool {
    db == DependencyStatus::Up && optional.iter().all(|status| status.is_available())
}

/// Up only on a 2xx answer within `timeout`.
pub async fn probe_endpoint(client: &reqwest::Client, url: &str, timeout: Duration) -> DependencyStatus {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => DependencyStatus::Up,
        Ok(response) => {
            tracing::warn!(status = %response.status(), %url, "dependency probe returned error status");
            DependencyStatus::Down
        }
        Err(err) => {
            tracing::warn!(error = %err, %url, "dependency probe failed");
            DependencyStatus::Down
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_status(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response =
                format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/health")
    }

    #[test]
    fn skipped_dependencies_do_not_degrade() {
        assert!(is_healthy(
            DependencyStatus::Up,
            &[DependencyStatus::Skipped, DependencyStatus::Up]
        ));
        assert!(!is_healthy(
            DependencyStatus::Up,
            &[DependencyStatus::Down, DependencyStatus::Skipped]
        ));
        assert!(!is_healthy(DependencyStatus::Skipped, &[]));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_down() {
        let client = reqwest::Client::new();
        let status = probe_endpoint(
            &client,
            "http://127.0.0.1:9/health",
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(status, DependencyStatus::Down);
    }

    #[tokio::test]
    async fn error_status_is_down() {
        let client = reqwest::Client::new();
        let url = serve_status("500 Internal Server Error").await;
        let status = probe_endpoint(&client, &url, Duration::from_secs(2)).await;
        assert_eq!(status, DependencyStatus::Down);
    }

    #[tokio::test]
    async fn success_status_is_up() {
        let client = reqwest::Client::new();
        let url = serve_status("200 OK").await;
        let status = probe_endpoint(&client, &url, Duration::from_secs(2)).await;
        assert_eq!(status, DependencyStatus::Up);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DependencyStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
