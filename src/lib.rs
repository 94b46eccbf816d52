pub mod batch;
pub mod config;
pub mod duration;
pub mod pagespeed;
pub mod report;
pub mod sites;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use tracing::info;

use crate::batch::run_batch;
use crate::config::RunSettings;
use crate::pagespeed::{HttpSpeedSource, Measurement, PageSpeedEndpoint, SpeedFetcher};
use crate::sites::load_sites;

/// Measure every site listed in `sites_path` against the PageSpeed API.
///
/// Settings are validated before the site list is read, so a bad duration or
/// a missing API key fails without touching the network.
pub async fn measure_site_list(
    sites_path: &Path,
    settings: &RunSettings,
) -> Result<Vec<Measurement>> {
    let api_key = settings
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("An API key is required (pass --api-key or set api_key in the config)")?;
    let plan = settings.batch_plan()?;
    let retry_delay = settings.retry_delay()?;
    let timeout = settings.request_timeout()?;
    let endpoint = PageSpeedEndpoint::parse(&settings.endpoint)?;

    let sites = load_sites(sites_path)?;
    info!(path = %sites_path.display(), sites = sites.len(), "loaded site list");

    let source = HttpSpeedSource::new(timeout, &settings.user_agent)?;
    let fetcher = Arc::new(SpeedFetcher::new(source, endpoint, api_key, retry_delay));
    run_batch(fetcher, sites, &plan).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::pagespeed::today;
    use crate::report::render_yaml;

    type Responder = fn(&str) -> Option<(u16, String)>;

    fn lighthouse_body() -> String {
        json!({
            "lighthouseResult": {
                "audits": {
                    "first-meaningful-paint": { "displayValue": "2.1\u{a0}s" },
                    "interactive": { "displayValue": "3.4\u{a0}s" },
                    "speed-index": { "displayValue": "1.0\u{a0}s" },
                    "first-contentful-paint": { "displayValue": "0.9\u{a0}s" }
                }
            }
        })
        .to_string()
    }

    /// Serve canned responses on loopback; `None` holds the connection open
    /// without answering.
    async fn start_api(respond: Responder) -> Result<(String, Arc<AtomicUsize>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0_u8; 1024];
                    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => request.extend_from_slice(&chunk[..read]),
                        }
                    }
                    let head = String::from_utf8_lossy(&request).into_owned();
                    let target = head.split_whitespace().nth(1).unwrap_or_default();
                    match respond(target) {
                        Some((status, body)) => {
                            let reason = match status {
                                200 => "OK",
                                403 => "Forbidden",
                                _ => "Internal Server Error",
                            };
                            let response = format!(
                                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                                body.len()
                            );
                            let _ = stream.write_all(response.as_bytes()).await;
                            let _ = stream.shutdown().await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });

        Ok((format!("http://{addr}/runPagespeed"), connections))
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn write_two_sites(dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join("sites.txt");
        fs::write(&path, "\"http://a.com\",\n\"http://b.com\",\n")?;
        Ok(path)
    }

    fn settings_for(endpoint: String) -> RunSettings {
        RunSettings {
            endpoint,
            api_key: Some("X".into()),
            delay: "0s".into(),
            retry_delay: "0s".into(),
            request_timeout: "5s".into(),
            ..RunSettings::default()
        }
    }

    #[tokio::test]
    async fn two_sites_produce_two_dated_blocks() -> Result<()> {
        let (endpoint, connections) = start_api(|target| {
            if target.contains("key=X") {
                Some((200, lighthouse_body()))
            } else {
                Some((403, "{}".to_string()))
            }
        })
        .await?;
        let dir = tempdir()?;
        let sites = write_two_sites(dir.path())?;

        let measurements = measure_site_list(&sites, &settings_for(endpoint)).await?;

        assert_eq!(measurements.len(), 2);
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        let urls: HashSet<_> = measurements.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(urls, HashSet::from(["http://a.com", "http://b.com"]));
        assert!(measurements.iter().all(|m| m.time_to_interactive == 3.4));

        let report = render_yaml(&measurements);
        assert!(report.starts_with("---\n"));
        assert_eq!(report.matches("- date: ").count(), 2);
        assert_eq!(report.matches(&format!("- date: {}\n", today())).count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn server_error_body_is_decoded_and_warned() -> Result<()> {
        let (endpoint, _) = start_api(|target| {
            if target.contains("b.com") {
                let body = json!({ "error": { "code": 500, "message": "backend error" } });
                Some((500, body.to_string()))
            } else {
                Some((200, lighthouse_body()))
            }
        })
        .await?;
        let dir = tempdir()?;
        let sites = write_two_sites(dir.path())?;

        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let measurements = measure_site_list(&sites, &settings_for(endpoint)).await?;

        assert_eq!(measurements.len(), 2);
        let failed = measurements
            .iter()
            .find(|m| m.url == "http://b.com")
            .expect("b.com measured");
        assert_eq!(failed.first_meaningful_paint, 0.0);
        assert_eq!(failed.time_to_interactive, 0.0);
        assert_eq!(failed.speed_index, 0.0);
        assert_eq!(failed.first_contentful_paint, 0.0);
        let ok = measurements
            .iter()
            .find(|m| m.url == "http://a.com")
            .expect("a.com measured");
        assert_eq!(ok.speed_index, 1.0);

        let logs = String::from_utf8_lossy(&capture.0.lock().unwrap()).into_owned();
        assert!(logs.contains("non-success status"));
        assert!(logs.contains("500"));
        assert!(logs.contains("unable to parse metric"));
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_request_is_retried_once_then_fails() -> Result<()> {
        let (endpoint, connections) = start_api(|_| None).await?;
        let dir = tempdir()?;
        let path = dir.path().join("sites.txt");
        fs::write(&path, "\"http://slow.com\",\n")?;
        let settings = RunSettings {
            request_timeout: "200ms".into(),
            ..settings_for(endpoint)
        };

        let err = measure_site_list(&path, &settings).await.unwrap_err();

        assert!(err.to_string().contains("http://slow.com after retry"));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_reading_sites() {
        let settings = RunSettings::default();
        let err = measure_site_list(Path::new("/nonexistent/sites.txt"), &settings)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key is required"));
    }

    #[tokio::test]
    async fn malformed_delay_fails_before_reading_sites() {
        let settings = RunSettings {
            api_key: Some("X".into()),
            delay: "1.5".into(),
            ..RunSettings::default()
        };
        let err = measure_site_list(Path::new("/nonexistent/sites.txt"), &settings)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid delay"));
    }

    #[tokio::test]
    async fn unreadable_site_list_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let settings = RunSettings {
            api_key: Some("X".into()),
            ..RunSettings::default()
        };
        let err = measure_site_list(&dir.path().join("absent.txt"), &settings)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unable to read site list"));
    }

    #[tokio::test]
    async fn empty_site_list_produces_no_requests() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sites.txt");
        fs::write(&path, "")?;
        let settings = RunSettings {
            api_key: Some("X".into()),
            endpoint: "http://127.0.0.1:9/unused".into(),
            ..RunSettings::default()
        };

        let measurements = measure_site_list(&path, &settings).await?;
        assert!(measurements.is_empty());
        Ok(())
    }
}
