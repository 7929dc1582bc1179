use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;
use crate::model::{Device, DeviceInfo, RecordSeries};

pub const AVELON_API_BASE: &str = "https://iot.avelon.cloud/api/v1/360/no-auth/devices/";

const RECORDS_SEGMENT: &str = "records";

/// Source of per-device telemetry consumed by the poller.
pub trait TelemetrySource: Send + Sync + 'static {
    fn fetch_device_info(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<DeviceInfo, FetchError>> + Send;

    fn fetch_records(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<Vec<RecordSeries>, FetchError>> + Send;
}

#[derive(Clone)]
pub struct AvelonClient {
    http: Client,
    base: Url,
}

impl AvelonClient {
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(anyhow!("Avelon API base {base} cannot be used as a base URL"));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build Avelon HTTP client")?;
        Ok(Self { http, base })
    }

    /// `<base>/<activationCode>[/<suffix>]`, with the code percent-encoded as one segment.
    fn device_url(&self, device: &Device, suffix: Option<&str>) -> Result<Url, FetchError> {
        let code = device.activation_code();
        if code.trim().is_empty() {
            return Err(FetchError::MissingActivationCode);
        }
        let mut url = self.base.clone();
        // `new` rejects bases without path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(code);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        // The client timeout also covers the body; it stays a transport failure.
        let body = response.bytes().await.map_err(|source| {
            let url = url.to_string();
            if source.is_timeout() {
                FetchError::Transport { url, source }
            } else {
                FetchError::Read { url, source }
            }
        })?;

        serde_json::from_slice(&body)
            .map_err(|source| FetchError::decode(url.as_str(), &body, source))
    }
}

impl TelemetrySource for AvelonClient {
    async fn fetch_device_info(&self, device: &Device) -> Result<DeviceInfo, FetchError> {
        let url = self.device_url(device, None)?;
        self.get_json(url).await
    }

    async fn fetch_records(&self, device: &Device) -> Result<Vec<RecordSeries>, FetchError> {
        let url = self.device_url(device, Some(RECORDS_SEGMENT))?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    const DEVICE_JSON: &str = r#"{
        "id": 1, "name": "Cellar", "serialnumber": "AV-1",
        "batteryLevel": 91.0, "altitude": 412.5, "signalStrength": -67,
        "activationCode": "ABC123",
        "dataPoints": [{"id": 5, "name": "Temp", "decimals": 1, "unit": 3, "iotType": "TEMPERATURE"}]
    }"#;
    const RECORDS_JSON: &str = r#"[{"dataPointId": 5, "values": [{"t": 100, "v": 21.5}, {"t": 200, "v": 22.0}]}]"#;

    async fn device_handler(Path(code): Path<String>) -> (StatusCode, String) {
        match code.as_str() {
            "ABC123" => (StatusCode::OK, DEVICE_JSON.to_string()),
            "a b/c" => (StatusCode::OK, DEVICE_JSON.to_string()),
            "GARBLED" => (StatusCode::OK, "<html>maintenance</html>".to_string()),
            _ => (StatusCode::NOT_FOUND, "unknown device".to_string()),
        }
    }

    async fn records_handler(Path(code): Path<String>) -> (StatusCode, String) {
        match code.as_str() {
            "ABC123" => (StatusCode::OK, RECORDS_JSON.to_string()),
            _ => (StatusCode::OK, r#"{"not": "an array"}"#.to_string()),
        }
    }

    async fn spawn_fake_api() -> Option<Url> {
        let app = Router::new()
            .route("/api/devices/{code}", get(device_handler))
            .route("/api/devices/{code}/records", get(records_handler));
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            // Sandbox environments can block binding attempts.
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return None,
            Err(err) => panic!("failed to bind fake api: {err}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Some(Url::parse(&format!("http://{addr}/api/devices/")).unwrap())
    }

    fn client(base: Url) -> AvelonClient {
        AvelonClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn builds_device_and_records_urls() {
        let client = client(Url::parse(AVELON_API_BASE).unwrap());
        let device = Device::new("ABC123");
        assert_eq!(
            client.device_url(&device, None).unwrap().as_str(),
            "https://iot.avelon.cloud/api/v1/360/no-auth/devices/ABC123"
        );
        assert_eq!(
            client
                .device_url(&device, Some(RECORDS_SEGMENT))
                .unwrap()
                .as_str(),
            "https://iot.avelon.cloud/api/v1/360/no-auth/devices/ABC123/records"
        );
    }

    #[test]
    fn base_without_trailing_slash_builds_same_url() {
        let client = client(Url::parse("https://iot.avelon.cloud/devices").unwrap());
        let url = client.device_url(&Device::new("XYZ"), None).unwrap();
        assert_eq!(url.as_str(), "https://iot.avelon.cloud/devices/XYZ");
    }

    #[test]
    fn activation_code_is_escaped_as_single_segment() {
        let client = client(Url::parse(AVELON_API_BASE).unwrap());
        let url = client.device_url(&Device::new("a b/c"), None).unwrap();
        assert!(url.as_str().ends_with("/devices/a%20b%2Fc"));
    }

    #[test]
    fn rejects_non_base_url() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        assert!(AvelonClient::new(base, Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn empty_activation_code_fails_before_any_request() {
        // Port 9 (discard) would never answer; the error must come from validation.
        let client = client(Url::parse("http://127.0.0.1:9/devices/").unwrap());
        let err = client
            .fetch_device_info(&Device::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MissingActivationCode));
        let err = client.fetch_records(&Device::new("  ")).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingActivationCode));
    }

    #[tokio::test]
    async fn fetches_device_info_and_records() {
        let Some(base) = spawn_fake_api().await else {
            return;
        };
        let client = client(base);
        let device = Device::new("ABC123");

        let info = client.fetch_device_info(&device).await.unwrap();
        assert_eq!(info.battery_level, 91.0);
        assert_eq!(info.signal_strength, -67);
        assert_eq!(info.data_points[0].iot_type, "TEMPERATURE");

        let records = client.fetch_records(&device).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].values.len(), 2);
    }

    #[tokio::test]
    async fn escaped_code_round_trips_through_server() {
        let Some(base) = spawn_fake_api().await else {
            return;
        };
        let info = client(base)
            .fetch_device_info(&Device::new("a b/c"))
            .await
            .unwrap();
        assert_eq!(info.activation_code, "ABC123");
    }

    #[tokio::test]
    async fn unexpected_body_is_a_decode_error() {
        let Some(base) = spawn_fake_api().await else {
            return;
        };
        let client = client(base);

        let err = client
            .fetch_device_info(&Device::new("GARBLED"))
            .await
            .unwrap_err();
        match err {
            FetchError::Decode { body, .. } => assert!(body.contains("maintenance")),
            other => panic!("expected decode error, got {other:?}"),
        }

        let err = client
            .fetch_records(&Device::new("GARBLED"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn error_status_is_a_transport_error() {
        let Some(base) = spawn_fake_api().await else {
            return;
        };
        let err = client(base)
            .fetch_device_info(&Device::new("UNKNOWN"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn timeout_while_reading_body_is_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return,
            Err(err) => panic!("failed to bind: {err}"),
        };
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            // Headers promise more body than is ever sent.
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 64\r\n\r\n{\"id\":")
                .await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let base = Url::parse(&format!("http://{addr}/devices/")).unwrap();
        let client = AvelonClient::new(base, Duration::from_millis(300)).unwrap();
        let err = client
            .fetch_device_info(&Device::new("ABC123"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FetchError::Transport { .. }),
            "expected transport error, got {err:?}"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return,
            Err(err) => panic!("failed to bind: {err}"),
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/devices/")).unwrap();
        let err = client(base)
            .fetch_device_info(&Device::new("ABC123"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
