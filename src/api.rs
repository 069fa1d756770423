//! Client for the dashboard server's display endpoint
//!
//! One fetch is two sequential HTTP exchanges, each on its own connection:
//!
//! 1. `GET {server}/api/display` with the device headers, answered by a small
//!    JSON envelope `{status, image_url, refresh_rate}`
//! 2. `GET {image_url}` for the bitmap itself, unless the server said there
//!    is nothing new (`status` 202)
//!
//! The first exchange is bounded by a fixed deadline. The image stream is
//! bounded by an idle timeout that restarts after every chunk received, so a
//! slow but steady transfer is not cut off.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::Write as FmtWrite;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::battery::format_voltage;
use crate::clock::{Clock, TimedOut, with_timeout};
use crate::config::{Config, DEFAULT_REFRESH_INTERVAL, FW_VERSION};
use crate::http::{self, Connector, HttpError, Url};

/// Deadline for the display request, connect to last body byte
pub const API_TIMEOUT_MS: u32 = 30_000;
/// Longest the image stream may go without delivering a byte
pub const IMAGE_IDLE_TIMEOUT_MS: u32 = 60_000;
/// Largest image accepted, checked against Content-Length before allocating
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;
/// Largest JSON envelope accepted
pub const MAX_JSON_SIZE: usize = 16 * 1024;

const API_PATH: &str = "/api/display";
const STATUS_NO_UPDATE: i64 = 202;

/// Failures of a display fetch
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("WiFi not connected")]
    WifiNotConnected,
    #[error("HTTP request failed: {code}")]
    RequestFailed { code: u16 },
    #[error("Unauthorized: invalid API key")]
    Unauthorized,
    #[error("Forbidden: access denied")]
    Forbidden,
    #[error("API endpoint not found")]
    NotFound,
    #[error("HTTP 4xx error: {code}")]
    ClientError { code: u16 },
    #[error("HTTP 5xx error: {code}")]
    ServerError { code: u16 },
    #[error("JSON parse error")]
    JsonParseFailed,
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("Image download failed (HTTP {code})")]
    DownloadFailed { code: u16 },
    #[error("Request timed out")]
    Timeout,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Image exceeds maximum size")]
    ImageTooLarge,
}

impl From<HttpError> for ApiError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::InvalidUrl => ApiError::InvalidUrl,
            _ => ApiError::RequestFailed { code: 0 },
        }
    }
}

/// Map a non-success HTTP status of the display request to its error
fn status_error(code: u16) -> ApiError {
    match code {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        400..=499 => ApiError::ClientError { code },
        500.. => ApiError::ServerError { code },
        _ => ApiError::RequestFailed { code },
    }
}

/// Update indicator reported by the server in the `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// A new image is available
    Success,
    /// Nothing changed since the last fetch
    NoUpdate,
    /// Any other status value
    OtherError,
}

impl ServerStatus {
    fn from_code(code: i64) -> Self {
        match code {
            0 => ServerStatus::Success,
            STATUS_NO_UPDATE => ServerStatus::NoUpdate,
            _ => ServerStatus::OtherError,
        }
    }
}

/// Device state reported in the request headers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub battery_volts: Option<f32>,
    pub rssi: Option<i8>,
    /// WiFi association state at fetch time
    pub joined: bool,
}

/// Everything one fetch produced
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub outcome: Result<(), ApiError>,
    /// Status of the last HTTP response seen, 0 if none
    pub http_status: u16,
    /// Downloaded bitmap; empty unless the whole image arrived
    pub image: Vec<u8>,
    pub image_url: String,
    /// Refresh interval sent by the server, if it sent a usable one
    pub refresh_rate: Option<u32>,
    pub server_status: Option<ServerStatus>,
}

impl FetchResult {
    fn new() -> Self {
        Self {
            outcome: Ok(()),
            http_status: 0,
            image: Vec::new(),
            image_url: String::new(),
            refresh_rate: None,
            server_status: None,
        }
    }

    fn fail(mut self, error: ApiError) -> Self {
        log::warn!("Display fetch failed: {} (HTTP {})", error, self.http_status);
        self.image = Vec::new();
        self.outcome = Err(error);
        self
    }

    /// Server refresh interval, 1800 s if it did not send one
    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate_or(DEFAULT_REFRESH_INTERVAL)
    }

    /// Server refresh interval, `fallback` if it did not send one
    pub fn refresh_rate_or(&self, fallback: u32) -> u32 {
        self.refresh_rate.unwrap_or(fallback)
    }

    /// Whether there is a new image to render
    pub fn has_update(&self) -> bool {
        self.outcome.is_ok() && self.server_status != Some(ServerStatus::NoUpdate)
    }

    /// Human readable outcome
    pub fn message(&self) -> String {
        match (&self.outcome, self.server_status) {
            (Err(e), _) => e.to_string(),
            (Ok(()), Some(ServerStatus::NoUpdate)) => "No update available".to_string(),
            (Ok(()), _) => "Display fetched successfully".to_string(),
        }
    }
}

/// Parsed display envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayResponse {
    pub status: ServerStatus,
    /// Absent only for `NoUpdate`
    pub image_url: Option<String>,
    pub refresh_rate: Option<u32>,
}

#[derive(Deserialize)]
struct RawDisplayResponse {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    image_url: Value,
    #[serde(default)]
    refresh_rate: Value,
}

/// Parse the JSON body of the display request
pub fn parse_display_response(body: &[u8]) -> Result<DisplayResponse, ApiError> {
    let raw: RawDisplayResponse =
        serde_json::from_slice(body).map_err(|_| ApiError::JsonParseFailed)?;

    let code = raw
        .status
        .as_i64()
        .ok_or(ApiError::MissingRequiredField("status"))?;
    let status = ServerStatus::from_code(code);
    let refresh_rate = parse_refresh_rate(&raw.refresh_rate);

    if status == ServerStatus::NoUpdate {
        return Ok(DisplayResponse {
            status,
            image_url: None,
            refresh_rate,
        });
    }

    let image_url = match raw.image_url.as_str() {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ApiError::MissingRequiredField("image_url")),
    };

    Ok(DisplayResponse {
        status,
        image_url: Some(image_url),
        refresh_rate,
    })
}

/// `refresh_rate` may be a number or a numeric string; zero counts as absent
fn parse_refresh_rate(value: &Value) -> Option<u32> {
    let seconds = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    seconds.filter(|&s| s > 0)
}

/// `{server}/api/display` with any trailing slash on the server URL removed
pub fn build_api_url(server_url: &str) -> String {
    let mut url = String::with_capacity(server_url.len() + API_PATH.len());
    url.push_str(server_url.strip_suffix('/').unwrap_or(server_url));
    url.push_str(API_PATH);
    url
}

/// Fetch the current display from the server and download its image.
///
/// Never fails as such: the outcome is recorded in the returned
/// [`FetchResult`].
pub async fn fetch_display<K, C>(
    connector: &mut K,
    clock: &C,
    config: &Config,
    telemetry: &Telemetry,
) -> FetchResult
where
    K: Connector,
    C: Clock,
{
    let mut result = FetchResult::new();

    if !telemetry.joined {
        return result.fail(ApiError::WifiNotConnected);
    }

    let api_url = build_api_url(&config.server_url);
    let Ok(url) = Url::parse(&api_url) else {
        return result.fail(ApiError::InvalidUrl);
    };

    let mut refresh: heapless::String<10> = heapless::String::new();
    let _ = write!(refresh, "{}", config.refresh_interval);
    let battery = format_voltage(telemetry.battery_volts);
    let mut rssi: heapless::String<4> = heapless::String::new();
    let _ = write!(rssi, "{}", telemetry.rssi.unwrap_or(0));

    let headers = [
        ("ID", config.device_id.as_str()),
        ("Access-Token", config.api_key.as_str()),
        ("Refresh-Rate", refresh.as_str()),
        ("Battery-Voltage", battery.as_str()),
        ("FW-Version", FW_VERSION),
        ("RSSI", rssi.as_str()),
    ];

    log::info!("Fetching display from {}", api_url);
    let exchange = with_timeout(
        clock,
        API_TIMEOUT_MS,
        api_exchange(
            connector,
            &url,
            config.use_insecure_tls,
            &headers,
            &mut result.http_status,
        ),
    )
    .await;

    let body = match exchange {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => return result.fail(e),
        Err(TimedOut) => return result.fail(ApiError::Timeout),
    };

    let response = match parse_display_response(&body) {
        Ok(response) => response,
        Err(e) => return result.fail(e),
    };
    result.server_status = Some(response.status);
    result.refresh_rate = response.refresh_rate;

    let Some(image_url) = response.image_url else {
        log::info!("No update (server refresh rate {:?})", result.refresh_rate);
        return result;
    };
    if response.status == ServerStatus::OtherError {
        log::warn!("Server reported an error status, downloading anyway");
    }
    result.image_url = image_url;

    match download_image(
        connector,
        clock,
        &result.image_url,
        config.use_insecure_tls,
        &mut result.http_status,
    )
    .await
    {
        Ok(image) => {
            log::info!("Downloaded {} byte image", image.len());
            result.image = image;
            result
        }
        Err(e) => result.fail(e),
    }
}

/// Display request on its own connection; returns the JSON body.
/// The connection is released when this returns.
async fn api_exchange<K: Connector>(
    connector: &mut K,
    url: &Url<'_>,
    insecure_tls: bool,
    headers: &[(&str, &str)],
    http_status: &mut u16,
) -> Result<Vec<u8>, ApiError> {
    let conn = connector.connect(url, insecure_tls).await?;
    let mut response = http::get(conn, url, headers).await?;
    *http_status = response.status;

    match response.status {
        200 | 202 => {}
        code => return Err(status_error(code)),
    }

    response
        .read_to_end(MAX_JSON_SIZE)
        .await
        .map_err(|e| match e {
            HttpError::TooLarge | HttpError::Parse => ApiError::JsonParseFailed,
            other => other.into(),
        })
}

/// Download an image that must arrive with a Content-Length.
///
/// Returns the complete image or nothing: a short or stalled stream discards
/// whatever was received.
pub async fn download_image<K, C>(
    connector: &mut K,
    clock: &C,
    image_url: &str,
    insecure_tls: bool,
    http_status: &mut u16,
) -> Result<Vec<u8>, ApiError>
where
    K: Connector,
    C: Clock,
{
    let url = Url::parse(image_url).map_err(|_| ApiError::InvalidUrl)?;

    log::info!("Downloading image from {}", image_url);
    let head = with_timeout(clock, IMAGE_IDLE_TIMEOUT_MS, async {
        let conn = connector.connect(&url, insecure_tls).await?;
        http::get(conn, &url, &[]).await
    })
    .await;

    let mut response = match head {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(e.into()),
        Err(TimedOut) => return Err(ApiError::Timeout),
    };
    *http_status = response.status;

    if response.status != 200 {
        return Err(ApiError::DownloadFailed {
            code: response.status,
        });
    }

    let code = response.status;
    let length = match response.content_length {
        Some(len) if len > 0 => len,
        _ => {
            log::warn!("Image response has no content length");
            return Err(ApiError::DownloadFailed { code });
        }
    };
    if length > MAX_IMAGE_SIZE {
        log::warn!("Image of {} bytes exceeds {}", length, MAX_IMAGE_SIZE);
        return Err(ApiError::ImageTooLarge);
    }

    let mut image = Vec::new();
    if image.try_reserve_exact(length).is_err() {
        log::error!("Cannot allocate {} bytes for image", length);
        return Err(ApiError::DownloadFailed { code });
    }
    image.resize(length, 0);

    let mut received = 0;
    while received < length {
        match with_timeout(
            clock,
            IMAGE_IDLE_TIMEOUT_MS,
            response.read(&mut image[received..]),
        )
        .await
        {
            Ok(Ok(0)) => {
                log::warn!("Image stream closed after {} of {} bytes", received, length);
                break;
            }
            Ok(Ok(n)) => received += n,
            Ok(Err(e)) => {
                log::warn!("Image read failed after {} bytes: {}", received, e);
                break;
            }
            Err(TimedOut) => {
                log::warn!(
                    "Image stream idle for {}ms after {} of {} bytes",
                    IMAGE_IDLE_TIMEOUT_MS,
                    received,
                    length
                );
                break;
            }
        }
    }

    if received != length {
        return Err(ApiError::DownloadFailed { code });
    }
    Ok(image)
}
