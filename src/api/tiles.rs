use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const TILE_CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

const LOG_WINDOW: Duration = Duration::from_secs(60);
const LOG_LINES_PER_WINDOW: u32 = 5;

/// Fixed-window limiter for repetitive log lines
pub struct LogThrottle {
    window: Duration,
    max: u32,
    state: Mutex<(Instant, u32)>,
}

impl LogThrottle {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let (started, count) = &mut *state;
        if now.saturating_duration_since(*started) >= self.window {
            *started = now;
            *count = 0;
        }
        if *count < self.max {
            *count += 1;
            true
        } else {
            false
        }
    }
}

/// Pass-through for vector tiles.
///
/// Never fails outward: any upstream or decoding problem yields an empty tile
/// so the map renderer keeps drawing.
pub struct TileRelay {
    client: Client,
    upstream: Option<String>,
    throttle: LogThrottle,
}

impl TileRelay {
    /// `upstream` is a URL template with `{z}`, `{x}` and `{y}` placeholders
    pub fn new(upstream: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create tile client")?;
        Ok(Self {
            client,
            upstream,
            throttle: LogThrottle::new(LOG_WINDOW, LOG_LINES_PER_WINDOW),
        })
    }

    pub async fn tile(&self, z: u32, x: u32, y: u32) -> Vec<u8> {
        match self.fetch(z, x, y).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if self.throttle.allow() {
                    error!("Tile {}/{}/{} failed: {:#}", z, x, y, err);
                }
                Vec::new()
            }
        }
    }

    async fn fetch(&self, z: u32, x: u32, y: u32) -> Result<Vec<u8>> {
        let template = self
            .upstream
            .as_deref()
            .context("No tile upstream configured")?;
        if x >= 1 << z.min(31) || y >= 1 << z.min(31) {
            anyhow::bail!("Tile coordinates out of range for zoom {z}");
        }

        let url = tile_url(template, z, x, y);
        debug!("Fetching tile {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Tile upstream unreachable")?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            anyhow::bail!("Tile upstream returned {status}");
        }

        let bytes = response.bytes().await.context("Failed to read tile body")?;
        Ok(bytes.to_vec())
    }
}

pub fn tile_url(template: &str, z: u32, x: u32, y: u32) -> String {
    template
        .replace("{z}", &z.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_five_per_window() {
        let throttle = LogThrottle::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        let allowed = (0..20)
            .filter(|i| throttle.allow_at(start + Duration::from_secs(*i)))
            .count();
        assert_eq!(allowed, 5);

        assert!(throttle.allow_at(start + Duration::from_secs(61)));
    }

    #[test]
    fn template_substitution() {
        assert_eq!(
            tile_url("https://tiles.test/{z}/{x}/{y}.pbf", 14, 8100, 5200),
            "https://tiles.test/14/8100/5200.pbf"
        );
    }

    #[tokio::test]
    async fn missing_upstream_yields_empty_tile() {
        let relay = TileRelay::new(None, Duration::from_secs(1)).unwrap();
        assert!(relay.tile(3, 1, 1).await.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_coordinates_yield_empty_tile() {
        let upstream = Some("http://127.0.0.1:9/{z}/{x}/{y}".to_string());
        let relay = TileRelay::new(upstream, Duration::from_secs(1)).unwrap();
        assert!(relay.tile(1, 5, 0).await.is_empty());
    }
}
