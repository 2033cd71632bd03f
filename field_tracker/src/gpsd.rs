//! gpsd client position source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use field_trip_lib::position::{Coordinate, PositionSample};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::TcpStream,
};

use crate::{
    error::{Result, TrackerError},
    sampler::{PositionSource, PositionStream},
};

const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true}\n";

/// Reads TPV reports from a gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdPositionSource {
    host: String,
    port: u16,
}

impl GpsdPositionSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl PositionSource for GpsdPositionSource {
    async fn watch(&self) -> Result<PositionStream> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TrackerError::PermissionDenied(format!("Failed to connect to gpsd at {}:{}: {}", self.host, self.port, e)))?;

        stream
            .write_all(WATCH_COMMAND.as_bytes())
            .await
            .map_err(|e| TrackerError::PermissionDenied(format!("Failed to send WATCH command: {}", e)))?;

        tracing::info!("Watching gpsd at {}:{}", self.host, self.port);

        let lines = BufReader::new(stream).lines();
        Ok(Box::pin(futures::stream::unfold(Some(lines), next_fix)))
    }
}

async fn next_fix(lines: Option<Lines<BufReader<TcpStream>>>) -> Option<(Result<PositionSample>, Option<Lines<BufReader<TcpStream>>>)> {
    let mut lines = lines?;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(sample) = parse_tpv(&line) {
                    return Some((Ok(sample), Some(lines)));
                }
            },
            Ok(None) => return Some((Err(TrackerError::NetworkTransient("gpsd closed the connection".to_string())), None)),
            Err(e) => return Some((Err(TrackerError::NetworkTransient(format!("Failed to read from gpsd: {}", e))), None)),
        }
    }
}

/// Time Position Velocity report. Other classes are ignored.
#[derive(Debug, Deserialize)]
struct Tpv {
    class: String,
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "altHAE")]
    alt_hae: Option<f64>,
    alt: Option<f64>,
    track: Option<f64>,
    speed: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

/// Parses a gpsd JSON line into a sample. Only TPV reports with at least a 2D
/// fix produce one.
pub fn parse_tpv(line: &str) -> Option<PositionSample> {
    let tpv: Tpv = match serde_json::from_str(line) {
        Ok(tpv) => tpv,
        Err(e) => {
            tracing::trace!("Skipping gpsd line: {}", e);
            return None;
        }
    };

    if tpv.class != "TPV" || tpv.mode < 2 {
        return None;
    }

    let position = Coordinate::new(tpv.lat?, tpv.lon?);

    // Unknown error estimates are reported as 0.
    let accuracy = tpv
        .eph
        .or_else(|| match (tpv.epx, tpv.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(0.0);

    let mut sample = PositionSample::new(position, accuracy, tpv.time.unwrap_or_else(Utc::now))
        .with_motion(tpv.speed, tpv.track);
    if tpv.mode >= 3 {
        sample.altitude = tpv.alt_hae.or(tpv.alt);
    }

    Some(sample)
}
