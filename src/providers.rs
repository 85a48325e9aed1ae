use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Duration;

use crate::models::TrainStatus;

const VIAGGIATRENO_BASE: &str = "http://www.viaggiatreno.it/infomobilita/resteasy/viaggiatreno";
const TRENORD_BASE: &str = "https://www.trenord.it/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which upstream owns the status of a given train. Selected by the
/// `provider` tag on the stored record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Provider {
    Trenitalia,
    Trenord,
}

impl Provider {
    pub fn from_tag(tag: &str) -> Option<Provider> {
        match tag.to_ascii_lowercase().as_str() {
            "trenitalia" | "viaggiatreno" => Some(Provider::Trenitalia),
            "trenord" => Some(Provider::Trenord),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ProviderError {
    Transport(reqwest::Error),
    Status(u16),
    /// The provider does not know the train number.
    UnknownTrain,
    Decode(String),
}

/// Volatile fields a provider may refresh between client updates.
/// `None` means the upstream did not report the field; the stored
/// value stays.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusRefresh {
    pub delay_minutes: Option<i32>,
    pub next_station: Option<String>,
    pub next_platform: Option<String>,
    pub seconds_to_next_station: Option<i64>,
    pub last_seen_station: Option<String>,
    pub last_seen_at: Option<i64>,
}

impl StatusRefresh {
    pub fn apply(&self, status: &mut TrainStatus) {
        if let Some(delay) = self.delay_minutes {
            status.delay_minutes = delay;
        }
        if let Some(ref station) = self.next_station {
            status.next_station = station.clone();
        }
        if let Some(ref platform) = self.next_platform {
            status.next_platform = platform.clone();
        }
        if let Some(eta) = self.seconds_to_next_station {
            status.seconds_to_next_station = eta;
        }
        if let Some(ref station) = self.last_seen_station {
            status.last_seen_station = station.clone();
        }
        if let Some(at) = self.last_seen_at {
            status.last_seen_at = at;
        }
    }
}

#[derive(Clone)]
pub struct RailClient {
    client: reqwest::Client,
}

impl RailClient {
    pub fn new() -> Result<RailClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RailClient { client })
    }

    pub async fn fetch_refresh(
        &self,
        provider: Provider,
        train_number: &str,
    ) -> Result<StatusRefresh, ProviderError> {
        match provider {
            Provider::Trenitalia => self.fetch_viaggiatreno(train_number).await,
            Provider::Trenord => self.fetch_trenord(train_number).await,
        }
    }

    /// ViaggiaTreno needs the departure station code and the midnight
    /// timestamp of the service day; the autocomplete endpoint resolves
    /// both from the bare train number.
    async fn fetch_viaggiatreno(&self, train_number: &str) -> Result<StatusRefresh, ProviderError> {
        let url = format!(
            "{}/cercaNumeroTrenoTrenoAutocomplete/{}",
            VIAGGIATRENO_BASE, train_number
        );
        let res = self.get(&url).await?;
        let listing = res.text().await.map_err(ProviderError::Transport)?;
        let (number, origin_code, midnight_ms) =
            parse_autocomplete(&listing).ok_or(ProviderError::UnknownTrain)?;

        let url = format!(
            "{}/andamentoTreno/{}/{}/{}",
            VIAGGIATRENO_BASE, origin_code, number, midnight_ms
        );
        let res = self.get(&url).await?;
        let andamento: Andamento = res
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(refresh_from_andamento(&andamento, unix_now()))
    }

    async fn fetch_trenord(&self, train_number: &str) -> Result<StatusRefresh, ProviderError> {
        let url = format!("{}/journeys/{}/status", TRENORD_BASE, train_number);
        let res = self.get(&url).await?;
        let journey: TrenordJourney = res
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(refresh_from_trenord(&journey))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderError::Transport)?;
        if !res.status().is_success() {
            return Err(ProviderError::Status(res.status().as_u16()));
        }
        Ok(res)
    }
}

/// First autocomplete line looks like
/// `9624 - MILANO CENTRALE|9624-S01700-1714687200000`.
fn parse_autocomplete(listing: &str) -> Option<(String, String, i64)> {
    let first = listing.lines().next()?;
    let key = first.split('|').nth(1)?;
    let mut parts = key.trim().splitn(3, '-');
    let number = parts.next()?.to_string();
    let origin_code = parts.next()?.to_string();
    let midnight_ms: i64 = parts.next()?.parse().ok()?;
    if number.is_empty() || origin_code.is_empty() {
        return None;
    }
    Some((number, origin_code, midnight_ms))
}

// Upstream-owned schema; everything optional, parse what is there.
#[derive(Deserialize, Debug)]
struct Andamento {
    #[serde(rename = "ritardo")]
    delay_minutes: Option<i64>,
    #[serde(rename = "stazioneUltimoRilevamento")]
    last_seen_station: Option<String>,
    #[serde(rename = "oraUltimoRilevamento")]
    last_seen_at_ms: Option<i64>,
    #[serde(rename = "fermate", default)]
    stops: Vec<AndamentoStop>,
}

#[derive(Deserialize, Debug)]
struct AndamentoStop {
    #[serde(rename = "stazione")]
    station: Option<String>,
    #[serde(rename = "programmata")]
    scheduled_at_ms: Option<i64>,
    #[serde(rename = "binarioEffettivoArrivoDescrizione")]
    actual_platform: Option<String>,
    #[serde(rename = "binarioProgrammatoArrivoDescrizione")]
    scheduled_platform: Option<String>,
    /// 0 while the stop has not been reached yet.
    #[serde(rename = "actualFermataType")]
    stop_state: Option<i64>,
}

fn refresh_from_andamento(andamento: &Andamento, now_s: i64) -> StatusRefresh {
    let mut refresh = StatusRefresh {
        delay_minutes: andamento.delay_minutes.map(|d| d as i32),
        last_seen_at: andamento.last_seen_at_ms.map(|ms| ms / 1000),
        ..Default::default()
    };

    // "--" is ViaggiaTreno for "not detected yet"
    if let Some(ref station) = andamento.last_seen_station {
        if !station.is_empty() && station != "--" {
            refresh.last_seen_station = Some(station.clone());
        }
    }

    if let Some(next) = andamento.stops.iter().find(|s| s.stop_state == Some(0)) {
        refresh.next_station = next.station.clone();
        refresh.next_platform = next
            .actual_platform
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| next.scheduled_platform.clone())
            .filter(|p| !p.is_empty());
        if let Some(scheduled_ms) = next.scheduled_at_ms {
            let eta = scheduled_ms / 1000 + refresh.delay_minutes.unwrap_or(0) as i64 * 60 - now_s;
            refresh.seconds_to_next_station = Some(eta.max(0));
        }
    }

    refresh
}

#[derive(Deserialize, Debug)]
struct TrenordJourney {
    delay: Option<i64>,
    #[serde(rename = "nextStop")]
    next_stop: Option<TrenordStop>,
    #[serde(rename = "lastDetection")]
    last_detection: Option<TrenordDetection>,
}

#[derive(Deserialize, Debug)]
struct TrenordStop {
    name: Option<String>,
    platform: Option<String>,
    #[serde(rename = "etaSeconds")]
    eta_seconds: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct TrenordDetection {
    station: Option<String>,
    timestamp: Option<i64>,
}

fn refresh_from_trenord(journey: &TrenordJourney) -> StatusRefresh {
    let mut refresh = StatusRefresh {
        delay_minutes: journey.delay.map(|d| d as i32),
        ..Default::default()
    };
    if let Some(ref stop) = journey.next_stop {
        refresh.next_station = stop.name.clone();
        refresh.next_platform = stop.platform.clone();
        refresh.seconds_to_next_station = stop.eta_seconds;
    }
    if let Some(ref detection) = journey.last_detection {
        refresh.last_seen_station = detection.station.clone();
        refresh.last_seen_at = detection.timestamp;
    }
    refresh
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tags() {
        assert_eq!(Provider::from_tag("trenitalia"), Some(Provider::Trenitalia));
        assert_eq!(Provider::from_tag("Trenord"), Some(Provider::Trenord));
        assert_eq!(Provider::from_tag("sbb"), None);
    }

    #[test]
    fn parses_autocomplete_listing() {
        let listing = "9624 - MILANO CENTRALE|9624-S01700-1714687200000\n9624 - ROMA|9624-S08409-1714687200000\n";
        let (number, origin, midnight) = parse_autocomplete(listing).unwrap();
        assert_eq!(number, "9624");
        assert_eq!(origin, "S01700");
        assert_eq!(midnight, 1714687200000);
    }

    #[test]
    fn rejects_empty_autocomplete() {
        assert!(parse_autocomplete("").is_none());
        assert!(parse_autocomplete("garbage with no pipe").is_none());
    }

    #[test]
    fn builds_refresh_from_andamento() {
        let json = r#"{
            "ritardo": 12,
            "stazioneUltimoRilevamento": "LODI",
            "oraUltimoRilevamento": 1714650000000,
            "fermate": [
                {"stazione": "PIACENZA", "programmata": 1714648800000, "actualFermataType": 1},
                {"stazione": "MILANO ROGOREDO", "programmata": 1714650600000,
                 "binarioProgrammatoArrivoDescrizione": "4", "actualFermataType": 0},
                {"stazione": "MILANO CENTRALE", "programmata": 1714651800000, "actualFermataType": 0}
            ]
        }"#;
        let andamento: Andamento = serde_json::from_str(json).unwrap();
        let refresh = refresh_from_andamento(&andamento, 1714650000);

        assert_eq!(refresh.delay_minutes, Some(12));
        assert_eq!(refresh.last_seen_station.as_deref(), Some("LODI"));
        assert_eq!(refresh.last_seen_at, Some(1714650000));
        assert_eq!(refresh.next_station.as_deref(), Some("MILANO ROGOREDO"));
        assert_eq!(refresh.next_platform.as_deref(), Some("4"));
        // scheduled 1714650600 + 12 min delay - now 1714650000
        assert_eq!(refresh.seconds_to_next_station, Some(600 + 12 * 60));
    }

    #[test]
    fn undetected_train_keeps_stored_detection() {
        let json = r#"{"ritardo": 0, "stazioneUltimoRilevamento": "--", "fermate": []}"#;
        let andamento: Andamento = serde_json::from_str(json).unwrap();
        let refresh = refresh_from_andamento(&andamento, 0);
        assert!(refresh.last_seen_station.is_none());
        assert!(refresh.next_station.is_none());
    }

    #[test]
    fn builds_refresh_from_trenord() {
        let json = r#"{
            "delay": 3,
            "nextStop": {"name": "Saronno", "platform": "2", "etaSeconds": 240},
            "lastDetection": {"station": "Milano Cadorna", "timestamp": 1714650000}
        }"#;
        let journey: TrenordJourney = serde_json::from_str(json).unwrap();
        let refresh = refresh_from_trenord(&journey);
        assert_eq!(refresh.delay_minutes, Some(3));
        assert_eq!(refresh.next_station.as_deref(), Some("Saronno"));
        assert_eq!(refresh.seconds_to_next_station, Some(240));
        assert_eq!(refresh.last_seen_at, Some(1714650000));
    }

    #[test]
    fn apply_overwrites_only_reported_fields() {
        let mut status = TrainStatus {
            delay_minutes: 2,
            next_station: String::from("Lodi"),
            next_platform: String::from("1"),
            ..Default::default()
        };
        let refresh = StatusRefresh {
            delay_minutes: Some(9),
            next_station: Some(String::from("Milano Rogoredo")),
            ..Default::default()
        };
        refresh.apply(&mut status);
        assert_eq!(status.delay_minutes, 9);
        assert_eq!(status.next_station, "Milano Rogoredo");
        // platform not reported, stored value untouched
        assert_eq!(status.next_platform, "1");
    }
}
