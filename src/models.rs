use serde::{Deserialize, Serialize};

/// Last-known state of a monitored train, forwarded verbatim as the
/// Live Activity content state. Wire names match the iOS app schema.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TrainStatus {
    #[serde(rename = "ritardo", default)]
    pub delay_minutes: i32,
    #[serde(rename = "problemi", default)]
    pub problems: String,
    #[serde(rename = "programmato", default)]
    pub scheduled: bool,
    #[serde(rename = "tracciato", default)]
    pub tracked: bool,
    #[serde(rename = "prossimaStazione", default)]
    pub next_station: String,
    #[serde(rename = "prossimoBinario", default)]
    pub next_platform: String,
    #[serde(rename = "tempoProssimaStazione", default)]
    pub seconds_to_next_station: i64,
    #[serde(rename = "stazioneUltimoRilevamento", default)]
    pub last_seen_station: String,
    #[serde(rename = "orarioUltimoRilevamento", default)]
    pub last_seen_at: i64,
    #[serde(rename = "stazionePartenza", default)]
    pub origin_station: String,
    #[serde(rename = "orarioPartenza", default)]
    pub departure_time: i64,
    #[serde(rename = "stazioneArrivo", default)]
    pub destination_station: String,
    #[serde(rename = "orarioArrivo", default)]
    pub arrival_time: i64,
    #[serde(rename = "numeroTreno", default, skip_serializing_if = "Option::is_none")]
    pub train_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl TrainStatus {
    /// Clients send the schedule timestamps in milliseconds; APNs
    /// content state wants seconds.
    pub fn normalize_timestamps(&mut self) {
        for field in [
            &mut self.last_seen_at,
            &mut self.departure_time,
            &mut self.arrival_time,
        ] {
            if *field != 0 {
                *field /= 1000;
            }
        }
    }

    /// A registration that never received an update carries no state
    /// worth pushing; the broadcast loop skips it.
    pub fn is_empty(&self) -> bool {
        !self.scheduled
            && !self.tracked
            && self.next_station.is_empty()
            && self.last_seen_station.is_empty()
            && self.origin_station.is_empty()
            && self.destination_station.is_empty()
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub journey_id: String,
    pub push_token: String,
}

/// Body of update/end calls: the push token plus the full content state.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub push_token: String,
    #[serde(flatten)]
    pub status: TrainStatus,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub active_activities: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_wire_names() {
        let body = r#"{
            "pushToken": "80fe2a1c6d9a4b0e",
            "ritardo": 7,
            "problemi": "",
            "programmato": true,
            "tracciato": true,
            "prossimaStazione": "Milano Rogoredo",
            "prossimoBinario": "4",
            "tempoProssimaStazione": 320,
            "stazioneUltimoRilevamento": "Lodi",
            "orarioUltimoRilevamento": 1714650000000,
            "stazionePartenza": "Piacenza",
            "orarioPartenza": 1714648800000,
            "stazioneArrivo": "Milano Centrale",
            "orarioArrivo": 1714653000000,
            "numeroTreno": "9624",
            "provider": "trenitalia"
        }"#;
        let req: ActivityRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.push_token, "80fe2a1c6d9a4b0e");
        assert_eq!(req.status.delay_minutes, 7);
        assert_eq!(req.status.next_station, "Milano Rogoredo");
        assert_eq!(req.status.train_number.as_deref(), Some("9624"));
        assert_eq!(req.status.provider.as_deref(), Some("trenitalia"));
    }

    #[test]
    fn missing_fields_default() {
        let req: ActivityRequest =
            serde_json::from_str(r#"{"pushToken": "abc", "tracciato": true}"#).unwrap();
        assert!(req.status.tracked);
        assert_eq!(req.status.delay_minutes, 0);
        assert!(req.status.next_station.is_empty());
        assert!(req.status.train_number.is_none());
    }

    #[test]
    fn normalizes_millisecond_timestamps() {
        let mut status = TrainStatus {
            last_seen_at: 1714650000000,
            departure_time: 1714648800000,
            arrival_time: 0,
            ..Default::default()
        };
        status.normalize_timestamps();
        assert_eq!(status.last_seen_at, 1714650000);
        assert_eq!(status.departure_time, 1714648800);
        assert_eq!(status.arrival_time, 0);
    }

    #[test]
    fn default_record_is_empty() {
        assert!(TrainStatus::default().is_empty());
        let tracked = TrainStatus {
            tracked: true,
            ..Default::default()
        };
        assert!(!tracked.is_empty());
    }

    #[test]
    fn serializes_without_absent_optionals() {
        let value = serde_json::to_value(TrainStatus::default()).unwrap();
        assert!(value.get("numeroTreno").is_none());
        assert!(value.get("provider").is_none());
        assert_eq!(value["ritardo"], 0);
    }
}
