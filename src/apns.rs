use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Duration;

use crate::models::TrainStatus;
use crate::util::get_short_token;

use log::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long after the last update the activity stays on screen.
const DISMISSAL_GRACE_S: u64 = 5 * 60;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivityEvent {
    Update,
    End,
}

impl ActivityEvent {
    fn as_str(&self) -> &'static str {
        match self {
            ActivityEvent::Update => "update",
            ActivityEvent::End => "end",
        }
    }
}

#[derive(Debug)]
pub enum ApnsError {
    Transport(reqwest::Error),
    /// Non-2xx status with the APNs reason body.
    Rejected(u16, String),
    BadHeader,
}

/// Delivery seam for the broadcast loop; `ApnsClient` is the real one.
pub trait LiveActivityGateway {
    async fn send_live_activity(
        &self,
        push_token: &str,
        auth_token: &str,
        event: ActivityEvent,
        status: &TrainStatus,
    ) -> Result<(), ApnsError>;
}

#[derive(Clone)]
pub struct ApnsClient {
    client: reqwest::Client,
    host: String,
    topic: String,
}

impl ApnsClient {
    pub fn new(host: String, topic: String) -> Result<ApnsClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .http2_prior_knowledge()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ApnsClient {
            client,
            host,
            topic,
        })
    }

    fn headers(&self, auth_token: &str) -> Result<HeaderMap, ApnsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apns-topic",
            HeaderValue::from_str(format!("{}.push-type.liveactivity", self.topic).as_str())
                .map_err(|_| ApnsError::BadHeader)?,
        );
        headers.insert("apns-push-type", HeaderValue::from_static("liveactivity"));
        headers.insert("apns-priority", HeaderValue::from_static("10"));
        headers.insert(
            "authorization",
            HeaderValue::from_str(format!("bearer {}", auth_token).as_str())
                .map_err(|_| ApnsError::BadHeader)?,
        );
        Ok(headers)
    }
}

impl LiveActivityGateway for ApnsClient {
    /// Single attempt, no retry; the caller decides whether a failure
    /// is surfaced or logged.
    async fn send_live_activity(
        &self,
        push_token: &str,
        auth_token: &str,
        event: ActivityEvent,
        status: &TrainStatus,
    ) -> Result<(), ApnsError> {
        let url = format!("https://{}/3/device/{}", self.host, push_token);
        let body = live_activity_body(event, status, unix_now());

        let res = self
            .client
            .post(url)
            .headers(self.headers(auth_token)?)
            .json(&body)
            .send()
            .await
            .map_err(ApnsError::Transport)?;

        let status_code = res.status();
        let blank_header = HeaderValue::from_static("");
        let apns_id = res
            .headers()
            .get("apns-id")
            .unwrap_or(&blank_header)
            .to_str()
            .unwrap_or_default()
            .to_string();
        let reason = res.text().await.unwrap_or_default();

        debug!(
            "apns:: token ...{} event={} status={} apns-id={} {}",
            get_short_token(push_token),
            body["aps"]["event"],
            status_code,
            apns_id,
            reason
        );

        if status_code.is_success() {
            Ok(())
        } else {
            Err(ApnsError::Rejected(status_code.as_u16(), reason))
        }
    }
}

pub fn live_activity_body(
    event: ActivityEvent,
    status: &TrainStatus,
    now: u64,
) -> serde_json::Value {
    let mut aps = json!({
        "timestamp": now,
        "event": event.as_str(),
        "content-state": status,
    });
    if event == ActivityEvent::Update {
        aps["dismissal-date"] = json!(now + DISMISSAL_GRACE_S);
    }
    json!({ "aps": aps })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
