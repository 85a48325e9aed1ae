use futures::StreamExt;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};

use crate::apns::{ActivityEvent, ApnsClient, LiveActivityGateway};
use crate::authtoken::AuthToken;
use crate::models::TrainStatus;
use crate::providers::{Provider, RailClient, StatusRefresh};
use crate::registry::Registry;
use crate::util::get_short_token;

pub struct BroadcastSettings {
    pub interval: Duration,
    pub concurrency: usize,
}

/// Pushes the current state of every live activity once per interval.
pub async fn run_broadcast_loop(
    registry: Arc<RwLock<Registry>>,
    auth_token: Arc<RwLock<AuthToken>>,
    gateway: ApnsClient,
    rail: RailClient,
    settings: BroadcastSettings,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    loop {
        ticker.tick().await;
        let auth = auth_token.read().await.token.clone();
        run_cycle(&registry, &auth, &gateway, &rail, settings.concurrency).await;
    }
}

/// One tick: snapshot the registry, refresh each record from its
/// provider, merge, deliver. At most one submission per device per
/// tick; per-device failures are logged and never stop the others.
pub async fn run_cycle<G: LiveActivityGateway>(
    registry: &Arc<RwLock<Registry>>,
    auth: &str,
    gateway: &G,
    rail: &RailClient,
    concurrency: usize,
) {
    let snapshot = registry.read().await.snapshot();
    debug!("broadcast:: cycle over {} activities", snapshot.len());

    futures::stream::iter(snapshot)
        .for_each_concurrent(concurrency, |(push_token, mut status)| async move {
            if status.is_empty() {
                return;
            }

            if let Some(refresh) = refresh_status(rail, &push_token, &status).await {
                refresh.apply(&mut status);
                // merge back so the next tick starts from refreshed state;
                // a device that ended mid-cycle is simply gone
                registry
                    .write()
                    .await
                    .update(&push_token, status.clone())
                    .ok();
            }

            match gateway
                .send_live_activity(&push_token, auth, ActivityEvent::Update, &status)
                .await
            {
                Ok(()) => debug!(
                    "broadcast:: token ...{} update delivered",
                    get_short_token(&push_token)
                ),
                Err(e) => error!(
                    "broadcast:: token ...{} delivery failed: {:?}",
                    get_short_token(&push_token),
                    e
                ),
            }
        })
        .await;
}

async fn refresh_status(
    rail: &RailClient,
    push_token: &str,
    status: &TrainStatus,
) -> Option<StatusRefresh> {
    let provider = Provider::from_tag(status.provider.as_deref()?)?;
    let train_number = status.train_number.as_deref()?;

    match rail.fetch_refresh(provider, train_number).await {
        Ok(refresh) => Some(refresh),
        Err(e) => {
            warn!(
                "broadcast:: token ...{} refresh from {:?} failed: {:?}",
                get_short_token(push_token),
                provider,
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apns::ApnsError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MockGateway {
        sent: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    impl MockGateway {
        fn new() -> MockGateway {
            MockGateway {
                sent: Mutex::new(Vec::new()),
                failing: HashSet::new(),
            }
        }

        fn failing_for(tokens: &[&str]) -> MockGateway {
            MockGateway {
                sent: Mutex::new(Vec::new()),
                failing: tokens.iter().map(|t| t.to_string()).collect(),
            }
        }

        fn sent_tokens(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl LiveActivityGateway for MockGateway {
        async fn send_live_activity(
            &self,
            push_token: &str,
            _auth_token: &str,
            _event: ActivityEvent,
            _status: &TrainStatus,
        ) -> Result<(), ApnsError> {
            self.sent.lock().unwrap().push(push_token.to_string());
            if self.failing.contains(push_token) {
                Err(ApnsError::Rejected(410, String::from("Unregistered")))
            } else {
                Ok(())
            }
        }
    }

    fn tracked_status() -> TrainStatus {
        TrainStatus {
            tracked: true,
            next_station: String::from("Milano Rogoredo"),
            ..Default::default()
        }
    }

    fn registry_with(devices: &[(&str, &str, bool)]) -> Arc<RwLock<Registry>> {
        let mut registry = Registry::new();
        for (journey, token, updated) in devices {
            registry.register(journey, token);
            if *updated {
                registry.update(token, tracked_status()).unwrap();
            }
        }
        Arc::new(RwLock::new(registry))
    }

    #[tokio::test]
    async fn cycle_submits_once_per_device() {
        let registry = registry_with(&[("j1", "tok-a", true), ("j2", "tok-b", true)]);
        let gateway = MockGateway::new();
        let rail = RailClient::new().unwrap();

        run_cycle(&registry, "jwt", &gateway, &rail, 4).await;

        let mut sent = gateway.sent_tokens();
        sent.sort();
        assert_eq!(sent, vec!["tok-a", "tok-b"]);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_others() {
        let registry = registry_with(&[
            ("j1", "tok-a", true),
            ("j2", "tok-b", true),
            ("j3", "tok-c", true),
        ]);
        let gateway = MockGateway::failing_for(&["tok-b"]);
        let rail = RailClient::new().unwrap();

        run_cycle(&registry, "jwt", &gateway, &rail, 2).await;

        let mut sent = gateway.sent_tokens();
        sent.sort();
        assert_eq!(sent, vec!["tok-a", "tok-b", "tok-c"]);
    }

    #[tokio::test]
    async fn empty_registrations_are_skipped() {
        let registry = registry_with(&[("j1", "tok-a", true), ("j2", "tok-b", false)]);
        let gateway = MockGateway::new();
        let rail = RailClient::new().unwrap();

        run_cycle(&registry, "jwt", &gateway, &rail, 4).await;

        assert_eq!(gateway.sent_tokens(), vec!["tok-a"]);
    }

    #[tokio::test]
    async fn ended_journey_is_not_delivered() {
        let registry = registry_with(&[("j1", "tok-a", true), ("j2", "tok-b", true)]);
        registry.write().await.remove("tok-b");
        let gateway = MockGateway::new();
        let rail = RailClient::new().unwrap();

        run_cycle(&registry, "jwt", &gateway, &rail, 4).await;

        assert_eq!(gateway.sent_tokens(), vec!["tok-a"]);
    }
}
