//! Concrete `rumqttc`-backed implementation of the [`MqttClient`]
//! collaborator trait `ignite-mqtt` leaves abstract: connection management,
//! reconnect, and the publish/ack correlation the upload workers need.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ignite_mqtt::{MqttClient, MqttError, PublishOutcome};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingAcks {
    /// `our_mid`s whose rumqttc `pkid` hasn't been assigned yet, oldest
    /// first — the eventloop pumps publishes in submission order, so the
    /// next `Outgoing::Publish(pkid)` belongs to the front of this queue.
    awaiting_pkid: VecDeque<i64>,
    pkid_to_mid: HashMap<u16, i64>,
    senders: HashMap<i64, oneshot::Sender<()>>,
    /// Parked here from `publish` until `wait_for_ack` claims it. A oneshot
    /// buffers its value, so it doesn't matter whether the ack arrives
    /// before or after the caller starts waiting on it.
    receivers: HashMap<i64, oneshot::Receiver<()>>,
}

/// A connected MQTT publisher driven by a background pump task that owns
/// the `rumqttc` event loop.
pub struct RumqttcClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    next_mid: AtomicI64,
    pending: Arc<Mutex<PendingAcks>>,
}

impl RumqttcClient {
    /// Connect to `host:port` as `client_id`, with optional username/password
    /// auth, and spawn the background pump task.
    pub fn connect(client_id: &str, host: &str, port: u16, username: Option<&str>, password: Option<&str>) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (username, password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let connected = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(Mutex::new(PendingAcks {
            awaiting_pkid: VecDeque::new(),
            pkid_to_mid: HashMap::new(),
            senders: HashMap::new(),
            receivers: HashMap::new(),
        }));

        let pump_connected = connected.clone();
        let pump_pending = pending.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        pump_connected.store(true, Ordering::Relaxed);
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        pump_connected.store(false, Ordering::Relaxed);
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let mut guard = pump_pending.lock();
                        if let Some(mid) = guard.awaiting_pkid.pop_front() {
                            guard.pkid_to_mid.insert(pkid, mid);
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        let mut guard = pump_pending.lock();
                        if let Some(mid) = guard.pkid_to_mid.remove(&ack.pkid) {
                            if let Some(tx) = guard.senders.remove(&mid) {
                                let _ = tx.send(());
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "mqtt eventloop disconnected, retrying");
                        pump_connected.store(false, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            connected,
            next_mid: AtomicI64::new(1),
            pending,
        }
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishOutcome, MqttError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(MqttError::NotConnected);
        }

        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock();
            guard.awaiting_pkid.push_back(mid);
            guard.senders.insert(mid, tx);
            guard.receivers.insert(mid, rx);
        }

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))?;

        Ok(PublishOutcome::Accepted(mid))
    }

    async fn wait_for_ack(&self, mid: i64) -> Result<(), MqttError> {
        let rx = match self.pending.lock().receivers.remove(&mid) {
            Some(rx) => rx,
            None => return Ok(()),
        };

        match tokio::time::timeout(Duration::from_secs(10), rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MqttError::PublishFailed("ack channel dropped".into())),
            Err(_) => {
                warn!(mid, "timed out waiting for broker ack");
                Err(MqttError::PublishFailed("ack timeout".into()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
