use crate::bus::{DeliveryReceipt, MessageBus};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const REQUEST_CAPACITY: usize = 10000;

/// Publishes to `<topic>/<key>` with QoS 1.
///
/// MQTT has no partitions, so receipts always carry partition 0 and use the
/// acknowledged-publish sequence as the offset.
///
/// A connection error ends the session: pending sends fail and a fresh client
/// and event loop take over. rumqttc would otherwise replay the old session's
/// publishes on reconnect, and their packet ids could not be told apart from
/// new ones.
pub struct MqttBus {
    session: Arc<Mutex<Session>>,
}

impl MqttBus {
    pub fn connect(broker: String, port: u16, client_id: String) -> Self {
        info!("Connecting to MQTT broker at {}:{}", broker, port);

        let mut mqtt_options = MqttOptions::new(client_id, broker, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options.clone(), REQUEST_CAPACITY);
        let session = Arc::new(Mutex::new(Session::new(client)));

        let loop_session = session.clone();
        tokio::spawn(async move {
            let mut generation = 0;
            loop {
                match eventloop.poll().await {
                    Ok(notification) => {
                        with_session(&loop_session, |session| {
                            session.on_event(generation, &notification)
                        });
                    }
                    Err(e) => {
                        error!("MQTT eventloop error: {}", e);
                        let (client, next) =
                            AsyncClient::new(mqtt_options.clone(), REQUEST_CAPACITY);
                        if let Some(renewed) =
                            with_session(&loop_session, |session| session.renew(client))
                        {
                            generation = renewed;
                        }
                        eventloop = next;
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { session }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<DeliveryReceipt> {
        let topic = format!("{}/{}", topic, key);
        let (tx, rx) = oneshot::channel();

        {
            let mut session = self
                .session
                .lock()
                .map_err(|_| Error::Forwarding("MQTT session poisoned".to_string()))?;
            // try_publish keeps the request order equal to the registration order
            session
                .client
                .try_publish(topic.clone(), QoS::AtLeastOnce, false, payload)
                .map_err(|e| Error::Forwarding(e.to_string()))?;
            session.inflight.register(tx);
        }

        let offset = rx.await.map_err(|_| {
            Error::Forwarding("connection lost before broker acknowledgment".to_string())
        })?;

        Ok(DeliveryReceipt {
            topic,
            partition: 0,
            offset,
        })
    }
}

fn with_session<R, F>(session: &Mutex<Session>, f: F) -> Option<R>
where
    F: FnOnce(&mut Session) -> R,
{
    match session.lock() {
        Ok(mut guard) => Some(f(&mut guard)),
        Err(_) => {
            error!("MQTT session poisoned");
            None
        }
    }
}

/// The current client and the publishes waiting on its event loop.
struct Session {
    client: AsyncClient,
    generation: u64,
    inflight: Inflight,
}

impl Session {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            generation: 0,
            inflight: Inflight::default(),
        }
    }

    /// Events from an event loop that has been replaced are ignored.
    fn on_event(&mut self, generation: u64, event: &Event) {
        if generation != self.generation {
            debug!("Ignoring event from MQTT session {}", generation);
            return;
        }
        self.inflight.on_event(event);
    }

    /// Fails every pending send and switches to `client`. Returns the new
    /// generation.
    fn renew(&mut self, client: AsyncClient) -> u64 {
        self.inflight.fail_all();
        self.client = client;
        self.generation += 1;
        self.generation
    }
}

/// Correlates publish requests with broker PUBACKs.
///
/// The event loop reports `Outgoing::Publish(pkid)` in request order, which is
/// how a waiting sender learns its packet id.
#[derive(Default)]
struct Inflight {
    unassigned: VecDeque<oneshot::Sender<u64>>,
    awaiting_ack: HashMap<u16, oneshot::Sender<u64>>,
    acked: u64,
}

impl Inflight {
    fn register(&mut self, tx: oneshot::Sender<u64>) {
        self.unassigned.push_back(tx);
    }

    fn on_event(&mut self, event: &Event) {
        match event {
            Event::Outgoing(Outgoing::Publish(pkid)) => self.on_outgoing_publish(*pkid),
            Event::Incoming(Packet::PubAck(ack)) => self.on_puback(ack.pkid),
            Event::Incoming(Packet::ConnAck(_)) => debug!("MQTT connection acknowledged"),
            _ => {}
        }
    }

    fn on_outgoing_publish(&mut self, pkid: u16) {
        match self.unassigned.pop_front() {
            Some(tx) => {
                if self.awaiting_ack.insert(pkid, tx).is_some() {
                    warn!("MQTT packet id {} reused before acknowledgment", pkid);
                }
            }
            // retransmission after reconnect
            None => debug!("Outgoing publish {} has no waiting sender", pkid),
        }
    }

    fn on_puback(&mut self, pkid: u16) {
        if let Some(tx) = self.awaiting_ack.remove(&pkid) {
            self.acked += 1;
            // receiver may have timed out already
            let _ = tx.send(self.acked);
        }
    }

    fn fail_all(&mut self) {
        let pending = self.unassigned.len() + self.awaiting_ack.len();
        if pending > 0 {
            warn!("Failing {} unacknowledged MQTT publishes", pending);
        }
        self.unassigned.clear();
        self.awaiting_ack.clear();
    }
}
