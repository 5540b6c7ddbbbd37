use super::message::{queue_of, topic};
use super::{Outgoing, Publisher};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use rumqttc::{Event, Packet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;

use tracing::{debug, error, info, warn};

/// Connected but not yet running MQTT client.
pub struct Initiator {
    client: AsyncClient,
    event_loop: EventLoop,
    base: String,
}

/// Queue publisher handed to the process loop.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    outgoing: mpsc::Sender<Outgoing>,
}

impl Initiator {
    pub async fn new(
        id: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        base: &str,
    ) -> anyhow::Result<Self> {
        let mut mqttoptions = MqttOptions::new(id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !username.is_empty() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 10);

        // Fail early if parameters are invalid.
        if let Err(err) = event_loop.poll().await {
            warn!("Initial connection to MQTT failed. Check connection parameters");
            anyhow::bail!("Unable to contact MQTT at {}:{}: {}", host, port, err);
        }

        Ok(Initiator {
            client,
            event_loop,
            base: base.to_string(),
        })
    }

    /// Start consuming a queue.
    pub async fn subscribe(&mut self, queue: &str) -> anyhow::Result<()> {
        let topic = topic(&self.base, queue);
        info!("Subscribing to {}", topic);
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn receiver(mut event_loop: EventLoop, base: String, queue: mpsc::Sender<String>) {
        loop {
            let notification = event_loop.poll().await;
            let payload = match notification {
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    debug!("RX message to {} with payload '{:?}'", msg.topic, msg.payload);
                    if queue_of(&base, &msg.topic).is_none() {
                        info!("Unknown topic {} - ignoring", msg.topic);
                        continue;
                    }
                    String::from_utf8_lossy(&msg.payload).into_owned()
                }
                Ok(Event::Outgoing(_))
                | Ok(Event::Incoming(Packet::PingResp))
                | Ok(Event::Incoming(Packet::SubAck(_)))
                | Ok(Event::Incoming(Packet::PubAck(_))) => {
                    // Silence common messages
                    continue;
                }
                Err(err) => {
                    // rumqttc reconnects on the next poll.
                    warn!("MQTT connection error: {:?}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                _ => {
                    info!("Received other message = {:?}", notification);
                    continue;
                }
            };
            if queue.send(payload).await.is_err() {
                error!("Process inbox closed. Quitting MQTT receiver loop");
                return;
            }
        }
    }

    async fn sender(client: AsyncClient, base: String, mut queue: mpsc::Receiver<Outgoing>) {
        while let Some(command) = queue.recv().await {
            match command {
                Outgoing::Publish { queue, payload } => {
                    let topic = topic(&base, &queue);
                    debug!("Publishing to {}: {}", topic, payload);
                    if let Err(err) = client
                        .publish(topic, QoS::AtLeastOnce, false, payload)
                        .await
                    {
                        error!("Unable to publish message {:?}", err);
                    }
                }
            }
        }
        // Channel end closed - quit.
    }

    /// Publish one message and wait for the broker to acknowledge it. Used by
    /// one-shot senders that never start the loop tasks.
    pub async fn publish_once(
        mut self,
        queue: &str,
        payload: &str,
        wait: Duration,
    ) -> anyhow::Result<()> {
        let topic = topic(&self.base, queue);
        info!("Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload.to_string())
            .await?;

        let acknowledged = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(err) => anyhow::bail!("MQTT connection error: {:?}", err),
                }
            }
        };
        match tokio::time::timeout(wait, acknowledged).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("No acknowledgement for {} within {:?}", topic, wait),
        }
    }

    /// Spawn the MQTT tasks. Returns the publisher and the process inbox.
    pub fn start(self) -> (MqttPublisher, mpsc::Receiver<String>) {
        let (out_sender, out_receiver) = mpsc::channel::<Outgoing>(64);
        let (in_sender, in_receiver) = mpsc::channel::<String>(64);
        task::spawn(Self::receiver(self.event_loop, self.base.clone(), in_sender));
        task::spawn(Self::sender(self.client, self.base.clone(), out_receiver));

        let publisher = MqttPublisher {
            outgoing: out_sender,
        };
        (publisher, in_receiver)
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, queue: &str, payload: &str) -> anyhow::Result<()> {
        self.outgoing
            .try_send(Outgoing::Publish {
                queue: queue.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|err| anyhow::anyhow!("Unable to queue message for {}: {}", queue, err))
    }
}
