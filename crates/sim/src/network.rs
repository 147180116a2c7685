//! In-memory satellite channel routing DAMA messages between the gateway and terminals

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, trace, warn};
use satdama_core::{DamaMessage, TerminalId};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot encode {0}: {1}")]
    Encode(&'static str, String),

    #[error("satellite queue is full")]
    QueueFull,

    #[error("satellite channel is closed")]
    Closed,
}

struct SatellitePacket {
    from: TerminalId,
    to: TerminalId,
    payload: Vec<u8>,
    deliver_at: Instant,
}

#[derive(Debug, Default)]
struct ChannelStats {
    messages_sent: u64,
    messages_delivered: u64,
    messages_undeliverable: u64,
    bytes_delivered: u64,
}

/// Delivers every message after a fixed propagation delay, in sending order.
pub struct SatelliteChannel {
    nodes: Arc<RwLock<HashMap<TerminalId, Sender<SatellitePacket>>>>,
    propagation_delay: Duration,
    stats: Arc<Mutex<ChannelStats>>,
    packet_queue: Sender<SatellitePacket>,
    queue_depth: Arc<AtomicU64>,
}

impl SatelliteChannel {
    pub fn new(propagation_delay: Duration) -> Arc<Self> {
        let nodes = Arc::new(RwLock::new(HashMap::<TerminalId, Sender<SatellitePacket>>::new()));
        let stats = Arc::new(Mutex::new(ChannelStats::default()));
        let queue_depth = Arc::new(AtomicU64::new(0));
        let (packet_queue, mut packet_rx): (Sender<SatellitePacket>, Receiver<SatellitePacket>) =
            mpsc::channel(100_000);
        let nodes_clone = nodes.clone();
        let stats_clone = stats.clone();
        let queue_depth_clone = queue_depth.clone();

        debug!("Satellite channel with {:?} of propagation delay", propagation_delay);

        tokio::spawn(async move {
            while let Some(packet) = packet_rx.recv().await {
                queue_depth_clone.fetch_sub(1, Ordering::Relaxed);
                tokio::time::sleep_until(packet.deliver_at).await;

                let nodes = nodes_clone.read().await;
                let size = packet.payload.len();
                let (from, to) = (packet.from, packet.to);
                match nodes.get(&to) {
                    Some(node) => match node.try_send(packet) {
                        Ok(()) => {
                            trace!("{} bytes delivered from {} to {}", size, from, to);
                            let mut stats = stats_clone.lock().await;
                            stats.messages_delivered += 1;
                            stats.bytes_delivered += size as u64;
                        }
                        Err(e) => {
                            warn!("Cannot deliver message from {} to {}: {}", from, to, e);
                            stats_clone.lock().await.messages_undeliverable += 1;
                        }
                    },
                    None => {
                        debug!("Node {} left the channel, message from {} dropped", to, from);
                        stats_clone.lock().await.messages_undeliverable += 1;
                    }
                }
            }
        });

        Arc::new(Self {
            nodes,
            propagation_delay,
            stats,
            packet_queue,
            queue_depth,
        })
    }

    pub async fn join(self: &Arc<Self>, id: TerminalId) -> ChannelNode {
        let (tx, rx) = mpsc::channel(1000);
        self.nodes.write().await.insert(id, tx);
        ChannelNode {
            id,
            channel: Arc::clone(self),
            receiver: rx,
        }
    }

    pub async fn leave(&self, id: TerminalId) {
        self.nodes.write().await.remove(&id);
    }

    async fn send_bytes(&self, from: TerminalId, to: TerminalId, payload: Vec<u8>) -> Result<(), ChannelError> {
        let packet = SatellitePacket {
            from,
            to,
            payload,
            deliver_at: Instant::now() + self.propagation_delay,
        };
        match self.packet_queue.try_send(packet) {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                self.stats.lock().await.messages_sent += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!("Satellite queue is full, message from {} to {} lost", from, to);
                Err(ChannelError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    /// (sent, delivered, undeliverable, bytes delivered, queue depth)
    pub async fn get_stats(&self) -> (u64, u64, u64, u64, u64) {
        let stats = self.stats.lock().await;
        (
            stats.messages_sent,
            stats.messages_delivered,
            stats.messages_undeliverable,
            stats.bytes_delivered,
            self.queue_depth.load(Ordering::Relaxed),
        )
    }
}

/// One end of the satellite channel, owned by a single task.
pub struct ChannelNode {
    id: TerminalId,
    channel: Arc<SatelliteChannel>,
    receiver: Receiver<SatellitePacket>,
}

impl ChannelNode {
    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub async fn send(&self, message: &DamaMessage, to: TerminalId) -> Result<(), ChannelError> {
        let bytes = message
            .encode()
            .map_err(|e| ChannelError::Encode(message.name(), e.to_string()))?;
        trace!("Node {} sends a {} of {} bytes to {}", self.id, message.name(), bytes.len(), to);
        self.channel.send_bytes(self.id, to, bytes).await
    }

    /// Send to every other node of the channel; returns the number of copies sent.
    pub async fn broadcast(&self, message: &DamaMessage) -> Result<usize, ChannelError> {
        let bytes = message
            .encode()
            .map_err(|e| ChannelError::Encode(message.name(), e.to_string()))?;
        let mut targets: Vec<TerminalId> = self.channel.nodes.read().await.keys().copied().collect();
        targets.retain(|id| *id != self.id);
        targets.sort_unstable();
        for to in &targets {
            self.channel.send_bytes(self.id, *to, bytes.clone()).await?;
        }
        Ok(targets.len())
    }

    /// Next message already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<(TerminalId, DamaMessage)> {
        while let Ok(packet) = self.receiver.try_recv() {
            match DamaMessage::decode(&packet.payload) {
                Ok(message) => return Some((packet.from, message)),
                Err(e) => warn!("Node {} received an undecodable message from {}: {}", self.id, packet.from, e),
            }
        }
        None
    }

    pub async fn recv(&mut self) -> Option<(TerminalId, DamaMessage)> {
        loop {
            let packet = self.receiver.recv().await?;
            match DamaMessage::decode(&packet.payload) {
                Ok(message) => return Some((packet.from, message)),
                Err(e) => warn!("Node {} received an undecodable message from {}: {}", self.id, packet.from, e),
            }
        }
    }
}
