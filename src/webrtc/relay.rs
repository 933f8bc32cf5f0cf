//! Media relay: inbound track -> outbound track, with an optional tap
//!
//! Every RTP packet read from the source is written to the sink first and
//! only then shown to the tap. Taps must not block; the analysis tap hands
//! packets to a bounded queue with `try_send` and drops on overflow, so
//! relay latency never depends on analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};

/// Where relayed packets come from
#[async_trait]
pub trait PacketSource: Send {
    /// Next packet, or `None` once the track has ended
    async fn recv(&mut self) -> Option<Packet>;
}

/// Where relayed packets go
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send(&self, packet: &Packet) -> Result<()>;
}

/// Non-blocking observer of relayed packets
pub trait PacketTap: Send + Sync {
    fn tap(&self, packet: &Packet);
}

/// Tap that ignores everything (audio)
pub struct NoTap;

impl PacketTap for NoTap {
    fn tap(&self, _packet: &Packet) {}
}

#[async_trait]
impl PacketSource for Arc<TrackRemote> {
    async fn recv(&mut self) -> Option<Packet> {
        match self.read_rtp().await {
            Ok((packet, _)) => Some(packet),
            Err(e) => {
                debug!("Track {} read ended: {}", self.id(), e);
                None
            }
        }
    }
}

#[async_trait]
impl PacketSink for Arc<TrackLocalStaticRTP> {
    async fn send(&self, packet: &Packet) -> Result<()> {
        self.write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| AppError::WebRtc(format!("RTP write failed: {}", e)))
    }
}

/// Relay counters
#[derive(Debug, Default)]
pub struct RelayStats {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    pub send_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub send_errors: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Forwards one inbound track to its outbound counterpart
pub struct RelayTrack<S, K, T> {
    label: String,
    source: S,
    sink: K,
    tap: T,
    stats: RelayStats,
}

impl<S, K, T> RelayTrack<S, K, T>
where
    S: PacketSource,
    K: PacketSink,
    T: PacketTap,
{
    pub fn new(label: impl Into<String>, source: S, sink: K, tap: T) -> Self {
        Self {
            label: label.into(),
            source,
            sink,
            tap,
            stats: RelayStats::default(),
        }
    }

    /// Relay until the source ends
    pub async fn run(mut self) -> RelayStatsSnapshot {
        debug!("Relay '{}' started", self.label);

        while let Some(packet) = self.source.recv().await {
            self.stats.packets.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes
                .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

            if let Err(e) = self.sink.send(&packet).await {
                let errors = self.stats.send_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errors == 1 || errors % 500 == 0 {
                    warn!("Relay '{}' send error #{}: {}", self.label, errors, e);
                }
            }

            self.tap.tap(&packet);
        }

        let stats = self.stats.snapshot();
        debug!(
            "Relay '{}' ended: {} packets, {} bytes",
            self.label, stats.packets, stats.bytes
        );
        stats
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    pub fn packet(seq: u16, payload: &[u8]) -> Packet {
        let mut packet = Packet::default();
        packet.header.sequence_number = seq;
        packet.payload = Bytes::copy_from_slice(payload);
        packet
    }

    pub struct ChannelSource(pub mpsc::Receiver<Packet>);

    #[async_trait]
    impl PacketSource for ChannelSource {
        async fn recv(&mut self) -> Option<Packet> {
            self.0.recv().await
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<u16>>,
        pub fail: bool,
    }

    #[async_trait]
    impl PacketSink for Arc<RecordingSink> {
        async fn send(&self, packet: &Packet) -> Result<()> {
            if self.fail {
                return Err(AppError::WebRtc("sink closed".to_string()));
            }
            self.sent.lock().push(packet.header.sequence_number);
            Ok(())
        }
    }
}
