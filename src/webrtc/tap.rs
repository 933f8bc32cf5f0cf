//! Analysis tap for the video relay
//!
//! ```text
//! relay ──tap()──try_send──> [bounded queue] ──> decode worker (blocking pool)
//!                                                  SampleBuilder<H264Packet>
//!                                                  -> FrameDecoder
//!                                                  -> AnalysisPipeline::offer_frame
//! ```
//!
//! While analysis is disabled packets are not queued at all and the decoder
//! is reset. Re-enabling asks the sender for a keyframe so decoding can
//! restart without waiting for the next natural IDR.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packet::Packet;

use super::relay::PacketTap;
use crate::gesture::AnalysisPipeline;
use crate::video::FrameDecoder;

/// Packets buffered between the relay and the decoder
pub const DECODE_QUEUE_SIZE: usize = 256;

/// How many out-of-order packets the depacketizer waits for
const MAX_LATE_PACKETS: u16 = 512;

const H264_CLOCK_RATE: u32 = 90_000;

/// Feeds relayed H.264 packets to an [`AnalysisPipeline`]
pub struct AnalysisTap {
    pipeline: AnalysisPipeline,
    queue: mpsc::Sender<Packet>,
    was_enabled: AtomicBool,
    reset: Arc<AtomicBool>,
    dropped: AtomicU64,
    keyframe_tx: watch::Sender<u64>,
}

impl AnalysisTap {
    /// Create the tap and start its decode worker
    pub fn spawn(
        pipeline: AnalysisPipeline,
        decoder: Box<dyn FrameDecoder>,
    ) -> (Self, watch::Receiver<u64>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(DECODE_QUEUE_SIZE);
        let (tap, keyframe_rx) = Self::new(pipeline.clone(), tx);
        let reset = tap.reset.clone();
        let worker = tokio::task::spawn_blocking(move || decode_loop(rx, pipeline, decoder, reset));
        (tap, keyframe_rx, worker)
    }

    fn new(pipeline: AnalysisPipeline, queue: mpsc::Sender<Packet>) -> (Self, watch::Receiver<u64>) {
        let (keyframe_tx, keyframe_rx) = watch::channel(0);
        let tap = Self {
            pipeline,
            queue,
            was_enabled: AtomicBool::new(false),
            reset: Arc::new(AtomicBool::new(false)),
            dropped: AtomicU64::new(0),
            keyframe_tx,
        };
        (tap, keyframe_rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn request_keyframe(&self) {
        self.keyframe_tx.send_modify(|n| *n += 1);
    }
}

impl PacketTap for AnalysisTap {
    fn tap(&self, packet: &Packet) {
        if !self.pipeline.is_enabled() {
            if self.was_enabled.swap(false, Ordering::AcqRel) {
                self.reset.store(true, Ordering::Release);
                debug!("Analysis tap paused, decoder reset requested");
            }
            return;
        }

        if !self.was_enabled.swap(true, Ordering::AcqRel) {
            info!("Analysis tap active, requesting keyframe");
            self.request_keyframe();
        }

        if self.queue.try_send(packet.clone()).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 1000 == 0 {
                warn!("Decode queue full, {} packets dropped so far", dropped);
            }
        }
    }
}

fn decode_loop(
    mut rx: mpsc::Receiver<Packet>,
    pipeline: AnalysisPipeline,
    mut decoder: Box<dyn FrameDecoder>,
    reset: Arc<AtomicBool>,
) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), H264_CLOCK_RATE);
    let mut errors: u64 = 0;

    while let Some(packet) = rx.blocking_recv() {
        if reset.swap(false, Ordering::AcqRel) {
            if let Err(e) = decoder.reset() {
                warn!("Decoder reset failed: {}", e);
            }
            builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), H264_CLOCK_RATE);
        }
        if pipeline.is_closed() {
            break;
        }

        builder.push(packet);
        while let Some(sample) = builder.pop() {
            match decoder.decode(&sample.data) {
                Ok(Some(frame)) => {
                    pipeline.offer_frame(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    errors += 1;
                    if errors == 1 || errors % 100 == 0 {
                        warn!("H.264 decode error #{}: {}", errors, e);
                    }
                }
            }
        }
    }
    debug!("Decode worker stopped ({} decode errors)", errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::gesture::classifier::testing::ScriptedClassifier;
    use crate::video::{PixelFormat, Resolution, VideoFrame};
    use crate::webrtc::relay::testing::packet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Decoder that yields one small RGB frame per access unit
    struct StubDecoder {
        decoded: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    impl FrameDecoder for StubDecoder {
        fn decode(&mut self, _access_unit: &[u8]) -> crate::error::Result<Option<VideoFrame>> {
            let n = self.decoded.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(Some(VideoFrame::from_vec(
                vec![90; 16 * 16 * 3],
                Resolution::new(16, 16),
                PixelFormat::Rgb24,
                n,
            )))
        }

        fn reset(&mut self) -> crate::error::Result<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Single-NAL IDR packet closing its own access unit
    fn idr_packet(seq: u16) -> Packet {
        let mut p = packet(seq, &[0x65, 0x88, 0x84, 0x00, 0x10]);
        p.header.timestamp = seq as u32 * 3000;
        p.header.marker = true;
        p
    }

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
    }

    fn tap_with_queue(size: usize) -> (AnalysisTap, watch::Receiver<u64>, mpsc::Receiver<Packet>) {
        let pipeline = AnalysisPipeline::new(
            &AnalysisConfig::default(),
            Arc::new(ScriptedClassifier::replying("{}")),
        );
        let (tx, rx) = mpsc::channel(size);
        let (tap, keyframes) = AnalysisTap::new(pipeline, tx);
        (tap, keyframes, rx)
    }

    #[test]
    fn test_disabled_tap_queues_nothing() {
        let (tap, keyframes, mut rx) = tap_with_queue(8);
        for seq in 0..10 {
            tap.tap(&packet(seq, b"x"));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(*keyframes.borrow(), 0);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tap, keyframes, mut rx) = tap_with_queue(2);
        tap.pipeline.enable();

        for seq in 0..100 {
            tap.tap(&packet(seq, b"x"));
        }
        assert_eq!(tap.dropped(), 98);
        assert_eq!(rx.try_recv().unwrap().header.sequence_number, 0);
        assert_eq!(rx.try_recv().unwrap().header.sequence_number, 1);
        assert_eq!(*keyframes.borrow(), 1);
    }

    #[test]
    fn test_reenable_resets_and_requests_keyframe() {
        let (tap, keyframes, _rx) = tap_with_queue(8);
        tap.pipeline.enable();
        tap.tap(&packet(0, b"x"));

        tap.pipeline.disable();
        tap.tap(&packet(1, b"x"));
        assert!(tap.reset.load(Ordering::Acquire));

        tap.pipeline.enable();
        tap.tap(&packet(2, b"x"));
        assert_eq!(*keyframes.borrow(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_packets_reach_classifier_through_decoder() {
        let classifier = Arc::new(ScriptedClassifier::replying("{}"));
        let config = AnalysisConfig {
            sample_stride: 1,
            ..Default::default()
        };
        let pipeline = AnalysisPipeline::new(&config, classifier.clone());
        let decoded = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let decoder = StubDecoder {
            decoded: decoded.clone(),
            resets: resets.clone(),
        };

        let (tap, keyframes, worker) = AnalysisTap::spawn(pipeline.clone(), Box::new(decoder));
        pipeline.enable();
        for seq in 0..8 {
            tap.tap(&idr_packet(seq));
        }
        assert_eq!(*keyframes.borrow(), 1);
        wait_for("decoded frames", || decoded.load(Ordering::SeqCst) > 0).await;
        wait_for("classifier call", || classifier.calls() > 0).await;
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        // Pause then resume: the worker resets the decoder before the next unit
        pipeline.disable();
        tap.tap(&idr_packet(8));
        pipeline.enable();
        for seq in 9..12 {
            tap.tap(&idr_packet(seq));
        }
        wait_for("decoder reset", || resets.load(Ordering::SeqCst) == 1).await;
        assert_eq!(*keyframes.borrow(), 2);

        drop(tap);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("decode worker must stop with the tap")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_stops_on_closed_pipeline() {
        let pipeline = AnalysisPipeline::new(
            &AnalysisConfig::default(),
            Arc::new(ScriptedClassifier::replying("{}")),
        );
        let decoded = Arc::new(AtomicUsize::new(0));
        let decoder = StubDecoder {
            decoded: decoded.clone(),
            resets: Arc::new(AtomicUsize::new(0)),
        };
        let (tx, rx) = mpsc::channel(8);
        let (tap, _keyframes) = AnalysisTap::new(pipeline.clone(), tx.clone());
        let reset = tap.reset.clone();

        pipeline.shutdown();
        tx.send(idr_packet(0)).await.unwrap();
        let worker = tokio::task::spawn_blocking(move || {
            decode_loop(rx, pipeline, Box::new(decoder), reset)
        });

        // Senders are still alive, so only the closed check can end the loop
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("decode worker must stop on a closed pipeline")
            .unwrap();
        assert_eq!(decoded.load(Ordering::SeqCst), 0);
        drop(tap);
    }
}
