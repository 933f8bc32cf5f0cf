//! Periodic liveness messages on the control channel
//!
//! While the session is open, every period the task sends a numbered
//! heartbeat. A channel that is no longer open closes the session.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::command;
use super::connection::ConnectionSession;
use super::state::SessionState;

/// Start the heartbeat task for `session`. The task ends on its own when
/// the session is gone or has left the open state.
pub fn spawn(session: Weak<ConnectionSession>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: u64 = 0;

        loop {
            ticker.tick().await;

            let Some(session) = session.upgrade() else {
                break;
            };
            if session.state() != SessionState::Open {
                break;
            }

            let channel_open = session.channel().is_some_and(|ch| ch.is_open());
            if !channel_open {
                info!("Session {}: channel no longer open, closing", session.id());
                // Close from a separate task: close() aborts this one
                tokio::spawn(async move { session.close().await });
                break;
            }

            seq += 1;
            let now = chrono::Local::now().format("%H:%M:%S").to_string();
            session.send(&command::heartbeat(seq, &now)).await;
            debug!("Session {}: heartbeat #{}", session.id(), seq);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::connection::testing::context;
    use crate::session::SessionRegistry;
    use crate::webrtc::datachannel::testing::RecordingChannel;
    use crate::webrtc::handler::PeerEventHandler;

    async fn open_session(
        period: Duration,
    ) -> (Arc<SessionRegistry>, Arc<ConnectionSession>, Arc<RecordingChannel>) {
        let registry = Arc::new(SessionRegistry::new(4));
        let mut ctx = context(None, false);
        ctx.heartbeat_interval = period;
        let session = ConnectionSession::new("hb".to_string(), ctx, Arc::downgrade(&registry));
        registry.add(session.clone()).await.unwrap();
        let channel = RecordingChannel::new();
        session.on_channel_open(channel.clone()).await;
        channel.clear();
        (registry, session, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_every_period() {
        let (_registry, _session, channel) = open_session(Duration::from_secs(30)).await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(channel.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(62)).await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].starts_with("🤖 Heartbeat #1 from server - "));
        assert!(sent[2].starts_with("🤖 Heartbeat #3 from server - "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_closes_session() {
        let (registry, session, channel) = open_session(Duration::from_secs(30)).await;
        channel.set_open(false);

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.count().await, 0);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_with_session() {
        let (_registry, session, _channel) = open_session(Duration::from_secs(1)).await;
        let handle = spawn(Arc::downgrade(&session), Duration::from_secs(1));
        session.close().await;
        drop(session);

        tokio::time::sleep(Duration::from_secs(2)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
    }
}
