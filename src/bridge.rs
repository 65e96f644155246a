//! Streaming bridge.
//!
//! A long-lived bidirectional exchange for streaming subscribers: every
//! status or parameter event is relayed outward as a full session snapshot,
//! while inbound updates from the peer are applied to the device. The bridge
//! is transport-agnostic — the WebSocket endpoint in `server::ws` adapts a
//! socket onto it, and tests drive it with plain channels.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppResult;
use crate::session::{DeviceSession, PowerConfig, PulseUpdate, SessionState};

/// Inbound update from a streaming peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// Applied via power switching.
    pub power: Option<PowerConfig>,
    /// Applied as a pulse-parameter write with commit forced on.
    pub pulse: Option<PulseUpdate>,
}

/// Run the bridge until the peer closes its inbound stream, the outbound
/// side is dropped, or applying an update fails.
///
/// A current snapshot is emitted immediately, then one per notification on
/// either topic. Both topic subscriptions are plain locals, so they are
/// released on every exit path.
pub async fn run<U>(
    session: Arc<DeviceSession>,
    mut inbound: U,
    outbound: mpsc::Sender<SessionState>,
) -> AppResult<()>
where
    U: Stream<Item = StreamUpdate> + Unpin,
{
    let mut status = session.status_topic().subscribe();
    let mut parameters = session.parameter_topic().subscribe();

    if outbound.send(session.snapshot()).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            event = status.recv() => {
                if !forward(&session, &outbound, event).await {
                    return Ok(());
                }
            }
            event = parameters.recv() => {
                if !forward(&session, &outbound, event).await {
                    return Ok(());
                }
            }
            update = inbound.next() => {
                let Some(update) = update else {
                    debug!("peer closed inbound stream");
                    return Ok(());
                };
                apply(&session, update).await?;
            }
        }
    }
}

/// Emit the current snapshot for a topic event. Returns false when the
/// bridge should stop.
async fn forward(
    session: &DeviceSession,
    outbound: &mpsc::Sender<SessionState>,
    event: Result<SessionState, RecvError>,
) -> bool {
    match event {
        // A lagged subscriber resynchronizes with the current snapshot.
        Ok(_) | Err(RecvError::Lagged(_)) => {
            outbound.send(session.snapshot()).await.is_ok()
        }
        Err(RecvError::Closed) => false,
    }
}

async fn apply(session: &DeviceSession, update: StreamUpdate) -> AppResult<()> {
    if let Some(mut pulse) = update.pulse {
        // inbound parameter payloads always commit
        pulse.commit = true;
        session.set_pulse_parameters(pulse).await?;
    }
    if let Some(power) = update.power {
        session.set_power(power.master_power).await?;
    }
    Ok(())
}
