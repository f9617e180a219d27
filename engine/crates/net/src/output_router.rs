use std::collections::HashMap;

use session::ConnectionId;

use crate::channels::{OutputRx, RegisterRx, SessionWriteTx, UnregisterRx};

/// Routes SessionOutput messages to the correct per-connection write channel.
///
/// Frames for one connection are forwarded in the order they were sent;
/// frames for unknown or already-closed connections are dropped.
pub async fn run_output_router(
    mut output_rx: OutputRx,
    mut register_rx: RegisterRx,
    mut unregister_rx: UnregisterRx,
) {
    let mut writers: HashMap<ConnectionId, SessionWriteTx> = HashMap::new();

    loop {
        tokio::select! {
            // Registration changes before output so a snapshot queued right
            // after connect finds its writer.
            biased;
            Some(reg) = register_rx.recv() => {
                tracing::debug!(connection_id = %reg.connection_id, "Output router: connection registered");
                writers.insert(reg.connection_id, reg.write_tx);
            }
            Some(connection_id) = unregister_rx.recv() => {
                tracing::debug!(%connection_id, "Output router: connection unregistered");
                writers.remove(&connection_id);
            }
            Some(output) = output_rx.recv() => {
                if let Some(tx) = writers.get(&output.connection_id) {
                    if tx.send(output.text).is_err() {
                        tracing::debug!(connection_id = %output.connection_id, "Output router: write channel closed");
                        writers.remove(&output.connection_id);
                    } else if output.disconnect {
                        tracing::debug!(connection_id = %output.connection_id, "Output router: disconnect requested, dropping writer");
                        writers.remove(&output.connection_id);
                    }
                }
            }
            else => break,
        }
    }

    tracing::info!("Output router shutting down");
}
