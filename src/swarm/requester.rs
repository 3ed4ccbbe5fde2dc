use super::state::Swarm;
use crate::peer::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Continuously picks pieces to request from unchoked, interesting
/// neighbors. At most one REQUEST is in flight per peer; a choke (or
/// the peer running out of interesting pieces) invalidates the pending
/// entry so the slot frees up for the next unchoke.
pub(crate) async fn request_loop(swarm: Arc<Swarm>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = sleep(SWEEP_INTERVAL) => {}
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }

        let ours = swarm.store().bitfield();

        for link in swarm.links() {
            let id = link.id();

            if link.am_choked() || !link.has_interesting(&ours) {
                swarm.outstanding().lock().remove(&id);
                continue;
            }

            // Decide under the lock, send after releasing it.
            let picked = {
                let mut outstanding = swarm.outstanding().lock();
                if outstanding.contains_key(&id) {
                    None
                } else {
                    let in_flight: Vec<u32> = outstanding.values().copied().collect();
                    match link.random_interesting(&ours, &in_flight) {
                        Some(piece) if !swarm.store().has(piece) => {
                            outstanding.insert(id, piece);
                            Some(piece)
                        }
                        _ => None,
                    }
                }
            };

            if let Some(piece) = picked {
                if let Err(e) = link.send(&Message::Request { piece }).await {
                    debug!(peer = id, error = %e, "request send failed");
                    swarm.outstanding().lock().remove(&id);
                }
            }
        }
    }
}
