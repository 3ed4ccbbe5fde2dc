use super::state::Swarm;
use crate::peer::PeerId;
use rand::Rng as _;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Filters the ids eligible for the optimistic slot: currently choked
/// by us, interested in us, and not already preferred.
pub(crate) fn optimistic_candidates(
    states: impl IntoIterator<Item = (PeerId, bool, bool)>,
    preferred: &HashSet<PeerId>,
) -> Vec<PeerId> {
    states
        .into_iter()
        .filter(|(id, peer_choked, peer_interested)| {
            *peer_choked && *peer_interested && !preferred.contains(id)
        })
        .map(|(id, _, _)| id)
        .collect()
}

/// Periodic optimistic-unchoke rotation, independent of the
/// rate-ranked scheduler.
pub(crate) async fn optimistic_loop(
    swarm: Arc<Swarm>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }

        let preferred = swarm.preferred_ids();
        let candidates = optimistic_candidates(
            swarm
                .links()
                .iter()
                .map(|link| (link.id(), link.peer_choked(), link.peer_interested())),
            &preferred,
        );

        if candidates.is_empty() {
            swarm.set_optimistic(None);
            continue;
        }

        let next = candidates[rand::rng().random_range(0..candidates.len())];
        let current = swarm.optimistic_id();
        if current == Some(next) {
            continue;
        }

        // The outgoing optimistic neighbor stays unchoked only if the
        // rate scheduler promoted it to preferred in the meantime.
        if let Some(old) = current {
            if !preferred.contains(&old) {
                if let Some(old_link) = swarm.link(old) {
                    if let Err(e) = old_link.send_choke().await {
                        debug!(peer = old, error = %e, "choke of outgoing optimistic failed");
                    }
                }
            }
        }

        swarm.set_optimistic(Some(next));
        if let Some(link) = swarm.link(next) {
            if let Err(e) = link.send_unchoke().await {
                debug!(peer = next, error = %e, "optimistic unchoke failed");
            }
        }
        swarm.journal().optimistic_neighbor(next);
    }
}
