use super::state::Swarm;
use crate::peer::PeerId;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Picks the new preferred set from interested peers.
///
/// While still downloading, peers are ranked by bytes delivered over
/// the last interval; ties break uniformly at random (the shuffle
/// before a stable sort supplies the randomness). Once we are a seed
/// there is no rate signal, so the pick is a uniform random sample.
pub(crate) fn select_preferred(
    mut candidates: Vec<(PeerId, u64)>,
    k: usize,
    seeding: bool,
) -> Vec<PeerId> {
    let mut rng = rand::rng();
    candidates.shuffle(&mut rng);

    if !seeding {
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
    }

    candidates.truncate(k);
    candidates.into_iter().map(|(id, _)| id).collect()
}

/// Periodic preferred-neighbor reselection.
///
/// Every tick the interested peers are ranked, the winners (plus the
/// current optimistic neighbor) are unchoked, everyone else is choked,
/// and all download counters are reset so the next interval measures
/// afresh. Emission is guarded per link, so a peer that is both
/// optimistic and newly preferred is never double-signalled.
pub(crate) async fn choking_loop(
    swarm: Arc<Swarm>,
    interval: Duration,
    k: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the schedule starts one
    // full interval after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }

        let links = swarm.links();
        let candidates: Vec<(PeerId, u64)> = links
            .iter()
            .filter(|link| link.peer_interested())
            .map(|link| (link.id(), link.downloaded()))
            .collect();

        if candidates.is_empty() {
            for link in &links {
                link.reset_downloaded();
            }
            continue;
        }

        let selected = select_preferred(candidates, k, swarm.store().is_complete());
        let chosen: HashSet<PeerId> = selected.iter().copied().collect();
        let optimistic = swarm.optimistic_id();

        for link in &links {
            let keep_unchoked = chosen.contains(&link.id()) || Some(link.id()) == optimistic;
            let result = if keep_unchoked {
                link.send_unchoke().await
            } else {
                link.send_choke().await
            };
            if let Err(e) = result {
                debug!(peer = link.id(), error = %e, "choke update failed");
            }
        }

        swarm.set_preferred(&selected);
        for link in &links {
            link.reset_downloaded();
        }
        swarm.journal().preferred_neighbors(&selected);
    }
}
