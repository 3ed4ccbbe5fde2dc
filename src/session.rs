//! Peer lifecycle: connection setup, receive loops, and shutdown.
//!
//! A [`Session`] opens the listening endpoint, dials every roster peer
//! with a lower id, runs one receive loop per established link, and
//! spawns the three scheduling loops plus the completion monitor. When
//! the monitor observes that this peer and every roster neighbor hold
//! the complete file, it signals shutdown and the whole process winds
//! down.

use crate::config::{CommonConfig, PeerEntry};
use crate::peer::{Handshake, Message, MessageReader, MessageWriter, PeerError, PeerId, PeerLink};
use crate::storage::PieceStore;
use crate::swarm::{choking_loop, optimistic_loop, request_loop, Swarm, SwarmError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Waits until the shutdown flag is set, without holding a lock guard
/// across an `.await` (needed for the containing future to stay `Send`).
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}

/// How long to wait for the remote's BITFIELD after a handshake before
/// concluding it has no pieces to announce.
const BITFIELD_WAIT: Duration = Duration::from_secs(5);
/// Pause after dialing so early connections stabilize before the
/// schedulers start issuing choke decisions.
const SETTLE_DELAY: Duration = Duration::from_secs(2);
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to bind listening port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

/// One peer process: its run parameters, roster, and swarm state.
pub struct Session {
    config: CommonConfig,
    roster: Vec<PeerEntry>,
    me: PeerEntry,
    swarm: Arc<Swarm>,
    shutdown: Arc<watch::Sender<bool>>,
}

struct LinkSetup {
    link: Arc<PeerLink>,
    reader: MessageReader<OwnedReadHalf>,
    /// A non-BITFIELD message that arrived during the setup window; it
    /// is dispatched first by the receive loop rather than dropped.
    pending: Option<Message>,
}

impl Session {
    pub fn new(
        config: CommonConfig,
        roster: Vec<PeerEntry>,
        me: PeerEntry,
        swarm: Arc<Swarm>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            roster,
            me,
            swarm,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    /// Requests shutdown; `run` unwinds once every task has seen it.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Runs the peer until the swarm-wide download completes (or
    /// shutdown is requested).
    pub async fn run(&self) -> Result<(), SessionError> {
        let listener = TcpListener::bind(("0.0.0.0", self.me.port))
            .await
            .map_err(|source| SessionError::Bind {
                port: self.me.port,
                source,
            })?;
        info!(peer = self.me.id, port = self.me.port, "listening for peers");

        tokio::spawn(accept_loop(
            listener,
            self.swarm.clone(),
            Arc::new(self.roster.clone()),
            self.me.id,
            self.shutdown.clone(),
        ));

        // Roster order defines dial order; only strictly-lower ids are
        // dialed, higher ids will dial us.
        for peer in &self.roster {
            if peer.id >= self.me.id {
                continue;
            }
            if let Err(e) = self.dial(peer).await {
                warn!(peer = peer.id, error = %e, "could not connect; peer may dial us later");
            }
        }

        sleep(SETTLE_DELAY).await;

        tokio::spawn(choking_loop(
            self.swarm.clone(),
            Duration::from_secs(self.config.unchoking_interval),
            self.config.preferred_neighbors,
            self.shutdown.subscribe(),
        ));
        tokio::spawn(optimistic_loop(
            self.swarm.clone(),
            Duration::from_secs(self.config.optimistic_unchoking_interval),
            self.shutdown.subscribe(),
        ));
        tokio::spawn(request_loop(self.swarm.clone(), self.shutdown.subscribe()));

        let others: Vec<PeerId> = self
            .roster
            .iter()
            .map(|p| p.id)
            .filter(|id| *id != self.me.id)
            .collect();
        tokio::spawn(completion_monitor(
            self.swarm.clone(),
            others,
            self.shutdown.clone(),
        ));

        let mut rx = self.shutdown.subscribe();
        wait_shutdown(&mut rx).await;

        // Dropping the write halves closes the sockets, which unblocks
        // every remote's receive loop as well as our own.
        self.swarm.clear_links();
        Ok(())
    }

    async fn dial(&self, peer: &PeerEntry) -> Result<(), PeerError> {
        let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = MessageReader::new(read_half);
        let mut writer = MessageWriter::new(write_half);

        writer.send_handshake(&Handshake::new(self.me.id)).await?;
        let theirs = reader.receive_handshake().await?;
        if theirs.peer_id != peer.id {
            return Err(PeerError::IdMismatch {
                expected: peer.id,
                actual: theirs.peer_id,
            });
        }

        self.swarm.journal().connection_to(peer.id);

        let setup = finish_link(reader, writer, peer.id, self.swarm.store()).await?;
        install_link(self.swarm.clone(), setup, self.shutdown.clone()).await;
        Ok(())
    }
}

/// Sends our bitfield (if we hold anything) and waits a bounded time
/// for the remote's. Absence is not an error, and an early non-BITFIELD
/// message is preserved for dispatch.
async fn finish_link(
    mut reader: MessageReader<OwnedReadHalf>,
    mut writer: MessageWriter<OwnedWriteHalf>,
    id: PeerId,
    store: &Arc<PieceStore>,
) -> Result<LinkSetup, PeerError> {
    let ours = store.bitfield();
    if !ours.is_empty() {
        writer.send_message(&Message::Bitfield(ours.to_bytes())).await?;
    }

    let link = Arc::new(PeerLink::new(id, writer, store.piece_count() as usize));

    let mut pending = None;
    match timeout(BITFIELD_WAIT, reader.receive_message()).await {
        Ok(Ok(Message::Bitfield(payload))) => link.apply_bitfield(payload),
        Ok(Ok(other)) => pending = Some(other),
        Ok(Err(e)) => return Err(e),
        Err(_) => {}
    }

    Ok(LinkSetup {
        link,
        reader,
        pending,
    })
}

async fn install_link(swarm: Arc<Swarm>, setup: LinkSetup, shutdown: Arc<watch::Sender<bool>>) {
    let LinkSetup {
        link,
        reader,
        pending,
    } = setup;

    swarm.insert_link(link.clone());
    if let Err(e) = link.update_interest(&swarm.store().bitfield()).await {
        debug!(peer = link.id(), error = %e, "initial interest update failed");
    }

    tokio::spawn(receive_loop(swarm, link, reader, pending, shutdown));
}

async fn receive_loop(
    swarm: Arc<Swarm>,
    link: Arc<PeerLink>,
    mut reader: MessageReader<OwnedReadHalf>,
    pending: Option<Message>,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut rx = shutdown.subscribe();
    let mut queued = pending;

    loop {
        let message = match queued.take() {
            Some(message) => message,
            None => {
                tokio::select! {
                    _ = wait_shutdown(&mut rx) => break,
                    result = reader.receive_message() => match result {
                        Ok(message) => message,
                        Err(e) => {
                            debug!(peer = link.id(), error = %e, "link closed");
                            break;
                        }
                    }
                }
            }
        };

        if let Err(e) = swarm.handle_message(&link, message).await {
            match e {
                SwarmError::Storage(e) => {
                    tracing::error!(error = %e, "piece store failure, shutting down");
                    let _ = shutdown.send(true);
                    break;
                }
                SwarmError::Peer(e) => {
                    debug!(peer = link.id(), error = %e, "link error");
                    break;
                }
            }
        }
    }

    swarm.remove_link(link.id());
}

async fn accept_loop(
    listener: TcpListener,
    swarm: Arc<Swarm>,
    roster: Arc<Vec<PeerEntry>>,
    local_id: PeerId,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut rx = shutdown.subscribe();

    loop {
        let stream = tokio::select! {
            _ = wait_shutdown(&mut rx) => return,
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!(%addr, "inbound connection");
                    stream
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            }
        };

        let swarm = swarm.clone();
        let roster = roster.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match establish_inbound(stream, &roster, local_id, &swarm).await {
                Ok(setup) => {
                    if swarm.link(setup.link.id()).is_some() {
                        debug!(peer = setup.link.id(), "duplicate connection dropped");
                        return;
                    }
                    install_link(swarm, setup, shutdown).await;
                }
                Err(e) => debug!(error = %e, "inbound handshake rejected"),
            }
        });
    }
}

async fn establish_inbound(
    stream: TcpStream,
    roster: &[PeerEntry],
    local_id: PeerId,
    swarm: &Arc<Swarm>,
) -> Result<LinkSetup, PeerError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = MessageReader::new(read_half);
    let mut writer = MessageWriter::new(write_half);

    let theirs = reader.receive_handshake().await?;
    let id = theirs.peer_id;
    if id == local_id || !roster.iter().any(|p| p.id == id) {
        return Err(PeerError::UnknownPeer(id));
    }

    writer.send_handshake(&Handshake::new(local_id)).await?;
    swarm.journal().connection_from(id);

    finish_link(reader, writer, id, swarm.store()).await
}

/// Fires shutdown once this peer and every other roster member hold the
/// complete file. A link that closed after its bitfield filled up still
/// counts, so a neighbor that finished and exited cannot wedge us.
async fn completion_monitor(
    swarm: Arc<Swarm>,
    others: Vec<PeerId>,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut rx = shutdown.subscribe();
    let piece_count = swarm.store().piece_count() as usize;

    loop {
        tokio::select! {
            _ = sleep(MONITOR_INTERVAL) => {}
            _ = wait_shutdown(&mut rx) => return,
        }

        if !swarm.store().is_complete() {
            continue;
        }

        let departed = swarm.departed_complete_ids();
        let everyone_done = others.iter().all(|id| match swarm.link(*id) {
            Some(link) => link.peer_piece_count() == piece_count,
            None => departed.contains(id),
        });

        if everyone_done {
            info!("every peer holds the complete file, shutting down");
            let _ = shutdown.send(true);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use crate::peer::PROTOCOL;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn test_config() -> CommonConfig {
        CommonConfig {
            preferred_neighbors: 1,
            unchoking_interval: 1,
            optimistic_unchoking_interval: 2,
            file_name: "payload.dat".to_string(),
            file_size: 1000,
            piece_size: 100,
        }
    }

    async fn build_session(
        workdir: &Path,
        config: &CommonConfig,
        roster: &[PeerEntry],
        id: PeerId,
    ) -> Arc<Session> {
        let me = roster.iter().find(|p| p.id == id).unwrap().clone();
        let store = PieceStore::open(
            &workdir.join(id.to_string()),
            &config.file_name,
            config.file_size,
            config.piece_size,
            me.has_file,
        )
        .await
        .unwrap();
        let journal = Journal::create(&workdir.join(format!("log_{}.log", id)), id).unwrap();
        let swarm = Arc::new(Swarm::new(id, Arc::new(store), Arc::new(journal)));
        Arc::new(Session::new(config.clone(), roster.to_vec(), me, swarm))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_seed_and_leecher_reach_completion() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let seed_dir = dir.path().join("1001");
        std::fs::create_dir_all(&seed_dir).unwrap();
        std::fs::write(seed_dir.join("payload.dat"), &payload).unwrap();

        let roster = vec![
            PeerEntry {
                id: 1001,
                host: "127.0.0.1".to_string(),
                port: free_port(),
                has_file: true,
            },
            PeerEntry {
                id: 1002,
                host: "127.0.0.1".to_string(),
                port: free_port(),
                has_file: false,
            },
        ];
        let config = test_config();

        let seed = build_session(dir.path(), &config, &roster, 1001).await;
        let seed_task = tokio::spawn({
            let seed = seed.clone();
            async move { seed.run().await }
        });
        sleep(Duration::from_millis(300)).await;

        let leecher = build_session(dir.path(), &config, &roster, 1002).await;
        let leecher_swarm = leecher.swarm().clone();
        let leecher_task = tokio::spawn({
            let leecher = leecher.clone();
            async move { leecher.run().await }
        });

        timeout(Duration::from_secs(60), async {
            seed_task.await.unwrap().unwrap();
            leecher_task.await.unwrap().unwrap();
        })
        .await
        .expect("swarm did not reach completion in time");

        assert!(leecher_swarm.store().is_complete());
        let downloaded = std::fs::read(dir.path().join("1002").join("payload.dat")).unwrap();
        assert_eq!(downloaded, payload);

        let leecher_log = std::fs::read_to_string(dir.path().join("log_1002.log")).unwrap();
        assert!(leecher_log.contains("Peer 1002 makes a connection to Peer 1001."));
        assert!(leecher_log.contains("Peer 1002 is unchoked by 1001."));
        assert!(leecher_log.contains("Peer 1002 has downloaded the complete file."));

        let seed_log = std::fs::read_to_string(dir.path().join("log_1001.log")).unwrap();
        assert!(seed_log.contains("Peer 1001 is connected from Peer 1002."));
        assert!(seed_log.contains("Peer 1001 received the 'interested' message from 1002."));
        assert!(seed_log.contains("Peer 1001 received the 'not interested' message from 1002."));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_corrupt_handshake_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let seed_dir = dir.path().join("1001");
        std::fs::create_dir_all(&seed_dir).unwrap();
        std::fs::write(seed_dir.join("payload.dat"), vec![0u8; 1000]).unwrap();

        let roster = vec![
            PeerEntry {
                id: 1001,
                host: "127.0.0.1".to_string(),
                port: free_port(),
                has_file: true,
            },
            PeerEntry {
                id: 1002,
                host: "127.0.0.1".to_string(),
                port: free_port(),
                has_file: false,
            },
        ];
        let config = test_config();

        let session = build_session(dir.path(), &config, &roster, 1001).await;
        let swarm = session.swarm().clone();
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.run().await }
        });
        sleep(Duration::from_millis(300)).await;

        // Wrong final literal byte.
        let mut corrupt = Vec::new();
        corrupt.extend_from_slice(b"P2PFILESHARINGPRO_");
        corrupt.extend_from_slice(&[0u8; 10]);
        corrupt.extend_from_slice(&1002u32.to_be_bytes());
        assert_eq!(corrupt.len(), 32);

        let mut socket = TcpStream::connect(("127.0.0.1", roster[0].port))
            .await
            .unwrap();
        socket.write_all(&corrupt).await.unwrap();

        // The session drops the connection without replying.
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        // An id outside the roster is rejected the same way.
        let mut unknown = Vec::new();
        unknown.extend_from_slice(PROTOCOL);
        unknown.extend_from_slice(&[0u8; 10]);
        unknown.extend_from_slice(&9999u32.to_be_bytes());

        let mut socket = TcpStream::connect(("127.0.0.1", roster[0].port))
            .await
            .unwrap();
        socket.write_all(&unknown).await.unwrap();
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(swarm.link_count(), 0);

        session.shutdown();
        task.await.unwrap().unwrap();
    }
}
