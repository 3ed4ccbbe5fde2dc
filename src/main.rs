use anyhow::{Context, Result};
use clap::Parser;
use pshare::{config, CommonConfig, Journal, PieceStore, Session, Swarm};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A peer process in a fixed-roster file distribution swarm.
///
/// Reads `Common.cfg` and `PeerInfo.cfg` from the working directory,
/// serves and downloads pieces of the shared file, and exits once every
/// peer in the roster holds the complete file.
#[derive(Parser)]
#[command(name = "pshare", version)]
struct Args {
    /// This peer's id, as listed in PeerInfo.cfg.
    peer_id: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let workdir = std::env::current_dir()?;

    let config =
        CommonConfig::load(&workdir.join("Common.cfg")).context("loading Common.cfg")?;
    let roster =
        config::load_roster(&workdir.join("PeerInfo.cfg")).context("loading PeerInfo.cfg")?;
    let me = roster
        .iter()
        .find(|p| p.id == args.peer_id)
        .cloned()
        .with_context(|| format!("peer id {} not present in PeerInfo.cfg", args.peer_id))?;

    let store = PieceStore::open(
        &workdir.join(args.peer_id.to_string()),
        &config.file_name,
        config.file_size,
        config.piece_size,
        me.has_file,
    )
    .await
    .context("opening piece store")?;

    let journal = Journal::create(
        &workdir.join(format!("log_{}.log", args.peer_id)),
        args.peer_id,
    )
    .context("creating log file")?;

    let swarm = Arc::new(Swarm::new(args.peer_id, Arc::new(store), Arc::new(journal)));
    let session = Session::new(config, roster, me, swarm);

    session.run().await.context("running peer session")?;
    Ok(())
}
