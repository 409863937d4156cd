//! Ingestion: a primary IDLE loop against the inbox and a secondary polling
//! loop over the remaining configured folders (spec.md 4.E). Both feed the
//! same Parser -> Importer pipeline; the only coordination between them is
//! Store's own write serialization.

pub mod connector;
pub mod state;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Days, Utc};
use futures::TryStreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::importer;
use crate::parser;
use crate::store::Store;
use state::IngestionState;

const PRIMARY_FOLDER: &str = "INBOX";
const IDLE_REFRESH: Duration = Duration::from_secs(25 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);
const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Folders the secondary loop walks besides the primary inbox. In a real
/// deployment this would come from config; fixed here to the well-known
/// auxiliary folders this system cares about.
const AUXILIARY_FOLDERS: &[&str] = &["Sent", "Junk", "Archive"];

pub type StopSignal = watch::Receiver<bool>;

/// Primary IDLE loop: connects once, re-idles forever, reconnecting with
/// exponential backoff on any failure. Returns only when `stop` fires.
pub async fn run_primary(config: Config, store: Store, mut stop: StopSignal) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *stop.borrow() {
            return;
        }
        match primary_cycle(&config, &store, &mut stop).await {
            Ok(()) => {
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "primary IMAP loop failed, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stop.changed() => return,
                }
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
        if *stop.borrow() {
            return;
        }
    }
}

async fn primary_cycle(config: &Config, store: &Store, stop: &mut StopSignal) -> anyhow::Result<()> {
    let mut session = connector::connect(config).await?;
    let mailbox = session.select(PRIMARY_FOLDER).await?;

    let state_path = config.ingestion_state_path();
    let mut state = IngestionState::load(&state_path);
    if state.primary_uid_validity != mailbox.uid_validity {
        debug!("UIDVALIDITY changed for primary folder, resetting watermark");
        state.primary_last_uid = None;
        state.primary_uid_validity = mailbox.uid_validity;
    }

    if state.primary_last_uid.is_none() {
        let since = Utc::now()
            .checked_sub_days(Days::new(1))
            .unwrap_or_else(Utc::now);
        let uids = session
            .uid_search(format!("SINCE {}", imap_date(since)))
            .await?;
        fetch_and_import(&mut session, store, config, PRIMARY_FOLDER, uids, &mut state).await?;
        state.save(&state_path).ok();
    }

    info!("entering IDLE on primary folder");
    loop {
        if *stop.borrow() {
            session.logout().await.ok();
            return Ok(());
        }

        let (grew, resumed) = idle_until_change_or_timeout(session, IDLE_REFRESH).await?;
        session = resumed;
        if grew {
            let mailbox = session.select(PRIMARY_FOLDER).await?;
            if state.primary_uid_validity != mailbox.uid_validity {
                state.primary_last_uid = None;
                state.primary_uid_validity = mailbox.uid_validity;
            }
            let next = state.primary_last_uid.map(|u| u + 1).unwrap_or(1);
            let range: HashSet<u32> = (next..=next.max(mailbox.exists)).collect();
            if !range.is_empty() {
                fetch_and_import(&mut session, store, config, PRIMARY_FOLDER, range, &mut state).await?;
                state.save(&state_path).ok();
            }
        }

        tokio::select! {
            () = std::future::ready(()) => {}
            _ = stop.changed() => {
                session.logout().await.ok();
                return Ok(());
            }
        }
    }
}

/// Idles until the server pushes an untagged response (new mail, typically)
/// or `timeout` elapses, whichever comes first. Returns whether a push was
/// observed; a timeout is treated as "nothing to report" and simply lets the
/// caller re-enter IDLE with a fresh command, per RFC 2177's 29-minute cap.
async fn idle_until_change_or_timeout<S>(
    session: async_imap::Session<S>,
    timeout: Duration,
) -> anyhow::Result<(bool, async_imap::Session<S>)>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send,
{
    let mut idle = session.idle();
    idle.init().await?;
    let (idle_wait, interrupt) = idle.wait();

    let pushed = match tokio::time::timeout(timeout, idle_wait).await {
        Ok(Ok(_response)) => true,
        Ok(Err(e)) => return Err(e.into()),
        Err(_elapsed) => {
            interrupt.interrupt();
            false
        }
    };
    let session = idle.done().await?;
    Ok((pushed, session))
}

/// Secondary polling loop: every 15 minutes, walks the configured auxiliary
/// folders and imports anything newer than their stored watermark.
pub async fn run_secondary(config: Config, store: Store, mut stop: StopSignal) {
    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(e) = secondary_sweep(&config, &store).await {
            warn!(error = %e, "secondary polling sweep failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stop.changed() => return,
        }
    }
}

async fn secondary_sweep(config: &Config, store: &Store) -> anyhow::Result<()> {
    let mut session = connector::connect(config).await?;
    let state_path = config.ingestion_state_path();
    let mut state = IngestionState::load(&state_path);

    let available: HashSet<String> = session
        .list(Some(""), Some("*"))
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter_map(|n| n.name().map(|s| s.to_string()))
        .collect();

    for folder in AUXILIARY_FOLDERS {
        if !available.contains(*folder) {
            continue;
        }
        session.select(folder).await?;
        let watermark = state
            .folder_watermarks
            .entry((*folder).to_string())
            .or_insert_with(|| {
                Utc::now()
                    .checked_sub_days(Days::new(1))
                    .unwrap_or_else(Utc::now)
            })
            .to_owned();

        let uids = session
            .uid_search(format!("SINCE {}", imap_date(watermark)))
            .await?;
        if !uids.is_empty() {
            fetch_and_import(&mut session, store, config, folder, uids, &mut state).await?;
        }
        state.folder_watermarks.insert((*folder).to_string(), Utc::now());
    }

    session.logout().await.ok();
    state.save(&state_path).ok();
    Ok(())
}

async fn fetch_and_import<S>(
    session: &mut async_imap::Session<S>,
    store: &Store,
    config: &Config,
    folder: &str,
    uids: HashSet<u32>,
    state: &mut IngestionState,
) -> anyhow::Result<()>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send,
{
    if uids.is_empty() {
        return Ok(());
    }
    let mut sorted: Vec<u32> = uids.into_iter().collect();
    sorted.sort_unstable();
    let set = sorted
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut stream = session.uid_fetch(set, "(UID FLAGS RFC822)").await?;
    while let Some(fetch) = stream.try_next().await? {
        let Some(raw) = fetch.body() else { continue };
        let flags: Vec<String> = fetch.flags().map(|f| format!("{f:?}")).collect();
        match parser::parse(raw, folder, &flags) {
            Ok(msg) => {
                if let Err(e) = importer::import(store, config, &msg, raw, folder, fetch.uid, &flags).await {
                    warn!(error = %e, folder, "import failed for fetched message");
                }
            }
            Err(e) => warn!(error = %e, folder, "failed to parse fetched message"),
        }
        if let Some(uid) = fetch.uid {
            if folder == PRIMARY_FOLDER {
                state.primary_last_uid = Some(state.primary_last_uid.map_or(uid, |m| m.max(uid)));
            }
        }
    }
    drop(stream);
    Ok(())
}

fn imap_date(dt: chrono::DateTime<Utc>) -> String {
    dt.format("%d-%b-%Y").to_string()
}
