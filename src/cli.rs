use clap::Parser;

/// Command-line options for meremail.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Validate required environment variables and exit without starting any
    /// subsystem.
    #[arg(long)]
    pub check_config: bool,

    /// Skip the IMAP ingestion subsystems (IDLE loop + secondary poll);
    /// serve the HTTP API from whatever is already in the store.
    #[arg(long)]
    pub no_ingest: bool,

    /// Skip the outbound send queue tick loop.
    #[arg(long)]
    pub no_send_queue: bool,

    /// Skip the daily scheduler (backup + retention).
    #[arg(long)]
    pub no_scheduler: bool,

    /// Run the retroactive rule-application batch job for a given rule id
    /// and exit instead of starting the server.
    #[arg(long)]
    pub apply_rule: Option<i64>,
}
