pub mod app;
pub mod logging;
pub mod ui;

use clap::{Args, Parser, Subcommand, ValueEnum};
use samstore::{IndexKind, Scope};

#[derive(Parser)]
#[command(name = "samstore")]
#[command(about = "Cleanup, index checks and index rebuilds for the redis sample store")]
#[command(version)]
pub struct Cli {
    /// Redis connection URL; defaults to $REDIS_URL, then redis://localhost:6379
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Delete broken samples and fix the master sample list
    Cleanup {
        /// Report what would change without writing
        #[arg(long)]
        preview: bool,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Count samples missing from an index
    Check {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = IndexArg::SubjectAspect)]
        index: IndexArg,
    },
    /// Delete and repopulate an index
    Rebuild {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = IndexArg::SubjectAspect)]
        index: IndexArg,
        /// Populate without deleting first
        #[arg(long)]
        additive: bool,
    },
    /// Derive the aspect-to-subject index from the subject-to-aspect index
    RebuildAspectMapFromSubjects {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Check on a timer and rebuild on drift until interrupted
    Reconcile {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = IndexArg::SubjectAspect)]
        index: IndexArg,
        /// Milliseconds between passes; defaults to $FREQUENCY, then one hour
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// List samples whose relatedLinks holds "null" or "undefined"
    CheckRelatedLinks {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// List samples updated within the last few milliseconds
    RecentSamples {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 60_000)]
        within_ms: u64,
    },
}

#[derive(Args)]
pub struct ScopeArgs {
    /// Subject prefix to restrict to; defaults to $ROOT_SUBJECT, then everything
    #[arg(long)]
    pub scope: Option<String>,
}

impl ScopeArgs {
    pub fn resolve(&self, fallback: &Scope) -> Scope {
        match &self.scope {
            Some(prefix) => Scope::new(prefix),
            None => fallback.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexArg {
    SubjectAspect,
    AspectSubject,
}

impl From<IndexArg> for IndexKind {
    fn from(arg: IndexArg) -> Self {
        match arg {
            IndexArg::SubjectAspect => IndexKind::SubjectAspect,
            IndexArg::AspectSubject => IndexKind::AspectSubject,
        }
    }
}
