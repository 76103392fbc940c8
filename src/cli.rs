use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "Dependency-aware process supervisor driven by a YAML procfile"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor in the foreground
    Start {
        /// Path to the procfile (YAML service manifest)
        procfile: PathBuf,

        /// Reconciliation period, e.g. "1s" or "500ms"
        #[arg(long, default_value = "1s")]
        tick_interval: String,

        /// Number of launcher workers
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Upper bound on services; also the work queue capacity
        #[arg(long, default_value_t = 100)]
        max_services: usize,

        /// Internal signal channel buffer
        #[arg(long, default_value_t = 4)]
        signal_buffer: usize,

        /// SIGTERM -> SIGKILL grace period during shutdown
        #[arg(long, default_value = "5s")]
        grace: String,
    },

    /// Validate a procfile and print the launch order
    Check {
        /// Path to the procfile (YAML service manifest)
        procfile: PathBuf,
    },
}
