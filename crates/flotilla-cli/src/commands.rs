//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the fleet loop and the admin/webhook API
    Serve,

    /// Run reconciliation without the API
    Reconcile {
        /// Run a single cycle, wait for provisioning, and exit
        #[arg(long)]
        once: bool,
    },

    /// Delete orphaned instances and registrations, then exit
    Sweep,

    /// Load and validate the configuration, then exit
    CheckConfig,
}
