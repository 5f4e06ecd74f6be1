use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Path to the YAML config file
    #[arg(long, env = "TAILDRAIN_CONFIG")]
    pub config: PathBuf,

    /// Seconds cancelled workers get to exit before they are aborted
    #[arg(long, env = "TAILDRAIN_SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,
}

impl Default for AgentRun {
    fn default() -> Self {
        Self {
            config: PathBuf::new(),
            shutdown_grace_secs: 5,
        }
    }
}
