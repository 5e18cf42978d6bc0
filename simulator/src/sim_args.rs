use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct SimArgs {
    /// Topology configuration
    #[arg(short, long)]
    pub config_file: String,

    /// Simulated time to run for (s)
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    /// Seed for link loss and delay jitter
    #[arg(short, long, default_value_t = 0)]
    pub seed: u64,

    #[arg(short, long, default_value_t = false)]
    pub pretty: bool,
}
