use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "avelon-exporter",
    version,
    about = "Exports Avelon cloud device telemetry as Prometheus metrics"
)]
pub struct Args {
    /// Listener address for the scrape endpoint (overrides AVELON_EXPORTER_HTTP_BIND).
    #[arg(long)]
    pub bind: Option<String>,
    /// Base URL of the Avelon devices API (overrides AVELON_API_BASE).
    #[arg(long)]
    pub api_base: Option<String>,
    /// Idle time between fetch cycles (overrides AVELON_FETCH_INTERVAL_SECONDS).
    #[arg(long)]
    pub fetch_interval_seconds: Option<u64>,
    /// Run a single fetch cycle, print the metrics and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
}
