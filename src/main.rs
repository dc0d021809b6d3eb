use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("COHORT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = cohort::run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
