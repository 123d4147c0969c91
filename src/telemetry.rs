use tracing_subscriber::EnvFilter;

/// Stderr logging for the daemon. `RUST_LOG` wins, then `COUNSELD_LOG`,
/// then "info". stdout is reserved for the response stream.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => {
            let level = std::env::var("COUNSELD_LOG").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(&level)?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()?;
    Ok(())
}
