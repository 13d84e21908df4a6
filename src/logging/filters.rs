use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Строит фильтр: `RUST_LOG`, если задан, иначе директива из конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    let directive = config.build_filter_directive();

    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "Invalid log filter directive from config ('{directive}'): {e}; falling back to 'info'"
                );
                EnvFilter::new("info")
            }
        },
    }
}
