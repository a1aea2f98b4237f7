use std::io::Write;

/// Install the process-wide logger.
///
/// Reads `RUST_LOG` (default `info`) and prints `[LEVEL] [component] message`,
/// where the component is the log target with the crate prefix removed.
/// Calling it again is harmless.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level_str = match record.level() {
                log::Level::Trace => "TRACE",
                log::Level::Debug => "DEBUG",
                log::Level::Info => "INFO ",
                log::Level::Warn => "WARN ",
                log::Level::Error => "ERROR",
            };
            writeln!(buf, "[{}] [{}] {}", level_str, component(record.target()), record.args())
        })
        .try_init();
}

fn component(target: &str) -> &str {
    target.strip_prefix("canbridge::").unwrap_or(target)
}
