use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Initialize the logger with a timestamped, module-tagged format.
///
/// Calling it more than once is harmless; later calls are ignored.
pub fn init_logger(level: LevelFilter) {
    let _ = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or("rustsniff"),
                record.args()
            )
        })
        .filter(None, level)
        // pnet and pcap are chatty below warn
        .filter(Some("pnet"), LevelFilter::Warn.min(level))
        .filter(Some("pcap"), LevelFilter::Warn.min(level))
        .try_init();
}

/// Get log level from string
pub fn get_log_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" | "quiet" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_log_level() {
        assert_eq!(get_log_level("TRACE"), LevelFilter::Trace);
        assert_eq!(get_log_level(" warning "), LevelFilter::Warn);
        assert_eq!(get_log_level("quiet"), LevelFilter::Off);
        assert_eq!(get_log_level("verbose"), LevelFilter::Info);
    }

    #[test]
    fn test_init_logger_twice() {
        init_logger(LevelFilter::Debug);
        init_logger(LevelFilter::Trace);
        log::debug!("logger initialised");
    }
}
