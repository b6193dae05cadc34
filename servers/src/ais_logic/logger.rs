use anyhow::Result;
use std::fs;
use std::path::Path;

/// Prefix of every log file written by the relay.
const LOG_FILE_PREFIX: &str = "server_ais_";

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}{}.log", LOG_FILE_PREFIX, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let path = e.path();
            path.extension().is_some_and(|ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|e| std::cmp::Reverse(e.metadata().and_then(|m| m.modified()).ok()));

    // Keep the most recent one (index 0), delete the rest
    for entry in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }

    #[test]
    fn test_cleanup_keeps_newest_relay_log() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("server_ais_2024-01-01_00-00-00.log");
        let new = dir.path().join("server_ais_2024-01-02_00-00-00.log");
        let other = dir.path().join("unrelated.log");
        for path in [&old, &new, &other] {
            fs::write(path, "x").unwrap();
        }
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options().write(true).open(&old).unwrap().set_modified(past).unwrap();

        cleanup_old_logs(dir.path()).unwrap();

        assert!(!old.exists());
        assert!(new.exists());
        assert!(other.exists());
    }
}
