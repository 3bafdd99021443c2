// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML file, deserializes it into `RawConfig` and converts that
//! into the typed `Config`.

use crate::config::model::{Config, ConfigError, RawConfig};
use log::Level;
use std::{fs, io, path::Path};

/// Parse configuration text.
pub fn parse(text: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    Config::try_from(raw)
}

/// Load an explicitly requested file; it must exist.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    avf_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let cfg = parse(&txt)?;
    avf_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Load the default file; a missing file yields the built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    match load(path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            avf_log!(Level::Debug, "config", "{:?} not found, using defaults", path);
            Ok(Config::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_text_is_all_defaults() {
        assert_eq!(parse("").unwrap(), Config::default());
    }

    #[test]
    fn full_file_round_trips_into_typed_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
enable = true
file = "avf.log"
level = "DEBUG"

[filter]
port_name = '\OtherPort'
protected_capacity = 8

[listener]
workers = 2
pending_reads = 6
poll_interval = "250ms"
shutdown_timeout = "2s"

[consultant]
enable = false
endpoint = "/tmp/c.sock"
read_timeout = "1s 500ms"

[metrics]
listen = "127.0.0.1:9100"
"#
        )
        .unwrap();

        let cfg = load(file.path()).unwrap();
        assert!(cfg.logging.enable);
        assert_eq!(cfg.logging.file.as_deref(), Some("avf.log"));
        assert_eq!(cfg.filter.port_name, r"\OtherPort");
        assert_eq!(cfg.filter.protected_capacity, 8);
        assert_eq!(cfg.listener.workers, 2);
        assert_eq!(cfg.listener.pending_reads, 6);
        assert_eq!(cfg.listener.poll_interval, Some(Duration::from_millis(250)));
        assert_eq!(cfg.listener.shutdown_timeout, Duration::from_secs(2));
        assert!(!cfg.consultant.enable);
        assert_eq!(cfg.consultant.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.metrics.listen, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn zero_workers_or_reads_are_rejected() {
        for text in ["[listener]\nworkers = 0", "[listener]\npending_reads = 0"] {
            assert!(matches!(parse(text), Err(ConfigError::Invalid { .. })), "{text}");
        }
    }

    #[test]
    fn bad_values_are_reported_by_field() {
        match parse("[consultant]\nread_timeout = \"soon\"") {
            Err(ConfigError::InvalidDuration { field, .. }) => assert_eq!(field, "consultant.read_timeout"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse("[metrics]\nlisten = \"nope\""), Err(ConfigError::InvalidAddress { .. })));
        assert!(matches!(parse("[listener]\nthreads = 3"), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn missing_default_file_falls_back_but_explicit_file_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");
        assert_eq!(load_or_default(&missing).unwrap(), Config::default());
        assert!(matches!(load(&missing), Err(ConfigError::Io { .. })));
    }
}
