//! Subscriber setup for the binary.
//!
//! Library code only emits `tracing` events. Each chat client logs under its
//! own `chat{room_id, liver}` span, so lines from different rooms can be told
//! apart without any per-room logger.
//!
//! The file appender writes through `tracing-appender`'s non-blocking worker
//! into a [`SizeRollingWriter`], which starts a new file in `log.dir` each
//! time the current one reaches `log.max_file_size`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LogAppender, LogConfig};

/// The filter to install: `RUST_LOG` if set, otherwise `config.level`.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Invalid(format!("log.level {:?}: {e}", config.level))),
    }
}

/// Keeps the background log writer alive. Buffered lines are flushed when it
/// is dropped, so hold it until the process exits.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Installs the global fmt subscriber.
///
/// # Errors
/// [`ConfigError::Invalid`] if the level does not parse, the log directory
/// cannot be created, or a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<LogGuard, ConfigError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config)?)
        .with_target(config.target);

    let (installed, worker) = match config.appender {
        LogAppender::Console => (builder.with_ansi(config.ansi).try_init(), None),
        LogAppender::File => {
            let (writer, guard) = file_writer(config)?;
            let installed = builder.with_ansi(false).with_writer(writer).try_init();
            (installed, Some(guard))
        }
    };
    installed.map_err(|e| ConfigError::Invalid(format!("logging: {e}")))?;
    Ok(LogGuard { _worker: worker })
}

/// A non-blocking writer over a [`SizeRollingWriter`] for `config.dir`.
pub fn file_writer(config: &LogConfig) -> Result<(NonBlocking, WorkerGuard), ConfigError> {
    let writer = SizeRollingWriter::new(&config.dir, config.max_file_size).map_err(|e| {
        ConfigError::Invalid(format!("log.dir {}: {e}", config.dir.display()))
    })?;
    Ok(tracing_appender::non_blocking(writer))
}

// ---------------------------------------------------------------------------
// SizeRollingWriter
// ---------------------------------------------------------------------------

/// Appends to `<dir>/livechat-<unix secs>-<seq>.log`, moving on to a new
/// file once `max_size` bytes have been written to the current one.
///
/// A single write is never split, so a file can exceed `max_size` by up to
/// one line.
#[derive(Debug)]
pub struct SizeRollingWriter {
    dir: PathBuf,
    max_size: u64,
    current: Option<BufWriter<File>>,
    written: u64,
    seq: u32,
}

impl SizeRollingWriter {
    /// Creates `dir` if needed. The first file is opened on first write.
    pub fn new(dir: impl AsRef<Path>, max_size: u64) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_size: max_size.max(1),
            current: None,
            written: 0,
            seq: 0,
        })
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut old) = self.current.take() {
            old.flush()?;
        }
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.dir.join(format!("livechat-{secs}-{:04}.log", self.seq));
        self.seq = self.seq.wrapping_add(1);
        self.written = 0;

        let file = File::options().create(true).append(true).open(path)?;
        self.current = Some(BufWriter::new(file));
        Ok(())
    }
}

impl Write for SizeRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current.is_none() || self.written >= self.max_size {
            self.roll()?;
        }
        let Some(writer) = self.current.as_mut() else {
            return Err(io::Error::other("no log file open"));
        };
        writer.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        // Only meaningful when RUST_LOG is unset.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "livechat=notalevel".into(),
            ..LogConfig::default()
        };
        assert!(matches!(env_filter(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_directives_are_accepted() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "livechat_client=debug,info".into(),
            ..LogConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn test_rolling_writer_starts_new_file_at_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRollingWriter::new(dir.path().join("logs"), 10).unwrap();
        assert!(log_files(&dir.path().join("logs")).is_empty(), "opened lazily");

        writer.write_all(b"0123456789ab").unwrap();
        writer.write_all(b"next\n").unwrap();
        writer.write_all(b"more\n").unwrap();
        writer.flush().unwrap();

        let files = log_files(&dir.path().join("logs"));
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "0123456789ab");
        assert_eq!(fs::read_to_string(&files[1]).unwrap(), "next\nmore\n");
    }

    #[test]
    fn test_file_writer_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            appender: LogAppender::File,
            dir: dir.path().to_path_buf(),
            ..LogConfig::default()
        };
        let (writer, guard) = file_writer(&config).unwrap();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(writer)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(room_id = 7, "room resolved");
        });
        // Dropping the guard drains the background worker.
        drop(guard);

        let files = log_files(dir.path());
        assert_eq!(files.len(), 1);
        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("room resolved"), "{contents}");
        assert!(contents.contains("room_id=7"), "{contents}");
    }

    #[test]
    fn test_file_writer_reports_unusable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let config = LogConfig {
            dir: blocker.join("logs"),
            ..LogConfig::default()
        };
        assert!(matches!(file_writer(&config), Err(ConfigError::Invalid(_))));
    }
}
