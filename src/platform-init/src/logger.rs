// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boot log for the `log` facade.
//!
//! Messages go to standard output, to a file, or to an in-memory buffer the firmware hands over
//! once the boot phase ends.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{Log, Metadata, Record};
use serde::{Deserialize, Deserializer, Serialize};

/// Level of the boot log until it is configured.
pub const DEFAULT_LEVEL: log::LevelFilter = log::LevelFilter::Info;
/// Tag printed in front of every message.
pub const LOG_TAG: &str = "platform-init";
/// Size of the in-memory boot log.
pub const BUFFER_CAPACITY: usize = 64 * 1024;

/// The boot logger.
pub static BOOT_LOG: BootLogger = BootLogger::new();

#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum LoggerError {
    /// Cannot install the boot logger: {0}
    Install(#[from] log::SetLoggerError),
    /// Cannot open the log file: {0}
    Open(#[from] io::Error),
    /// A log file and the in-memory buffer cannot both be the log target
    ConflictingTargets,
}

#[derive(Debug)]
enum Sink {
    Stdout,
    File(File),
    Buffer(Vec<u8>),
}

impl Sink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Sink::Stdout => io::stdout().write_all(bytes),
            Sink::File(file) => file.write_all(bytes),
            Sink::Buffer(buffer) => {
                if buffer.len() + bytes.len() > BUFFER_CAPACITY {
                    return Err(io::ErrorKind::OutOfMemory.into());
                }
                buffer.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout => io::stdout().flush(),
            Sink::File(file) => file.flush(),
            Sink::Buffer(_) => Ok(()),
        }
    }
}

#[derive(Debug)]
struct State {
    sink: Sink,
    level: log::LevelFilter,
    /// Module path prefix a record must match, any module when `None`.
    module: Option<String>,
    show_level: bool,
    show_log_origin: bool,
    dropped: usize,
}

impl State {
    fn accepts(&self, module_path: Option<&str>) -> bool {
        match (&self.module, module_path) {
            (Some(prefix), Some(path)) => path.starts_with(prefix.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    fn render(&self, record: &Record) -> String {
        let mut prefix = String::from(LOG_TAG);
        if self.show_level {
            prefix.push(':');
            prefix.push_str(record.level().as_str());
        }
        if self.show_log_origin {
            let line = record
                .line()
                .map_or_else(|| String::from("?"), |line| line.to_string());
            prefix.push_str(&format!(":{}:{line}", record.file().unwrap_or("?")));
        }
        format!("[{prefix}] {}\n", record.args())
    }
}

/// `log::Log` implementation behind the boot log.
#[derive(Debug)]
pub struct BootLogger(Mutex<State>);

impl Default for BootLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BootLogger {
    /// A logger writing to standard output at [`DEFAULT_LEVEL`].
    pub const fn new() -> Self {
        BootLogger(Mutex::new(State {
            sink: Sink::Stdout,
            level: DEFAULT_LEVEL,
            module: None,
            show_level: false,
            show_log_origin: false,
            dropped: 0,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the logger with the `log` facade.
    pub fn install(&'static self) -> Result<(), LoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.lock().level);
        Ok(())
    }

    /// Applies `config` then registers the logger with the `log` facade.
    ///
    /// Called once by the firmware entry point before [`crate::BoardInit::run`].
    pub fn init(&'static self, config: LoggerConfig) -> Result<(), LoggerError> {
        self.configure(config)?;
        self.install()
    }

    /// Applies `config`. Fields left out keep their current value.
    pub fn configure(&self, config: LoggerConfig) -> Result<(), LoggerError> {
        let sink = match (config.log_path, config.capture_buffer) {
            (Some(_), Some(true)) => return Err(LoggerError::ConflictingTargets),
            (Some(path), _) => Some(Sink::File(
                File::options().create(true).append(true).open(path)?,
            )),
            (None, Some(true)) => Some(Sink::Buffer(Vec::new())),
            (None, Some(false)) => Some(Sink::Stdout),
            (None, None) => None,
        };

        let mut state = self.lock();
        if let Some(sink) = sink {
            state.sink = sink;
        }
        if let Some(level) = config.level {
            state.level = level.into();
        }
        if let Some(show_level) = config.show_level {
            state.show_level = show_level;
        }
        if let Some(show_log_origin) = config.show_log_origin {
            state.show_log_origin = show_log_origin;
        }
        if let Some(module) = config.module {
            state.module = Some(module);
        }
        log::set_max_level(state.level);
        Ok(())
    }

    /// Hands over the in-memory log, leaving an empty buffer behind.
    pub fn take_buffer(&self) -> Vec<u8> {
        match &mut self.lock().sink {
            Sink::Buffer(buffer) => std::mem::take(buffer),
            Sink::Stdout | Sink::File(_) => Vec::new(),
        }
    }

    /// Messages the sink could not take.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }
}

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.lock().level
    }

    fn log(&self, record: &Record) {
        let mut state = self.lock();
        if record.level() > state.level || !state.accepts(record.module_path()) {
            return;
        }
        let message = state.render(record);
        if state.sink.write(message.as_bytes()).is_err() {
            state.dropped += 1;
        }
    }

    fn flush(&self) {
        let mut state = self.lock();
        if state.sink.flush().is_err() {
            state.dropped += 1;
        }
    }
}

/// Boot log settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    /// File the log is appended to.
    pub log_path: Option<PathBuf>,
    /// Keep the log in memory instead of writing it out.
    pub capture_buffer: Option<bool>,
    pub level: Option<LevelFilter>,
    pub show_level: Option<bool>,
    pub show_log_origin: Option<bool>,
    /// Only log records whose module path starts with this prefix.
    pub module: Option<String>,
}

/// Level filter accepting `Warning` and any letter case on top of the `log` names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LevelFilter {
    Off,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(filter: LevelFilter) -> log::LevelFilter {
        match filter {
            LevelFilter::Off => log::LevelFilter::Off,
            LevelFilter::Trace => log::LevelFilter::Trace,
            LevelFilter::Debug => log::LevelFilter::Debug,
            LevelFilter::Info => log::LevelFilter::Info,
            LevelFilter::Warn => log::LevelFilter::Warn,
            LevelFilter::Error => log::LevelFilter::Error,
        }
    }
}

/// Unknown log level: {0:?}
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub struct ParseLevelError(String);

impl FromStr for LevelFilter {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for LevelFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    fn record_at<'a>(
        level: Level,
        module_path: &'a str,
        args: std::fmt::Arguments<'a>,
    ) -> Record<'a> {
        Record::builder()
            .args(args)
            .level(level)
            .file(Some("src/acpi/madt.rs"))
            .line(Some(42))
            .module_path(Some(module_path))
            .build()
    }

    fn buffered(config: LoggerConfig) -> BootLogger {
        let logger = BootLogger::new();
        logger
            .configure(LoggerConfig {
                capture_buffer: Some(true),
                ..config
            })
            .unwrap();
        logger
    }

    #[test]
    fn test_level_filter_conversion() {
        for (ours, theirs) in [
            (LevelFilter::Off, log::LevelFilter::Off),
            (LevelFilter::Trace, log::LevelFilter::Trace),
            (LevelFilter::Debug, log::LevelFilter::Debug),
            (LevelFilter::Info, log::LevelFilter::Info),
            (LevelFilter::Warn, log::LevelFilter::Warn),
            (LevelFilter::Error, log::LevelFilter::Error),
        ] {
            assert_eq!(log::LevelFilter::from(ours), theirs);
        }
    }

    #[test]
    fn test_level_filter_any_case() {
        use itertools::Itertools;

        for (name, level) in [
            ("off", LevelFilter::Off),
            ("trace", LevelFilter::Trace),
            ("debug", LevelFilter::Debug),
            ("info", LevelFilter::Info),
            ("warn", LevelFilter::Warn),
            ("warning", LevelFilter::Warn),
            ("error", LevelFilter::Error),
        ] {
            for upper in name.chars().map(|_| [false, true]).multi_cartesian_product() {
                let variant: String = name
                    .chars()
                    .zip_eq(upper)
                    .map(|(c, upper)| match upper {
                        true => c.to_ascii_uppercase(),
                        false => c,
                    })
                    .collect();
                assert_eq!(variant.parse::<LevelFilter>(), Ok(level));
                let config: LoggerConfig =
                    serde_json::from_str(&format!(r#"{{ "level": "{variant}" }}"#)).unwrap();
                assert_eq!(config.level, Some(level));
            }
        }

        assert_eq!(
            "verbose".parse::<LevelFilter>(),
            Err(ParseLevelError(String::from("verbose")))
        );
        assert!(serde_json::from_str::<LoggerConfig>(r#"{ "level": "verbose" }"#).is_err());
    }

    #[test]
    fn test_logger_config() {
        let config: LoggerConfig = serde_json::from_str(
            r#"{ "level": "Warning", "module": "platform_init::acpi", "capture_buffer": true }"#,
        )
        .unwrap();
        assert_eq!(config.level, Some(LevelFilter::Warn));
        assert_eq!(config.module.as_deref(), Some("platform_init::acpi"));
        assert_eq!(config.capture_buffer, Some(true));

        assert!(serde_json::from_str::<LoggerConfig>(r#"{ "instance": "x" }"#).is_err());

        let logger = BootLogger::new();
        assert!(matches!(
            logger.configure(LoggerConfig {
                log_path: Some(PathBuf::from("boot.log")),
                capture_buffer: Some(true),
                ..Default::default()
            }),
            Err(LoggerError::ConflictingTargets)
        ));
    }

    #[test]
    fn test_buffer_sink() {
        let logger = buffered(LoggerConfig {
            show_level: Some(true),
            module: Some(String::from("platform_init::acpi")),
            ..Default::default()
        });

        assert!(logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));

        logger.log(&record_at(
            Level::Warn,
            "platform_init::acpi::madt",
            format_args!("madt: table left unchanged"),
        ));
        // Below the level.
        logger.log(&record_at(
            Level::Debug,
            "platform_init::acpi::madt",
            format_args!("madt: patched"),
        ));
        // Outside the module.
        logger.log(&record_at(
            Level::Error,
            "platform_init::smbios",
            format_args!("smbios: failure"),
        ));

        assert_eq!(
            String::from_utf8(logger.take_buffer()).unwrap(),
            format!("[{LOG_TAG}:WARN] madt: table left unchanged\n")
        );
        assert!(logger.take_buffer().is_empty());
        assert_eq!(logger.dropped(), 0);
    }

    #[test]
    fn test_buffer_sink_full() {
        let logger = buffered(LoggerConfig::default());
        let long = "x".repeat(BUFFER_CAPACITY);

        logger.log(&record_at(Level::Info, "platform_init", format_args!("short")));
        logger.log(&record_at(Level::Info, "platform_init", format_args!("{long}")));

        assert_eq!(logger.dropped(), 1);
        assert_eq!(logger.take_buffer(), format!("[{LOG_TAG}] short\n").into_bytes());
    }

    #[test]
    fn test_init_boot_log() {
        BOOT_LOG
            .init(LoggerConfig {
                capture_buffer: Some(true),
                module: Some(String::from(module_path!())),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            BOOT_LOG.install(),
            Err(LoggerError::Install(_))
        ));

        log::info!("boot log ready");
        log::debug!("below the level");

        assert_eq!(
            BOOT_LOG.take_buffer(),
            format!("[{LOG_TAG}] boot log ready\n").into_bytes()
        );
    }

    #[test]
    fn test_file_sink() {
        let path = std::env::temp_dir().join(format!("platform-init-log-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let logger = BootLogger::new();
        logger
            .configure(LoggerConfig {
                log_path: Some(path.clone()),
                level: Some(LevelFilter::Debug),
                show_level: Some(true),
                show_log_origin: Some(true),
                ..Default::default()
            })
            .unwrap();

        logger.log(&record_at(
            Level::Debug,
            "platform_init::acpi::madt",
            format_args!("madt: patched"),
        ));
        logger.flush();
        // Nothing to hand over from a file sink.
        assert!(logger.take_buffer().is_empty());

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("[{LOG_TAG}:DEBUG:src/acpi/madt.rs:42] madt: patched\n")
        );
        std::fs::remove_file(path).unwrap();
    }
}
