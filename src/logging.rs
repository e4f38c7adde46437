use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use thiserror::Error;

pub const LOG_CONFIG_PATH: &str = "log4rs.yaml";
const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {m}{n}";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unreadable log4rs.yaml: {0}")]
    File(String),
    #[error("bad logging config: {0}")]
    Config(String),
    #[error("logger already set: {0}")]
    Init(#[from] log::SetLoggerError),
}

/// Loads `log4rs.yaml` from the working directory, or logs to the console
/// when there is none. `level` caps whatever the config allows.
pub fn init_logging(level: Option<&str>) -> Result<(), LoggingError> {
    let level = level.and_then(|l| LevelFilter::from_str(l).ok());

    if Path::new(LOG_CONFIG_PATH).exists() {
        log4rs::init_file(LOG_CONFIG_PATH, Default::default())
            .map_err(|e| LoggingError::File(e.to_string()))?;
    } else {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(
                Root::builder()
                    .appender("stdout")
                    .build(level.unwrap_or(LevelFilter::Info)),
            )
            .map_err(|e| LoggingError::Config(format!("{e:?}")))?;
        log4rs::init_config(config)?;
    }

    if let Some(level) = level {
        log::set_max_level(level);
    }
    Ok(())
}
