use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Domain parsing errors
    #[error("Unknown motor command: {0:?}")]
    UnknownCommand(String),

    #[error("Invalid time of day: {0:?}")]
    InvalidTimeOfDay(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("Missing configuration key: {0}")]
    MissingConfig(&'static str),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
