use std::error::Error;
use std::fmt;
use std::io;

use crate::data::DataError;
use crate::ml::MLError;
use crate::search::ExperimentError;
use crate::validation::ValidationError;

#[derive(Debug)]
pub enum ConfigError {
    Read(io::Error),
    Parse(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "Failed to read configuration: {}", err),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration file: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Read(err)
    }
}

/// Umbrella error for the end-to-end search pipeline.
#[derive(Debug)]
pub enum TsfError {
    Config(ConfigError),
    Data(DataError),
    Model(MLError),
    Validation(ValidationError),
    Experiment(ExperimentError),
    Io(io::Error),
}

impl fmt::Display for TsfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsfError::Config(err) => write!(f, "Configuration error: {}", err),
            TsfError::Data(err) => write!(f, "Data error: {}", err),
            TsfError::Model(err) => write!(f, "Model error: {}", err),
            TsfError::Validation(err) => write!(f, "Validation error: {}", err),
            TsfError::Experiment(err) => write!(f, "Experiment error: {}", err),
            TsfError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl Error for TsfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TsfError::Config(err) => Some(err),
            TsfError::Data(err) => Some(err),
            TsfError::Model(err) => Some(err),
            TsfError::Validation(err) => Some(err),
            TsfError::Experiment(err) => Some(err),
            TsfError::Io(err) => Some(err),
        }
    }
}

impl From<ConfigError> for TsfError {
    fn from(err: ConfigError) -> Self {
        TsfError::Config(err)
    }
}

impl From<DataError> for TsfError {
    fn from(err: DataError) -> Self {
        TsfError::Data(err)
    }
}

impl From<MLError> for TsfError {
    fn from(err: MLError) -> Self {
        TsfError::Model(err)
    }
}

impl From<ValidationError> for TsfError {
    fn from(err: ValidationError) -> Self {
        TsfError::Validation(err)
    }
}

impl From<ExperimentError> for TsfError {
    fn from(err: ExperimentError) -> Self {
        TsfError::Experiment(err)
    }
}

impl From<io::Error> for TsfError {
    fn from(err: io::Error) -> Self {
        TsfError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, TsfError>;
