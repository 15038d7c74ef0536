//! TOML persistence of the builders

use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open toml file: {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot create toml file: {1}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("cannot read toml file: {1}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("cannot write toml file: {1}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("cannot deserialize from toml")]
    Load(#[from] toml::de::Error),
    #[error("cannot serialize into toml")]
    Save(#[from] toml::ser::Error),
}

/// Load and save a serializable type from and to a toml file
pub trait TomlConfig: Serialize + DeserializeOwned {
    /// Header written at the top of the toml file
    const HEADER: &'static str;
    /// Load from a toml file
    fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let mut file =
            File::open(&path).map_err(|e| ConfigError::Open(e, path.as_ref().to_path_buf()))?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)
            .map_err(|e| ConfigError::Read(e, path.as_ref().to_path_buf()))?;
        Self::from_toml(&toml)
    }
    /// Save into a toml file
    fn save<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), ConfigError> {
        let toml = self.to_toml()?;
        let mut file =
            File::create(&path).map_err(|e| ConfigError::Create(e, path.as_ref().to_path_buf()))?;
        write!(file, "# {}\n\n{}", Self::HEADER, toml)
            .map_err(|e| ConfigError::Write(e, path.as_ref().to_path_buf()))?;
        log::info!("{} written to {}", Self::HEADER, path.as_ref().display());
        Ok(())
    }
    fn from_toml(toml: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }
    fn to_toml(&self) -> std::result::Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
