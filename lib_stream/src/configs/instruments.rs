//! Instrument lists loaded from JSON.

use std::path::{Path, PathBuf};

use crate::core::instruments::{parse_instrument_list, InstrumentError, InstrumentSource};

const EMBEDDED_RICS: &str = include_str!("rics.json");

/// Reads a JSON array of identifiers from disk on every load.
#[derive(Debug, Clone)]
pub struct JsonFileInstruments {
    path: PathBuf,
}

impl JsonFileInstruments {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the list is read from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InstrumentSource for JsonFileInstruments {
    fn load(&self) -> Result<Vec<String>, InstrumentError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| InstrumentError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let rics = parse_instrument_list(&raw)?;
        log::info!("Loaded {} instruments from {}", rics.len(), self.path.display());
        Ok(rics)
    }
}

/// The list compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedInstruments;

impl InstrumentSource for EmbeddedInstruments {
    fn load(&self) -> Result<Vec<String>, InstrumentError> {
        parse_instrument_list(EMBEDDED_RICS)
    }
}
