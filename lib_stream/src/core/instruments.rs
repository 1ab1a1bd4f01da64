//! Where the instrument identifiers come from.

use thiserror::Error;

/// Why an instrument list could not be loaded.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The list file could not be read.
    #[error("Failed to read instrument list {path}: {source}")]
    Io {
        /// File that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The list is not valid JSON of the expected shape.
    #[error("Instrument list is not a JSON array of strings: {0}")]
    Parse(#[from] serde_json::Error),

    /// An entry is blank; carries its position.
    #[error("Instrument list contains an empty identifier at position {0}")]
    EmptyIdentifier(usize),
}

/// Supplies the ordered list of instruments to subscribe to.
///
/// Called once per supervisor cycle, so a file-backed source picks up edits on
/// the next restart.
pub trait InstrumentSource: Send + Sync {
    /// Current list of instrument identifiers.
    fn load(&self) -> Result<Vec<String>, InstrumentError>;
}

/// Parses a JSON array of identifiers, rejecting blank entries.
pub fn parse_instrument_list(raw: &str) -> Result<Vec<String>, InstrumentError> {
    let list: Vec<String> = serde_json::from_str(raw)?;
    if let Some(position) = list.iter().position(|ric| ric.trim().is_empty()) {
        return Err(InstrumentError::EmptyIdentifier(position));
    }
    Ok(list)
}

/// An in-memory instrument list.
#[derive(Debug, Clone, Default)]
pub struct StaticInstruments {
    rics: Vec<String>,
}

impl StaticInstruments {
    /// Source returning `rics` in order.
    pub fn new<I, S>(rics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rics: rics.into_iter().map(Into::into).collect(),
        }
    }
}

impl InstrumentSource for StaticInstruments {
    fn load(&self) -> Result<Vec<String>, InstrumentError> {
        Ok(self.rics.clone())
    }
}
