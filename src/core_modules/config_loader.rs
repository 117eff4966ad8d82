// THEORY:
// The `config_loader` module is the thin YAML layer in front of the generator. A
// parameter file may hold several YAML documents separated by `---`; the loader
// keeps all of them, keyed by their zero-based position in the stream, and leaves
// every interpretation of their contents to the caller.
//
// The loader is deliberately schema-free. Documents are kept as generic
// `serde_yaml::Mapping`s so the generator can report exactly which field is
// missing or malformed instead of failing on a deserialization error.

use crate::core_modules::errors::{PrecfgError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// All documents of one YAML stream, indexed by order of appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocuments {
    documents: BTreeMap<usize, Mapping>,
}

impl ParsedDocuments {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the document at `index`, counting from zero.
    pub fn get(&self, index: usize) -> Option<&Mapping> {
        self.documents.get(&index)
    }

    pub fn first(&self) -> Option<&Mapping> {
        self.get(0)
    }

    /// Iterates the documents in stream order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Mapping)> {
        self.documents.iter().map(|(index, doc)| (*index, doc))
    }
}

/// Reads and writes YAML parameter files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads every document of the YAML stream stored at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<ParsedDocuments> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PrecfgError::io(path, e))?;
        Self::parse(&content, path)
    }

    /// Parses a YAML stream held in memory. `origin` is only used for error reporting.
    pub fn parse(content: &str, origin: impl AsRef<Path>) -> Result<ParsedDocuments> {
        let origin = origin.as_ref();
        let mut documents = BTreeMap::new();

        // The YAML parser reports a stream of only comments or whitespace as one
        // null document; such a stream holds nothing to generate from.
        if is_blank_stream(content) {
            debug!(origin = %origin.display(), "YAML stream holds no documents");
            return Ok(ParsedDocuments { documents });
        }

        for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let value = Value::deserialize(document).map_err(|e| PrecfgError::yaml(origin, e))?;
            let mapping = match value {
                Value::Mapping(mapping) => mapping,
                // `---` followed by nothing
                Value::Null => Mapping::new(),
                _ => return Err(PrecfgError::NotAMapping { index }),
            };
            debug!(index, keys = mapping.len(), "parsed YAML document");
            documents.insert(index, mapping);
        }

        Ok(ParsedDocuments { documents })
    }

    /// Serializes `data` to `path` as a single YAML document, replacing any existing file.
    pub fn write<T>(data: &T, path: impl AsRef<Path>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| PrecfgError::io(path, e))?;
        serde_yaml::to_writer(BufWriter::new(file), data).map_err(|e| PrecfgError::yaml(path, e))
    }
}

fn is_blank_stream(content: &str) -> bool {
    content.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with('#'))
}
