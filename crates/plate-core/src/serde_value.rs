use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Document, Editor};

const DEFAULT_SCHEMA: &str = "geo-plate";
const DEFAULT_VERSION: u32 = 1;

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

#[derive(Debug, Error)]
pub enum PlateValueError {
    #[error("Malformed document JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported document schema `{schema}` version {version}")]
    Unsupported { schema: String, version: u32 },
}

/// Versioned JSON form of a document, used for debug dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateValue {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub document: Document,
}

impl PlateValue {
    pub fn from_document(document: Document) -> Self {
        Self {
            schema: default_schema(),
            version: default_version(),
            document,
        }
    }

    pub fn from_editor(editor: &Editor) -> Self {
        Self::from_document(editor.doc().clone())
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Self, PlateValueError> {
        let value: PlateValue = serde_json::from_str(s)?;
        if value.schema != DEFAULT_SCHEMA || value.version > DEFAULT_VERSION {
            return Err(PlateValueError::Unsupported {
                schema: value.schema,
                version: value.version,
            });
        }
        Ok(value)
    }
}
