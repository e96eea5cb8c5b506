//! The unit of data that flows through pipeline queues.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::tag::{self, TypeTag};

/// Metadata for a filesystem entry travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub modified: Option<SystemTime>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            is_dir: false,
            modified: None,
        }
    }
}

/// Metadata for a spawned or observed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
}

/// One element of a pipeline stream.
///
/// Stages exchange these instead of raw text; the variant determines the
/// [`TypeTag`] the builder checks against each stage's declared schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Object {
    Text(String),
    Path(PathBuf),
    File(FileRecord),
    Process(ProcessRecord),
    Record(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Object {
    /// The tag used for type-chain validation.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Object::Text(_) => TypeTag::new(tag::TEXT),
            Object::Path(_) => TypeTag::new(tag::PATH),
            Object::File(_) => TypeTag::new(tag::FILE),
            Object::Process(_) => TypeTag::new(tag::PROCESS),
            Object::Record(_) => TypeTag::new(tag::RECORD),
            Object::Bytes(_) => TypeTag::new(tag::BYTES),
        }
    }

    /// Text rendering used for redirect-to-file output and substring filters.
    pub fn render(&self) -> String {
        match self {
            Object::Text(s) => s.clone(),
            Object::Path(p) => p.display().to_string(),
            Object::File(f) => f.path.display().to_string(),
            Object::Process(p) => format!("{} {}", p.pid, p.command),
            Object::Record(v) => v.to_string(),
            Object::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Object::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Path-like view: `Path`, `File` and `Text` objects all name paths.
    pub fn as_path(&self) -> Option<PathBuf> {
        match self {
            Object::Path(p) => Some(p.clone()),
            Object::File(f) => Some(f.path.clone()),
            Object::Text(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Object::Text(s)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Object::Text(s.to_string())
    }
}

impl From<PathBuf> for Object {
    fn from(p: PathBuf) -> Self {
        Object::Path(p)
    }
}
