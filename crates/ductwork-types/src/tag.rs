//! Type tags and the assignability hierarchy.
//!
//! Every object variant and every declared stream schema names a tag. The
//! hierarchy is registered once at session startup (instead of being
//! discovered reflectively at check time) and answers one question: can a
//! stage declaring input tag `I` consume items produced under tag `O`?
//! It can when `I == O` or `I` is an ancestor of `O`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stock tag names. [`OBJECT`] is the root of the stock hierarchy.
pub const OBJECT: &str = "object";
pub const TEXT: &str = "text";
pub const PATH: &str = "path";
pub const FILE: &str = "file";
pub const PROCESS: &str = "process";
pub const RECORD: &str = "record";
pub const BYTES: &str = "bytes";

/// Name of an object type, e.g. `text` or `file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("registering '{child}' under '{parent}' would create a cycle")]
    Cycle { child: TypeTag, parent: TypeTag },
}

/// Parent links between tags, used for the is-assignable walk.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: HashMap<TypeTag, TypeTag>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hierarchy every session starts from: the stock object variants
    /// under `object`, with `path` refining `text`.
    pub fn stock() -> Self {
        let mut parents = HashMap::new();
        for child in [TEXT, FILE, PROCESS, RECORD, BYTES] {
            parents.insert(TypeTag::new(child), TypeTag::new(OBJECT));
        }
        parents.insert(TypeTag::new(PATH), TypeTag::new(TEXT));
        Self { parents }
    }

    /// Add `child` under `parent`. Re-registering a child moves it.
    pub fn register(&mut self, child: TypeTag, parent: TypeTag) -> Result<(), HierarchyError> {
        if child == parent {
            return Err(HierarchyError::Cycle { child, parent });
        }
        // Walking up from the proposed parent must not reach the child.
        let mut cursor = Some(&parent);
        while let Some(tag) = cursor {
            if *tag == child {
                return Err(HierarchyError::Cycle { child, parent });
            }
            cursor = self.parents.get(tag);
        }
        self.parents.insert(child, parent);
        Ok(())
    }

    pub fn parent(&self, tag: &TypeTag) -> Option<&TypeTag> {
        self.parents.get(tag)
    }

    /// True when a consumer declaring `input` can accept items tagged
    /// `output`: the tags are equal or `input` is an ancestor of `output`.
    pub fn is_assignable(&self, input: &TypeTag, output: &TypeTag) -> bool {
        if input == output {
            return true;
        }
        let mut cursor = self.parents.get(output);
        while let Some(tag) = cursor {
            if tag == input {
                return true;
            }
            cursor = self.parents.get(tag);
        }
        false
    }

    /// Ancestors of `tag`, nearest first. Unregistered tags have none.
    pub fn ancestors(&self, tag: &TypeTag) -> Vec<TypeTag> {
        let mut out = Vec::new();
        let mut cursor = self.parents.get(tag);
        while let Some(t) = cursor {
            out.push(t.clone());
            cursor = self.parents.get(t);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_hierarchy_walks() {
        let h = TypeHierarchy::stock();
        assert!(h.is_assignable(&TEXT.into(), &PATH.into()));
        assert!(h.is_assignable(&OBJECT.into(), &PATH.into()));
        assert!(h.is_assignable(&OBJECT.into(), &BYTES.into()));
        assert!(!h.is_assignable(&PATH.into(), &TEXT.into()));
        assert!(!h.is_assignable(&FILE.into(), &PROCESS.into()));
    }

    #[test]
    fn equal_tags_are_assignable_even_when_unregistered() {
        let h = TypeHierarchy::new();
        assert!(h.is_assignable(&"mystery".into(), &"mystery".into()));
        assert!(!h.is_assignable(&"mystery".into(), &"other".into()));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut h = TypeHierarchy::new();
        h.register("b".into(), "a".into()).unwrap();
        h.register("c".into(), "b".into()).unwrap();
        let err = h.register("a".into(), "c".into()).unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle { .. }));
        assert!(h.register("a".into(), "a".into()).is_err());
    }

    #[test]
    fn ancestors_nearest_first() {
        let h = TypeHierarchy::stock();
        let chain = h.ancestors(&PATH.into());
        assert_eq!(chain, vec![TypeTag::new(TEXT), TypeTag::new(OBJECT)]);
    }
}
