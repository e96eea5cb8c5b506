//! Verb resolution seam for the pipeline builder.
//!
//! The builder consults a resolver only when a verb is not a direct registry
//! hit — the hook where an embedder maps PATH executables, user aliases, or
//! remote commands onto descriptors. A resolver miss falls through to the
//! registered `sys` builtin with the verb as its first argument.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::BuiltinDescriptor;

/// Maps unrecognized verbs to a descriptor plus leading arguments.
#[async_trait]
pub trait VerbResolver: Send + Sync {
    /// Resolve `verb` against external knowledge (PATH, alias tables, ...).
    ///
    /// `cwd` is the builder's working-directory snapshot, for resolvers that
    /// honor relative executables. Returning `None` lets the builder fall
    /// back to `sys`.
    async fn resolve(&self, verb: &str, cwd: &Path)
        -> Option<(Arc<BuiltinDescriptor>, Vec<String>)>;
}
