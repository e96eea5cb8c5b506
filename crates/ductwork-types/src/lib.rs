//! Shared data types for the ductwork object-pipeline engine.
//!
//! This crate is the dependency floor of the workspace: pure data with serde
//! support and no runtime machinery, so front ends and embedders can speak
//! the engine's vocabulary without pulling in tokio or the kernel itself.
//!
//! - [`Object`] — the unit of data that flows between pipeline stages
//! - [`TypeTag`] / [`TypeHierarchy`] — the assignability check used when
//!   chaining stages
//! - [`InputSchema`] / [`OutputSchema`] / [`ArgSpec`] — the contracts a
//!   builtin declares
//! - [`PipelineState`] / [`PipelineEvent`] — lifecycle and event surface

pub mod event;
pub mod object;
pub mod schema;
pub mod state;
pub mod tag;

pub use event::{PipelineEvent, PipelineId};
pub use object::{FileRecord, Object, ProcessRecord};
pub use schema::{ArgSlot, ArgSpec, InputSchema, Locality, OutputSchema, TypeFn, Typespec};
pub use state::{ExceptionInfo, PipelineState, StateError};
pub use tag::{HierarchyError, TypeHierarchy, TypeTag};
