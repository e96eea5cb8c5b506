//! Object-pipeline execution engine.
//!
//! Users compose typed commands ("builtins") into pipelines where each
//! stage passes structured objects — files, processes, strings, records —
//! to the next, with build-time type checking, concurrent per-stage
//! execution over bounded workers, cooperative cancellation, and undo.
//!
//! ```no_run
//! use ductwork_kernel::{Session, SessionConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = Session::new(SessionConfig::default());
//! let items = session.run("echo src lib | filter li").await?;
//! assert_eq!(items.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! Text flows through [`lexer::tokenize`] into a [`PipelineBuilder`],
//! which resolves verbs against the layered [`BuiltinRegistry`] (then an
//! injected [`VerbResolver`], then the `sys` fallback), validates the
//! type chain, and produces a [`Pipeline`] of commands connected by
//! [`TransportQueue`]s. [`Session`] owns the shared services and is the
//! usual entry point for embedders.

pub mod builder;
pub mod builtins;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod lexer;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod transport;

pub use builder::PipelineBuilder;
pub use command::Command;
pub use context::{CommandContext, MetadataSink};
pub use descriptor::{BuiltinDescriptor, DescriptorBuilder, ExecutionKind, Invocation};
pub use error::{EngineError, ExecError, ParseError, RegistryError, TypeError};
pub use pipeline::Pipeline;
pub use pool::{JobId, WorkerPool};
pub use registry::{BuiltinRegistry, Layer};
pub use resolver::VerbResolver;
pub use session::{Session, SessionConfig};
pub use transport::{TransportError, TransportQueue};
