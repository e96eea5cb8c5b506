//! Error taxonomy for the engine.
//!
//! Parse and type failures are synchronous: they come out of
//! [`parse`](crate::PipelineBuilder::parse)/[`create`](crate::PipelineBuilder::create)
//! before any execution starts, and no partial pipeline escapes. Execution
//! failures surface through the pipeline state machine as
//! [`ExceptionInfo`](ductwork_types::ExceptionInfo), and are re-raised only
//! to synchronous callers. Nothing in the engine retries.

use thiserror::Error;

use ductwork_types::{ExceptionInfo, Locality, StateError, TypeTag};

/// Malformed pipeline text or misuse of a builtin's declared surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty pipeline")]
    EmptyPipeline,
    #[error("empty stage after pipe")]
    EmptyStage,
    #[error("unterminated quote starting at offset {0}")]
    UnterminatedQuote(usize),
    #[error("unexpected character at offset {0}")]
    UnexpectedCharacter(usize),
    #[error("unknown verb '{0}'")]
    UnresolvedVerb(String),
    #[error("'{builtin}' does not accept option '{option}'")]
    UnknownOption { builtin: String, option: String },
    #[error("'{builtin}' expects {expected}, got {actual} argument(s)")]
    Arity {
        builtin: String,
        expected: String,
        actual: usize,
    },
    #[error("redirect '{0}' is missing a target")]
    MissingRedirectTarget(String),
    #[error("redirect '{op}' is not allowed on stage {stage}")]
    MisplacedRedirect { op: String, stage: usize },
    #[error("stage {stage} has more than one '{op}' redirect")]
    DuplicateRedirect { op: String, stage: usize },
    #[error("cannot mix localities: '{left}' is {left_loc}, '{right}' is {right_loc}")]
    LocalityMix {
        left: String,
        left_loc: Locality,
        right: String,
        right_loc: Locality,
    },
}

/// Incompatible chaining, caught at build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("'{0}' requires input and cannot start a pipeline")]
    MissingInput(String),
    #[error("'{0}' yields no output for pipe")]
    NoOutputForPipe(String),
    #[error("'{consumer}' takes no input but '{producer}' yields output")]
    UnconsumedOutput { producer: String, consumer: String },
    #[error(
        "cannot pipe {output_type} from '{producer}' into '{consumer}' expecting {input_type}"
    )]
    Incompatible {
        producer: String,
        output_type: TypeTag,
        consumer: String,
        input_type: TypeTag,
    },
}

/// Raised inside a builtin while a pipeline runs.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A captured stage failure, re-raised to synchronous callers.
    #[error("stage {} ({}): {}", .0.stage, .0.kind, .0.message)]
    Stage(ExceptionInfo),
}

impl ExecError {
    pub fn message(msg: impl Into<String>) -> Self {
        ExecError::Message(msg.into())
    }

    /// Error category recorded in [`ExceptionInfo::kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Message(_) => "exec",
            ExecError::Io(_) => "io",
            ExecError::Stage(_) => "exec",
        }
    }
}

/// Registry lookup miss. The builder converts this into
/// [`ParseError::UnresolvedVerb`] once every fallback is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no builtin named '{0}'")]
    NotFound(String),
}

/// Umbrella for surfaces that can fail more than one way.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    State(#[from] StateError),
}
