//! Builtin descriptors: the contract a command declares to the engine.
//!
//! A descriptor is immutable once registered and shared as
//! `Arc<BuiltinDescriptor>` between the registry and every pipeline stage
//! bound to it. The execution entry point is decided at registration time as
//! either a [`Generator`](ExecutionKind::Generator) (a stream of objects) or
//! a [`Single`](ExecutionKind::Single) (one object), instead of being
//! inspected at call time.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use ductwork_types::{ArgSpec, InputSchema, Locality, Object, OutputSchema};

use crate::context::CommandContext;
use crate::error::ExecError;
use crate::transport::TransportQueue;

/// Everything a builtin's execution entry point receives.
pub struct Invocation {
    /// The stage's context: cwd snapshot, attribs, cancellation, metadata.
    pub ctx: Arc<CommandContext>,
    /// Positional arguments after glob expansion.
    pub args: Vec<String>,
    /// Options in canonical form (the first spelling of each alias group).
    pub options: Vec<String>,
    /// The previous stage's output queue, when one exists.
    pub input: Option<Arc<TransportQueue>>,
    /// The transport format negotiated for this stage's output, if any.
    pub format: Option<String>,
}

impl Invocation {
    /// Whether a canonical option is present.
    pub fn has_option(&self, canonical: &str) -> bool {
        self.options.iter().any(|o| o == canonical)
    }
}

pub type GeneratorFn =
    Arc<dyn Fn(Invocation) -> BoxStream<'static, Result<Object, ExecError>> + Send + Sync>;
pub type SingleFn =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Object, ExecError>> + Send + Sync>;

/// How a builtin produces its output, decided once at registration.
#[derive(Clone)]
pub enum ExecutionKind {
    /// Produces a stream of objects.
    Generator(GeneratorFn),
    /// Produces exactly one object (`singlevalue` builtins).
    Single(SingleFn),
}

impl fmt::Debug for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionKind::Generator(_) => write!(f, "Generator(<fn>)"),
            ExecutionKind::Single(_) => write!(f, "Single(<fn>)"),
        }
    }
}

/// Completion hook: candidate strings for argument `index` while typing.
pub type CompleteHook =
    Arc<dyn Fn(&CommandContext, &[String], usize) -> Vec<String> + Send + Sync>;
/// Cancel hook, called once when the owning pipeline is cancelled.
pub type CancelHook = Arc<dyn Fn(&CommandContext) + Send + Sync>;
/// Cleanup hook, called after execution regardless of outcome.
pub type CleanupHook = Arc<dyn Fn(&CommandContext) + Send + Sync>;

/// A registered, typed command implementation.
pub struct BuiltinDescriptor {
    pub name: String,
    pub aliases: Vec<String>,
    /// `None` means the builtin takes no input at all.
    pub input: Option<InputSchema>,
    /// `None` means the builtin yields no output for a pipe.
    pub output: Option<OutputSchema>,
    /// Option alias groups; the first entry of each group is canonical.
    pub options: Vec<Vec<String>>,
    /// Unknown `-`-prefixed words become arguments instead of parse errors.
    pub options_passthrough: bool,
    pub argspec: ArgSpec,
    pub idempotent: bool,
    pub undoable: bool,
    pub has_status: bool,
    pub has_meta: bool,
    pub nodisplay: bool,
    /// Threaded stages run on the worker pool; inline stages run on the
    /// driving task and complete before later stages start.
    pub threaded: bool,
    pub locality: Option<Locality>,
    pub singlevalue: bool,
    pub exec: ExecutionKind,
    pub complete: Option<CompleteHook>,
    pub cancel: Option<CancelHook>,
    pub cleanup: Option<CleanupHook>,
}

impl BuiltinDescriptor {
    /// Whether `name` is this builtin's primary name or one of its aliases.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// All names this descriptor answers to, primary first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Two descriptors conflict when they share any name or alias.
    pub fn conflicts_with(&self, other: &BuiltinDescriptor) -> bool {
        self.names().any(|n| other.matches(n))
    }

    /// Canonical spelling for an option word, if the word belongs to one of
    /// the declared alias groups.
    pub fn canonical_option(&self, word: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|group| group.iter().any(|o| o == word))
            .and_then(|group| group.first())
            .map(String::as_str)
    }
}

impl fmt::Debug for BuiltinDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("options", &self.options)
            .field("argspec", &self.argspec)
            .field("threaded", &self.threaded)
            .field("locality", &self.locality)
            .field("singlevalue", &self.singlevalue)
            .finish_non_exhaustive()
    }
}

/// Chained constructor for [`BuiltinDescriptor`].
///
/// Defaults: no input, no output, no options, `Unspecified` argspec,
/// threaded, not idempotent/undoable/singlevalue, no locality, and an
/// execution function that yields nothing.
pub struct DescriptorBuilder {
    descriptor: BuiltinDescriptor,
}

impl DescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: BuiltinDescriptor {
                name: name.into(),
                aliases: Vec::new(),
                input: None,
                output: None,
                options: Vec::new(),
                options_passthrough: false,
                argspec: ArgSpec::Unspecified,
                idempotent: false,
                undoable: false,
                has_status: false,
                has_meta: false,
                nodisplay: false,
                threaded: true,
                locality: None,
                singlevalue: false,
                exec: ExecutionKind::Generator(Arc::new(|_| futures::stream::empty().boxed())),
                complete: None,
                cancel: None,
                cleanup: None,
            },
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.descriptor.aliases.push(alias.into());
        self
    }

    pub fn input(mut self, schema: InputSchema) -> Self {
        self.descriptor.input = Some(schema);
        self
    }

    pub fn output(mut self, schema: OutputSchema) -> Self {
        self.descriptor.output = Some(schema);
        self
    }

    /// Declare one option alias group; the first spelling is canonical.
    pub fn option_group<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .options
            .push(group.into_iter().map(Into::into).collect());
        self
    }

    pub fn options_passthrough(mut self) -> Self {
        self.descriptor.options_passthrough = true;
        self
    }

    pub fn argspec(mut self, spec: ArgSpec) -> Self {
        self.descriptor.argspec = spec;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.descriptor.idempotent = true;
        self
    }

    pub fn undoable(mut self) -> Self {
        self.descriptor.undoable = true;
        self
    }

    pub fn has_status(mut self) -> Self {
        self.descriptor.has_status = true;
        self
    }

    pub fn has_meta(mut self) -> Self {
        self.descriptor.has_meta = true;
        self
    }

    pub fn nodisplay(mut self) -> Self {
        self.descriptor.nodisplay = true;
        self
    }

    /// Run on the driving task instead of the worker pool.
    pub fn inline(mut self) -> Self {
        self.descriptor.threaded = false;
        self
    }

    pub fn locality(mut self, locality: Locality) -> Self {
        self.descriptor.locality = Some(locality);
        self
    }

    pub fn singlevalue(mut self) -> Self {
        self.descriptor.singlevalue = true;
        self
    }

    pub fn generator<F>(mut self, f: F) -> Self
    where
        F: Fn(Invocation) -> BoxStream<'static, Result<Object, ExecError>> + Send + Sync + 'static,
    {
        self.descriptor.exec = ExecutionKind::Generator(Arc::new(f));
        self
    }

    pub fn single<F>(mut self, f: F) -> Self
    where
        F: Fn(Invocation) -> BoxFuture<'static, Result<Object, ExecError>> + Send + Sync + 'static,
    {
        self.descriptor.exec = ExecutionKind::Single(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&CommandContext, &[String], usize) -> Vec<String> + Send + Sync + 'static,
    {
        self.descriptor.complete = Some(Arc::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn(&CommandContext) + Send + Sync + 'static,
    {
        self.descriptor.cancel = Some(Arc::new(f));
        self
    }

    pub fn on_cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn(&CommandContext) + Send + Sync + 'static,
    {
        self.descriptor.cleanup = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> BuiltinDescriptor {
        self.descriptor
    }
}
