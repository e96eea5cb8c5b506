//! Pipeline construction: tokens in, validated [`Pipeline`] out.
//!
//! The builder walks the token stream one verb block at a time (delimited
//! by pipes and end of input) and, per stage: resolves the verb against the
//! registry (then the injected [`VerbResolver`], then the `sys` fallback),
//! collects redirections, splits options from arguments, validates arity,
//! then chains the stages under the type, locality, and aggregate rules.
//! Any failure aborts construction — no partial pipeline escapes.
//!
//! Option detection note: any unquoted word starting with `-` before a bare
//! `--` is treated as an option candidate, so negative-number-like arguments
//! misparse. This matches long-standing behavior that downstream builtins
//! rely on; quote the argument or put it after `--` to force it positional.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use ductwork_types::{PipelineEvent, PipelineId, TypeHierarchy, Typespec};

use crate::command::{Command, Redirect};
use crate::context::{CommandContext, MetadataSink, SelectionFn, UndoFn};
use crate::descriptor::BuiltinDescriptor;
use crate::error::{EngineError, ParseError, TypeError};
use crate::lexer::{tokenize, Token, Word};
use crate::pipeline::{Pipeline, PipelineParts};
use crate::registry::BuiltinRegistry;
use crate::resolver::VerbResolver;
use crate::transport::TransportQueue;

/// Default metadata/subscriber coalescing window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(60);

/// Builds pipelines from text or pre-tokenized sequences.
pub struct PipelineBuilder {
    registry: Arc<BuiltinRegistry>,
    hierarchy: Arc<TypeHierarchy>,
    resolver: Option<Arc<dyn VerbResolver>>,
    selection: Option<SelectionFn>,
    events: broadcast::Sender<PipelineEvent>,
    cwd: PathBuf,
    debounce: Duration,
    lenient: bool,
    ids: Arc<AtomicU64>,
}

impl PipelineBuilder {
    pub fn new(registry: Arc<BuiltinRegistry>, hierarchy: Arc<TypeHierarchy>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            hierarchy,
            resolver: None,
            selection: None,
            events,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            debounce: DEFAULT_DEBOUNCE,
            lenient: false,
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Inject a resolver consulted on registry misses.
    pub fn with_resolver(mut self, resolver: Arc<dyn VerbResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Inject the session's current-selection provider.
    pub fn with_selection(mut self, selection: SelectionFn) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Publish pipeline events on an existing channel instead of a private
    /// one.
    pub fn with_events(mut self, events: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Share a pipeline-id counter with other builders of the same session.
    pub fn with_id_counter(mut self, ids: Arc<AtomicU64>) -> Self {
        self.ids = ids;
        self
    }

    /// Lenient mode: unknown options become arguments instead of errors,
    /// for live-typing consumers that build as the user types.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Tokenize and build a full pipeline from text.
    pub async fn parse(&self, text: &str) -> Result<Pipeline, EngineError> {
        let tokens = tokenize(text, false)?
            .into_iter()
            .map(|spanned| spanned.token)
            .collect();
        self.build(tokens, text.to_string()).await
    }

    /// Build from a pre-tokenized or programmatic sequence. Literal strings
    /// convert to pre-quoted words (see `Token::from`).
    pub async fn create<I, T>(&self, tokens: I) -> Result<Pipeline, EngineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        let tokens: Vec<Token> = tokens.into_iter().map(Into::into).collect();
        let source = tokens
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.build(tokens, source).await
    }

    async fn build(&self, tokens: Vec<Token>, source: String) -> Result<Pipeline, EngineError> {
        if tokens.is_empty() {
            return Err(ParseError::EmptyPipeline.into());
        }

        let mut drafts = Vec::new();
        for (stage, group) in split_stages(tokens).into_iter().enumerate() {
            drafts.push(self.draft_stage(stage, group).await?);
        }

        self.check_redirect_placement(&drafts)?;
        let output_type = self.check_chain(&drafts)?;
        Ok(self.assemble(drafts, source, output_type))
    }

    /// Resolve one verb block into a stage draft.
    async fn draft_stage(&self, stage: usize, group: Vec<Token>) -> Result<StageDraft, EngineError> {
        let mut words: Vec<Word> = Vec::new();
        let mut redirect_in: Option<PathBuf> = None;
        let mut redirect_out: Option<Redirect> = None;

        let mut iter = group.into_iter();
        while let Some(token) = iter.next() {
            match token {
                Token::Word(w) => words.push(w),
                Token::Pipe => unreachable!("stages are split on pipes"),
                Token::RedirectIn => {
                    if redirect_in.is_some() {
                        return Err(ParseError::DuplicateRedirect { op: "<".into(), stage }.into());
                    }
                    redirect_in = Some(PathBuf::from(take_target(&mut iter, "<")?.text));
                }
                Token::RedirectOut | Token::RedirectAppend => {
                    let append = matches!(token, Token::RedirectAppend);
                    let op = if append { ">>" } else { ">" };
                    if redirect_out.is_some() {
                        return Err(ParseError::DuplicateRedirect { op: op.into(), stage }.into());
                    }
                    let target = take_target(&mut iter, op)?;
                    redirect_out = Some(Redirect { path: PathBuf::from(target.text), append });
                }
            }
        }

        if words.is_empty() {
            return Err(ParseError::EmptyStage.into());
        }
        let verb = words.remove(0);
        let (descriptor, extra_args) = self.resolve_verb(&verb.text).await?;

        // Resolver-supplied leading arguments are literal: never expanded,
        // never option candidates.
        let mut args: Vec<Word> = extra_args.into_iter().map(Word::quoted).collect();
        let mut options: Vec<String> = Vec::new();
        let mut options_ended = false;
        for word in words {
            if !options_ended && !word.quoted && word.text == "--" {
                options_ended = true;
                continue;
            }
            if !options_ended && !word.quoted && word.text.starts_with('-') {
                match descriptor.canonical_option(&word.text) {
                    Some(canonical) => options.push(canonical.to_string()),
                    None if descriptor.options_passthrough || self.lenient => args.push(word),
                    None => {
                        return Err(ParseError::UnknownOption {
                            builtin: descriptor.name.clone(),
                            option: word.text,
                        }
                        .into());
                    }
                }
            } else {
                args.push(word);
            }
        }

        if !descriptor.argspec.accepts(args.len()) {
            return Err(ParseError::Arity {
                builtin: descriptor.name.clone(),
                expected: descriptor.argspec.describe(),
                actual: args.len(),
            }
            .into());
        }

        Ok(StageDraft {
            descriptor,
            verb: verb.text,
            args,
            options,
            redirect_in,
            redirect_out,
        })
    }

    /// Registry first, then the injected resolver, then the `sys` fallback
    /// with the verb as its first argument.
    async fn resolve_verb(
        &self,
        verb: &str,
    ) -> Result<(Arc<BuiltinDescriptor>, Vec<String>), ParseError> {
        if let Ok(descriptor) = self.registry.lookup(verb) {
            return Ok((descriptor, Vec::new()));
        }
        if let Some(resolver) = &self.resolver {
            if let Some(resolved) = resolver.resolve(verb, &self.cwd).await {
                return Ok(resolved);
            }
        }
        match self.registry.lookup("sys") {
            Ok(sys) => Ok((sys, vec![verb.to_string()])),
            Err(_) => Err(ParseError::UnresolvedVerb(verb.to_string())),
        }
    }

    /// `<` belongs to the first stage, `>`/`>>` to the last; anywhere else
    /// the data flow is undefined.
    fn check_redirect_placement(&self, drafts: &[StageDraft]) -> Result<(), ParseError> {
        let last = drafts.len() - 1;
        for (i, draft) in drafts.iter().enumerate() {
            if draft.redirect_in.is_some() && i != 0 {
                return Err(ParseError::MisplacedRedirect { op: "<".into(), stage: i });
            }
            if let Some(redirect) = &draft.redirect_out {
                if i != last {
                    let op = if redirect.append { ">>" } else { ">" };
                    return Err(ParseError::MisplacedRedirect { op: op.into(), stage: i });
                }
            }
        }
        Ok(())
    }

    /// Validate type compatibility and locality between adjacent stages,
    /// returning the pipeline's effective output type.
    fn check_chain(&self, drafts: &[StageDraft]) -> Result<Option<Typespec>, EngineError> {
        let mut prev_out: Option<Typespec> = None;
        for (i, draft) in drafts.iter().enumerate() {
            let desc = &draft.descriptor;

            match &desc.input {
                None => {
                    if i > 0 && prev_out.is_some() {
                        return Err(TypeError::UnconsumedOutput {
                            producer: drafts[i - 1].descriptor.name.clone(),
                            consumer: desc.name.clone(),
                        }
                        .into());
                    }
                }
                Some(input) => {
                    // A `< file` redirection satisfies the first stage's
                    // required input.
                    if i == 0 && !input.optional && draft.redirect_in.is_none() {
                        return Err(TypeError::MissingInput(desc.name.clone()).into());
                    }
                    if i > 0 {
                        match &prev_out {
                            None => {
                                if !input.optional {
                                    return Err(TypeError::NoOutputForPipe(
                                        drafts[i - 1].descriptor.name.clone(),
                                    )
                                    .into());
                                }
                            }
                            Some(out_spec) => match (&input.spec, out_spec) {
                                // Any/Identity inputs accept everything.
                                (Typespec::Any | Typespec::Identity, _) => {}
                                // An Any producer is never checked.
                                (_, Typespec::Any) => {}
                                (Typespec::Tag(inp), Typespec::Tag(out)) => {
                                    if !self.hierarchy.is_assignable(inp, out) {
                                        return Err(TypeError::Incompatible {
                                            producer: drafts[i - 1].descriptor.name.clone(),
                                            output_type: out.clone(),
                                            consumer: desc.name.clone(),
                                            input_type: inp.clone(),
                                        }
                                        .into());
                                    }
                                }
                                // Identity never survives effective_spec(),
                                // see the prev_out update below.
                                (Typespec::Tag(_), Typespec::Identity) => {}
                            },
                        }
                    }
                }
            }

            if i > 0 {
                if let (Some(left), Some(right)) =
                    (drafts[i - 1].descriptor.locality, desc.locality)
                {
                    if left != right {
                        return Err(ParseError::LocalityMix {
                            left: drafts[i - 1].descriptor.name.clone(),
                            left_loc: left,
                            right: desc.name.clone(),
                            right_loc: right,
                        }
                        .into());
                    }
                }
            }

            prev_out = match &desc.output {
                None => None,
                Some(schema) => match schema.effective_spec() {
                    // An identity stage passes the previous type through.
                    Typespec::Identity => prev_out,
                    spec => Some(spec),
                },
            };
        }
        Ok(prev_out)
    }

    /// Materialize commands and aggregate pipeline properties.
    fn assemble(
        &self,
        drafts: Vec<StageDraft>,
        source: String,
        output_type: Option<Typespec>,
    ) -> Pipeline {
        let id = PipelineId(self.ids.fetch_add(1, Ordering::SeqCst));
        let undo_stack: Arc<Mutex<Vec<UndoFn>>> = Arc::new(Mutex::new(Vec::new()));

        let input_type = drafts[0]
            .descriptor
            .input
            .as_ref()
            .map(|schema| schema.spec.clone());
        let input_optional = drafts[0]
            .descriptor
            .input
            .as_ref()
            .is_none_or(|schema| schema.optional);
        let locality = drafts.iter().find_map(|d| d.descriptor.locality);
        let idempotent = drafts.iter().all(|d| d.descriptor.idempotent);
        let undoable = drafts.iter().all(|d| d.descriptor.undoable);

        // Asymmetric by long-standing behavior: a singlevalue stage sets the
        // aggregate unless an earlier plain stage already pinned it false.
        let mut singlevalue = false;
        let mut pinned_false = false;
        for draft in &drafts {
            if draft.descriptor.singlevalue {
                if !pinned_false {
                    singlevalue = true;
                }
            } else {
                pinned_false = true;
            }
        }

        let components: Vec<Arc<Command>> = drafts
            .into_iter()
            .enumerate()
            .map(|(stage, draft)| {
                let metadata = MetadataSink::new(self.events.clone(), id, stage, self.debounce);
                let context = CommandContext::new(
                    self.cwd.clone(),
                    draft.options.clone(),
                    metadata,
                    self.selection.clone(),
                    undo_stack.clone(),
                );
                Arc::new(Command::new(
                    draft.descriptor,
                    draft.verb,
                    draft.args,
                    draft.options,
                    draft.redirect_in,
                    draft.redirect_out,
                    context,
                    TransportQueue::new(self.debounce),
                ))
            })
            .collect();

        tracing::debug!(%id, stages = components.len(), %source, "pipeline built");
        Pipeline::from_parts(PipelineParts {
            id,
            source,
            components,
            input_type,
            input_optional,
            output_type,
            locality,
            idempotent,
            undoable,
            singlevalue,
            undo_stack,
            events: self.events.clone(),
        })
    }
}

struct StageDraft {
    descriptor: Arc<BuiltinDescriptor>,
    verb: String,
    args: Vec<Word>,
    options: Vec<String>,
    redirect_in: Option<PathBuf>,
    redirect_out: Option<Redirect>,
}

/// Split a token stream into per-stage groups at pipe markers.
fn split_stages(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut groups = vec![Vec::new()];
    for token in tokens {
        if matches!(token, Token::Pipe) {
            groups.push(Vec::new());
        } else {
            groups.last_mut().expect("at least one group").push(token);
        }
    }
    groups
}

/// A redirect operator consumes exactly one following word as its target.
fn take_target(
    iter: &mut impl Iterator<Item = Token>,
    op: &str,
) -> Result<Word, ParseError> {
    match iter.next() {
        Some(Token::Word(w)) => Ok(w),
        _ => Err(ParseError::MissingRedirectTarget(op.to_string())),
    }
}
