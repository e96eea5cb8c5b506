//! One instantiated pipeline stage and its run loop.
//!
//! A `Command` binds a resolved descriptor to concrete arguments, options,
//! redirections, a context, and an output queue. The builder creates it;
//! the pipeline attaches its input and triggers [`run`](Command::run)
//! exactly once. The run loop:
//!
//! 1. resolves the input source (previous stage's queue, or a redirected
//!    file read as text lines),
//! 2. expands unquoted glob arguments against the stage's working directory
//!    (quoted words and patterns matching nothing pass through verbatim),
//! 3. drives the builtin per its `ExecutionKind`, pushing each produced
//!    item to the output queue (or a redirect target file),
//! 4. always runs the cleanup hook and writes the terminal sentinel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use ductwork_glob::{contains_glob, glob_match};
use ductwork_types::Object;

use crate::context::CommandContext;
use crate::descriptor::{BuiltinDescriptor, ExecutionKind, Invocation};
use crate::error::ExecError;
use crate::lexer::Word;
use crate::transport::TransportQueue;

/// An output redirection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: PathBuf,
    pub append: bool,
}

/// One argument-bound occurrence of a builtin within a pipeline.
pub struct Command {
    descriptor: Arc<BuiltinDescriptor>,
    /// The verb as the user typed it (an alias stays an alias for display).
    verb: String,
    args: Vec<Word>,
    options: Vec<String>,
    redirect_in: Option<PathBuf>,
    redirect_out: Option<Redirect>,
    context: Arc<CommandContext>,
    output: Arc<TransportQueue>,
    started: AtomicBool,
}

impl Command {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        descriptor: Arc<BuiltinDescriptor>,
        verb: String,
        args: Vec<Word>,
        options: Vec<String>,
        redirect_in: Option<PathBuf>,
        redirect_out: Option<Redirect>,
        context: Arc<CommandContext>,
        output: Arc<TransportQueue>,
    ) -> Self {
        Self {
            descriptor,
            verb,
            args,
            options,
            redirect_in,
            redirect_out,
            context,
            output,
            started: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &Arc<BuiltinDescriptor> {
        &self.descriptor
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[Word] {
        &self.args
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn redirect_in(&self) -> Option<&Path> {
        self.redirect_in.as_deref()
    }

    pub fn redirect_out(&self) -> Option<&Redirect> {
        self.redirect_out.as_ref()
    }

    pub fn context(&self) -> &Arc<CommandContext> {
        &self.context
    }

    pub fn output_queue(&self) -> Arc<TransportQueue> {
        self.output.clone()
    }

    /// Execute this stage. Later calls are no-ops: a command runs exactly
    /// once and is inert after its sentinel.
    pub(crate) async fn run(&self, input: Option<Arc<TransportQueue>>) -> Result<(), ExecError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.run_inner(input).await;
        if let Some(cleanup) = &self.descriptor.cleanup {
            cleanup(&self.context);
        }
        self.output.close();
        result
    }

    async fn run_inner(&self, input: Option<Arc<TransportQueue>>) -> Result<(), ExecError> {
        let input = match &self.redirect_in {
            Some(path) => Some(read_redirect_in(&self.context.resolve(path)).await?),
            None => input,
        };

        let mut args = Vec::new();
        for word in &self.args {
            args.extend(expand_word(word, self.context.cwd()).await);
        }

        tracing::debug!(verb = %self.verb, ?args, "stage start");
        let invocation = Invocation {
            ctx: self.context.clone(),
            args,
            options: self.options.clone(),
            input,
            format: self.output.negotiated_format(),
        };

        // Rendered lines destined for a redirect target instead of the pipe.
        let mut redirected: Vec<String> = Vec::new();
        match &self.descriptor.exec {
            ExecutionKind::Generator(f) => {
                let mut stream = f(invocation);
                while let Some(item) = stream.next().await {
                    if self.context.cancelled() {
                        break;
                    }
                    self.emit(item?, &mut redirected);
                }
            }
            ExecutionKind::Single(f) => {
                let item = f(invocation).await?;
                self.emit(item, &mut redirected);
            }
        }

        if let Some(redirect) = &self.redirect_out {
            write_redirect_out(&self.context.resolve(&redirect.path), redirect.append, &redirected)
                .await?;
        }
        Ok(())
    }

    fn emit(&self, item: Object, redirected: &mut Vec<String>) {
        if self.redirect_out.is_some() {
            redirected.push(item.render());
        } else {
            self.output.push(item);
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("verb", &self.verb)
            .field("builtin", &self.descriptor.name)
            .field("args", &self.args)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Read a `< file` redirection as a queue of text lines.
async fn read_redirect_in(path: &Path) -> Result<Arc<TransportQueue>, ExecError> {
    let text = tokio::fs::read_to_string(path).await?;
    let queue = TransportQueue::new(Duration::ZERO);
    for line in text.lines() {
        queue.push(Object::Text(line.to_string()));
    }
    queue.close();
    Ok(queue)
}

/// Write rendered items to a `>`/`>>` redirection target, one per line.
async fn write_redirect_out(path: &Path, append: bool, lines: &[String]) -> Result<(), ExecError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;
    for line in lines {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(())
}

/// Expand one argument word against `cwd`.
///
/// Quoted words are exempt and pass through literally. An unquoted pattern
/// is matched on its final path component against the named directory's
/// entries (dotfiles only when the pattern asks for them), results sorted
/// bytewise. A pattern matching nothing passes through verbatim as literal
/// text — shell "no-match passthrough".
pub(crate) async fn expand_word(word: &Word, cwd: &Path) -> Vec<String> {
    if word.quoted || !contains_glob(&word.text) {
        return vec![word.text.clone()];
    }

    let (prefix, leaf) = match word.text.rfind('/') {
        Some(i) => (&word.text[..=i], &word.text[i + 1..]),
        None => ("", word.text.as_str()),
    };
    // Globbing is per-directory; patterns in directory components pass
    // through untouched.
    if contains_glob(prefix) {
        return vec![word.text.clone()];
    }

    let dir = if prefix.is_empty() {
        cwd.to_path_buf()
    } else if Path::new(prefix).is_absolute() {
        PathBuf::from(prefix)
    } else {
        cwd.join(prefix)
    };

    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return vec![word.text.clone()];
    };
    let mut matches = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') && !leaf.starts_with('.') {
            continue;
        }
        if glob_match(leaf, &name).unwrap_or(false) {
            matches.push(format!("{prefix}{name}"));
        }
    }
    matches.sort();
    if matches.is_empty() {
        vec![word.text.clone()]
    } else {
        matches
    }
}
