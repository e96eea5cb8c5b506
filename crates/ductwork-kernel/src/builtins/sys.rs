//! `sys` — external process execution; the builder's fallback for unknown
//! verbs (which arrive as the first argument).
//!
//! Streams child stdout in 8 KiB reads: as `text` lines by default, or as
//! raw `bytes` chunks when the `chunked` transport format was negotiated.
//! Upstream objects are fed to the child's stdin (raw for `Bytes`,
//! rendered plus newline otherwise). Stderr lines become stage metadata,
//! the child pid lands in context attribs, and cancellation between reads
//! kills the child. A nonzero exit status ends the stream with an error.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;

use futures::{stream, FutureExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout};

use ductwork_types::{ArgSpec, InputSchema, Object, OutputSchema};

use crate::context::CommandContext;
use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder, Invocation};
use crate::error::ExecError;

const READ_CHUNK: usize = 8 * 1024;

pub(super) fn descriptor() -> BuiltinDescriptor {
    DescriptorBuilder::new("sys")
        .input(InputSchema::any().optional().format("chunked"))
        .output(OutputSchema::tag("text").format("chunked"))
        .argspec(ArgSpec::variadic("arg", 1))
        .options_passthrough()
        .generator(|inv| {
            let fut = async move {
                match spawn(inv).await {
                    Ok(state) => stream::unfold(state, pump).boxed(),
                    Err(err) => stream::iter(vec![Err(err)]).boxed(),
                }
            };
            fut.flatten_stream().boxed()
        })
        .build()
}

struct SysState {
    ctx: Arc<CommandContext>,
    child: Child,
    stdout: ChildStdout,
    program: String,
    /// Carry-over bytes that did not end in a newline yet (line mode).
    buf: Vec<u8>,
    /// Parsed lines waiting to be yielded.
    pending: VecDeque<Object>,
    chunked: bool,
    done: bool,
}

async fn spawn(inv: Invocation) -> Result<SysState, ExecError> {
    let mut args = inv.args.iter();
    let program = args
        .next()
        .cloned()
        .ok_or_else(|| ExecError::message("sys: no program given"))?;

    let mut child = tokio::process::Command::new(&program)
        .args(args)
        .current_dir(inv.ctx.cwd())
        .stdin(if inv.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ExecError::message(format!("sys: {program}: {err}")))?;

    if let Some(pid) = child.id() {
        inv.ctx.set_attrib("pid", serde_json::json!(pid));
        tracing::debug!(%program, pid, "spawned child");
    }

    if let (Some(queue), Some(mut stdin)) = (inv.input.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            while let Some(obj) = queue.pop().await {
                let bytes = match obj {
                    Object::Bytes(b) => b,
                    other => {
                        let mut line = other.render().into_bytes();
                        line.push(b'\n');
                        line
                    }
                };
                if stdin.write_all(&bytes).await.is_err() {
                    // Child closed its stdin early; keep draining upstream.
                    break;
                }
            }
            // Dropping the handle closes the pipe.
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let ctx = inv.ctx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                ctx.post_metadata(serde_json::json!({ "stderr": line }));
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::message("sys: child stdout unavailable"))?;

    Ok(SysState {
        ctx: inv.ctx,
        child,
        stdout,
        program,
        buf: Vec::new(),
        pending: VecDeque::new(),
        chunked: inv.format.as_deref() == Some("chunked"),
        done: false,
    })
}

/// One step of the output stream: yield a pending line, or read the child.
async fn pump(mut state: SysState) -> Option<(Result<Object, ExecError>, SysState)> {
    loop {
        if let Some(obj) = state.pending.pop_front() {
            return Some((Ok(obj), state));
        }
        if state.done {
            return None;
        }
        if state.ctx.cancelled() {
            let _ = state.child.start_kill();
            return None;
        }

        let mut chunk = [0u8; READ_CHUNK];
        match state.stdout.read(&mut chunk).await {
            Ok(0) => {
                state.done = true;
                if !state.chunked && !state.buf.is_empty() {
                    // Final unterminated line.
                    let tail = std::mem::take(&mut state.buf);
                    state
                        .pending
                        .push_back(Object::Text(String::from_utf8_lossy(&tail).into_owned()));
                    continue;
                }
                match state.child.wait().await {
                    Ok(status) if status.success() => return None,
                    Ok(status) => {
                        let err = ExecError::message(format!(
                            "sys: '{}' exited with {status}",
                            state.program
                        ));
                        return Some((Err(err), state));
                    }
                    Err(err) => return Some((Err(err.into()), state)),
                }
            }
            Ok(n) => {
                if state.chunked {
                    return Some((Ok(Object::Bytes(chunk[..n].to_vec())), state));
                }
                state.buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
                    let mut line: Vec<u8> = state.buf.drain(..=pos).collect();
                    line.pop();
                    state
                        .pending
                        .push_back(Object::Text(String::from_utf8_lossy(&line).into_owned()));
                }
            }
            Err(err) => {
                state.done = true;
                return Some((Err(err.into()), state));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::descriptor::ExecutionKind;
    use crate::transport::TransportQueue;

    fn run_sys(inv: Invocation) -> futures::stream::BoxStream<'static, Result<Object, ExecError>> {
        let desc = descriptor();
        let ExecutionKind::Generator(f) = &desc.exec else {
            panic!("sys is a generator");
        };
        f(inv)
    }

    fn invocation(args: &[&str]) -> Invocation {
        Invocation {
            ctx: CommandContext::detached("/tmp"),
            args: args.iter().map(|s| s.to_string()).collect(),
            options: Vec::new(),
            input: None,
            format: None,
        }
    }

    #[tokio::test]
    async fn yields_stdout_as_lines() {
        let inv = invocation(&["sh", "-c", "printf 'one\\ntwo\\n'"]);
        let items: Vec<_> = run_sys(inv).collect().await;
        let lines: Vec<_> = items.into_iter().map(|r| r.unwrap().render()).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_kept() {
        let inv = invocation(&["sh", "-c", "printf 'no-newline'"]);
        let items: Vec<_> = run_sys(inv).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().render(), "no-newline");
    }

    #[tokio::test]
    async fn nonzero_exit_ends_with_error() {
        let inv = invocation(&["sh", "-c", "exit 3"]);
        let items: Vec<_> = run_sys(inv).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let inv = invocation(&["no-such-program-ductwork"]);
        let items: Vec<_> = run_sys(inv).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn chunked_format_yields_bytes() {
        let mut inv = invocation(&["sh", "-c", "printf 'raw'"]);
        inv.format = Some("chunked".to_string());
        let items: Vec<_> = run_sys(inv).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap(),
            &Object::Bytes(b"raw".to_vec())
        );
    }

    #[tokio::test]
    async fn input_feeds_child_stdin() {
        let queue = TransportQueue::new(std::time::Duration::ZERO);
        queue.push(Object::from("hello"));
        queue.close();

        let mut inv = invocation(&["cat"]);
        inv.input = Some(queue);
        let items: Vec<_> = run_sys(inv).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().render(), "hello");
    }

    #[tokio::test]
    async fn pid_recorded_in_attribs() {
        let ctx = CommandContext::detached("/tmp");
        let inv = Invocation {
            ctx: ctx.clone(),
            args: vec!["true".into()],
            options: Vec::new(),
            input: None,
            format: None,
        };
        let _: Vec<_> = run_sys(inv).collect().await;
        assert!(ctx.attrib("pid").is_some());
    }
}
