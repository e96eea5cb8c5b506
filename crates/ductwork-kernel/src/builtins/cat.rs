//! `cat` — reads files named by arguments or by upstream path objects and
//! yields their contents as text lines.

use std::path::PathBuf;

use futures::{FutureExt, StreamExt};

use ductwork_types::{ArgSpec, InputSchema, Object, OutputSchema};

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder, Invocation};
use crate::error::ExecError;

pub(super) fn descriptor() -> BuiltinDescriptor {
    DescriptorBuilder::new("cat")
        .input(InputSchema::tag("path").optional())
        .output(OutputSchema::tag("text"))
        .argspec(ArgSpec::variadic("path", 0))
        .generator(|inv| {
            let fut = async move { futures::stream::iter(read_all(inv).await) };
            fut.flatten_stream().boxed()
        })
        .build()
}

/// Argument paths first, then upstream paths in arrival order. A read
/// failure ends the stream with that error.
async fn read_all(inv: Invocation) -> Vec<Result<Object, ExecError>> {
    let mut paths: Vec<PathBuf> = inv.args.iter().map(PathBuf::from).collect();
    if let Some(queue) = &inv.input {
        while let Some(obj) = queue.pop().await {
            if let Some(path) = obj.as_path() {
                paths.push(path);
            }
        }
    }

    let mut out = Vec::new();
    for path in paths {
        if inv.ctx.cancelled() {
            break;
        }
        let path = inv.ctx.resolve(path);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                out.extend(text.lines().map(|line| Ok(Object::Text(line.to_string()))));
            }
            Err(err) => {
                out.push(Err(ExecError::message(format!(
                    "cat: {}: {err}",
                    path.display()
                ))));
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::context::CommandContext;
    use crate::descriptor::ExecutionKind;
    use crate::transport::TransportQueue;

    fn invoke(desc: &BuiltinDescriptor, inv: Invocation) -> futures::stream::BoxStream<'static, Result<Object, ExecError>> {
        let ExecutionKind::Generator(f) = &desc.exec else {
            panic!("cat is a generator");
        };
        f(inv)
    }

    #[tokio::test]
    async fn reads_argument_files_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

        let inv = Invocation {
            ctx: CommandContext::detached(dir.path()),
            args: vec!["a.txt".into()],
            options: Vec::new(),
            input: None,
            format: None,
        };
        let items: Vec<_> = invoke(&descriptor(), inv).collect().await;
        let lines: Vec<_> = items.into_iter().map(|r| r.unwrap().render()).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn reads_paths_from_input_queue() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.txt");
        std::fs::write(&file, "hello\n").unwrap();

        let queue = TransportQueue::new(std::time::Duration::ZERO);
        queue.push(Object::Path(file));
        queue.close();

        let inv = Invocation {
            ctx: CommandContext::detached(dir.path()),
            args: Vec::new(),
            options: Vec::new(),
            input: Some(queue),
            format: None,
        };
        let items: Vec<_> = invoke(&descriptor(), inv).collect().await;
        assert_eq!(items[0].as_ref().unwrap().render(), "hello");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let inv = Invocation {
            ctx: CommandContext::detached("/tmp"),
            args: vec!["no-such-file-ductwork".into()],
            options: Vec::new(),
            input: None,
            format: None,
        };
        let items: Vec<_> = invoke(&descriptor(), inv).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
