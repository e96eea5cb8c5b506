//! `echo` — yields its arguments as text objects.

use futures::stream;
use futures::StreamExt;

use ductwork_types::{ArgSpec, Object, OutputSchema};

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder};

pub(super) fn descriptor() -> BuiltinDescriptor {
    DescriptorBuilder::new("echo")
        .output(OutputSchema::tag("text"))
        .argspec(ArgSpec::variadic("word", 0))
        .idempotent()
        .generator(|inv| {
            stream::iter(inv.args.into_iter().map(|arg| Ok(Object::Text(arg)))).boxed()
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use crate::context::CommandContext;
    use crate::descriptor::{ExecutionKind, Invocation};

    #[tokio::test]
    async fn yields_each_argument() {
        let desc = descriptor();
        let ExecutionKind::Generator(f) = &desc.exec else {
            panic!("echo is a generator");
        };
        let inv = Invocation {
            ctx: CommandContext::detached("/tmp"),
            args: vec!["a".into(), "b".into()],
            options: Vec::new(),
            input: None,
            format: None,
        };
        let items: Vec<_> = f(inv).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Object::Text("a".into()));
        assert_eq!(items[1].as_ref().unwrap(), &Object::Text("b".into()));
    }
}
