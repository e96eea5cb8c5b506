//! `current` — yields the session's current selection as a single value.
//!
//! The output schema's `type_fn` reads the live selection, so the builder
//! type-checks against what is actually selected right now rather than a
//! static tag.

use std::sync::Arc;

use futures::FutureExt;

use ductwork_types::{ArgSpec, OutputSchema};

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder};
use crate::error::ExecError;
use crate::session::Session;

pub(super) fn descriptor(session: &Arc<Session>) -> BuiltinDescriptor {
    let weak = Arc::downgrade(session);
    DescriptorBuilder::new("current")
        .argspec(ArgSpec::NoArgs)
        .singlevalue()
        .output(OutputSchema::any().type_fn(Arc::new(move || {
            weak.upgrade()
                .and_then(|session| session.selection())
                .map(|obj| obj.type_tag())
        })))
        .single(|inv| {
            async move {
                inv.ctx
                    .current_selection()
                    .ok_or_else(|| ExecError::message("no current selection"))
            }
            .boxed()
        })
        .build()
}
