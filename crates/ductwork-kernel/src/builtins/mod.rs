//! Stock builtin set, registered into the `Stock` layer by every session.
//!
//! Each builtin is small and exists because the engine or its tests need
//! it: `sys` is the builder's fallback for unknown verbs, `cd` and `rm`
//! exercise inline scheduling and undo, `current` exercises dynamic output
//! typing, `filter` exercises identity passthrough. Builtins that touch
//! session state capture a `Weak<Session>` so a descriptor held by the
//! registry never keeps its own session alive.

use std::sync::Arc;

use crate::registry::Layer;
use crate::session::Session;

mod cat;
mod cd;
mod current;
mod echo;
mod filter;
mod rm;
mod sys;

pub fn register_stock(session: &Arc<Session>) {
    let registry = session.registry();
    registry.register(Layer::Stock, sys::descriptor());
    registry.register(Layer::Stock, echo::descriptor());
    registry.register(Layer::Stock, cat::descriptor());
    registry.register(Layer::Stock, cd::descriptor(session));
    registry.register(Layer::Stock, rm::descriptor(session));
    registry.register(Layer::Stock, current::descriptor(session));
    registry.register(Layer::Stock, filter::descriptor());
}
