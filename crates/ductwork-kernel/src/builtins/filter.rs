//! `filter` — keeps objects whose rendered text matches a pattern.
//!
//! A pattern containing glob metacharacters is matched against the whole
//! rendered text; anything else is a substring test. Output is `Identity`,
//! so the upstream type flows through unchanged.

use futures::{stream, StreamExt};

use ductwork_glob::{contains_glob, glob_match};
use ductwork_types::{ArgSlot, ArgSpec, InputSchema, OutputSchema};

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder};

pub(super) fn descriptor() -> BuiltinDescriptor {
    DescriptorBuilder::new("filter")
        .input(InputSchema::any())
        .output(OutputSchema::identity())
        .argspec(ArgSpec::fixed([ArgSlot::required("pattern")]))
        .option_group(["--ignore-case", "-i"])
        .generator(|inv| {
            let fold_case = inv.has_option("--ignore-case");
            let mut pattern = inv.args.first().cloned().unwrap_or_default();
            if fold_case {
                pattern = pattern.to_lowercase();
            }
            let globbing = contains_glob(&pattern);
            stream::unfold(
                (inv.input, pattern),
                move |(input, pattern)| async move {
                    loop {
                        let obj = input.as_ref()?.pop().await?;
                        let mut text = obj.render();
                        if fold_case {
                            text = text.to_lowercase();
                        }
                        let hit = if globbing {
                            glob_match(&pattern, &text).unwrap_or(false)
                        } else {
                            text.contains(&pattern)
                        };
                        if hit {
                            return Some((Ok(obj), (input, pattern)));
                        }
                    }
                },
            )
            .boxed()
        })
        .build()
}
