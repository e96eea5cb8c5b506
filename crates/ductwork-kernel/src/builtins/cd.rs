//! `cd` — changes the session working directory.
//!
//! Runs inline (not on the worker pool) so a later stage built against the
//! new directory cannot race the change. With no argument it returns to the
//! previous directory, when one is recorded. Undo restores the directory
//! that was in effect.

use std::sync::{Arc, Weak};

use futures::{stream, FutureExt, StreamExt};

use ductwork_types::{ArgSlot, ArgSpec, Locality};

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder, Invocation};
use crate::error::ExecError;
use crate::session::Session;

pub(super) fn descriptor(session: &Arc<Session>) -> BuiltinDescriptor {
    let weak = Arc::downgrade(session);
    DescriptorBuilder::new("cd")
        .argspec(ArgSpec::fixed([ArgSlot::optional("dir")]))
        .inline()
        .undoable()
        .locality(Locality::Local)
        .generator(move |inv| {
            let weak = weak.clone();
            let fut = async move {
                match change_dir(weak, inv).await {
                    Ok(()) => stream::iter(vec![]),
                    Err(err) => stream::iter(vec![Err(err)]),
                }
            };
            fut.flatten_stream().boxed()
        })
        .build()
}

async fn change_dir(weak: Weak<Session>, inv: Invocation) -> Result<(), ExecError> {
    let session = weak
        .upgrade()
        .ok_or_else(|| ExecError::message("session is gone"))?;

    let target = match inv.args.first() {
        Some(arg) => inv.ctx.resolve(arg),
        None => match session.prev_cwd() {
            Some(prev) => prev,
            // Nowhere to go back to; stay put.
            None => return Ok(()),
        },
    };

    let target = tokio::fs::canonicalize(&target)
        .await
        .map_err(|err| ExecError::message(format!("cd: {}: {err}", target.display())))?;
    if !tokio::fs::metadata(&target).await?.is_dir() {
        return Err(ExecError::message(format!(
            "cd: {}: not a directory",
            target.display()
        )));
    }

    let restored = session.set_cwd(target);
    let undo_session = weak.clone();
    inv.ctx.push_undo(Box::new(move || {
        Box::pin(async move {
            if let Some(session) = undo_session.upgrade() {
                session.set_cwd(restored);
            }
            Ok(())
        })
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::SessionConfig;

    fn test_session(cwd: &std::path::Path) -> Arc<Session> {
        Session::new(SessionConfig {
            cwd: cwd.to_path_buf(),
            debounce: std::time::Duration::ZERO,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn changes_and_undoes_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let session = test_session(dir.path());
        let before = session.cwd();

        let pipeline = Arc::new(session.builder().parse("cd sub").await.unwrap());
        pipeline.execute_sync().await.unwrap();
        assert!(session.cwd().ends_with("sub"));

        pipeline.undo().await.unwrap();
        assert_eq!(session.cwd(), before);
    }

    #[tokio::test]
    async fn missing_directory_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let err = session.run_sync("cd nowhere").await.unwrap_err();
        assert!(err.to_string().contains("cd"));
    }

    #[tokio::test]
    async fn bare_cd_returns_to_previous_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let session = test_session(dir.path());
        let start = session.cwd();

        session.run_sync("cd sub").await.unwrap();
        session.run_sync("cd").await.unwrap();
        assert_eq!(session.cwd(), start);
    }
}
