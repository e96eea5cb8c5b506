//! `rm` — removes filesystem entries, undoably by default.
//!
//! Targets are moved into the session trash directory under unique names;
//! undo renames them back in removal order. `--unlink`/`-u` deletes
//! permanently and registers no undo step.

use std::path::Path;
use std::sync::{Arc, Weak};

use futures::{stream, FutureExt, StreamExt};

use ductwork_types::ArgSpec;

use crate::descriptor::{BuiltinDescriptor, DescriptorBuilder, Invocation};
use crate::error::ExecError;
use crate::session::Session;

pub(super) fn descriptor(session: &Arc<Session>) -> BuiltinDescriptor {
    let weak = Arc::downgrade(session);
    DescriptorBuilder::new("rm")
        .argspec(ArgSpec::variadic("path", 1))
        .undoable()
        .option_group(["--unlink", "-u"])
        .generator(move |inv| {
            let weak = weak.clone();
            let fut = async move {
                match remove_all(weak, inv).await {
                    Ok(()) => stream::iter(vec![]),
                    Err(err) => stream::iter(vec![Err(err)]),
                }
            };
            fut.flatten_stream().boxed()
        })
        .build()
}

async fn remove_all(weak: Weak<Session>, inv: Invocation) -> Result<(), ExecError> {
    let unlink = inv.has_option("--unlink");
    for arg in &inv.args {
        if inv.ctx.cancelled() {
            break;
        }
        let path = inv.ctx.resolve(arg);
        if unlink {
            unlink_entry(&path).await?;
            continue;
        }

        let session = weak
            .upgrade()
            .ok_or_else(|| ExecError::message("session is gone"))?;
        let trash = session.trash_dir().to_path_buf();
        tokio::fs::create_dir_all(&trash).await?;

        // Unique slot so two removals of same-named entries never collide.
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        let slot = trash.join(format!("{}.{name}", session.next_trash_slot()));

        tokio::fs::rename(&path, &slot)
            .await
            .map_err(|err| ExecError::message(format!("rm: {}: {err}", path.display())))?;
        tracing::debug!(from = %path.display(), to = %slot.display(), "trashed");

        inv.ctx.push_undo(Box::new(move || {
            Box::pin(async move {
                tokio::fs::rename(&slot, &path).await?;
                Ok(())
            })
        }));
    }
    Ok(())
}

async fn unlink_entry(path: &Path) -> Result<(), ExecError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|err| ExecError::message(format!("rm: {}: {err}", path.display())))?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::SessionConfig;

    fn test_session(dir: &Path) -> Arc<Session> {
        Session::new(SessionConfig {
            cwd: dir.to_path_buf(),
            trash_dir: Some(dir.join(".trash")),
            debounce: std::time::Duration::ZERO,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn rm_trashes_and_undo_restores() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("doomed.txt");
        std::fs::write(&victim, "payload").unwrap();
        let session = test_session(dir.path());

        let pipeline = Arc::new(session.builder().parse("rm doomed.txt").await.unwrap());
        pipeline.execute_sync().await.unwrap();
        assert!(!victim.exists());

        pipeline.undo().await.unwrap();
        assert!(victim.exists());
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "payload");
    }

    #[tokio::test]
    async fn unlink_skips_the_trash() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("gone.txt");
        std::fs::write(&victim, "x").unwrap();
        let session = test_session(dir.path());

        let pipeline = Arc::new(session.builder().parse("rm -u gone.txt").await.unwrap());
        pipeline.execute_sync().await.unwrap();
        assert!(!victim.exists());

        // Undo is legal (the builtin is flagged undoable) but has no step
        // to run for an unlinked entry.
        pipeline.undo().await.unwrap();
        assert!(!victim.exists());
    }

    #[tokio::test]
    async fn missing_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        assert!(session.run_sync("rm absent.txt").await.is_err());
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_slots() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        for _ in 0..2 {
            std::fs::write(dir.path().join("dup.txt"), "x").unwrap();
            session.run_sync("rm dup.txt").await.unwrap();
        }
        let trashed = std::fs::read_dir(dir.path().join(".trash")).unwrap().count();
        assert_eq!(trashed, 2);
    }

    #[tokio::test]
    async fn trash_slots_are_numbered_per_session() {
        // A fresh session always starts its slot sequence at zero.
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("dup.txt"), "x").unwrap();
            let session = test_session(dir.path());
            session.run_sync("rm dup.txt").await.unwrap();

            let names: Vec<String> = std::fs::read_dir(dir.path().join(".trash"))
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect();
            assert_eq!(names, vec!["0.dup.txt"]);
        }
    }
}
