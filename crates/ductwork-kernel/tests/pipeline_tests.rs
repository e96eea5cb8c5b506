use std::sync::Arc;
use std::time::Duration;

use ductwork_kernel::{Session, SessionConfig};
use ductwork_types::{Object, PipelineEvent, PipelineState};

/// Capture engine logs in test output; honors `RUST_LOG`. Only the first
/// call installs the subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session_in(dir: &std::path::Path) -> Arc<Session> {
    init_tracing();
    Session::new(SessionConfig {
        cwd: dir.to_path_buf(),
        trash_dir: Some(dir.join(".trash")),
        debounce: Duration::ZERO,
        ..SessionConfig::default()
    })
}

fn session() -> Arc<Session> {
    init_tracing();
    Session::new(SessionConfig {
        debounce: Duration::ZERO,
        ..SessionConfig::default()
    })
}

#[tokio::test]
async fn echo_filter_end_to_end() {
    let items = session().run("echo alpha beta gamma | filter a").await.unwrap();
    assert_eq!(items, vec![
        Object::Text("alpha".into()),
        Object::Text("beta".into()),
        Object::Text("gamma".into()),
    ]);

    let items = session().run("echo alpha beta gamma | filter be").await.unwrap();
    assert_eq!(items, vec![Object::Text("beta".into())]);
}

#[tokio::test]
async fn sync_and_async_modes_agree() {
    let session = session();
    let sync = session.run_sync("echo x y | filter y").await.unwrap();
    let concurrent = session.run("echo x y | filter y").await.unwrap();
    assert_eq!(sync, concurrent);
}

#[tokio::test]
async fn unknown_verb_falls_back_to_sys() {
    // `printf` is no builtin; the builder hands it to `sys`.
    let items = session().run("printf hi").await.unwrap();
    assert_eq!(items, vec![Object::Text("hi".into())]);
}

#[tokio::test]
async fn sys_pipes_through_external_commands() {
    let items = session().run("echo one two | tr a-z A-Z").await.unwrap();
    let rendered: Vec<String> = items.iter().map(Object::render).collect();
    assert_eq!(rendered, vec!["ONE", "TWO"]);
}

#[tokio::test]
async fn glob_expands_against_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a1.txt"), "").unwrap();
    std::fs::write(dir.path().join("a2.txt"), "").unwrap();
    std::fs::write(dir.path().join("b.md"), "").unwrap();

    let items = session_in(dir.path()).run("echo a*.txt").await.unwrap();
    let rendered: Vec<String> = items.iter().map(Object::render).collect();
    assert_eq!(rendered, vec!["a1.txt", "a2.txt"]);
}

#[tokio::test]
async fn unmatched_glob_passes_through_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let items = session_in(dir.path()).run("echo f*").await.unwrap();
    assert_eq!(items, vec![Object::Text("f*".into())]);
}

#[tokio::test]
async fn quoted_glob_is_never_expanded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("match.txt"), "").unwrap();
    let items = session_in(dir.path()).run("echo '*.txt'").await.unwrap();
    assert_eq!(items, vec![Object::Text("*.txt".into())]);
}

#[tokio::test]
async fn redirect_out_writes_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path());

    let items = session.run("echo first second > out.txt").await.unwrap();
    assert!(items.is_empty(), "redirected output skips the queue");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "first\nsecond\n"
    );

    session.run("echo third >> out.txt").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "first\nsecond\nthird\n"
    );
}

#[tokio::test]
async fn redirect_in_feeds_the_first_stage() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.txt"), "keep\ndrop\nkeep too\n").unwrap();

    let items = session_in(dir.path())
        .run("filter keep < in.txt")
        .await
        .unwrap();
    let rendered: Vec<String> = items.iter().map(Object::render).collect();
    assert_eq!(rendered, vec!["keep", "keep too"]);
}

#[tokio::test]
async fn events_trace_the_lifecycle() {
    let session = session();
    let mut rx = session.subscribe();
    session.run("echo hi").await.unwrap();

    let mut saw_executing = false;
    let mut saw_stage_complete = false;
    let mut saw_complete = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        match event {
            PipelineEvent::StateChanged { from, to, .. } => {
                if from == PipelineState::Waiting && to == PipelineState::Executing {
                    saw_executing = true;
                }
            }
            PipelineEvent::StageComplete { .. } => saw_stage_complete = true,
            PipelineEvent::Complete { .. } => {
                saw_complete = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_executing);
    assert!(saw_stage_complete);
    assert!(saw_complete);
}

#[tokio::test]
async fn stage_failure_cancels_then_settles_in_exception() {
    let session = session();
    let mut rx = session.subscribe();
    let err = session.run("cat missing-ductwork.txt").await.unwrap_err();
    assert!(err.to_string().contains("stage 0"));

    let mut states = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        if let PipelineEvent::StateChanged { to, .. } = event {
            states.push(to);
            if to == PipelineState::Exception {
                break;
            }
        }
    }
    assert_eq!(
        states,
        vec![
            PipelineState::Executing,
            PipelineState::Cancelled,
            PipelineState::Exception,
        ]
    );
}

#[tokio::test]
async fn cancel_unblocks_the_consumer() {
    let session = session();
    // `sleep` resolves through the sys fallback and blocks for a while.
    let pipeline = Arc::new(session.builder().parse("sleep 5").await.unwrap());
    pipeline
        .execute(session.pool(), &[])
        .await
        .unwrap();

    pipeline.cancel();
    pipeline.cancel();
    assert_eq!(pipeline.state(), PipelineState::Cancelled);

    let drained = tokio::time::timeout(Duration::from_secs(2), pipeline.output_queue().drain())
        .await
        .expect("consumer stayed blocked after cancel");
    assert!(drained.is_empty());
}

#[tokio::test]
async fn undo_restores_a_trashed_file_through_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("keepsake.txt");
    std::fs::write(&victim, "irreplaceable").unwrap();
    let session = session_in(dir.path());

    let pipeline = Arc::new(session.builder().parse("rm keepsake.txt").await.unwrap());
    pipeline.execute_sync().await.unwrap();
    assert!(!victim.exists());
    assert_eq!(pipeline.state(), PipelineState::Complete);

    pipeline.undo().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Undone);
    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "irreplaceable");
}

#[tokio::test]
async fn singlevalue_current_flows_into_a_pipe() {
    let session = session();
    session.set_selection(Some(Object::from("selected-line")));
    let items = session.run("current | filter line").await.unwrap();
    assert_eq!(items, vec![Object::Text("selected-line".into())]);
}
