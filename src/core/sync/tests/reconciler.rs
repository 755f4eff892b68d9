use super::{credentials, enabled_site, reconciler};
use crate::core::config::Credentials;
use crate::core::remote::RemoteRun;
use crate::core::remote::fake::{remote_run, remote_session};
use crate::core::store::fixtures::{at, run, session};
use crate::core::store::{MirrorStore, RunState, SyncStateRecord};
use crate::core::sync::backoff;

const PR_URL: &str = "https://github.com/acme/site/pull/12";

#[tokio::test]
async fn discovers_runs_and_sessions_of_enabled_sites() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);
    source.set_sessions("r1", vec![remote_session("x1", "running")]);

    let report = reconciler.reconcile_at(&credentials(), at(100)).await.unwrap();
    assert_eq!(report.runs_discovered, 1);
    assert_eq!(report.sessions_discovered, 1);
    assert!(report.changed);
    assert_eq!(report.consecutive_no_change, 0);
    assert_eq!(report.backoff_seconds, 30);

    let stored = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(stored.site_name.as_deref(), Some("Site One"));
    assert_eq!(stored.state, RunState::Running);
    assert_eq!(stored.synced_at, Some(at(100)));
    assert!(!stored.pr_needs_update);

    let sessions = store.list_sessions("r1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].prompt.as_deref(), Some("prompt for x1"));

    let state = store.get_sync_state().await.unwrap().unwrap();
    assert_eq!(
        state,
        SyncStateRecord {
            last_sync_at: Some(at(100)),
            next_sync_at: Some(at(130)),
            backoff_seconds: 30,
            consecutive_no_change: 0,
        }
    );
}

#[tokio::test]
async fn second_pass_without_upstream_changes_only_moves_timestamps() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "done"), remote_run("r2", "new")]);
    source.set_sessions("r1", vec![remote_session("x1", "done")]);

    reconciler.reconcile_at(&credentials(), at(0)).await.unwrap();
    let before = store.get_run_with_sessions("r1").await.unwrap().unwrap();

    let report = reconciler.reconcile_at(&credentials(), at(500)).await.unwrap();
    assert!(!report.changed);
    assert_eq!(report.runs_unchanged, 2);
    assert_eq!(report.consecutive_no_change, 1);
    assert_eq!(report.backoff_seconds, 60);

    let mut after = store.get_run_with_sessions("r1").await.unwrap().unwrap();
    assert_eq!(after.run.synced_at, Some(at(500)));
    after.run.synced_at = before.run.synced_at;
    assert_eq!(after.run, before.run);
    assert_eq!(after.sessions, before.sessions);

    let state = store.get_sync_state().await.unwrap().unwrap();
    assert_eq!(state.last_sync_at, Some(at(500)));
    assert_eq!(state.next_sync_at, Some(at(560)));
}

#[tokio::test]
async fn empty_remote_fields_do_not_erase_known_values() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let mut local = run("r1", "s1");
    local.pull_request_url = Some(PR_URL.to_string());
    local.pull_request_state = Some("open".to_string());
    local.deploy_preview_url = Some("https://deploy-preview-12--site.netlify.app".to_string());
    store.insert_run(&local).await.unwrap();

    let (reconciler, source) = reconciler(&store);
    source.set_runs(
        "s1",
        vec![RemoteRun {
            pr_url: Some(String::new()),
            ..remote_run("r1", "running")
        }],
    );

    let report = reconciler.reconcile_at(&credentials(), at(10)).await.unwrap();
    assert_eq!(report.runs_unchanged, 1);
    assert!(!report.changed);

    let stored = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(stored.pull_request_url.as_deref(), Some(PR_URL));
    assert_eq!(stored.pull_request_state.as_deref(), Some("open"));
    assert!(stored.deploy_preview_url.is_some());
}

#[tokio::test]
async fn unknown_remote_state_keeps_local_state() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    store.insert_run(&run("r1", "s1")).await.unwrap();
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "mystery")]);

    reconciler.reconcile_at(&credentials(), at(10)).await.unwrap();
    let stored = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::Running);
}

#[tokio::test]
async fn remote_state_change_updates_run() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    store.insert_run(&run("r1", "s1")).await.unwrap();
    let (reconciler, source) = reconciler(&store);
    source.set_runs(
        "s1",
        vec![RemoteRun {
            pr_url: Some(PR_URL.to_string()),
            pr_state: Some("open".to_string()),
            ..remote_run("r1", "done")
        }],
    );

    let report = reconciler.reconcile_at(&credentials(), at(42)).await.unwrap();
    assert_eq!(report.runs_updated, 1);
    assert!(report.changed);

    let stored = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::Done);
    assert_eq!(stored.pull_request_url.as_deref(), Some(PR_URL));
    assert_eq!(stored.updated_at, at(42));
    assert_eq!(stored.synced_at, Some(at(42)));
    // Title is set at creation and not tracked afterwards.
    assert_eq!(stored.title.as_deref(), Some("Run r1"));
}

#[tokio::test]
async fn new_session_marks_linked_pull_request_for_update() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let mut local = run("r1", "s1");
    local.pull_request_url = Some(PR_URL.to_string());
    store.insert_run(&local).await.unwrap();
    store.insert_session(&session("x1", "r1")).await.unwrap();

    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);
    source.set_sessions(
        "r1",
        vec![remote_session("x1", "running"), remote_session("x2", "new")],
    );

    let report = reconciler.reconcile_at(&credentials(), at(10)).await.unwrap();
    assert_eq!(report.sessions_discovered, 1);
    assert!(report.changed);
    assert!(store.get_run("r1").await.unwrap().unwrap().pr_needs_update);
}

#[tokio::test]
async fn new_session_without_pull_request_leaves_flag_alone() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    store.insert_run(&run("r1", "s1")).await.unwrap();

    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);
    source.set_sessions("r1", vec![remote_session("x1", "running")]);

    reconciler.reconcile_at(&credentials(), at(10)).await.unwrap();
    assert!(!store.get_run("r1").await.unwrap().unwrap().pr_needs_update);
}

#[tokio::test]
async fn discovered_run_with_pull_request_is_flagged_for_new_sessions() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs(
        "s1",
        vec![RemoteRun {
            pr_url: Some(PR_URL.to_string()),
            ..remote_run("r1", "done")
        }],
    );
    source.set_sessions("r1", vec![remote_session("x1", "done")]);

    reconciler.reconcile_at(&credentials(), at(10)).await.unwrap();
    let stored = store.get_run("r1").await.unwrap().unwrap();
    assert_eq!(stored.pull_request_url.as_deref(), Some(PR_URL));
    assert!(stored.pr_needs_update);
}

#[tokio::test]
async fn session_state_change_keeps_prompt() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    store.insert_run(&run("r1", "s1")).await.unwrap();
    store.insert_session(&session("x1", "r1")).await.unwrap();

    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);
    let mut remote = remote_session("x1", "done");
    remote.prompt = Some("rewritten upstream".to_string());
    source.set_sessions("r1", vec![remote]);

    let report = reconciler.reconcile_at(&credentials(), at(99)).await.unwrap();
    assert_eq!(report.sessions_updated, 1);
    assert!(report.changed);

    let stored = store.get_session("x1").await.unwrap().unwrap();
    assert_eq!(stored.state, "done");
    assert_eq!(stored.prompt.as_deref(), Some("do the thing"));
    assert_eq!(stored.created_at, at(0));
    assert_eq!(stored.updated_at, at(99));
}

#[tokio::test]
async fn failing_site_does_not_block_the_others() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "a", "Broken").await;
    enabled_site(&store, "b", "Healthy").await;
    let (reconciler, source) = reconciler(&store);
    source.fail_site("a");
    source.set_runs("a", vec![remote_run("ra", "running")]);
    source.set_runs("b", vec![remote_run("rb", "running")]);

    let report = reconciler.reconcile_at(&credentials(), at(5)).await.unwrap();
    assert_eq!(report.sites_polled, 2);
    assert_eq!(report.sites_failed, 1);
    assert!(store.get_run("ra").await.unwrap().is_none());
    assert!(store.get_run("rb").await.unwrap().is_some());
    assert!(store.get_sync_state().await.unwrap().is_some());
}

#[tokio::test]
async fn failing_session_fetch_is_isolated_to_its_run() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs(
        "s1",
        vec![remote_run("r1", "running"), remote_run("r2", "running")],
    );
    source.fail_sessions("r1");
    source.set_sessions("r2", vec![remote_session("x2", "running")]);

    let report = reconciler.reconcile_at(&credentials(), at(5)).await.unwrap();
    assert_eq!(report.session_fetch_failures, 1);
    assert_eq!(report.runs_discovered, 2);
    assert_eq!(store.list_sessions("r2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn failures_alone_do_not_count_as_change() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.fail_site("s1");

    let report = reconciler.reconcile_at(&credentials(), at(5)).await.unwrap();
    assert!(!report.changed);
    assert_eq!(report.consecutive_no_change, 1);
}

#[tokio::test]
async fn missing_token_aborts_without_touching_sync_state() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);

    let no_token = Credentials {
        netlify_token: Some("   ".to_string()),
        github_token: None,
    };
    assert!(reconciler.reconcile_at(&no_token, at(5)).await.is_err());
    assert!(store.get_sync_state().await.unwrap().is_none());
    assert!(store.get_run("r1").await.unwrap().is_none());
    assert_eq!(source.list_runs_calls(), 0);
}

#[tokio::test]
async fn disabled_sites_are_not_polled() {
    let store = MirrorStore::open_in_memory().unwrap();
    store.upsert_site("s1", "Quiet", at(0)).await.unwrap();
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);

    let report = reconciler.reconcile_at(&credentials(), at(5)).await.unwrap();
    assert_eq!(report.sites_polled, 0);
    assert_eq!(source.list_runs_calls(), 0);
    assert!(store.get_run("r1").await.unwrap().is_none());
}

#[tokio::test]
async fn quiet_pass_past_the_cap_stays_saturated() {
    let store = MirrorStore::open_in_memory().unwrap();
    store
        .put_sync_state(&SyncStateRecord {
            last_sync_at: Some(at(0)),
            next_sync_at: Some(at(345_600)),
            backoff_seconds: 345_600,
            consecutive_no_change: 11,
        })
        .await
        .unwrap();
    let (reconciler, _source) = reconciler(&store);

    let report = reconciler
        .reconcile_at(&credentials(), at(400_000))
        .await
        .unwrap();
    assert_eq!(report.consecutive_no_change, 12);
    assert_eq!(report.backoff_seconds, 345_600);

    let state = store.get_sync_state().await.unwrap().unwrap();
    assert_eq!(state.consecutive_no_change, 12);
    assert_eq!(state.backoff_seconds, backoff::schedule_for(12));
    assert_eq!(state.next_sync_at, Some(at(745_600)));
}

#[tokio::test]
async fn first_quiet_pass_without_state_counts_one() {
    let store = MirrorStore::open_in_memory().unwrap();
    let (reconciler, _source) = reconciler(&store);

    let report = reconciler.reconcile_at(&credentials(), at(0)).await.unwrap();
    assert_eq!(report.consecutive_no_change, 1);
    assert_eq!(report.backoff_seconds, 60);
}

#[tokio::test]
async fn sync_run_refreshes_one_run_without_touching_schedule() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    store.insert_run(&run("r1", "s1")).await.unwrap();
    let (reconciler, source) = reconciler(&store);
    source.set_runs(
        "s1",
        vec![RemoteRun {
            latest_session_deploy_url: Some("https://preview.example".to_string()),
            ..remote_run("r1", "done")
        }],
    );
    source.set_sessions("r1", vec![remote_session("x1", "done")]);

    let refreshed = reconciler
        .sync_run(&credentials(), "r1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.state, RunState::Done);
    assert_eq!(
        refreshed.deploy_preview_url.as_deref(),
        Some("https://preview.example")
    );
    assert_eq!(store.list_sessions("r1").await.unwrap().len(), 1);
    assert!(store.get_sync_state().await.unwrap().is_none());

    assert!(
        reconciler
            .sync_run(&credentials(), "unknown")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn refresh_sites_keeps_sync_flags() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Old Name").await;
    let (reconciler, source) = reconciler(&store);
    source.add_site("s1", "New Name");
    source.add_site("s2", "Second");

    let sites = reconciler.refresh_sites(&credentials()).await.unwrap();
    assert_eq!(sites.len(), 2);
    let first = sites.iter().find(|s| s.id == "s1").unwrap();
    assert_eq!(first.name, "New Name");
    assert!(first.sync_enabled);
    let second = sites.iter().find(|s| s.id == "s2").unwrap();
    assert!(!second.sync_enabled);
}

#[tokio::test]
async fn overlapping_passes_mirror_each_row_once() {
    let store = MirrorStore::open_in_memory().unwrap();
    enabled_site(&store, "s1", "Site One").await;
    let (reconciler, source) = reconciler(&store);
    source.set_runs("s1", vec![remote_run("r1", "running")]);
    source.set_sessions("r1", vec![remote_session("x1", "running")]);

    let creds = credentials();
    let (first, second) = tokio::join!(
        reconciler.reconcile_at(&creds, at(10)),
        reconciler.reconcile_at(&creds, at(10)),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.runs_discovered + second.runs_discovered, 1);
    assert_eq!(first.sessions_discovered + second.sessions_discovered, 1);
    assert_eq!(store.list_runs(false).await.unwrap().len(), 1);
    assert_eq!(store.list_sessions("r1").await.unwrap().len(), 1);
    assert_eq!(store.sync_state_row_count().await.unwrap(), 1);

    // Whichever pass writes last decides the streak: the discovering pass
    // resets it, the pass that lost every insert counts as quiet.
    let state = store.get_sync_state().await.unwrap().unwrap();
    assert!(
        matches!(state.consecutive_no_change, 0 | 1),
        "unexpected streak {}",
        state.consecutive_no_change
    );
    assert_eq!(state.backoff_seconds, backoff::schedule_for(state.consecutive_no_change));
}
