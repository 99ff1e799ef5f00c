//! End-to-end daemon scenarios against a real temp repository.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use thrum_index::MessageQuery;
use thrum_runtime::{Daemon, RegisterParams, SendParams, SessionStartParams, WaitOutcome};
use thrum_types::{FilterType, GroupMember, MessageBody, RefType, Scope, SubscriptionFilter};

fn git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let status = Command::new("git")
        .current_dir(dir.path())
        .args(["init", "--quiet"])
        .status()
        .unwrap();
    assert!(status.success());
    dir
}

fn register_params(agent_id: &str, role: &str) -> RegisterParams {
    RegisterParams {
        agent_id: Some(agent_id.to_string()),
        role: Some(role.to_string()),
        module: Some("main".to_string()),
        ..Default::default()
    }
}

async fn daemon_with_agents(dir: &TempDir) -> Arc<Daemon> {
    let daemon = Daemon::open(dir.path()).unwrap();
    daemon
        .register_agent(register_params("alice", "implementer"))
        .await
        .unwrap();
    daemon
        .register_agent(register_params("bob", "reviewer"))
        .await
        .unwrap();
    daemon
}

#[tokio::test]
async fn test_scoped_message_reaches_inbox() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let receipt = daemon
        .message_send(
            "alice",
            SendParams {
                content: "hi".to_string(),
                format: None,
                scopes: vec![Scope::new("project", "thrum")],
                refs: vec![thrum_types::Ref::agent("bob")],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    let inbox = daemon
        .message_list(&MessageQuery {
            agent_id: Some("bob".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(inbox.len(), 1);
    let message = &inbox[0];
    assert_eq!(message.content, "hi");
    assert_eq!(message.scopes, vec![Scope::new("project", "thrum")]);
    assert_eq!(message.refs.len(), 1);
    assert_eq!(message.refs[0].ref_type, RefType::Agent);
    assert_eq!(message.refs[0].value, "bob");
    assert_eq!(message.thread_id, receipt.message_id);
    assert_eq!(receipt.thread_id, receipt.message_id);
}

#[tokio::test]
async fn test_reply_joins_thread() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let root = daemon
        .message_send(
            "alice",
            SendParams {
                content: "hi".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    let reply = daemon
        .message_send(
            "bob",
            SendParams {
                content: "hey".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: Some(root.message_id.clone()),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.thread_id, root.message_id);

    let thread = daemon
        .message_list(&MessageQuery {
            thread_id: Some(root.message_id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].content, "hi");
    assert_eq!(thread[1].content, "hey");
}

#[tokio::test]
async fn test_group_expansion_with_roles_and_cycles() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    daemon.group_create("alice", "reviewers", "").await.unwrap();
    daemon
        .group_add_member("alice", "reviewers", GroupMember::agent("alice"))
        .await
        .unwrap();
    daemon
        .group_add_member("alice", "reviewers", GroupMember::role("reviewer"))
        .await
        .unwrap();
    assert_eq!(daemon.group_expand("reviewers").unwrap(), vec!["alice", "bob"]);

    daemon.group_create("alice", "leads", "").await.unwrap();
    daemon
        .group_add_member("alice", "leads", GroupMember::group("reviewers"))
        .await
        .unwrap();
    daemon
        .group_add_member("alice", "leads", GroupMember::group("leads"))
        .await
        .unwrap();
    assert_eq!(daemon.group_expand("leads").unwrap(), vec!["alice", "bob"]);

    // Duplicate names are a conflict.
    let err = daemon.group_create("bob", "reviewers", "").await.unwrap_err();
    assert_eq!(err.code(), -32003);
}

#[tokio::test]
async fn test_group_message_fans_out_to_members() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    daemon.group_create("alice", "reviewers", "").await.unwrap();
    daemon
        .group_add_member("alice", "reviewers", GroupMember::role("reviewer"))
        .await
        .unwrap();

    daemon
        .message_send(
            "alice",
            SendParams {
                content: "@reviewers please look".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    let inbox = daemon
        .message_list(&MessageQuery {
            agent_id: Some("bob".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].audience, vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_session_lifecycle_and_team_list() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let session = daemon
        .session_start(
            "alice",
            SessionStartParams {
                intent: Some("wire the router".to_string()),
                detached: false,
            },
        )
        .await
        .unwrap();

    daemon.heartbeat("alice", &session.session_id).await.unwrap();

    let team = daemon.team_list().unwrap();
    let alice = team.iter().find(|m| m.agent.agent_id == "alice").unwrap();
    let open = alice.session.as_ref().expect("open session");
    assert_eq!(open.intent.as_deref(), Some("wire the router"));
    assert!(alice.work_context.is_some(), "heartbeat captured a work context");

    daemon
        .session_end("alice", Some(&session.session_id))
        .await
        .unwrap();
    let team = daemon.team_list().unwrap();
    let alice = team.iter().find(|m| m.agent.agent_id == "alice").unwrap();
    assert!(alice.session.is_none());

    // Heartbeating an ended session is a state error.
    let err = daemon.heartbeat("alice", &session.session_id).await.unwrap_err();
    assert_eq!(err.code(), -32004);
}

#[tokio::test]
async fn test_edit_delete_state_machine() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let receipt = daemon
        .message_send(
            "alice",
            SendParams {
                content: "draft".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    daemon
        .message_edit("alice", &receipt.message_id, MessageBody::text("v2"))
        .await
        .unwrap();
    assert_eq!(daemon.message_get(&receipt.message_id).unwrap().content, "v2");

    daemon.message_delete("alice", &receipt.message_id).await.unwrap();

    // Deleted is terminal: edits and re-deletes are state errors.
    let err = daemon
        .message_edit("alice", &receipt.message_id, MessageBody::text("v3"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32004);
    let err = daemon
        .message_delete("alice", &receipt.message_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32004);

    // Replying to a deleted message is rejected too.
    let err = daemon
        .message_send(
            "bob",
            SendParams {
                content: "too late".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: Some(receipt.message_id.clone()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32004);
}

#[tokio::test]
async fn test_wait_returns_mentioning_message() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let waiter = {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            daemon
                .wait(
                    "alice",
                    SubscriptionFilter {
                        filter_type: FilterType::Mention,
                        selector: Some("alice".to_string()),
                        include_self: false,
                    },
                    Duration::from_millis(500),
                    None,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    daemon
        .message_send(
            "bob",
            SendParams {
                content: "@alice ping".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    match waiter.await.unwrap().unwrap() {
        WaitOutcome::Match(event) => {
            assert_eq!(event["actor_id"], "bob");
            assert_eq!(event["kind"], "message.create");
        }
        WaitOutcome::TimedOut => panic!("expected a match"),
    }
}

#[tokio::test]
async fn test_wait_timeout_sentinel_is_punctual() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    let started = std::time::Instant::now();
    let outcome = daemon
        .wait(
            "alice",
            SubscriptionFilter {
                filter_type: FilterType::Mention,
                selector: Some("alice".to_string()),
                include_self: false,
            },
            Duration::from_millis(500),
            None,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(outcome, WaitOutcome::TimedOut));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_wait_since_replays_missed_match() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;

    daemon
        .message_send(
            "bob",
            SendParams {
                content: "@alice you were away".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();

    // since = beginning of time: the match is served from the log
    // without waiting.
    let outcome = daemon
        .wait(
            "alice",
            SubscriptionFilter {
                filter_type: FilterType::Mention,
                selector: None,
                include_self: false,
            },
            Duration::from_millis(50),
            Some(ulid::Ulid::nil()),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, WaitOutcome::Match(_)));
}

#[tokio::test]
async fn test_restart_recovers_from_partial_trailing_write() {
    let dir = git_repo();
    let events_path;
    {
        let daemon = daemon_with_agents(&dir).await;
        for i in 0..3 {
            daemon
                .message_send(
                    "alice",
                    SendParams {
                        content: format!("m{}", i),
                        format: None,
                        scopes: vec![],
                        refs: vec![],
                        reply_to: None,
                    },
                )
                .await
                .unwrap();
        }
        events_path = daemon
            .paths()
            .repo_root()
            .join(".git/thrum-sync/a-sync/messages/alice.jsonl");
        daemon.shutdown();
    }

    // Crash mid-append: bytes on disk, no terminating newline.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&events_path)
            .unwrap();
        file.write_all(br#"{"id":"01TRUNCATED"#).unwrap();
    }

    // Restart: the torn line is discarded, the projection rebuilds from
    // the log, and fresh appends get fresh ids.
    let daemon = Daemon::open(dir.path()).unwrap();
    let messages = daemon.message_list(&MessageQuery::default()).unwrap();
    assert_eq!(messages.len(), 3);

    let receipt = daemon
        .message_send(
            "alice",
            SendParams {
                content: "after the crash".to_string(),
                format: None,
                scopes: vec![],
                refs: vec![],
                reply_to: None,
            },
        )
        .await
        .unwrap();
    assert!(messages.iter().all(|m| m.message_id != receipt.message_id));
    assert_eq!(daemon.message_list(&MessageQuery::default()).unwrap().len(), 4);
}

#[tokio::test]
async fn test_health_reports_offline_without_peers() {
    let dir = git_repo();
    let daemon = daemon_with_agents(&dir).await;
    let health = daemon.health().unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.projection.agents, 2);
    assert_eq!(health.corrupt_lines, 0);
    assert_eq!(
        serde_json::to_value(health.sync_state).unwrap(),
        serde_json::json!("offline")
    );
}

#[tokio::test]
async fn test_context_notes_survive_daemon_restart() {
    let dir = git_repo();
    {
        let daemon = daemon_with_agents(&dir).await;
        daemon.context_save("alice", "# Next: finish the hub\n").unwrap();
    }
    let daemon = Daemon::open(dir.path()).unwrap();
    assert_eq!(
        daemon.context_get("alice").unwrap().unwrap(),
        "# Next: finish the hub\n"
    );
}
