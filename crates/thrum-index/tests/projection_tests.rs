use serde_json::json;
use thrum_index::queries;
use thrum_index::{Database, MessageQuery};
use thrum_types::event::{
    GroupCreatePayload, GroupMemberPayload, MessageCreatePayload, MessageReadPayload,
    SessionStartPayload,
};
use thrum_types::{
    AgentKind, Event, EventIdGen, EventKind, GroupMember, MessageBody, Ref, Scope,
};
use ulid::Ulid;

struct World {
    ids: EventIdGen,
}

impl World {
    fn new() -> Self {
        Self {
            ids: EventIdGen::new(),
        }
    }

    fn register(&self, agent: &str, role: &str) -> Event {
        Event::new(
            self.ids.next(),
            EventKind::AgentRegister,
            agent,
            json!({
                "agent_id": agent,
                "kind": AgentKind::Agent,
                "role": role,
                "module": "main",
            }),
        )
    }

    fn session_start(&self, agent: &str, session: &str) -> Event {
        Event::new(
            self.ids.next(),
            EventKind::SessionStart,
            agent,
            serde_json::to_value(SessionStartPayload {
                session_id: session.to_string(),
                intent: None,
                detached: false,
            })
            .unwrap(),
        )
    }

    fn message(&self, author: &str, content: &str, audience: &[&str]) -> Event {
        let id = self.ids.next();
        Event::new(
            id,
            EventKind::MessageCreate,
            author,
            serde_json::to_value(MessageCreatePayload {
                body: MessageBody::text(content),
                scopes: vec![Scope::new("project", "thrum")],
                refs: audience.iter().map(|a| Ref::agent(*a)).collect(),
                reply_to: None,
                thread_id: id,
                audience: audience.iter().map(|a| a.to_string()).collect(),
            })
            .unwrap(),
        )
    }

    fn reply(&self, author: &str, content: &str, parent: &Event, thread: Ulid) -> Event {
        let id = self.ids.next();
        Event::new(
            id,
            EventKind::MessageCreate,
            author,
            serde_json::to_value(MessageCreatePayload {
                body: MessageBody::text(content),
                scopes: vec![],
                refs: vec![],
                reply_to: Some(parent.id),
                thread_id: thread,
                audience: vec![],
            })
            .unwrap(),
        )
    }
}

#[test]
fn test_apply_is_idempotent_on_event_id() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    let event = world.message("alice", "hi", &["bob"]);
    assert!(db.apply_event(&event).unwrap());
    assert!(!db.apply_event(&event).unwrap());

    let stats = queries::stats(&db).unwrap();
    assert_eq!(stats.applied_events, 1);
    assert_eq!(stats.messages, 1);
}

#[test]
fn test_session_start_closes_prior_open_session() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    db.apply_event(&world.register("alice", "implementer")).unwrap();
    db.apply_event(&world.session_start("alice", "s1")).unwrap();
    db.apply_event(&world.session_start("alice", "s2")).unwrap();

    let open = queries::team::open_session(&db, "alice").unwrap().unwrap();
    assert_eq!(open.session_id, "s2");

    let prior = queries::team::session_get(&db, "s1").unwrap().unwrap();
    assert!(prior.ended_at.is_some());

    let stats = queries::stats(&db).unwrap();
    assert_eq!(stats.open_sessions, 1);
}

#[test]
fn test_reply_threading_in_order() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    let root = world.message("alice", "hi", &["bob"]);
    let reply = world.reply("bob", "hey", &root, root.id);
    db.apply_event(&root).unwrap();
    db.apply_event(&reply).unwrap();

    let thread = queries::message::list(
        &db,
        &MessageQuery {
            thread_id: Some(root.id.to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].content, "hi");
    assert_eq!(thread[1].content, "hey");
    assert!(!thread[1].reply_missing);
}

#[test]
fn test_out_of_order_reply_promoted_when_parent_arrives() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    let root = world.message("alice", "root", &[]);
    let child = world.reply("bob", "child", &root, root.id);
    let grandchild = world.reply("carol", "grandchild", &child, child.id);

    // Sync can deliver a subtree before its root: grandchild and child
    // arrive first, each believing its own best-known root.
    db.apply_event(&grandchild).unwrap();
    db.apply_event(&child).unwrap();

    let flagged = queries::message::get(&db, &child.id.to_string())
        .unwrap()
        .unwrap();
    assert!(flagged.reply_missing);

    db.apply_event(&root).unwrap();

    let promoted = queries::message::get(&db, &child.id.to_string())
        .unwrap()
        .unwrap();
    assert!(!promoted.reply_missing);
    assert_eq!(promoted.thread_id, root.id.to_string());

    // The whole subtree lands on the deepest root.
    let deep = queries::message::get(&db, &grandchild.id.to_string())
        .unwrap()
        .unwrap();
    assert_eq!(deep.thread_id, root.id.to_string());
}

#[test]
fn test_replay_matches_incremental_state() {
    let world = World::new();
    let mut events = vec![
        world.register("alice", "implementer"),
        world.register("bob", "reviewer"),
        world.session_start("alice", "s1"),
    ];
    let root = world.message("alice", "hi", &["bob"]);
    events.push(root.clone());
    events.push(world.reply("bob", "hey", &root, root.id));

    // Incremental: one apply per event. Rebuild: one batch over the same
    // stream. The derived state must be identical.
    let mut incremental = Database::open_in_memory().unwrap();
    for event in &events {
        incremental.apply_event(event).unwrap();
    }
    let mut rebuilt = Database::open_in_memory().unwrap();
    let applied = rebuilt.apply_batch(&events).unwrap();
    assert_eq!(applied.len(), events.len());

    let dump = |db: &Database| {
        let messages = queries::message::list(db, &MessageQuery::default()).unwrap();
        let team = queries::team::team_list(db).unwrap();
        (
            serde_json::to_string(&messages).unwrap(),
            serde_json::to_string(&team).unwrap(),
        )
    };
    assert_eq!(dump(&incremental), dump(&rebuilt));
}

#[test]
fn test_unknown_kind_recorded_but_inert() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    let foreign = Event::new(
        world.ids.next(),
        EventKind::Unknown("message.react".to_string()),
        "future-peer",
        json!({"emoji": "+1"}),
    );
    assert!(db.apply_event(&foreign).unwrap());
    assert!(!db.apply_event(&foreign).unwrap());

    let stats = queries::stats(&db).unwrap();
    assert_eq!(stats.applied_events, 1);
    assert_eq!(stats.messages, 0);
}

#[test]
fn test_group_members_accumulate_across_same_name_creates() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    for (group_id, member) in [("g1", "alice"), ("g2", "bob")] {
        db.apply_event(&Event::new(
            world.ids.next(),
            EventKind::GroupCreate,
            member,
            serde_json::to_value(GroupCreatePayload {
                group_id: group_id.to_string(),
                name: "reviewers".to_string(),
                description: String::new(),
            })
            .unwrap(),
        ))
        .unwrap();
        db.apply_event(&Event::new(
            world.ids.next(),
            EventKind::GroupAddMember,
            member,
            serde_json::to_value(GroupMemberPayload {
                group_id: group_id.to_string(),
                name: "reviewers".to_string(),
                member: GroupMember::agent(member),
            })
            .unwrap(),
        ))
        .unwrap();
    }

    let ids = queries::group::group_ids_by_name(&db, "reviewers").unwrap();
    assert_eq!(ids, vec!["g1".to_string(), "g2".to_string()]);

    let members = queries::group::members_by_name(&db, "reviewers").unwrap();
    let values: Vec<&str> = members.iter().map(|m| m.member_value.as_str()).collect();
    assert_eq!(values, vec!["alice", "bob"]);
}

#[test]
fn test_unread_counts_follow_reads() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    db.apply_event(&world.register("alice", "implementer")).unwrap();
    db.apply_event(&world.register("bob", "reviewer")).unwrap();

    let first = world.message("alice", "one", &["bob"]);
    let second = world.message("alice", "two", &["bob"]);
    db.apply_event(&first).unwrap();
    db.apply_event(&second).unwrap();

    let unread_for = |db: &Database, agent: &str| {
        queries::team::team_list(db)
            .unwrap()
            .into_iter()
            .find(|m| m.agent.agent_id == agent)
            .unwrap()
            .unread_count
    };
    assert_eq!(unread_for(&db, "bob"), 2);
    assert_eq!(unread_for(&db, "alice"), 0);

    db.apply_event(&Event::new(
        world.ids.next(),
        EventKind::MessageRead,
        "bob",
        serde_json::to_value(MessageReadPayload { message_id: first.id }).unwrap(),
    ))
    .unwrap();
    assert_eq!(unread_for(&db, "bob"), 1);
}

#[test]
fn test_message_list_filters() {
    let mut db = Database::open_in_memory().unwrap();
    let world = World::new();

    let to_bob = world.message("alice", "for bob", &["bob"]);
    let to_carol = world.message("alice", "for carol", &["carol"]);
    let from_bob = world.message("bob", "from bob", &["alice"]);
    for event in [&to_bob, &to_carol, &from_bob] {
        db.apply_event(event).unwrap();
    }

    let inbox = queries::message::list(
        &db,
        &MessageQuery {
            agent_id: Some("bob".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, "for bob");

    let authored = queries::message::list(
        &db,
        &MessageQuery {
            author: Some("bob".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(authored.len(), 1);
    assert_eq!(authored[0].content, "from bob");

    let scoped = queries::message::list(
        &db,
        &MessageQuery {
            scope: Some(Scope::new("project", "thrum")),
            limit: Some(2),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(scoped.len(), 2);
}
