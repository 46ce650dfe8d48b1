use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use cascadia_core::{
    AssociationOptions, Attribute, Error, ReferentialAction, Row, StoreErrorKind, Value,
    validate_model_json,
};
use cascadia_engine::{
    CompletionState, Criteria, Session, SessionConfig, Strategy, StrategyChoice, SyncOptions,
};
use cascadia_store::{MemoryOptions, MemoryStore, Store};

fn session_on(store: MemoryStore, config: SessionConfig) -> Result<Session> {
    let store: Arc<dyn Store> = Arc::new(store);
    Ok(Session::new(store, config)?)
}

fn cascade() -> AssociationOptions {
    AssociationOptions::default().on_delete(ReferentialAction::Cascade)
}

fn store_kind(err: &Error) -> Option<StoreErrorKind> {
    match err {
        Error::Store(err) => Some(err.kind),
        _ => None,
    }
}

/// User -> Project -> Task, with the given action on the lower edge.
async fn three_levels(store: MemoryStore, lower: AssociationOptions) -> Result<Session> {
    let session = session_on(store, SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    let project = session.define("Project", vec![Attribute::string("name")])?;
    let task = session.define("Task", vec![Attribute::string("title")])?;
    user.has_many(&project, cascade())?;
    project.has_many(&task, lower)?;
    session.sync_all(SyncOptions::force()).await?;

    let owner = user.create([("username", "foo")]).await?;
    for name in ["alpha", "beta"] {
        let created = project
            .create([("name", Value::from(name)), ("UserId", Value::from(owner.id()))])
            .await?;
        task.create([
            ("title", Value::from(format!("{name}-task"))),
            ("ProjectId", Value::from(created.id())),
        ])
        .await?;
    }
    Ok(session)
}

async fn totals(session: &Session) -> Result<Vec<u64>> {
    let mut counts = Vec::new();
    for name in ["User", "Project", "Task"] {
        counts.push(session.model(name)?.count(Criteria::new()).await?);
    }
    Ok(counts)
}

#[tokio::test]
async fn cascade_runs_through_every_level() -> Result<()> {
    for store in [MemoryStore::native(), MemoryStore::emulated()] {
        let session = three_levels(store, cascade()).await?;
        assert_eq!(totals(&session).await?, vec![1, 2, 2]);

        let owner = session.model("User")?.all().await?.remove(0);
        owner.destroy().await?;
        assert_eq!(totals(&session).await?, vec![0, 0, 0], "{:?}", session.strategy());
    }
    Ok(())
}

#[tokio::test]
async fn restrict_deep_in_cascade_aborts_whole_delete() -> Result<()> {
    for store in [MemoryStore::native(), MemoryStore::emulated()] {
        let restrict = AssociationOptions::default().on_delete(ReferentialAction::Restrict);
        let session = three_levels(store, restrict).await?;

        let owner = session.model("User")?.all().await?.remove(0);
        let err = owner.destroy().await.unwrap_err();
        assert!(err.is_constraint_violation(), "{err}");
        assert_eq!(totals(&session).await?, vec![1, 2, 2], "{:?}", session.strategy());
    }
    Ok(())
}

#[tokio::test]
async fn restrict_is_satisfied_when_dependents_are_deleted_too() -> Result<()> {
    let session = session_on(MemoryStore::emulated(), SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    let task = session.define("Task", vec![Attribute::string("title")])?;
    let note = session.define("Note", vec![Attribute::string("body")])?;
    user.has_many(&task, cascade())?;
    user.has_many(&note, cascade())?;
    // Notes may not lose their task, but they go away with the user anyway.
    task.has_many(
        &note,
        AssociationOptions::default().on_delete(ReferentialAction::Restrict),
    )?;
    session.sync_all(SyncOptions::default()).await?;

    let owner = user.create([("username", "foo")]).await?;
    let todo = task
        .create([("title", Value::from("t")), ("UserId", Value::from(owner.id()))])
        .await?;
    note.create([
        ("body", Value::from("n")),
        ("UserId", Value::from(owner.id())),
        ("TaskId", Value::from(todo.id())),
    ])
    .await?;

    owner.destroy().await?;
    assert_eq!(note.count(Criteria::new()).await?, 0);
    assert_eq!(task.count(Criteria::new()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn emulated_cascade_depth_is_bounded() -> Result<()> {
    let config = SessionConfig::default().with_max_cascade_depth(2);
    let session = session_on(MemoryStore::emulated(), config)?;
    let node = session.define("Node", vec![Attribute::string("label")])?;
    node.has_many(&node, cascade().foreign_key("ParentId"))?;
    node.sync(SyncOptions::default()).await?;

    let root = node.create([("label", "root")]).await?;
    let mut parent = root.id();
    for label in ["a", "b", "c"] {
        let child = node
            .create([("label", Value::from(label)), ("ParentId", Value::from(parent))])
            .await?;
        parent = child.id();
    }

    let err = root.destroy().await.unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "{err}");
    assert_eq!(node.count(Criteria::new()).await?, 4);

    let shallow = node.find_all(Criteria::new().eq("label", "b")).await?.remove(0);
    shallow.destroy().await?;
    assert_eq!(node.count(Criteria::new()).await?, 2);
    Ok(())
}

#[tokio::test]
async fn deferred_constraints_break_cycles() -> Result<()> {
    let session = session_on(MemoryStore::native(), SessionConfig::default())?;
    let team = session.define("Team", vec![Attribute::string("name")])?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    team.has_many(&user, cascade())?;
    user.has_one(&team, cascade().foreign_key("OwnerId"))?;

    let reports = session.sync_all(SyncOptions::default()).await?;
    assert_eq!(reports[0].table, "Team");
    assert_eq!(reports[0].deferred_constraints, vec!["Team_OwnerId_fkey".to_string()]);
    assert_eq!(reports[1].attached_constraints, vec!["Team_OwnerId_fkey".to_string()]);

    let described = session.store().describe("Team").await?;
    assert_eq!(described.map(|table| table.foreign_keys.len()), Some(1));
    Ok(())
}

#[tokio::test]
async fn cycle_without_deferral_is_a_schema_error() -> Result<()> {
    let store = MemoryStore::new(MemoryOptions::native().without_deferred_constraints());
    let session = session_on(store, SessionConfig::default())?;
    let team = session.define("Team", vec![Attribute::string("name")])?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    team.has_many(&user, cascade())?;
    user.has_one(&team, cascade().foreign_key("OwnerId"))?;

    let err = session.sync_all(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn observers_fire_once_per_outcome() -> Result<()> {
    let session = session_on(MemoryStore::native(), SessionConfig::default())?;
    let user = session.define(
        "User",
        vec![Attribute::string("username").not_null()],
    )?;
    user.sync(SyncOptions::default()).await?;

    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    let created = user.create([("username", "foo")]);
    let seen = Arc::clone(&successes);
    created.on_success(move |record| {
        assert_eq!(record.get("username"), Some(&Value::from("foo")));
        seen.fetch_add(1, Ordering::SeqCst);
    });
    created.wait().await?;
    assert_eq!(created.state(), CompletionState::Succeeded);

    let rejected = user.create(Vec::<(String, Value)>::new());
    let seen = Arc::clone(&failures);
    rejected.on_error(move |err| {
        assert!(err.is_validation());
        seen.fetch_add(1, Ordering::SeqCst);
    });
    assert!(rejected.wait().await.is_err());
    assert_eq!(rejected.state(), CompletionState::Failed);

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn set_associated_replaces_dependents() -> Result<()> {
    for store in [MemoryStore::native(), MemoryStore::emulated()] {
        let session = session_on(store, SessionConfig::default())?;
        let user = session.define("User", vec![Attribute::string("username")])?;
        let task = session.define("Task", vec![Attribute::string("title")])?;
        let owns = user.has_many(&task, cascade())?;
        session.sync_all(SyncOptions::default()).await?;

        let owner = user.create([("username", "foo")]).await?;
        let first = task.create([("title", "one")]).await?;
        let second = task.create([("title", "two")]).await?;

        session
            .set_associated(&owns, &owner, &[first.clone(), second.clone()])
            .await?;
        assert_eq!(session.get_associated(&owns, &owner).await?.len(), 2);

        owner.set_associated("Task", &[second.clone()]).await?;
        let current = owner.get_associated("Task").await?;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id(), second.id());

        let released = task.find_by_id(first.id().unwrap()).await?.unwrap();
        assert_eq!(released.get("UserId"), Some(&Value::Null));

        let err = owner.set_associated("Task", &[owner.clone()]).await.unwrap_err();
        assert!(err.is_validation());
    }
    Ok(())
}

#[tokio::test]
async fn has_one_accepts_a_single_dependent() -> Result<()> {
    let session = session_on(MemoryStore::emulated(), SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    let profile = session.define("Profile", vec![Attribute::text("bio")])?;
    user.has_one(&profile, cascade())?;
    session.sync_all(SyncOptions::default()).await?;

    let owner = user.create([("username", "foo")]).await?;
    let first = profile.create([("bio", "a")]).await?;
    let second = profile.create([("bio", "b")]).await?;

    let err = owner
        .set_associated("Profile", &[first.clone(), second])
        .await
        .unwrap_err();
    assert!(err.is_validation());

    owner.set_associated("Profile", &[first]).await?;
    owner.destroy().await?;
    assert_eq!(profile.count(Criteria::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn missing_rows_on_update_and_destroy() -> Result<()> {
    let session = session_on(MemoryStore::native(), SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    user.sync(SyncOptions::default()).await?;

    let record = user.create([("username", "foo")]).await?;
    record.destroy().await?;
    // Deleting again is not an error.
    record.destroy().await?;

    let mut changes = Row::new();
    changes.insert("username".to_string(), Value::from("bar"));
    let err = record.update(changes).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { ref entity, .. } if entity == "User"));
    Ok(())
}

#[tokio::test]
async fn session_from_definition_document() -> Result<()> {
    let document = serde_json::json!({
        "model_version": "0.1",
        "entities": [
            { "name": "User", "attributes": [{ "name": "username", "type": "string" }] },
            { "name": "Task", "attributes": [{ "name": "title", "type": "string", "allow_null": false }] }
        ],
        "associations": [
            { "source": "User", "target": "Task", "on_delete": "cascade" }
        ]
    });
    let definition = validate_model_json(&document)?;
    let store: Arc<dyn Store> = Arc::new(MemoryStore::emulated());
    let session = Session::from_definition(store, SessionConfig::default(), &definition)?;
    assert_eq!(session.strategy(), Strategy::Emulated);

    let statements = session.plan_schema()?;
    assert_eq!(statements.len(), 2);

    session.sync_all(SyncOptions::default()).await?;
    let user = session.model("User")?;
    let task = session.model("Task")?;
    let owner = user.create([("username", "foo")]).await?;
    task.create([("title", Value::from("t")), ("UserId", Value::from(owner.id()))])
        .await?;
    owner.destroy().await?;
    assert_eq!(task.count(Criteria::new()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn native_choice_needs_native_store() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::emulated());
    let config = SessionConfig::default().with_strategy(StrategyChoice::Native);
    let err = Session::new(store, config).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn emulation_without_transactions_still_enforces_actions() -> Result<()> {
    let store = MemoryStore::new(MemoryOptions::emulated().without_transactions());
    let session = session_on(store, SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    let task = session.define("Task", vec![Attribute::string("title")])?;
    user.has_many(
        &task,
        AssociationOptions::default().on_delete(ReferentialAction::Restrict),
    )?;
    session.sync_all(SyncOptions::default()).await?;

    let owner = user.create([("username", "foo")]).await?;
    task.create([("title", Value::from("t")), ("UserId", Value::from(owner.id()))])
        .await?;
    assert!(owner.destroy().await.unwrap_err().is_constraint_violation());
    assert_eq!(user.count(Criteria::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn teardown_closes_session() -> Result<()> {
    let session = session_on(MemoryStore::native(), SessionConfig::default())?;
    let user = session.define("User", vec![Attribute::string("username")])?;
    user.sync(SyncOptions::default()).await?;
    let record = user.create([("username", "foo")]).await?;
    let store = Arc::clone(session.store());

    session.teardown().await?;

    assert!(store.describe("User").await?.is_none());
    let err = record.destroy().await.unwrap_err();
    assert_eq!(store_kind(&err), Some(StoreErrorKind::Closed));
    let err = user.count(Criteria::new()).await.unwrap_err();
    assert_eq!(store_kind(&err), Some(StoreErrorKind::Closed));
    assert!(user.session().is_closed());
    Ok(())
}
