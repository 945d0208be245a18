//! Pooled databases over SQLite files and in-memory databases.

use sqlrecord::prelude::*;
use sqlrecord::{IsolationLevel, PoolStat, QueryCounter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const DDL: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        lock_version INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS comments (id INTEGER PRIMARY KEY, body TEXT, post_id INTEGER);
";

fn models() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("Post", "posts")
            .column(ColumnDef::new("title", SqlType::Text).not_null())
            .locking()
            .association(
                Reflection::has_many("comments", "Comment", "post_id")
                    .dependent(Dependent::Destroy),
            ),
        ModelSchema::new("Comment", "comments")
            .column(ColumnDef::new("body", SqlType::Text))
            .column(ColumnDef::new("post_id", SqlType::BigInt))
            .association(Reflection::belongs_to("post", "Post")),
    ]
}

fn memory_db(pool: usize) -> Database {
    let config = DatabaseConfig::default()
        .with_pool(pool)
        .with_checkout_timeout(0.2)
        .with_reaping_frequency(None);
    Database::builder(config)
        .models(models())
        .on_connect(|conn| conn.execute_batch(DDL))
        .build()
        .unwrap()
}

fn file_db(dir: &tempfile::TempDir, pool: usize) -> Database {
    let path = dir.path().join("blog.sqlite3");
    let url = format!("sqlite://{}?pool={pool}&checkout_timeout=2", path.display());
    let db = Database::open(&url, models()).unwrap();
    db.execute_batch(DDL).unwrap();
    db
}

fn create_post(conn: &mut ConnectionHandle, title: &str) -> Record {
    let schema = conn.model("Post").unwrap();
    Record::create(conn, &schema, [("title", Value::from(title))]).unwrap()
}

fn count_posts(db: &Database) -> i64 {
    db.with_connection(|conn| {
        let relation = conn.all("Post")?;
        conn.count(&relation)
    })
    .unwrap()
}

#[test]
fn connections_open_lazily() {
    let db = memory_db(3);
    let PoolStat { connections, .. } = db.stat();
    assert_eq!(connections, 0);

    db.with_connection(|conn| {
        create_post(conn, "first");
        Ok(())
    })
    .unwrap();
    assert_eq!(db.stat().connections, 1);
    assert_eq!(db.stat().idle, 1);
    assert_eq!(count_posts(&db), 1);
}

#[test]
fn transaction_runs_on_a_pooled_connection() {
    let db = memory_db(1);
    let committed = db
        .transaction(TransactionOptions::default(), |conn| {
            let post = create_post(conn, "in a transaction");
            post.create_associated(conn, "comments", [("body", Value::from("hi"))])?;
            Ok(post.id())
        })
        .unwrap();
    assert!(committed.is_some());

    let rolled_back: Option<()> = db
        .transaction(TransactionOptions::default(), |conn| {
            create_post(conn, "discarded");
            Err(Error::Rollback)
        })
        .unwrap();
    assert!(rolled_back.is_none());
    assert_eq!(count_posts(&db), 1);
}

#[test]
fn abandoned_transactions_are_rolled_back_on_checkout() {
    let db = memory_db(1);
    {
        let mut conn = db.checkout().unwrap();
        conn.begin_transaction(&TransactionOptions::default()).unwrap();
        create_post(&mut conn, "never committed");
        assert!(conn.transaction_open());
    }

    let mut conn = db.checkout().unwrap();
    assert!(!conn.transaction_open());
    let relation = conn.all("Post").unwrap();
    assert_eq!(conn.count(&relation).unwrap(), 0);
}

#[test]
fn checkout_times_out_when_the_pool_is_exhausted() {
    let db = memory_db(1);
    let held = db.checkout().unwrap();

    let err = db.checkout().unwrap_err();
    assert!(matches!(err, Error::Pool(_)));
    assert!(err.is_retryable());

    drop(held);
    assert!(db.checkout().is_ok());
}

#[test]
fn file_database_is_shared_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir, 4);

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let db = db.clone();
            thread::spawn(move || {
                // BEGIN IMMEDIATE on SQLite, so writers queue on the busy timeout.
                let options = TransactionOptions::new().isolation(IsolationLevel::Serializable);
                db.transaction(options, |conn| {
                    for j in 0..5 {
                        create_post(conn, &format!("thread {i} post {j}"));
                    }
                    Ok(())
                })
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(count_posts(&db), 20);
    assert!(db.stat().connections <= 4);
}

#[test]
fn optimistic_locking_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir, 2);
    let id = db
        .with_connection(|conn| Ok(create_post(conn, "shared").id()))
        .unwrap();

    let mut first = db.checkout().unwrap();
    let mut second = db.checkout().unwrap();
    let relation = first.all("Post").unwrap();
    let a = first.find(&relation, id.clone()).unwrap();
    let b = second.find(&relation, id).unwrap();

    a.set("title", "first writer").unwrap();
    a.save(&mut first).unwrap();
    b.set("title", "second writer").unwrap();
    let err = b.save(&mut second).unwrap_err();
    assert!(err.is_stale_object());
}

#[test]
fn thread_lease_returns_the_same_connection() {
    let db = memory_db(2);
    let a = db.connection().unwrap();
    let b = db.connection().unwrap();
    assert!(a.same_lease(&b));
    assert_eq!(db.stat().busy, 1);

    create_post(&mut a.lock(), "leased");
    // with_connection uses the lease, so the same in-memory database.
    assert_eq!(count_posts(&db), 1);

    drop((a, b));
    assert!(db.release_connection());
    assert_eq!(db.stat().busy, 0);
}

#[test]
fn leases_of_exited_threads_are_reaped() {
    let db = memory_db(1);
    let worker = db.clone();
    thread::spawn(move || {
        let _lease = worker.connection().unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(db.stat().dead, 1);
    assert_eq!(db.reap(), 1);
    assert_eq!(db.stat().busy, 0);
    assert!(db.checkout().is_ok());
}

#[test]
fn subscribers_see_every_connection() {
    let statements = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&statements);
    let counter = QueryCounter::new();
    let events = counter.subscriber();
    let db = Database::builder(DatabaseConfig::default().with_pool(2))
        .models(models())
        .on_connect(|conn| conn.execute_batch(DDL))
        .subscribe(move |event| {
            if event.name.ends_with("Create") {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .subscribe(move |event| events(event))
        .build()
        .unwrap();

    let mut one = db.checkout().unwrap();
    let mut two = db.checkout().unwrap();
    create_post(&mut one, "one");
    create_post(&mut two, "two");

    assert_eq!(statements.load(Ordering::SeqCst), 2);
    assert_eq!(counter.statements_named("Post Create").len(), 2);
}

#[test]
fn config_settings_reach_the_handles() {
    let config = DatabaseConfig::default()
        .with_query_cache(false)
        .with_dynamic_includes(false);
    let db = Database::builder(config)
        .models(models())
        .on_connect(|conn| conn.execute_batch(DDL))
        .build()
        .unwrap();

    db.with_connection(|conn| {
        assert!(!conn.query_cache_enabled());
        assert!(!conn.dynamic_includes());
        Ok(())
    })
    .unwrap();
}

#[test]
fn invalid_models_are_rejected_at_build() {
    let broken = ModelSchema::new("Post", "posts")
        .association(Reflection::belongs_to("author", "Author"));
    let result = Database::builder(DatabaseConfig::default()).model(broken).build();
    assert!(result.is_err());
}

#[test]
fn disconnect_closes_the_pool() {
    let db = memory_db(1);
    db.with_connection(|_| Ok(())).unwrap();
    db.disconnect();
    assert!(db.pool().is_closed());
    assert!(matches!(db.checkout(), Err(Error::Pool(_))));
}

#[test]
fn reaper_runs_in_the_background() {
    let config = DatabaseConfig::default()
        .with_pool(1)
        .with_reaping_frequency(Some(0.05));
    let db = Database::builder(config).models(models()).build().unwrap();
    let worker = db.clone();
    thread::spawn(move || {
        let _lease = worker.connection().unwrap();
    })
    .join()
    .unwrap();

    let mut reclaimed = false;
    for _ in 0..40 {
        if db.stat().busy == 0 {
            reclaimed = true;
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    assert!(reclaimed);
}
