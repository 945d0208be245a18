//! Shared blog schema for session integration tests.
#![allow(dead_code)]

use sqlrecord_core::{ColumnDef, Dependent, Reflection, SqlType, Value};
use sqlrecord_session::{ConnectionHandle, HandleConfig, ModelSchema, QueryCounter, Record, Registry};
use sqlrecord_sqlite::SqliteConnection;
use std::sync::Arc;

pub const DDL: &str = "
    CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT,
        author_id INTEGER,
        views INTEGER DEFAULT 0,
        published BOOLEAN DEFAULT 0,
        created_at INTEGER,
        updated_at INTEGER,
        lock_version INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT, post_id INTEGER, author_id INTEGER);
    CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE posts_tags (post_id INTEGER, tag_id INTEGER);
    CREATE TABLE likes (id INTEGER PRIMARY KEY, post_id INTEGER);
";

pub fn author_schema() -> ModelSchema {
    ModelSchema::new("Author", "authors")
        .column(ColumnDef::new("name", SqlType::Text))
        .association(Reflection::has_many("posts", "Post", "author_id").dependent(Dependent::Restrict))
        .association(
            Reflection::has_many("comments", "Comment", "author_id").dependent(Dependent::Nullify),
        )
}

pub fn post_schema() -> ModelSchema {
    ModelSchema::new("Post", "posts")
        .column(ColumnDef::new("title", SqlType::Text).not_null())
        .column(ColumnDef::new("body", SqlType::Text))
        .column(ColumnDef::new("author_id", SqlType::BigInt))
        .column(ColumnDef::new("views", SqlType::Integer).default_value(0_i64))
        .column(ColumnDef::new("published", SqlType::Boolean).default_value(false))
        .column(ColumnDef::new("created_at", SqlType::Timestamp))
        .column(ColumnDef::new("updated_at", SqlType::Timestamp))
        .locking()
        .validates_presence_of("title")
        .association(Reflection::belongs_to("author", "Author"))
        .association(
            Reflection::has_many("comments", "Comment", "post_id")
                .dependent(Dependent::Destroy)
                .inverse_of("post"),
        )
        .association(Reflection::has_and_belongs_to_many(
            "tags",
            "Tag",
            "posts_tags",
            "post_id",
            "tag_id",
        ))
        .association(Reflection::has_many("likes", "Like", "post_id").dependent(Dependent::DeleteAll))
}

pub fn comment_schema() -> ModelSchema {
    ModelSchema::new("Comment", "comments")
        .column(ColumnDef::new("body", SqlType::Text))
        .column(ColumnDef::new("post_id", SqlType::BigInt))
        .column(ColumnDef::new("author_id", SqlType::BigInt))
        .association(Reflection::belongs_to("post", "Post"))
        .association(Reflection::belongs_to("author", "Author"))
}

pub fn tag_schema() -> ModelSchema {
    ModelSchema::new("Tag", "tags").column(ColumnDef::new("name", SqlType::Text))
}

pub fn like_schema() -> ModelSchema {
    ModelSchema::new("Like", "likes").column(ColumnDef::new("post_id", SqlType::BigInt))
}

/// The blog registry with `post` in place of the default post schema.
pub fn registry_with(post: ModelSchema) -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register(author_schema());
    registry.register(post);
    registry.register(comment_schema());
    registry.register(tag_schema());
    registry.register(like_schema());
    registry.validate().unwrap();
    Arc::new(registry)
}

pub fn registry() -> Arc<Registry> {
    registry_with(post_schema())
}

pub fn open_with(registry: Arc<Registry>, config: HandleConfig) -> ConnectionHandle {
    let conn = SqliteConnection::open_memory().unwrap();
    let mut handle = ConnectionHandle::new(conn, registry, config);
    handle.execute_batch(DDL).unwrap();
    handle
}

pub fn open() -> ConnectionHandle {
    open_with(registry(), HandleConfig::new())
}

pub fn counter(conn: &mut ConnectionHandle) -> QueryCounter {
    let counter = QueryCounter::new();
    conn.subscribe_counter(&counter);
    counter
}

pub fn create(conn: &mut ConnectionHandle, model: &str, attrs: Vec<(&str, Value)>) -> Record {
    let schema = conn.model(model).unwrap();
    Record::create(conn, &schema, attrs).unwrap()
}

/// `authors` authors, each with `posts_each` posts carrying two comments
/// (by the first author) and one tag.
pub fn seed(conn: &mut ConnectionHandle, authors: usize, posts_each: usize) {
    let tag = create(conn, "Tag", vec![("name", "rust".into())]);
    let mut first_author = None;
    for a in 0..authors {
        let author = create(conn, "Author", vec![("name", format!("author {a}").into())]);
        let commenter = first_author.get_or_insert_with(|| author.id()).clone();
        for p in 0..posts_each {
            let post = create(
                conn,
                "Post",
                vec![
                    ("title", format!("post {a}-{p}").into()),
                    ("author_id", author.id()),
                ],
            );
            for c in 0..2 {
                create(
                    conn,
                    "Comment",
                    vec![
                        ("body", format!("comment {c}").into()),
                        ("post_id", post.id()),
                        ("author_id", commenter.clone()),
                    ],
                );
            }
            post.push_associated(conn, "tags", &tag).unwrap();
        }
    }
}

pub fn count_rows(conn: &mut ConnectionHandle, model: &str) -> i64 {
    let relation = conn.all(model).unwrap();
    conn.count(&relation).unwrap()
}
