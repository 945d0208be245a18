//! Association readers and writers.

mod common;

use common::{count_rows, counter, create, open, seed};
use sqlrecord_core::{Error, Value};
use sqlrecord_session::Record;

#[test]
fn belongs_to_is_cached_after_first_read() {
    let mut conn = open();
    let author = create(&mut conn, "Author", vec![("name", "ann".into())]);
    let post = create(
        &mut conn,
        "Post",
        vec![("title", "t".into()), ("author_id", author.id())],
    );
    let counter = counter(&mut conn);

    let loaded = post.association(&mut conn, "author").unwrap().one().unwrap();
    assert_eq!(loaded.id(), author.id());
    post.association(&mut conn, "author").unwrap();
    assert_eq!(counter.count(), 1);
}

#[test]
fn missing_foreign_key_reads_as_none() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "orphan".into())]);
    let counter = counter(&mut conn);
    assert!(post.association(&mut conn, "author").unwrap().one().is_none());
    assert_eq!(counter.count(), 0);
}

#[test]
fn unknown_association_is_an_error() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "t".into())]);
    let err = post.association(&mut conn, "editor").unwrap_err();
    assert!(matches!(err, Error::AssociationNotFound { .. }));
}

#[test]
fn assigning_an_unsaved_parent_saves_it_first() {
    let mut conn = open();
    let author_schema = conn.model("Author").unwrap();
    let post_schema = conn.model("Post").unwrap();
    let author = Record::build(&author_schema, [("name", Value::from("new"))]).unwrap();
    let post = Record::build(&post_schema, [("title", Value::from("t"))]).unwrap();

    post.assign_belongs_to("author", Some(&author)).unwrap();
    post.save(&mut conn).unwrap();

    assert!(author.persisted());
    assert_eq!(post.get("author_id").unwrap(), author.id());
    let read = post.association(&mut conn, "author").unwrap().one().unwrap();
    assert!(read.ptr_eq(&author));

    post.assign_belongs_to("author", None).unwrap();
    assert_eq!(post.get("author_id").unwrap(), Value::Null);
    assert!(post.association(&mut conn, "author").unwrap().one().is_none());
}

#[test]
fn children_built_on_a_new_owner_save_with_it() {
    let mut conn = open();
    let post_schema = conn.model("Post").unwrap();
    let post = Record::build(&post_schema, [("title", Value::from("parent"))]).unwrap();
    let comment = post
        .build_associated(&conn, "comments", [("body", Value::from("first"))])
        .unwrap();

    let pending = post.association(&mut conn, "comments").unwrap();
    assert_eq!(pending.len(), 1);
    assert!(comment.new_record());

    post.save(&mut conn).unwrap();

    assert!(comment.persisted());
    assert_eq!(comment.get("post_id").unwrap(), post.id());
    assert_eq!(count_rows(&mut conn, "Comment"), 1);
}

#[test]
fn pushing_onto_a_persisted_owner_saves_immediately() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "parent".into())]);
    let comment_schema = conn.model("Comment").unwrap();
    let comment = Record::build(&comment_schema, [("body", Value::from("late"))]).unwrap();

    post.push_associated(&mut conn, "comments", &comment).unwrap();

    assert!(comment.persisted());
    assert_eq!(comment.get("post_id").unwrap(), post.id());
    let comments = post.association(&mut conn, "comments").unwrap();
    assert_eq!(comments.len(), 1);
}

#[test]
fn create_on_an_unsaved_owner_fails() {
    let mut conn = open();
    let post_schema = conn.model("Post").unwrap();
    let post = Record::build(&post_schema, [("title", Value::from("draft"))]).unwrap();
    let err = post
        .create_associated(&mut conn, "comments", [("body", Value::from("x"))])
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotSaved(_)));
    assert_eq!(count_rows(&mut conn, "Comment"), 0);
}

#[test]
fn create_on_a_persisted_owner() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "parent".into())]);
    let comment = post
        .create_associated(&mut conn, "comments", [("body", Value::from("made"))])
        .unwrap();
    assert!(comment.persisted());
    assert_eq!(comment.get("post_id").unwrap(), post.id());
}

#[test]
fn join_table_push_and_delete() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "tagged".into())]);
    let tag = create(&mut conn, "Tag", vec![("name", "db".into())]);

    post.push_associated(&mut conn, "tags", &tag).unwrap();
    let tags = post.association(&mut conn, "tags").unwrap().many();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id(), tag.id());

    post.delete_associated(&mut conn, "tags", &tag).unwrap();
    assert!(post.association(&mut conn, "tags").unwrap().is_empty());
    assert!(post.reload_association(&mut conn, "tags").unwrap().is_empty());
    assert_eq!(count_rows(&mut conn, "Tag"), 1);
}

#[test]
fn cached_children_match_other_handles_to_the_same_row() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "parent".into())]);
    let first = create(
        &mut conn,
        "Comment",
        vec![("body", "one".into()), ("post_id", post.id())],
    );
    create(
        &mut conn,
        "Comment",
        vec![("body", "two".into()), ("post_id", post.id())],
    );
    assert_eq!(post.association(&mut conn, "comments").unwrap().len(), 2);

    // Pushing a separately loaded copy replaces the cached one.
    let comments = conn.all("Comment").unwrap();
    let copy = conn.find(&comments, first.id()).unwrap();
    post.push_associated(&mut conn, "comments", &copy).unwrap();
    let cached = post.association(&mut conn, "comments").unwrap().many();
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().any(|c| c.ptr_eq(&copy)));

    // Deleting through the handle `create` returned drops the cached copy.
    post.delete_associated(&mut conn, "comments", &first).unwrap();
    assert_eq!(count_rows(&mut conn, "Comment"), 1);
    assert_eq!(post.association(&mut conn, "comments").unwrap().len(), 1);
}

#[test]
fn deleting_a_child_follows_the_dependent_option() {
    let mut conn = open();
    seed(&mut conn, 1, 1);
    let relation = conn.all("Post").unwrap();
    let post = conn.first(&relation).unwrap().unwrap();
    let comments = post.association(&mut conn, "comments").unwrap().many();

    // Post comments are dependent: destroy.
    post.delete_associated(&mut conn, "comments", &comments[0]).unwrap();
    assert!(comments[0].destroyed());
    assert_eq!(count_rows(&mut conn, "Comment"), 1);
    assert_eq!(post.association(&mut conn, "comments").unwrap().len(), 1);

    // Author comments are dependent: nullify.
    let authors = conn.all("Author").unwrap();
    let author = conn.first(&authors).unwrap().unwrap();
    author.delete_associated(&mut conn, "comments", &comments[1]).unwrap();
    assert_eq!(comments[1].get("author_id").unwrap(), Value::Null);
    assert!(!comments[1].has_changes());
    assert_eq!(count_rows(&mut conn, "Comment"), 1);
}

#[test]
fn inverse_of_links_children_back_without_a_query() {
    let mut conn = open();
    seed(&mut conn, 1, 1);
    let relation = conn.all("Post").unwrap();
    let post = conn.first(&relation).unwrap().unwrap();
    let comments = post.association(&mut conn, "comments").unwrap().many();
    let counter = counter(&mut conn);

    for comment in &comments {
        let owner = comment.association(&mut conn, "post").unwrap().one().unwrap();
        assert!(owner.ptr_eq(&post));
    }
    assert_eq!(counter.count(), 0);
}

#[test]
fn reload_association_sees_new_rows() {
    let mut conn = open();
    let post = create(&mut conn, "Post", vec![("title", "parent".into())]);
    assert!(post.association(&mut conn, "comments").unwrap().is_empty());

    create(
        &mut conn,
        "Comment",
        vec![("body", "behind its back".into()), ("post_id", post.id())],
    );
    assert!(post.association(&mut conn, "comments").unwrap().is_empty());
    assert_eq!(post.reload_association(&mut conn, "comments").unwrap().len(), 1);
}
