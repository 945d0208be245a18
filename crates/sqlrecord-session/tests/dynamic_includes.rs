//! Sibling batch loading of associations.

mod common;

use common::{counter, open, open_with, registry, registry_with, seed};
use sqlrecord_core::{ColumnDef, Reflection, SqlType};
use sqlrecord_session::{ConnectionHandle, HandleConfig, ModelSchema, Record};

fn load_posts(conn: &mut ConnectionHandle) -> Vec<Record> {
    let relation = conn.all("Post").unwrap().ordered_by_primary_key();
    conn.load(&relation).unwrap()
}

#[test]
fn belongs_to_loads_for_all_siblings_at_once() {
    let mut conn = open();
    seed(&mut conn, 3, 1);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    assert_eq!(posts.len(), 3);
    let mut names = Vec::new();
    for post in &posts {
        let author = post.association(&mut conn, "author").unwrap().one().unwrap();
        names.push(author.get_as::<String>("name").unwrap());
    }

    assert_eq!(names, vec!["author 0", "author 1", "author 2"]);
    assert_eq!(counter.count(), 2);
    assert!(counter.statements()[1].contains(" IN ("));
    assert_eq!(conn.n1_tracker().stats().total_loads, 0);
}

#[test]
fn has_many_loads_for_all_siblings_at_once() {
    let mut conn = open();
    seed(&mut conn, 1, 3);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    for post in &posts {
        let comments = post.association(&mut conn, "comments").unwrap();
        assert_eq!(comments.len(), 2);
    }
    assert_eq!(counter.count(), 2);
}

#[test]
fn nested_associations_batch_per_level() {
    let mut conn = open();
    seed(&mut conn, 2, 2);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    let mut authors = 0;
    for post in &posts {
        for comment in post.association(&mut conn, "comments").unwrap().many() {
            if comment.association(&mut conn, "author").unwrap().one().is_some() {
                authors += 1;
            }
        }
    }

    assert_eq!(authors, 8);
    assert_eq!(counter.count(), 3);
}

#[test]
fn join_table_associations_batch_in_two_queries() {
    let mut conn = open();
    seed(&mut conn, 1, 3);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    for post in &posts {
        let tags = post.association(&mut conn, "tags").unwrap().many();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].get_as::<String>("name").unwrap(), "rust");
    }
    assert_eq!(counter.count(), 3);
}

#[test]
fn disabled_on_the_handle_loads_one_by_one() {
    let mut conn = open_with(registry(), HandleConfig::new().dynamic_includes(false));
    seed(&mut conn, 3, 1);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    assert!(posts.iter().all(|p| p.load_node().is_none()));
    for post in &posts {
        post.association(&mut conn, "author").unwrap();
    }
    assert_eq!(counter.count(), 4);
}

#[test]
fn disabled_on_the_relation_loads_one_by_one() {
    let mut conn = open();
    seed(&mut conn, 3, 1);
    let counter = counter(&mut conn);

    let relation = conn.all("Post").unwrap().dynamic_includes(false);
    let posts = conn.load(&relation).unwrap();
    for post in &posts {
        post.association(&mut conn, "author").unwrap();
    }
    assert_eq!(counter.count(), 4);
}

#[test]
fn turning_off_after_load_is_tracked_as_n_plus_one() {
    let mut conn = open();
    seed(&mut conn, 3, 1);
    let posts = load_posts(&mut conn);
    conn.set_dynamic_includes(false);
    let counter = counter(&mut conn);

    for post in &posts {
        post.association(&mut conn, "author").unwrap();
    }

    assert_eq!(counter.count(), 3);
    assert_eq!(conn.n1_tracker().count_for("Post", "author"), 3);
    let stats = conn.n1_tracker().stats();
    assert_eq!(stats.potential_n1, 1);
}

#[test]
fn reflection_can_opt_out() {
    let post = ModelSchema::new("Post", "posts")
        .column(ColumnDef::new("title", SqlType::Text))
        .column(ColumnDef::new("author_id", SqlType::BigInt))
        .association(Reflection::belongs_to("author", "Author").without_dynamic_includes())
        .association(Reflection::has_many("comments", "Comment", "post_id"))
        .association(Reflection::has_and_belongs_to_many(
            "tags",
            "Tag",
            "posts_tags",
            "post_id",
            "tag_id",
        ));
    let mut conn = open_with(registry_with(post), HandleConfig::new());
    seed(&mut conn, 3, 1);
    let counter = counter(&mut conn);

    let posts = load_posts(&mut conn);
    for post in &posts {
        post.association(&mut conn, "author").unwrap();
    }
    assert_eq!(counter.count(), 4);

    counter.reset();
    for post in &posts {
        post.association(&mut conn, "comments").unwrap();
    }
    assert_eq!(counter.count(), 1);
}

#[test]
fn dropped_siblings_leave_the_group() {
    let mut conn = open();
    seed(&mut conn, 3, 1);
    let mut posts = load_posts(&mut conn);
    let kept = posts.remove(0);
    drop(posts);
    assert_eq!(kept.load_node().unwrap().live_count(), 1);

    let counter = counter(&mut conn);
    kept.association(&mut conn, "author").unwrap();
    assert_eq!(counter.count(), 1);
    assert!(!counter.statements()[0].contains(" IN ("));
    assert_eq!(conn.n1_tracker().stats().total_loads, 0);
}

#[test]
fn a_single_record_does_not_batch() {
    let mut conn = open();
    seed(&mut conn, 2, 1);
    let relation = conn.all("Post").unwrap();
    let post = conn.first(&relation).unwrap().unwrap();
    assert!(post.load_node().is_none());

    let counter = counter(&mut conn);
    post.association(&mut conn, "comments").unwrap();
    assert_eq!(counter.count(), 1);
    assert!(!counter.statements()[0].contains(" IN ("));
}

#[test]
fn explicit_includes_preload_nested_paths() {
    let mut conn = open();
    seed(&mut conn, 2, 2);
    let counter = counter(&mut conn);

    let relation = conn.all("Post").unwrap().includes("comments.author");
    let posts = conn.load(&relation).unwrap();
    assert_eq!(counter.count(), 3);

    counter.reset();
    for post in &posts {
        for comment in post.association(&mut conn, "comments").unwrap().many() {
            assert!(comment.association(&mut conn, "author").unwrap().one().is_some());
        }
    }
    assert_eq!(counter.count(), 0);
}

#[test]
fn records_loaded_through_an_association_form_their_own_group() {
    let mut conn = open();
    seed(&mut conn, 2, 1);
    let posts = load_posts(&mut conn);

    let comments = posts[0].association(&mut conn, "comments").unwrap().many();
    let node = comments[0].load_node().unwrap();
    assert_eq!(node.path(), vec!["comments".to_string()]);
    assert_eq!(node.live_count(), 4);
}
