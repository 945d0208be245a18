//! Sibling tracking for dynamic includes.
//!
//! Records loaded together hang off one [`LoadTreeNode`]. Reading an
//! association on any of them can batch-load it for the whole group, and the
//! loaded targets become the group of a child node, so the next level down
//! batches too.
//!
//! Nodes hold records weakly. A record dropped by the caller leaves its group
//! and never keeps the tree, or the tree it, alive.

use crate::record::{Record, RecordState};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// One group of records loaded together.
pub struct LoadTreeNode {
    /// Association that produced this group; `None` for a relation load.
    association: Option<String>,
    parent: Weak<LoadTreeNode>,
    records: Mutex<Vec<Weak<Mutex<RecordState>>>>,
    children: Mutex<HashMap<String, Arc<LoadTreeNode>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoadTreeNode {
    fn empty(association: Option<String>, parent: Weak<LoadTreeNode>) -> Arc<Self> {
        Arc::new(Self {
            association,
            parent,
            records: Mutex::new(Vec::new()),
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Start a tree for the records of one relation load.
    pub fn root(records: &[Record]) -> Arc<Self> {
        let node = Self::empty(None, Weak::new());
        node.adopt(records);
        node
    }

    /// The child node for `association`, created on first use.
    pub fn child(self: &Arc<Self>, association: &str) -> Arc<Self> {
        let mut children = lock(&self.children);
        Arc::clone(children.entry(association.to_string()).or_insert_with(|| {
            Self::empty(Some(association.to_string()), Arc::downgrade(self))
        }))
    }

    /// Add records to this group and point them at it.
    pub fn adopt(self: &Arc<Self>, records: &[Record]) {
        let mut members = lock(&self.records);
        let mut seen: HashSet<*const Mutex<RecordState>> =
            members.iter().map(Weak::as_ptr).collect();
        for record in records {
            let weak = record.downgrade();
            if !seen.insert(weak.as_ptr()) {
                continue;
            }
            members.push(weak);
            record.set_load_node(Arc::clone(self));
        }
    }

    /// Live records of this group, in load order.
    pub fn siblings(&self) -> Vec<Record> {
        let mut members = lock(&self.records);
        members.retain(|w| w.strong_count() > 0);
        members.iter().filter_map(Record::from_weak).collect()
    }

    pub fn live_count(&self) -> usize {
        lock(&self.records)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn association(&self) -> Option<&str> {
        self.association.as_deref()
    }

    pub fn parent(&self) -> Option<Arc<LoadTreeNode>> {
        self.parent.upgrade()
    }

    /// Association names from the root down to this node.
    pub fn path(&self) -> Vec<String> {
        let mut path: Vec<String> = self.association.iter().cloned().collect();
        let mut next = self.parent.upgrade();
        while let Some(node) = next {
            path.extend(node.association.iter().cloned());
            next = node.parent.upgrade();
        }
        path.reverse();
        path
    }
}

impl fmt::Debug for LoadTreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTreeNode")
            .field("path", &self.path())
            .field("records", &self.live_count())
            .field("children", &lock(&self.children).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;

    fn records(n: usize) -> Vec<Record> {
        let schema = Arc::new(ModelSchema::new("Post", "posts"));
        (0..n).map(|_| Record::new(&schema)).collect()
    }

    #[test]
    fn test_root_adopts_records() {
        let posts = records(3);
        let root = LoadTreeNode::root(&posts);
        assert_eq!(root.live_count(), 3);
        assert!(root.association().is_none());
        for post in &posts {
            assert!(Arc::ptr_eq(&post.load_node().unwrap(), &root));
        }
    }

    #[test]
    fn test_dropped_records_leave_group() {
        let mut posts = records(3);
        let root = LoadTreeNode::root(&posts);
        posts.pop();
        assert_eq!(root.live_count(), 2);
        assert_eq!(root.siblings().len(), 2);
    }

    #[test]
    fn test_child_nodes_are_shared_per_association() {
        let posts = records(2);
        let root = LoadTreeNode::root(&posts);
        let a = root.child("comments");
        let b = root.child("comments");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &root.child("author")));
        assert!(Arc::ptr_eq(&a.parent().unwrap(), &root));

        let grandchild = a.child("author");
        assert_eq!(grandchild.path(), vec!["comments", "author"]);
    }

    #[test]
    fn test_adopt_ignores_duplicates() {
        let posts = records(2);
        let root = LoadTreeNode::root(&posts);
        root.adopt(&posts);
        assert_eq!(root.live_count(), 2);

        let extra = records(1).remove(0);
        let batch = vec![extra.clone(), posts[0].clone(), extra.clone()];
        root.adopt(&batch);
        assert_eq!(root.live_count(), 3);
        assert!(Arc::ptr_eq(&extra.load_node().unwrap(), &root));
    }
}
