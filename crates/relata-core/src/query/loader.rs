//! Eager-load specifications.
//!
//! A path expression names relations level by level: `.` descends, `|`
//! separates alternatives within one level and `*` stands for every relation
//! declared at that level. `posts.comments|likes` loads `posts.comments` and
//! `posts.likes`. A constraint applies to the last relation of each path.

use super::Constraint;
use super::relations::family_relation;
use crate::RelataError;
use crate::primitives::MAX_RECURSION_DEPTH;
use crate::schema::Registry;

#[derive(Clone, Default)]
pub(crate) struct LoadTree {
    named: Vec<(String, LoadNode)>,
    any: Option<Box<LoadNode>>,
    /// Levels loaded for every relation, below and including this one.
    recursive: usize,
}

#[derive(Clone, Default)]
pub(crate) struct LoadNode {
    pub constraint: Option<Constraint>,
    pub children: LoadTree,
}

impl LoadTree {
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.any.is_none() && self.recursive == 0
    }

    /// Add a path expression.
    pub fn add(&mut self, expr: &str, constraint: Option<Constraint>) {
        let segments: Vec<Vec<&str>> = expr
            .split('.')
            .map(|segment| {
                segment
                    .split('|')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .collect();
        self.add_segments(&segments, constraint.as_ref());
    }

    fn add_segments(&mut self, segments: &[Vec<&str>], constraint: Option<&Constraint>) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        for name in head {
            let node = self.node_mut(name);
            if rest.is_empty() {
                if let Some(constraint) = constraint {
                    node.constraint = Some(constraint.clone());
                }
            } else {
                node.children.add_segments(rest, constraint);
            }
        }
    }

    fn node_mut(&mut self, name: &str) -> &mut LoadNode {
        if name == "*" {
            return self.any.get_or_insert_with(Box::default);
        }
        let index = match self.named.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.named.push((name.to_string(), LoadNode::default()));
                self.named.len() - 1
            }
        };
        &mut self.named[index].1
    }

    /// Load every relation for `levels` levels, capped at the recursion bound.
    pub fn recursive(&mut self, levels: usize) {
        self.recursive = self.recursive.max(levels.min(MAX_RECURSION_DEPTH));
    }

    /// The load specification of relation `name` at this level, if it is loaded.
    pub fn child(&self, name: &str) -> Option<LoadNode> {
        let explicit = self
            .named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
            .or(self.any.as_deref());
        if self.recursive == 0 {
            return explicit.cloned();
        }
        let mut node = explicit.cloned().unwrap_or_default();
        node.children.recursive = node.children.recursive.max(self.recursive - 1);
        Some(node)
    }

    /// Merge `other` into this tree. Existing constraints win.
    pub fn absorb(&mut self, other: Self) {
        for (name, node) in other.named {
            let target = self.node_mut(&name);
            if target.constraint.is_none() {
                target.constraint = node.constraint;
            }
            target.children.absorb(node.children);
        }
        if let Some(any) = other.any {
            let target = self.node_mut("*");
            if target.constraint.is_none() {
                target.constraint = any.constraint;
            }
            target.children.absorb(any.children);
        }
        self.recursive = self.recursive.max(other.recursive);
    }

    /// Check that every named relation exists on `entity` or its family.
    pub fn validate(&self, registry: &Registry, entity: &str) -> Result<(), RelataError> {
        for (name, node) in &self.named {
            let relation = family_relation(registry, entity, name)?;
            if let Some(target) = relation.target() {
                node.children.validate(registry, target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::constraint;

    fn names(tree: &LoadTree) -> Vec<&str> {
        tree.named.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn dotted_paths_nest() {
        let mut tree = LoadTree::default();
        tree.add("posts.comments.author", None);

        let posts = tree.child("posts").expect("posts");
        let comments = posts.children.child("comments").expect("comments");
        assert!(comments.children.child("author").is_some());
        assert!(tree.child("comments").is_none());
    }

    #[test]
    fn pipes_split_one_level() {
        let mut tree = LoadTree::default();
        tree.add("posts.comments|likes", None);
        assert_eq!(names(&tree), vec!["posts"]);

        let posts = tree.child("posts").expect("posts");
        assert_eq!(names(&posts.children), vec!["comments", "likes"]);
    }

    #[test]
    fn wildcard_matches_any_relation() {
        let mut tree = LoadTree::default();
        tree.add("*", None);
        assert!(tree.child("anything").is_some());
        assert!(tree.child("anything").expect("node").children.is_empty());
    }

    #[test]
    fn constraint_lands_on_last_segment() {
        let mut tree = LoadTree::default();
        tree.add("posts.comments", Some(constraint(|q| q.limit(1))));

        let posts = tree.child("posts").expect("posts");
        assert!(posts.constraint.is_none());
        assert!(posts.children.child("comments").expect("comments").constraint.is_some());
    }

    #[test]
    fn recursion_counts_down_and_is_capped() {
        let mut tree = LoadTree::default();
        tree.recursive(2);

        let first = tree.child("a").expect("level one");
        let second = first.children.child("b").expect("level two");
        assert!(second.children.child("c").is_none());

        let mut deep = LoadTree::default();
        deep.recursive(usize::MAX);
        assert_eq!(deep.recursive, MAX_RECURSION_DEPTH);
    }

    #[test]
    fn absorb_merges_children() {
        let mut tree = LoadTree::default();
        tree.add("posts.comments", None);
        let mut other = LoadTree::default();
        other.add("posts.likes", None);
        other.add("author", None);
        tree.absorb(other);

        assert_eq!(names(&tree), vec!["posts", "author"]);
        let posts = tree.child("posts").expect("posts");
        assert_eq!(names(&posts.children), vec!["comments", "likes"]);
    }
}
