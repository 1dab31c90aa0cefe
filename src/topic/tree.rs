//! Concurrent topic tree
//!
//! A trie keyed by topic path segments. Every node carries its own
//! reader-writer lock, so operations on disjoint branches run in parallel;
//! locks are only ever acquired root-to-leaf, which keeps the scheme
//! deadlock-free. Each node holds the subscribers registered at exactly that
//! path plus an optional retained message.
//!
//! The tree is generic over the subscriber handle `C` so the broker can key
//! entries by connection identity rather than by client-id string, which is
//! what makes session takeover able to move a topic from an old handle to a
//! new one sharing the same identifier.

use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;
use compact_str::CompactString;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::protocol::{Publish, QoS};

struct TopicNode<C> {
    /// Child nodes keyed by the next path segment
    children: RwLock<AHashMap<CompactString, Arc<TopicNode<C>>>>,
    /// Subscribers registered at exactly this level
    subscribers: RwLock<AHashMap<C, QoS>>,
    /// Retained message for this exact topic path
    retained: RwLock<Option<Publish>>,
}

impl<C> TopicNode<C> {
    fn new() -> Self {
        Self {
            children: RwLock::new(AHashMap::with_capacity(4)),
            subscribers: RwLock::new(AHashMap::new()),
            retained: RwLock::new(None),
        }
    }
}

/// Subscription and retained-message index
pub struct TopicTree<C> {
    root: Arc<TopicNode<C>>,
}

impl<C> TopicTree<C>
where
    C: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            root: Arc::new(TopicNode::new()),
        }
    }

    /// Walk to the node for `topic`, creating missing nodes on the way.
    /// Each node's child-map lock is held only for the lookup/insert of the
    /// next segment (root-to-leaf order).
    fn node_for(&self, topic: &str) -> Arc<TopicNode<C>> {
        let mut node = self.root.clone();
        for level in topic.split('/') {
            let child = {
                let mut children = node.children.write();
                children
                    .entry(CompactString::new(level))
                    .or_insert_with(|| Arc::new(TopicNode::new()))
                    .clone()
            };
            node = child;
        }
        node
    }

    /// Walk to the node for `topic` without creating anything.
    fn find_node(&self, topic: &str) -> Option<Arc<TopicNode<C>>> {
        let mut node = self.root.clone();
        for level in topic.split('/') {
            let child = {
                let children = node.children.read();
                children.get(level).cloned()?
            };
            node = child;
        }
        Some(node)
    }

    /// Register `client` under `filter` with the granted maximum QoS.
    /// Returns the retained message stored at that exact path, if any, so
    /// the caller can deliver it immediately.
    pub fn subscribe(&self, filter: &str, max_qos: QoS, client: C) -> Option<Publish> {
        let node = self.node_for(filter);
        node.subscribers.write().insert(client, max_qos);
        let retained = node.retained.read().clone();
        retained
    }

    /// Remove `client`'s subscription under `filter`. A missing path is a
    /// harmless no-op, not an error. Returns whether an entry was removed.
    pub fn unsubscribe(&self, filter: &str, client: &C) -> bool {
        match self.find_node(filter) {
            Some(node) => node.subscribers.write().remove(client).is_some(),
            None => false,
        }
    }

    /// Remove every subscription in `filters` for `client`.
    /// The caller passes the session's own subscription record, which is the
    /// authoritative list of filters this client holds.
    pub fn remove_client_subscriptions<'a, I>(&self, client: &C, filters: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for filter in filters {
            self.unsubscribe(filter, client);
        }
    }

    /// Resolve all subscribers matching a published topic.
    ///
    /// A `#` child matches at every level of the walk (including ancestors of
    /// the terminal node), a `+` child consumes exactly one level and the
    /// remaining suffix is matched recursively beneath it, and the terminal
    /// node's own subscribers match exactly. A client reached through several
    /// filters is returned once with the highest granted QoS. Topics whose
    /// first level starts with `$` are not matched by wildcards at the root.
    pub fn collect_subscribers(&self, topic: &str) -> Vec<(C, QoS)> {
        let levels: SmallVec<[&str; 8]> = topic.split('/').collect();
        let system = topic.starts_with('$');

        let mut out: AHashMap<C, QoS> = AHashMap::new();
        Self::collect(&self.root, &levels, 0, system, &mut out);
        out.into_iter().collect()
    }

    fn collect(
        node: &Arc<TopicNode<C>>,
        levels: &[&str],
        index: usize,
        system: bool,
        out: &mut AHashMap<C, QoS>,
    ) {
        let skip_wildcards = system && index == 0;
        let children = node.children.read();

        // A multi-level wildcard child matches here regardless of how many
        // levels remain, ancestors included.
        if !skip_wildcards {
            if let Some(hash_child) = children.get("#") {
                Self::merge(hash_child, out);
            }
        }

        if index >= levels.len() {
            drop(children);
            Self::merge(node, out);
            return;
        }

        if !skip_wildcards {
            if let Some(plus_child) = children.get("+") {
                Self::collect(plus_child, levels, index + 1, system, out);
            }
        }

        if let Some(child) = children.get(levels[index]) {
            Self::collect(child, levels, index + 1, system, out);
        }
    }

    fn merge(node: &Arc<TopicNode<C>>, out: &mut AHashMap<C, QoS>) {
        for (client, qos) in node.subscribers.read().iter() {
            let entry = out.entry(client.clone()).or_insert(*qos);
            if *qos > *entry {
                *entry = *qos;
            }
        }
    }

    /// Store `publish` as the retained message for its exact topic.
    /// An empty payload clears the slot.
    pub fn retain(&self, publish: &Publish) {
        let node = self.node_for(&publish.topic);
        let mut retained = node.retained.write();
        if publish.payload.is_empty() {
            *retained = None;
        } else {
            let mut stored = publish.clone();
            stored.dup = false;
            stored.retain = true;
            stored.packet_id = None;
            *retained = Some(stored);
        }
    }

    /// Retained message for an exact topic path, if any.
    pub fn retained_message(&self, topic: &str) -> Option<Publish> {
        self.find_node(topic)
            .and_then(|node| node.retained.read().clone())
    }

    /// All retained messages whose topic matches a subscription filter.
    /// Needed at subscribe time: a wildcard filter can cover many retained
    /// topics, not just its own exact path. `$`-prefixed topics are not
    /// matched by filters starting with a wildcard.
    pub fn retained_matching(&self, filter: &str) -> Vec<Publish> {
        let levels: SmallVec<[&str; 8]> = filter.split('/').collect();
        let mut out = Vec::new();
        Self::collect_retained(&self.root, &levels, 0, &mut out);
        out
    }

    fn collect_retained(
        node: &Arc<TopicNode<C>>,
        levels: &[&str],
        index: usize,
        out: &mut Vec<Publish>,
    ) {
        if index >= levels.len() {
            if let Some(publish) = node.retained.read().clone() {
                out.push(publish);
            }
            return;
        }

        let children = node.children.read();
        match levels[index] {
            "#" => {
                drop(children);
                Self::collect_subtree_retained(node, index == 0, out);
            }
            "+" => {
                for (name, child) in children.iter() {
                    if index == 0 && name.starts_with('$') {
                        continue;
                    }
                    Self::collect_retained(child, levels, index + 1, out);
                }
            }
            name => {
                if let Some(child) = children.get(name) {
                    Self::collect_retained(child, levels, index + 1, out);
                }
            }
        }
    }

    fn collect_subtree_retained(node: &Arc<TopicNode<C>>, at_root: bool, out: &mut Vec<Publish>) {
        // `#` also matches the level it is anchored at; the root node
        // itself carries no retained message (every topic has a level)
        if !at_root {
            if let Some(publish) = node.retained.read().clone() {
                out.push(publish);
            }
        }

        let children = node.children.read();
        for (name, child) in children.iter() {
            if at_root && name.starts_with('$') {
                continue;
            }
            Self::collect_subtree_retained(child, false, out);
        }
    }

    /// Diagnostic traversal: every topic path that currently has at least one
    /// subscriber. No snapshot consistency across concurrent mutation.
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        Self::walk_topics(&self.root, "", &mut topics);
        topics
    }

    fn walk_topics(node: &Arc<TopicNode<C>>, path: &str, topics: &mut Vec<String>) {
        if !path.is_empty() && !node.subscribers.read().is_empty() {
            topics.push(path.to_string());
        }

        let children = node.children.read();
        for (level, child) in children.iter() {
            let child_path = if path.is_empty() {
                level.to_string()
            } else {
                format!("{}/{}", path, level)
            };
            Self::walk_topics(child, &child_path, topics);
        }
    }
}

impl<C> Default for TopicTree<C>
where
    C: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn publish(topic: &str, payload: &'static [u8]) -> Publish {
        Publish {
            topic: Arc::from(topic),
            payload: Bytes::from_static(payload),
            ..Publish::default()
        }
    }

    fn subscribers_of(tree: &TopicTree<&'static str>, topic: &str) -> Vec<(&'static str, QoS)> {
        let mut subs = tree.collect_subscribers(topic);
        subs.sort_by_key(|(c, _)| *c);
        subs
    }

    #[test]
    fn test_exact_match() {
        let tree = TopicTree::new();
        tree.subscribe("test/topic", QoS::AtMostOnce, "c1");

        assert_eq!(
            subscribers_of(&tree, "test/topic"),
            vec![("c1", QoS::AtMostOnce)]
        );
        assert!(subscribers_of(&tree, "test/other").is_empty());
        assert!(subscribers_of(&tree, "test").is_empty());
    }

    #[test]
    fn test_single_level_wildcard() {
        let tree = TopicTree::new();
        tree.subscribe("test/+", QoS::AtMostOnce, "c1");
        tree.subscribe("+/topic", QoS::AtMostOnce, "c2");
        tree.subscribe("+/+", QoS::AtMostOnce, "c3");

        assert_eq!(
            subscribers_of(&tree, "test/topic"),
            vec![
                ("c1", QoS::AtMostOnce),
                ("c2", QoS::AtMostOnce),
                ("c3", QoS::AtMostOnce)
            ]
        );
        // + consumes exactly one level
        assert!(subscribers_of(&tree, "test").is_empty());
        assert!(subscribers_of(&tree, "test/topic/deep").is_empty());
    }

    #[test]
    fn test_multi_level_wildcard() {
        let tree = TopicTree::new();
        tree.subscribe("#", QoS::AtMostOnce, "c1");
        tree.subscribe("test/#", QoS::AtMostOnce, "c2");

        assert_eq!(
            subscribers_of(&tree, "test/topic/deep"),
            vec![("c1", QoS::AtMostOnce), ("c2", QoS::AtMostOnce)]
        );
        // # matches the parent level itself
        assert_eq!(
            subscribers_of(&tree, "test"),
            vec![("c1", QoS::AtMostOnce), ("c2", QoS::AtMostOnce)]
        );
        assert_eq!(
            subscribers_of(&tree, "other"),
            vec![("c1", QoS::AtMostOnce)]
        );
    }

    #[test]
    fn test_wildcard_below_plus() {
        let tree = TopicTree::new();
        tree.subscribe("a/+/#", QoS::AtMostOnce, "c1");
        tree.subscribe("+/b/+", QoS::AtMostOnce, "c2");

        assert_eq!(
            subscribers_of(&tree, "a/b/c"),
            vec![("c1", QoS::AtMostOnce), ("c2", QoS::AtMostOnce)]
        );
        assert_eq!(
            subscribers_of(&tree, "a/x/y/z"),
            vec![("c1", QoS::AtMostOnce)]
        );
    }

    #[test]
    fn test_spec_matching_examples() {
        let tree = TopicTree::new();
        tree.subscribe("a/+/c", QoS::AtMostOnce, "plus");
        tree.subscribe("a/#", QoS::AtMostOnce, "hash");
        tree.subscribe("a/b", QoS::AtMostOnce, "exact");

        assert_eq!(
            subscribers_of(&tree, "a/b/c"),
            vec![("hash", QoS::AtMostOnce), ("plus", QoS::AtMostOnce)]
        );
    }

    #[test]
    fn test_system_topics_skip_root_wildcards() {
        let tree = TopicTree::new();
        tree.subscribe("#", QoS::AtMostOnce, "c1");
        tree.subscribe("+/status", QoS::AtMostOnce, "c2");
        tree.subscribe("$SYS/#", QoS::AtMostOnce, "c3");

        assert_eq!(
            subscribers_of(&tree, "$SYS/status"),
            vec![("c3", QoS::AtMostOnce)]
        );
    }

    #[test]
    fn test_highest_qos_wins_for_overlapping_filters() {
        let tree = TopicTree::new();
        tree.subscribe("a/b", QoS::AtMostOnce, "c1");
        tree.subscribe("a/+", QoS::ExactlyOnce, "c1");

        assert_eq!(
            subscribers_of(&tree, "a/b"),
            vec![("c1", QoS::ExactlyOnce)]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let tree = TopicTree::new();
        tree.subscribe("test/topic", QoS::AtLeastOnce, "c1");

        assert!(tree.unsubscribe("test/topic", &"c1"));
        assert!(subscribers_of(&tree, "test/topic").is_empty());

        // removing again, or removing a path that never existed, is harmless
        assert!(!tree.unsubscribe("test/topic", &"c1"));
        assert!(!tree.unsubscribe("no/such/topic", &"c1"));
    }

    #[test]
    fn test_remove_client_subscriptions() {
        let tree = TopicTree::new();
        tree.subscribe("a/b", QoS::AtMostOnce, "c1");
        tree.subscribe("c/#", QoS::AtMostOnce, "c1");
        tree.subscribe("a/b", QoS::AtMostOnce, "c2");

        tree.remove_client_subscriptions(&"c1", ["a/b", "c/#"]);

        assert_eq!(subscribers_of(&tree, "a/b"), vec![("c2", QoS::AtMostOnce)]);
        assert!(subscribers_of(&tree, "c/d").is_empty());
    }

    #[test]
    fn test_retain_and_clear() {
        let tree: TopicTree<&'static str> = TopicTree::new();
        tree.retain(&publish("sensor/temp", b"21"));

        let retained = tree.retained_message("sensor/temp").unwrap();
        assert_eq!(&retained.payload[..], b"21");
        assert!(retained.retain);

        // last write wins
        tree.retain(&publish("sensor/temp", b"22"));
        assert_eq!(
            &tree.retained_message("sensor/temp").unwrap().payload[..],
            b"22"
        );

        // empty payload clears the slot
        tree.retain(&publish("sensor/temp", b""));
        assert!(tree.retained_message("sensor/temp").is_none());
    }

    #[test]
    fn test_retained_matching_wildcards() {
        let tree: TopicTree<&'static str> = TopicTree::new();
        tree.retain(&publish("sensor/temp", b"21"));
        tree.retain(&publish("sensor/hum", b"40"));
        tree.retain(&publish("other/temp", b"5"));
        tree.retain(&publish("$SYS/uptime", b"1"));

        let mut payloads: Vec<_> = tree
            .retained_matching("sensor/+")
            .iter()
            .map(|p| p.payload.clone())
            .collect();
        payloads.sort();
        assert_eq!(payloads, vec![Bytes::from_static(b"21"), Bytes::from_static(b"40")]);

        assert_eq!(tree.retained_matching("sensor/#").len(), 2);
        assert_eq!(tree.retained_matching("sensor/temp").len(), 1);
        assert_eq!(tree.retained_matching("none/+").len(), 0);

        // root-level wildcards never surface $-topics
        assert_eq!(tree.retained_matching("#").len(), 3);
        assert_eq!(tree.retained_matching("+/temp").len(), 2);
        assert_eq!(tree.retained_matching("$SYS/#").len(), 1);
    }

    #[test]
    fn test_retained_matching_hash_includes_anchor_level() {
        let tree: TopicTree<&'static str> = TopicTree::new();
        tree.retain(&publish("a", b"top"));
        tree.retain(&publish("a/b", b"nested"));

        // "a/#" matches both "a" itself and everything below it
        assert_eq!(tree.retained_matching("a/#").len(), 2);
    }

    #[test]
    fn test_subscribe_returns_retained() {
        let tree = TopicTree::new();
        tree.retain(&publish("sensor/temp", b"21"));

        let retained = tree.subscribe("sensor/temp", QoS::AtMostOnce, "c1");
        assert_eq!(&retained.unwrap().payload[..], b"21");

        let none = tree.subscribe("sensor/other", QoS::AtMostOnce, "c1");
        assert!(none.is_none());
    }

    #[test]
    fn test_all_topics() {
        let tree = TopicTree::new();
        tree.subscribe("a/b", QoS::AtMostOnce, "c1");
        tree.subscribe("a/b/c", QoS::AtMostOnce, "c2");
        tree.subscribe("d", QoS::AtMostOnce, "c3");

        let mut topics = tree.all_topics();
        topics.sort();
        assert_eq!(topics, vec!["a/b", "a/b/c", "d"]);
    }
}
