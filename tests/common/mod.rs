//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Once;

use arbor::{Arbor, Node, NodePath, Priority};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (`RUST_LOG=arbor=debug`)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub color: &'static str,
    pub weight: u32,
}

pub fn item(color: &'static str, weight: u32) -> Item {
    Item { color, weight }
}

/// Empty tree with the color filters registered
pub fn empty_tree() -> Arbor<Item> {
    init_tracing();
    let arbor = Arbor::<Item>::new();
    for color in ["red", "blue", "green"] {
        arbor
            .register_filter_fn(color, move |node| node.data().color == color)
            .unwrap();
    }
    arbor
        .register_filter(
            "color",
            |node, params| params.get_str("color") == Some(node.data().color),
            None,
        )
        .unwrap();
    arbor
        .register_filter_fn("leaf", |node| !node.has_child())
        .unwrap();
    arbor
        .register_filter_fn("heavy", |node| node.data().weight >= 10)
        .unwrap();
    arbor
}

/// Nodes `0`..`4` red and `5`..`9` blue under root; `10`..`14` green,
/// each one the child of the previous (a staircase)
pub fn colored_tree() -> Arbor<Item> {
    let arbor = empty_tree();
    for i in 0..10u32 {
        let color = if i < 5 { "red" } else { "blue" };
        arbor
            .add_node(Node::new(i.to_string(), item(color, i)), None, Priority::Low)
            .unwrap();
    }
    let mut parent: Option<String> = None;
    for i in 10..15u32 {
        let id = i.to_string();
        arbor
            .add_node(Node::new(&id, item("green", i)), parent.as_deref(), Priority::Low)
            .unwrap();
        parent = Some(id);
    }
    arbor
}

pub fn path(ids: &[&str]) -> NodePath {
    ids.iter().collect()
}

pub fn ids(list: Vec<arbor::NodeId>) -> Vec<String> {
    list.into_iter().map(|id| id.to_string()).collect()
}
