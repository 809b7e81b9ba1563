//! FilteredProjection Integration Tests
//!
//! Filtered content, occurrence paths, incremental updates and the
//! `*-inview` event stream.

mod common;

use std::sync::Arc;

use arbor::{EventKind, EventLog, FilterParams, Node, Priority, Signal};
use common::{colored_tree, empty_tree, ids, item, path};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

// ═══════════════════════════════════════════════════════════════
// CONTENT
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_color_filter_selects_nodes() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();

    assert_eq!(ids(view.all_nodes()), vec!["0", "1", "2", "3", "4"]);
    assert_eq!(view.child_count(None, false), 5);
    assert!(!view.is_displayed("5"));
    view.projection().unwrap().validate().unwrap();
}

#[test]
fn test_staircase_keeps_full_paths() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("green", None, false, true).unwrap();

    assert_eq!(
        view.paths_for_node("14"),
        vec![path(&["10", "11", "12", "13", "14"])]
    );
    assert_eq!(
        view.print_tree(),
        "root\n 10\n  11\n   12\n    13\n     14\n"
    );
    assert_eq!(view.child_count(Some("10"), true), 4);
}

#[test]
fn test_visible_child_of_hidden_parent_sits_under_root() {
    let arbor = empty_tree();
    arbor
        .add_node(Node::new("A", item("red", 1)), None, Priority::Low)
        .unwrap();
    arbor
        .add_node(Node::new("B", item("blue", 20)), Some("A"), Priority::Low)
        .unwrap();

    let view = arbor.view(None, true);
    view.apply_filter("heavy", None, false, true).unwrap();

    assert!(!view.is_displayed("A"));
    assert!(view.is_displayed("B"));
    assert_eq!(view.paths_for_node("B"), vec![path(&["B"])]);
    assert!(view.node_parents("B").unwrap().is_empty());
}

#[test]
fn test_leaf_filter_lifts_staircase_end() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("leaf", None, false, true).unwrap();

    assert_eq!(view.all_nodes().len(), 11);
    assert_eq!(view.paths_for_node("14"), vec![path(&["14"])]);
    assert!(!view.is_displayed("13"));
}

#[test]
fn test_params_are_bound_per_view() {
    let arbor = colored_tree();
    let reds = arbor.view(None, true);
    let blues = arbor.view(None, true);
    reds.apply_filter("color", Some(FilterParams::new().with("color", "red")), false, true)
        .unwrap();
    blues
        .apply_filter("color", Some(FilterParams::new().with("color", "blue")), false, true)
        .unwrap();

    assert_eq!(ids(reds.all_nodes()), vec!["0", "1", "2", "3", "4"]);
    assert_eq!(ids(blues.all_nodes()), vec!["5", "6", "7", "8", "9"]);
    let bank = arbor.filters().get("color").unwrap();
    assert!(bank.effective_params(None).get("color").is_none());
}

#[test]
fn test_rebinding_params_recomputes() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    let red = FilterParams::new().with("color", "red");
    assert!(view.apply_filter("color", Some(red.clone()), false, true).unwrap());
    assert!(!view.apply_filter("color", Some(red), false, true).unwrap());
    assert!(view
        .apply_filter("color", Some(FilterParams::new().with("color", "green")), false, true)
        .unwrap());
    assert_eq!(view.all_nodes().len(), 5);
    assert!(view.is_displayed("12"));
}

#[test]
fn test_flat_filter_puts_everything_at_root() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("green", Some(FilterParams::new().with("flat", true)), false, true)
        .unwrap();

    assert!(view.projection().unwrap().is_flat());
    assert_eq!(view.child_count(None, false), 5);
    assert_eq!(view.child_count(Some("10"), false), 0);
    assert_eq!(view.paths_for_node("14"), vec![path(&["14"])]);
}

// ═══════════════════════════════════════════════════════════════
// MULTIPLE OCCURRENCES
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_second_parent_duplicates_subtree() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    let log = EventLog::new();
    view.subscribe(Signal::NodeAddedInview, log.clone());

    assert!(arbor.add_parent("12", "0").unwrap());

    let mut paths = view.paths_for_node("14");
    paths.sort();
    assert_eq!(
        paths,
        vec![
            path(&["0", "12", "13", "14"]),
            path(&["10", "11", "12", "13", "14"]),
        ]
    );
    let added: Vec<_> = log
        .kinds()
        .iter()
        .filter_map(|e| e.path().cloned())
        .collect();
    assert_eq!(
        added,
        vec![
            path(&["0", "12"]),
            path(&["0", "12", "13"]),
            path(&["0", "12", "13", "14"]),
        ]
    );
    // 11 top level + 3 under "0" + 4 under "10"
    assert_eq!(view.child_count(None, true), 18);
    view.projection().unwrap().validate().unwrap();

    assert!(arbor.remove_parent("12", "0").unwrap());
    assert_eq!(view.paths_for_node("14").len(), 1);
    assert_eq!(view.child_count(None, true), 15);
}

#[test]
fn test_next_node_follows_the_given_parent() {
    let arbor = colored_tree();
    arbor
        .add_node(Node::new("x", item("green", 3)), Some("10"), Priority::Low)
        .unwrap();
    arbor.add_parent("x", "0").unwrap();
    let view = arbor.view(None, true);

    assert_eq!(ids(view.node_children(Some("10")).unwrap()), vec!["11", "x"]);
    assert_eq!(view.next_node("11", Some("10")).unwrap().as_deref(), Some("x"));
    assert_eq!(view.next_node("x", Some("10")).unwrap(), None);
    assert!(view.next_node("x", Some("5")).is_err());
    assert_eq!(view.nth_child(None, 2).unwrap().as_ref(), "2");
    assert_eq!(view.node_for_path(&path(&["0", "x"])).unwrap().as_ref(), "x");
    assert!(view.node_for_path(&path(&["1", "x"])).is_err());
}

// ═══════════════════════════════════════════════════════════════
// INCREMENTAL UPDATES
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_add_and_modify_emit_inview_events() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    let log = EventLog::new();
    view.subscribe(Signal::NodeAddedInview, log.clone());
    view.subscribe(Signal::NodeDeletedInview, log.clone());

    arbor
        .add_node(Node::new("n", item("red", 1)), Some("0"), Priority::Low)
        .unwrap();
    arbor.modify_node_with("n", |it| it.color = "blue").unwrap();

    assert_eq!(
        log.kinds(),
        vec![
            EventKind::AddedInView {
                node_id: "n".into(),
                path: path(&["0", "n"]),
            },
            EventKind::DeletedInView {
                node_id: "n".into(),
                path: path(&["0", "n"]),
            },
        ]
    );
    assert!(!view.has_child("0"));
}

#[test]
fn test_hidden_node_leaves_parent_events_modified() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    arbor
        .add_node(Node::new("hidden", item("blue", 1)), None, Priority::Low)
        .unwrap();
    let log = EventLog::new();
    view.subscribe_all(log.clone());

    arbor.move_node("hidden", Some("1")).unwrap();

    assert_eq!(log.count_signal(Signal::NodeAddedInview), 0);
    assert!(log
        .of_signal(Signal::NodeModifiedInview)
        .iter()
        .any(|e| e.node_id() == "1"));
    assert!(!view.has_child("1"));
}

#[test]
fn test_removal_of_displayed_parent_reattaches_children() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("green", None, false, true).unwrap();

    arbor.remove_node("12", false).unwrap();

    assert_eq!(view.paths_for_node("13"), vec![path(&["13"])]);
    assert_eq!(view.paths_for_node("14"), vec![path(&["13", "14"])]);
    assert!(view.paths_for_node("12").is_empty());
    view.projection().unwrap().validate().unwrap();

    arbor.remove_node("13", true).unwrap();
    assert!(!view.is_displayed("14"));
    assert_eq!(ids(view.all_nodes()), vec!["10", "11"]);
}

#[test]
fn test_incremental_matches_fresh_view() {
    let arbor = colored_tree();
    let live = arbor.view(None, true);
    live.apply_filter("leaf", None, false, true).unwrap();

    arbor
        .add_node(Node::new("c", item("red", 3)), Some("3"), Priority::Low)
        .unwrap();
    arbor.remove_node("14", false).unwrap();
    arbor.move_node("5", Some("0")).unwrap();
    arbor.add_parent("8", "11").unwrap();
    arbor.remove_parent("8", "11").unwrap();

    let fresh = arbor.view(None, false);
    fresh.apply_filter("leaf", None, false, true).unwrap();

    assert_eq!(live.print_tree(), fresh.print_tree());
    assert!(!live.is_displayed("3"));
    assert!(live.is_displayed("13"));
    live.projection().unwrap().validate().unwrap();
}

#[test]
fn test_refresh_deletes_then_adds_every_occurrence() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    let log = EventLog::new();
    view.subscribe(Signal::NodeAddedInview, log.clone());
    view.subscribe(Signal::NodeDeletedInview, log.clone());

    view.refilter().unwrap();

    let kinds = log.kinds();
    let deletes = kinds
        .iter()
        .take_while(|e| matches!(e, EventKind::DeletedInView { .. }))
        .count();
    assert_eq!(deletes, 15);
    assert_eq!(log.count_signal(Signal::NodeAddedInview), 15);
}

// ═══════════════════════════════════════════════════════════════
// SHARED NODES
// ═══════════════════════════════════════════════════════════════

/// `top` holds `mid` and `shared`; `shared` also sits under `mid`
fn diamond() -> arbor::Arbor<common::Item> {
    let arbor = empty_tree();
    for (id, parent) in [("top", None), ("mid", Some("top")), ("shared", Some("top"))] {
        arbor
            .add_node(Node::new(id, item("red", 1)), parent, Priority::Low)
            .unwrap();
    }
    arbor.add_parent("shared", "mid").unwrap();
    arbor
}

fn deleted_paths(log: &EventLog) -> Vec<String> {
    let mut paths: Vec<String> = log
        .kinds()
        .into_iter()
        .filter_map(|e| match e {
            EventKind::DeletedInView { path, .. } => Some(path.to_string()),
            _ => None,
        })
        .collect();
    paths.sort();
    paths
}

#[test]
fn test_recursive_remove_of_diamond() {
    let arbor = diamond();
    let view = arbor.view(None, true);
    assert_eq!(view.paths_for_node("shared").len(), 2);
    let log = EventLog::new();
    view.subscribe(Signal::NodeDeletedInview, log.clone());

    let removed = arbor.remove_node("top", true).unwrap();

    assert_eq!(removed.len(), 3);
    assert!(view.all_nodes().is_empty());
    assert_eq!(view.child_count(None, true), 0);
    assert_eq!(
        deleted_paths(&log),
        vec!["(top)", "(top, mid)", "(top, mid, shared)", "(top, shared)"]
    );
    view.projection().unwrap().validate().unwrap();
}

#[test]
fn test_recursive_remove_of_diamond_in_filtered_view() {
    let arbor = diamond();
    let leaves = arbor.view(None, true);
    leaves.apply_filter("leaf", None, false, true).unwrap();
    let reds = arbor.view(None, true);
    reds.apply_filter("red", None, false, true).unwrap();
    assert_eq!(ids(leaves.all_nodes()), vec!["shared"]);

    arbor.remove_node("top", true).unwrap();

    assert!(leaves.all_nodes().is_empty());
    assert!(reds.all_nodes().is_empty());
    reds.projection().unwrap().validate().unwrap();
}

#[test]
fn test_removing_one_parent_leaves_one_path() {
    let arbor = empty_tree();
    for (id, parent) in [("a", None), ("b", None), ("c", Some("a"))] {
        arbor
            .add_node(Node::new(id, item("red", 1)), parent, Priority::Low)
            .unwrap();
    }
    arbor.add_parent("c", "b").unwrap();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    assert_eq!(view.paths_for_node("c").len(), 2);

    arbor.remove_node("a", false).unwrap();

    assert_eq!(view.paths_for_node("c"), vec![path(&["b", "c"])]);
    assert!(view.is_displayed("c"));
    assert_eq!(ids(view.node_parents("c").unwrap()), vec!["b"]);
    view.projection().unwrap().validate().unwrap();
}

#[test]
fn test_root_order_survives_removal_of_shared_node() {
    let arbor = empty_tree();
    for id in ["n0", "n8", "n1", "n6"] {
        arbor
            .add_node(Node::new(id, item("red", 1)), None, Priority::Low)
            .unwrap();
    }
    let live = arbor.view(None, true);
    live.apply_filter("leaf", None, false, true).unwrap();

    arbor.add_parent("n8", "n6").unwrap();
    assert_eq!(ids(live.node_children(None).unwrap()), vec!["n0", "n8", "n1"]);
    arbor.remove_node("n8", false).unwrap();

    let fresh = arbor.view(None, false);
    fresh.apply_filter("leaf", None, false, true).unwrap();
    assert_eq!(
        ids(live.node_children(None).unwrap()),
        ids(fresh.node_children(None).unwrap())
    );
    assert_eq!(ids(live.node_children(None).unwrap()), vec!["n0", "n1", "n6"]);
}

// ═══════════════════════════════════════════════════════════════
// FILTER MANAGEMENT
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_transparent_filters_are_optional_in_counts() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("green", None, false, true).unwrap();
    view.apply_filter("leaf", Some(FilterParams::new().with("transparent", true)), false, true)
        .unwrap();

    assert_eq!(ids(view.all_nodes()), vec!["14"]);
    assert_eq!(view.count_nodes(&[], true), 1);
    assert_eq!(view.count_nodes(&[], false), 5);

    view.reset_filters(true, true).unwrap();
    assert_eq!(view.list_applied_filters(), vec!["green".to_string()]);
    assert_eq!(view.count_nodes(&["heavy"], true), 5);
    assert_eq!(view.count_nodes(&["red"], true), 0);
}

#[test]
fn test_count_cache_follows_updates() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    assert_eq!(view.count_nodes(&["heavy"], true), 0);

    arbor.modify_node_with("4", |it| it.weight = 40).unwrap();
    assert_eq!(view.count_nodes(&["heavy"], true), 1);
}

#[test]
fn test_unapply_and_reset_restore_content() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    view.apply_filter("heavy", None, false, true).unwrap();
    assert!(view.all_nodes().is_empty());

    assert!(view.unapply_filter("heavy", true).unwrap());
    assert!(!view.unapply_filter("heavy", true).unwrap());
    assert_eq!(view.all_nodes().len(), 5);

    view.apply_filter("blue", None, true, true).unwrap();
    assert_eq!(view.list_applied_filters(), vec!["blue".to_string()]);

    view.reset_filters(true, false).unwrap();
    assert_eq!(view.all_nodes().len(), 15);
}

#[test]
fn test_deferred_refresh_keeps_content() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, false).unwrap();
    assert_eq!(view.all_nodes().len(), 15);
    view.refilter().unwrap();
    assert_eq!(view.all_nodes().len(), 5);
}

// ═══════════════════════════════════════════════════════════════
// ORDER & CONSUMER SYNC
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_registry_reorder_becomes_one_event() {
    let arbor = empty_tree();
    arbor
        .add_node(Node::new("p", item("red", 0)), None, Priority::Low)
        .unwrap();
    for id in ["a", "b", "c"] {
        arbor
            .add_node(Node::new(id, item("red", 0)), Some("p"), Priority::Low)
            .unwrap();
    }
    let view = arbor.view(None, true);
    let log = EventLog::new();
    view.subscribe(Signal::NodeChildrenReordered, log.clone());

    arbor.reorder_children("p", &["c", "a", "b"]).unwrap();

    assert_eq!(
        log.kinds(),
        vec![EventKind::ChildrenReordered {
            node_id: "p".into(),
            path: Some(path(&["p"])),
            new_order: vec![2, 0, 1],
        }]
    );
    assert_eq!(ids(view.node_children(Some("p")).unwrap()), vec!["c", "a", "b"]);
}

#[test]
fn test_comparator_orders_siblings() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();
    let log = EventLog::new();
    view.subscribe(Signal::NodeChildrenReordered, log.clone());

    view.set_comparator(|a, b| b.data().weight.cmp(&a.data().weight))
        .unwrap();

    assert_eq!(ids(view.all_nodes()), vec!["4", "3", "2", "1", "0"]);
    assert_eq!(log.len(), 1);

    arbor
        .add_node(Node::new("mid", item("red", 2)), None, Priority::Low)
        .unwrap();
    assert_eq!(view.nth_child(None, 2).unwrap().as_ref(), "2");
    assert_eq!(view.nth_child(None, 3).unwrap().as_ref(), "mid");
}

#[test]
fn test_emit_current_state_replays_occurrences() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("green", None, false, true).unwrap();
    let log = EventLog::new();
    view.subscribe(Signal::NodeAddedInview, log.clone());

    view.emit_current_state();

    let paths: Vec<_> = log.kinds().iter().filter_map(|e| e.path().cloned()).collect();
    assert_eq!(paths.len(), 5);
    assert_eq!(paths[0], path(&["10"]));
    assert_eq!(paths[4], path(&["10", "11", "12", "13", "14"]));
}

#[test]
fn test_queued_action_runs_once_when_displayed() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();

    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&hits);
    view.queue_action("late", move |id| sink.lock().push(id.to_string()))
        .unwrap();

    arbor
        .add_node(Node::new("late", item("blue", 1)), None, Priority::Low)
        .unwrap();
    assert!(hits.lock().is_empty());

    arbor.modify_node_with("late", |it| it.color = "red").unwrap();
    arbor.modify_node_with("late", |it| it.weight = 2).unwrap();
    assert_eq!(*hits.lock(), vec!["late".to_string()]);

    let sink = Arc::clone(&hits);
    view.queue_action("0", move |id| sink.lock().push(id.to_string()))
        .unwrap();
    assert_eq!(hits.lock().len(), 2);
}

#[test]
fn test_subscriber_can_query_view_reentrantly() {
    let arbor = colored_tree();
    let view = arbor.view(None, true);
    view.apply_filter("red", None, false, true).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reader = view.clone();
    view.subscribe(Signal::NodeAddedInview, move |event: &EventKind| {
        sink.lock().push(reader.paths_for_node(event.node_id()));
    });

    arbor
        .add_node(Node::new("n", item("red", 1)), Some("2"), Priority::Low)
        .unwrap();
    assert_eq!(*seen.lock(), vec![vec![path(&["2", "n"])]]);
}
