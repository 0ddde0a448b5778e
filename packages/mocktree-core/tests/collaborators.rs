use std::cell::RefCell;
use std::rc::Rc;

use mocktree_core::{EventKind, TreeConfig};
use mocktree_test_support::{seeded, tree};
use serde_json::{json, Value};

#[test]
fn auth_changes_are_ordered_with_data_writes() {
    let root = tree();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let log = seen.clone();
    root.auth().on_auth(move |user| {
        log.borrow_mut().push(format!("auth:{}", user.is_some()));
    });
    let log = seen.clone();
    root.child("doc").unwrap().on(EventKind::Value, move |snapshot, _| {
        log.borrow_mut().push(format!("doc:{}", snapshot.val()));
    });

    root.child("doc").unwrap().set(json!(1)).unwrap();
    root.auth().change_auth_state(Some(json!({"uid": "u1"})));
    root.child("doc").unwrap().set(json!(2)).unwrap();
    root.flush().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec!["auth:false", "doc:null", "doc:1", "auth:true", "doc:2"]
    );
    assert_eq!(root.child("doc").unwrap().auth().get_auth(), Some(json!({"uid": "u1"})));
}

#[test]
fn query_window_tracks_priority_changes() {
    let root = seeded(json!({
        "a": {".value": 1, ".priority": 1},
        "b": {".value": 2, ".priority": 2},
        "c": {".value": 3, ".priority": 3}
    }));
    let windows = Rc::new(RefCell::new(Vec::<Value>::new()));
    let sink = windows.clone();
    let query = root.query().start_at(2, None);
    query.on_value(move |snapshot| sink.borrow_mut().push(snapshot.val()));
    root.flush().unwrap();
    assert_eq!(query.keys(), vec!["b", "c"]);

    root.child("a").unwrap().set(json!(10)).unwrap();
    root.child("a").unwrap().set_priority(5);
    root.flush().unwrap();
    assert_eq!(query.keys(), vec!["b", "c", "a"]);
    // Only `value` events re-evaluate the window; a move alone does not.
    assert_eq!(*windows.borrow(), vec![json!({"b": 2, "c": 3})]);

    root.child("b").unwrap().set(json!(20)).unwrap();
    root.flush().unwrap();
    assert_eq!(
        windows.borrow().last(),
        Some(&json!({"a": 10, "b": 20, "c": 3}))
    );
}

#[test]
fn config_selects_root_path_and_auto_flush() {
    let config = TreeConfig::from_toml("root_path = \"/mock\"\nauto_flush = \"immediate\"").unwrap();
    let root = mocktree_core::Reference::new(&config);
    let child = root.child("users/ada").unwrap();
    assert_eq!(child.path(), "/mock/users/ada");
    child.set(json!("here")).unwrap();
    assert_eq!(root.get_data(), json!({"users": {"ada": "here"}}));
}
