//! Tests for key derivation

use prometheus_workqueue::core::{
    default_key_fn, key_from_parts, meta_namespace_key, split_meta_namespace_key, KeyError,
};
use prometheus_workqueue::infra::Object;

#[test]
fn test_same_object_same_key() {
    let a = Object::new("default", "web").with_data("v", "1");
    let b = Object::new("default", "web").with_data("v", "2");
    assert_eq!(meta_namespace_key(&a), meta_namespace_key(&b));
    assert_ne!(
        meta_namespace_key(&a).unwrap(),
        meta_namespace_key(&Object::new("other", "web")).unwrap()
    );
}

#[test]
fn test_key_round_trips_through_split() {
    let obj = Object::new("kube-system", "dns");
    let key = meta_namespace_key(&obj).unwrap();
    assert_eq!(split_meta_namespace_key(&key).unwrap(), (Some("kube-system"), "dns"));

    let node = Object::cluster_scoped("node-1");
    let key = meta_namespace_key(&node).unwrap();
    assert_eq!(key, key_from_parts(None, "node-1"));
    assert_eq!(split_meta_namespace_key(&key).unwrap(), (None, "node-1"));
}

#[test]
fn test_default_key_fn_matches_meta_namespace_key() {
    let key_fn = default_key_fn::<Object>();
    let obj = Object::new("default", "shared");
    assert_eq!(key_fn(&obj), meta_namespace_key(&obj));
}

#[test]
fn test_nameless_object_has_no_key() {
    let obj = Object::new("default", "");
    assert_eq!(meta_namespace_key(&obj), Err(KeyError::MissingName));
}
