mod common;

use common::{customer, product};
use serde_json::json;
use syncline_engine::hasher::{canonical_json, hash_value};
use syncline_engine::{content_hash, has_changed};
use syncline_types::{CustomerInsights, CustomerSegment, EntityRecord};

#[test]
fn hash_is_hex_sha256() {
    let hash = content_hash(&customer("1", "a@example.com", "Ada"));
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn identifiers_do_not_affect_hash() {
    let external = customer("17", "a@example.com", "Ada");
    let local = customer("0190f1f0-0000-7000-8000-000000000000", "a@example.com", "Ada");
    assert_eq!(content_hash(&external), content_hash(&local));
    assert!(!has_changed(&external, &local));
}

#[test]
fn comparable_field_change_is_detected() {
    let before = product("1", "SKU-1", 10.0);
    let after = product("1", "SKU-1", 12.5);
    assert!(has_changed(&before, &after));
}

#[test]
fn insights_do_not_affect_hash() {
    let plain = customer("1", "a@example.com", "Ada");
    let mut enriched = plain.clone();
    if let EntityRecord::Customer(c) = &mut enriched {
        c.insights = Some(CustomerInsights {
            order_count: 3,
            completed_orders: 3,
            lifetime_value: 900.0,
            segment: CustomerSegment::Startup,
            acquisition_date: None,
            last_interaction_date: None,
        });
    }
    assert_eq!(content_hash(&plain), content_hash(&enriched));
}

#[test]
fn canonical_json_sorts_keys_at_every_level() {
    let value = json!({"b": 1, "a": {"y": [2, {"d": 0, "c": 1}], "x": null}});
    assert_eq!(
        canonical_json(&value),
        r#"{"a":{"x":null,"y":[2,{"c":1,"d":0}]},"b":1}"#
    );
}

#[test]
fn hash_value_ignores_key_order() {
    let a = json!({"name": "Ada", "email": "a@example.com"});
    let b = json!({"email": "a@example.com", "name": "Ada"});
    assert_eq!(hash_value(&a), hash_value(&b));
}
