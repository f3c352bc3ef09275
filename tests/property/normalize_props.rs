//! Property-based tests for record normalization and frame decoding.
//!
//! Uses proptest to verify:
//! 1. `normalize` never panics, whatever JSON it is handed.
//! 2. Flags absent from a record always normalize to `false`.
//! 3. A snake-case record's string fields survive normalization unchanged.
//! 4. Arbitrary text never panics `codec::decode` (returns `Err` gracefully).

use parley_proto::codec;
use parley_proto::normalize::normalize;
use proptest::prelude::*;
use serde_json::{Map, Value, json};

/// Strategy for arbitrary JSON values a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("ID".to_string()),
                    Just("content".to_string()),
                    Just("Delivered".to_string()),
                    Just("created_at".to_string()),
                    "[a-zA-Z_]{1,10}",
                ],
                inner,
                0..8
            )
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn normalize_never_panics(record in arb_json()) {
        let _ = normalize(&record);
    }

    #[test]
    fn missing_flags_default_to_false(
        id in "[a-z0-9]{1,12}",
        content in ".{1,64}",
    ) {
        let msg = normalize(&json!({ "id": id, "content": content }));
        prop_assert!(!msg.delivered);
        prop_assert!(!msg.read);
        prop_assert!(!msg.is_broadcast);
    }

    #[test]
    fn snake_case_strings_survive(
        id in "[a-z0-9]{1,12}",
        sender in "[a-z]{1,8}",
        recipient in "[a-z]{1,8}",
        content in ".{1,64}",
    ) {
        let msg = normalize(&json!({
            "id": id,
            "sender_id": sender,
            "recipient_id": recipient,
            "content": content,
        }));
        prop_assert_eq!(msg.id.as_str(), id.as_str());
        prop_assert_eq!(msg.sender_id, sender);
        prop_assert_eq!(msg.recipient_id, recipient);
        prop_assert_eq!(msg.content, content);
    }

    #[test]
    fn decode_never_panics_on_text(text in ".{0,256}") {
        let _ = codec::decode(&text);
    }

    #[test]
    fn decode_never_panics_on_json(value in arb_json()) {
        let _ = codec::decode(&value.to_string());
    }
}
