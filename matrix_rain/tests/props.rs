use matrix_rain::normalize::{format_value, normalize, MAX_CHARS, MAX_TOKENS};
use matrix_rain::tokens::{BoundedFifo, HeadPool, TokenSource, TokenStreams, ValueToken};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        "[a-zA-Z0-9 ,.]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(10, 256, 12, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..12).prop_map(Value::Array),
            prop::collection::vec(("[A-Za-z]{1,8}", inner), 0..12)
                .prop_map(|kv| Value::Object(kv.into_iter().collect::<Map<String, Value>>())),
        ]
    })
}

proptest! {
    #[test]
    fn fifo_keeps_last_items_in_order(items in prop::collection::vec(any::<u32>(), 0..300), cap in 1usize..64) {
        let mut fifo = BoundedFifo::new(cap);
        for &i in &items {
            fifo.push(i);
        }
        let kept: Vec<u32> = fifo.iter().copied().collect();
        let skip = items.len().saturating_sub(cap);
        prop_assert_eq!(kept, items[skip..].to_vec());
        prop_assert!(fifo.len() <= cap);
    }

    #[test]
    fn head_pool_is_bounded(n in 0usize..600, cap in 1usize..300) {
        let mut pool = HeadPool::new(cap);
        for i in 0..n {
            if let Some(t) = ValueToken::new(format!("T{i}"), i.to_string()) {
                pool.push(t);
            }
        }
        prop_assert_eq!(pool.len(), n.min(cap));
        prop_assert_eq!(pool.next().is_some(), n > 0);
    }

    #[test]
    fn normalize_output_is_bounded(payload in arb_json()) {
        let out = normalize(&payload);
        prop_assert!(out.tokens.len() <= MAX_TOKENS);
        prop_assert!(out.char_stream.chars().count() <= MAX_CHARS);
        prop_assert!(out.tokens.iter().all(|t| !t.value.is_empty()));
    }

    #[test]
    fn ingesting_anything_respects_buffers(payload in arb_json(), repeat in 1usize..8) {
        let streams = TokenStreams::default();
        let out = normalize(&payload);
        streams.ingest(&out, repeat);
        let depth = streams.depth();
        prop_assert!(depth.values <= matrix_rain::tokens::VALUE_CAPACITY);
        prop_assert!(depth.chars <= matrix_rain::tokens::CHAR_CAPACITY);
        prop_assert_eq!(streams.take_value_or_reuse().is_some(), !out.tokens.is_empty());
    }

    #[test]
    fn two_decimal_format_is_idempotent(x in -1.0e9f64..1.0e9) {
        let once = format_value(&x.to_string());
        prop_assert_eq!(format_value(&once), once.clone());
    }
}
