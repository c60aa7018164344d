#![no_main]

//! Feeds a sequence of list snapshots through one `IterableDiffer` and
//! checks that replaying each emitted change set reproduces the snapshot.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use viewcore_detect::{IterableDiffer, Value, apply_operations};

#[derive(Debug, Arbitrary)]
struct Input {
    track_by_parity: bool,
    snapshots: Vec<Vec<u8>>,
}

fn items(raw: &[u8]) -> Vec<Value> {
    raw.iter()
        .take(64)
        .map(|b| Value::from(u32::from(b % 8)))
        .collect()
}

fn texts(values: &[Value]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

fuzz_target!(|input: Input| {
    let mut differ = if input.track_by_parity {
        IterableDiffer::with_track_by(|_, item| {
            Value::from(item.as_number().map_or(0.0, |n| n % 2.0))
        })
    } else {
        IterableDiffer::new()
    };

    let mut previous: Vec<Value> = Vec::new();
    for raw in input.snapshots.iter().take(16) {
        let current = items(raw);
        let Ok(changes) = differ.diff_items(&Value::list(current.clone())) else {
            panic!("lists are always diffable");
        };
        let replayed = match changes {
            Some(changes) => {
                assert_eq!(changes.records.len(), current.len());
                apply_operations(&previous, &changes.operations())
            }
            None => previous.clone(),
        };
        assert_eq!(texts(&replayed), texts(&current));
        assert_eq!(texts(&differ.collection()), texts(&current));
        previous = current;
    }
});
