//! Debug serialization of a maxtree's parent array, gated behind the `dump`
//! feature so the default build carries no `serde`/`serde_json` dependency.

use serde::Serialize;

#[derive(Serialize)]
struct ParentDump<'a> {
    n: usize,
    parents: &'a [u32],
}

/// Serializes `parents` to pretty-printed JSON, e.g. for a CLI
/// `--dump-parents` flag.
pub fn parents_to_json(parents: &[u32]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&ParentDump {
        n: parents.len(),
        parents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let parents = vec![0u32, 0, 1, 1];
        let json = parents_to_json(&parents).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["n"], 4);
        assert_eq!(value["parents"][2], 1);
    }
}
