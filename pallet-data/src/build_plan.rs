use serde::{Deserialize, Serialize};
use toml::value::Table;

/// The build plan: a TOML table mapping dependency names to entries
/// contributed by buildpacks during detection.
///
/// The detector merges per-buildpack fragments into a single plan that is
/// handed to every `bin/build` in the selected group.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct BuildPlan(pub Table);

impl BuildPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a fragment written by one buildpack's detect into the plan.
    ///
    /// Call in group order. An entry whose key ends in `-keep` accumulates:
    /// sub-keys contributed by earlier buildpacks are preserved and only
    /// missing sub-keys are added. Every other entry is replaced wholesale
    /// by the later buildpack; keys only one buildpack mentions are
    /// union-merged.
    pub fn merge_fragment(&mut self, fragment: BuildPlan) {
        for (key, value) in fragment.0 {
            if key.ends_with("-keep") {
                let entry = self
                    .0
                    .entry(key)
                    .or_insert_with(|| toml::Value::Table(Table::new()));

                if let (Some(existing), toml::Value::Table(additions)) =
                    (entry.as_table_mut(), value)
                {
                    for (sub_key, sub_value) in additions {
                        existing.entry(sub_key).or_insert(sub_value);
                    }
                }
            } else {
                self.0.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(toml_str: &str) -> BuildPlan {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn later_entries_replace_earlier_ones() {
        let mut merged = BuildPlan::new();
        merged.merge_fragment(plan("[node]\nversion = \"10\"\nshrinkwrap = true"));
        merged.merge_fragment(plan("[node]\nversion = \"12\""));

        assert_eq!(merged, plan("[node]\nversion = \"12\""));
    }

    #[test]
    fn missing_keys_are_union_merged() {
        let mut merged = BuildPlan::new();
        merged.merge_fragment(plan("[node]\nversion = \"10\""));
        merged.merge_fragment(plan("[ruby]\nversion = \"2.6\""));

        assert_eq!(
            merged,
            plan("[node]\nversion = \"10\"\n[ruby]\nversion = \"2.6\"")
        );
    }

    #[test]
    fn keep_entries_accumulate() {
        let mut merged = BuildPlan::new();
        merged.merge_fragment(plan("[deps-keep]\na = 1"));
        merged.merge_fragment(plan("[deps-keep]\na = 2\nb = 3"));

        // The earlier buildpack's sub-key wins; new sub-keys are added.
        assert_eq!(merged, plan("[deps-keep]\na = 1\nb = 3"));
    }

    #[test]
    fn keep_entry_with_no_earlier_value_is_inserted() {
        let mut merged = BuildPlan::new();
        merged.merge_fragment(plan("[deps-keep]\na = 1"));

        assert_eq!(merged, plan("[deps-keep]\na = 1"));
    }

    #[test]
    fn serializes_as_a_plain_table() {
        let merged = plan("[node]\nversion = \"10\"");
        let rendered = toml::to_string(&merged).unwrap();

        assert!(rendered.contains("[node]"));
        assert!(rendered.contains("version = \"10\""));
    }
}
