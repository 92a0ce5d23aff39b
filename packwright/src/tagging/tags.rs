//! Tag templates and their rendering.

use crate::errors::StepError;
use crate::template::{render, BuildContext};
use crate::ui::Ui;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tag specification: key template to value template.
pub type TagSpec = BTreeMap<String, String>;

/// A rendered tag, ready to send to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Renders both sides of every entry in `spec` against `ctx`.
///
/// Entries are rendered in key order.
///
/// # Errors
///
/// Returns an error naming the key/value pair that failed to render.
pub fn render_tags(spec: &TagSpec, ctx: &BuildContext) -> Result<Vec<Tag>, StepError> {
    spec.iter()
        .map(|(key, value)| {
            let rendered = render(key, ctx).and_then(|k| Ok(Tag::new(k, render(value, ctx)?)));
            rendered.map_err(|e| StepError::new(format!("Error processing tag: {key}:{value} - {e}")))
        })
        .collect()
}

/// Reports each tag as a UI message.
pub fn report_tags(ui: &dyn Ui, tags: &[Tag]) {
    for tag in tags {
        ui.message(&format!("Adding tag: \"{}\": \"{}\"", tag.key, tag.value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::RecordingUi;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn spec(pairs: &[(&str, &str)]) -> TagSpec {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_source_reference() {
        let ctx = BuildContext::new().with_source("ami-123");
        let tags = render_tags(&spec(&[("Name", "built-from-${source}")]), &ctx).unwrap();
        assert_eq!(tags, vec![Tag::new("Name", "built-from-ami-123")]);
    }

    #[test]
    fn test_render_keys_too() {
        let ctx = BuildContext::new().with_region("us-east-1");
        let tags = render_tags(&spec(&[("{{ .BuildRegion }}-owner", "ops")]), &ctx).unwrap();
        assert_eq!(tags, vec![Tag::new("us-east-1-owner", "ops")]);
    }

    #[test]
    fn test_render_error_names_pair() {
        let ctx = BuildContext::new();
        let err = render_tags(&spec(&[("Team", "${nope}")]), &ctx).unwrap_err();
        assert_eq!(
            err.message,
            "Error processing tag: Team:${nope} - undefined field 'nope'"
        );
    }

    #[test]
    fn test_report_tags_format() {
        let ui = RecordingUi::new();
        report_tags(&ui, &[Tag::new("Name", "web")]);
        assert!(ui.contains("Adding tag: \"Name\": \"web\""));
    }

    proptest! {
        #[test]
        fn prop_plain_specs_render_unchanged(
            entries in prop::collection::btree_map("[A-Za-z0-9 _.:/-]{1,12}", "[A-Za-z0-9 _.:/-]{0,24}", 1..6)
        ) {
            let ctx = BuildContext::new().with_source("ami-1").with_region("eu-west-1");
            let tags = render_tags(&entries, &ctx).unwrap();
            let back: TagSpec = tags.into_iter().map(|t| (t.key, t.value)).collect();
            prop_assert_eq!(back, entries);
        }
    }
}
