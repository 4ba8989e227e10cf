//! File name templates.
//!
//! Templates are filled from the fields of the start document:
//!
//! - `{field}` is replaced by the field's value (`{uid}-` → `c1790369-...-`);
//! - `{field:%Y-%m-%d_%H-%M}` formats a numeric timestamp field with a
//!   strftime pattern in local time.
//!
//! Plain placeholders and format specs are handled by `strfmt`; a placeholder
//! naming a field the document does not have is an error, so a run is never
//! written under a half-rendered name.

use crate::error::{ExportError, ExportResult};
use crate::time::to_local;
use crate::value::{Mapping, MetaValue, Scalar};
use chrono::format::{Item, StrftimeItems};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

fn strftime_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\{([A-Za-z0-9_.\-]+):(%[^}]*)\}").unwrap()
    })
}

/// Text used when substituting a field into a template.
fn field_text(value: &MetaValue) -> String {
    match value {
        MetaValue::Scalar(Scalar::Text(s)) => s.clone(),
        MetaValue::Scalar(s) => s.to_text(),
        other => other.to_string(),
    }
}

/// Render `template` with the given fields.
pub fn render(template: &str, fields: &Mapping) -> ExportResult<String> {
    let template_error = |reason: String| ExportError::Template {
        template: template.to_string(),
        reason,
    };

    let mut failure = None;
    let timed = strftime_placeholder().replace_all(template, |caps: &Captures<'_>| {
        let (name, pattern) = (&caps[1], &caps[2]);
        let rendered = match fields.get(name).map(|v| (v, v.as_f64())) {
            None => Err(format!("unknown field '{name}'")),
            Some((_, None)) => Err(format!("field '{name}' is not a timestamp")),
            Some((_, Some(ts))) => {
                if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                    Err(format!("invalid time format '{pattern}'"))
                } else {
                    to_local(ts)
                        .map(|dt| dt.format(pattern).to_string())
                        .ok_or_else(|| format!("field '{name}' is out of range"))
                }
            }
        };
        rendered.unwrap_or_else(|reason| {
            failure.get_or_insert(reason);
            String::new()
        })
    });
    if let Some(reason) = failure {
        return Err(template_error(reason));
    }

    let vars: HashMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.clone(), field_text(v)))
        .collect();
    strfmt::strfmt(&timed, &vars).map_err(|e| template_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::to_local;
    use crate::value::mapping_from_json;
    use serde_json::json;

    fn fields() -> Mapping {
        mapping_from_json(json!({
            "uid": "abc-123",
            "time": 1000.0,
            "plan_name": "scan",
            "scan_id": 7
        }))
    }

    #[test]
    fn substitutes_fields() {
        assert_eq!(render("{uid}-", &fields()).unwrap(), "abc-123-");
        assert_eq!(
            render("{plan_name}_{scan_id}", &fields()).unwrap(),
            "scan_7"
        );
    }

    #[test]
    fn formats_timestamps() {
        let expected = to_local(1000.0).unwrap().format("%Y-%m-%d").to_string();
        assert_eq!(render("{time:%Y-%m-%d}", &fields()).unwrap(), expected);
    }

    #[test]
    fn missing_field_is_an_error() {
        let err = render("{proposal_id}-", &fields()).unwrap_err();
        assert!(matches!(err, ExportError::Template { .. }));
        assert!(render("{missing:%Y}", &fields()).is_err());
        assert!(render("{uid:%Y}", &fields()).is_err());
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(render("run.nxs", &fields()).unwrap(), "run.nxs");
    }
}
