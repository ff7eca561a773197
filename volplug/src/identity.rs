//! Volume identity helpers.
//!
//! A fully-qualified volume name is `name@label`, where the label names the
//! datastore holding the volume. Bare names are allowed on the wire and are
//! resolved against the volumes the backends report.

use std::collections::BTreeSet;

use volplug_shared::constants::naming::LABEL_DELIMITER;
use volplug_shared::errors::{VolplugError, VolplugResult};

/// Split `name@label` into its parts. A missing or empty label is `None`.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(LABEL_DELIMITER) {
        Some((bare, label)) if !label.is_empty() => (bare, Some(label)),
        Some((bare, _)) => (bare, None),
        None => (name, None),
    }
}

/// Datastore label of `name`, if it carries one.
pub fn datastore_label(name: &str) -> Option<&str> {
    split_name(name).1
}

pub fn is_fully_qualified(name: &str) -> bool {
    datastore_label(name).is_some()
}

/// Build `name@label`.
pub fn full_name(name: &str, label: &str) -> String {
    format!("{}{}{}", name, LABEL_DELIMITER, label)
}

/// Pick the single known volume matching the bare name `name`.
///
/// Returns `Ok(None)` when nothing matches and `AmbiguousVolumeName` when
/// the name exists under more than one label.
pub fn disambiguate<'a, I>(name: &str, known: I) -> VolplugResult<Option<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let matches: BTreeSet<&str> = known
        .into_iter()
        .filter(|candidate| split_name(candidate).0 == name)
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next().map(str::to_string)),
        _ => Err(VolplugError::AmbiguousVolumeName {
            name: name.to_string(),
            labels: matches
                .iter()
                .map(|m| datastore_label(m).unwrap_or_default().to_string())
                .collect(),
        }),
    }
}
