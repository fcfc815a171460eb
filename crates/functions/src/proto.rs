//! Helpers for working with Google-style JSON resources.
//!
//! The central piece is [`field_masks`], which computes the `updateMask` for a
//! PATCH request from the JSON body that will be sent. A JSON `null` marks a
//! field the caller wants cleared: it contributes a mask path but is removed
//! from the wire body by [`prune_nulls`].

use serde_json::Value;

use crate::error::{Error, Result};

/// Compute the dot-paths of every field set in `object`.
///
/// * Scalars, nulls and non-empty arrays emit their own path.
/// * Empty arrays emit nothing.
/// * Empty objects emit their own path (the root object yields `""`).
/// * Paths listed in `do_not_recurse` are emitted once and not descended into.
#[must_use]
pub fn field_masks(object: &Value, do_not_recurse: &[&str]) -> Vec<String> {
    let mut masks = Vec::new();
    let mut prefixes = Vec::new();
    collect_masks(&mut prefixes, object, do_not_recurse, &mut masks);
    masks
}

fn collect_masks<'a>(
    prefixes: &mut Vec<&'a str>,
    cursor: &'a Value,
    do_not_recurse: &[&str],
    masks: &mut Vec<String>,
) {
    let entries = match cursor {
        Value::Array(items) if items.is_empty() => return,
        Value::Object(entries) => entries,
        _ => {
            masks.push(prefixes.join("."));
            return;
        }
    };

    if entries.is_empty() {
        masks.push(prefixes.join("."));
        return;
    }

    for (key, value) in entries {
        prefixes.push(key);
        let path = prefixes.join(".");
        if do_not_recurse.contains(&path.as_str()) {
            masks.push(path);
        } else {
            collect_masks(prefixes, value, do_not_recurse, masks);
        }
        prefixes.pop();
    }
}

/// Remove every `null` object member, recursively.
pub fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(entries) => {
            entries.retain(|_, v| !v.is_null());
            entries.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

/// Serialize a resource into a wire body: nulls are dropped.
///
/// # Errors
/// Returns an error if the resource cannot be serialized.
pub fn to_body<T: serde::Serialize>(resource: &T) -> Result<Value> {
    let mut body = serde_json::to_value(resource)?;
    prune_nulls(&mut body);
    Ok(body)
}

/// Update mask for `resource`, joined the way the `updateMask` query expects.
///
/// # Errors
/// Returns an error if the resource cannot be serialized.
pub fn update_mask<T: serde::Serialize>(resource: &T, do_not_recurse: &[&str]) -> Result<String> {
    let value = serde_json::to_value(resource)?;
    Ok(field_masks(&value, do_not_recurse).join(","))
}

/// Render whole seconds as a protobuf duration string (`"60s"`).
#[must_use]
pub fn duration_from_seconds(seconds: u32) -> String {
    format!("{seconds}s")
}

/// Render fractional seconds as a protobuf duration string (`"0.1s"`).
#[must_use]
pub fn duration_from_secs_f64(seconds: f64) -> String {
    format!("{seconds}s")
}

/// Parse a protobuf duration string (`"60s"`, `"0.100s"`) into seconds.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] when the string is not a duration.
pub fn seconds_from_duration(duration: &str) -> Result<f64> {
    duration
        .strip_suffix('s')
        .and_then(|n| n.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| Error::MalformedProviderData(format!("invalid duration {duration:?}")))
}

/// Parse a duration string into whole seconds, rejecting fractional values.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] for malformed or fractional durations.
pub fn whole_seconds_from_duration(duration: &str) -> Result<u32> {
    let seconds = seconds_from_duration(duration)?;
    if seconds.fract() != 0.0 || seconds > f64::from(u32::MAX) {
        return Err(Error::MalformedProviderData(format!(
            "duration {duration:?} is not a whole number of seconds"
        )));
    }
    // Range checked above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(seconds as u32)
}

/// Expand the `name@` service-account shorthand to a full email.
///
/// # Errors
/// Returns [`Error::InvalidEndpoint`] when the value is empty or not an email.
pub fn expand_service_account(service_account: &str, project: &str) -> Result<String> {
    if service_account.is_empty() {
        return Err(Error::InvalidEndpoint(
            "service account cannot be an empty string".to_string(),
        ));
    }
    if !service_account.contains('@') {
        return Err(Error::InvalidEndpoint(format!(
            "service account {service_account:?} must be of the form 'name@' or 'name@{project}.iam.gserviceaccount.com'"
        )));
    }
    if service_account.ends_with('@') {
        return Ok(format!("{service_account}{project}.iam.gserviceaccount.com"));
    }
    Ok(service_account.to_string())
}

/// IAM member string for a service account (`serviceAccount:<email>`).
///
/// # Errors
/// See [`expand_service_account`].
pub fn format_service_account(service_account: &str, project: &str) -> Result<String> {
    Ok(format!(
        "serviceAccount:{}",
        expand_service_account(service_account, project)?
    ))
}

/// Map an invoker list onto IAM members.
///
/// `private` grants nobody, `public` grants `allUsers`, anything else is a
/// service account.
///
/// # Errors
/// See [`expand_service_account`].
pub fn invoker_members(invoker: &[String], project: &str) -> Result<Vec<String>> {
    if invoker.iter().any(|i| i == "private") {
        return Ok(Vec::new());
    }
    if invoker.iter().any(|i| i == "public") {
        return Ok(vec!["allUsers".to_string()]);
    }
    invoker
        .iter()
        .map(|i| format_service_account(i, project))
        .collect()
}

/// Split `projects/{p}/locations/{l}/{collection}/{id}` into its parts.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] when the name has another shape.
pub fn split_resource_name<'a>(
    name: &'a str,
    collection: &str,
) -> Result<(&'a str, &'a str, &'a str)> {
    match name.split('/').collect::<Vec<_>>().as_slice() {
        ["projects", project, "locations", location, c, id]
            if *c == collection && !id.is_empty() =>
        {
            Ok((*project, *location, *id))
        }
        _ => Err(Error::MalformedProviderData(format!(
            "resource name {name:?} is not of the form projects/*/locations/*/{collection}/*"
        ))),
    }
}
