// Copyright 2026 relink Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hash-keyed rewrite engine for image references in nested JSON.
//!
//! A project document is an arbitrarily nested tree of objects and arrays
//! in which any object may carry an `"image"` field. Many objects may
//! share one locator value. Collection passes extract `{hash -> locator}`
//! maps by predicate; the rewrite pass re-hashes every node's *current*
//! value so a single map entry updates every node sharing that locator.
//!
//! Traversal is explicit recursion over `serde_json::Value` with the
//! accumulator passed through each call. Objects without the field are
//! silently skipped; traversal never fails.

use crate::hash::hash_locator;
use serde_json::Value;
use std::collections::HashMap;

/// The object field holding an image locator.
pub const IMAGE_FIELD: &str = "image";

/// True for absolute URLs that are not embedded data URIs.
pub fn is_remote_url(locator: &str) -> bool {
    locator.starts_with("http") && !locator.starts_with("data:image")
}

/// True for embedded `data:image/...` URIs.
pub fn is_data_uri(locator: &str) -> bool {
    locator.starts_with("data:image")
}

/// True for non-empty locators that are neither absolute nor embedded —
/// relative paths that need resolution against a base.
pub fn is_relative(locator: &str) -> bool {
    !locator.is_empty() && !locator.starts_with("http") && !locator.starts_with("data:image")
}

/// Collect `{hash -> locator}` for every `image` value satisfying
/// `predicate`. Duplicate hashes coalesce — harmless, they are the same
/// locator by construction.
pub fn collect<P>(doc: &Value, predicate: P) -> HashMap<String, String>
where
    P: Fn(&str) -> bool,
{
    let mut refs = HashMap::new();
    collect_into(doc, &predicate, &mut refs);
    refs
}

fn collect_into<P>(node: &Value, predicate: &P, refs: &mut HashMap<String, String>)
where
    P: Fn(&str) -> bool,
{
    match node {
        Value::Object(fields) => {
            if let Some(Value::String(raw)) = fields.get(IMAGE_FIELD) {
                let locator = raw.trim();
                if predicate(locator) {
                    refs.insert(hash_locator(locator), locator.to_string());
                }
            }
            for value in fields.values() {
                collect_into(value, predicate, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_into(item, predicate, refs);
            }
        }
        _ => {}
    }
}

/// Collect relative `image` values resolved against `base`.
///
/// Keys are hashes of the *relative* value as it appears in the document,
/// so the subsequent rewrite pass matches the untouched nodes; values are
/// `"{base}/{relative}"`.
pub fn collect_relative(doc: &Value, base: &str) -> HashMap<String, String> {
    let mut refs = HashMap::new();
    collect_relative_into(doc, base, &mut refs);
    refs
}

fn collect_relative_into(node: &Value, base: &str, refs: &mut HashMap<String, String>) {
    match node {
        Value::Object(fields) => {
            if let Some(Value::String(raw)) = fields.get(IMAGE_FIELD) {
                let locator = raw.trim();
                if is_relative(locator) {
                    refs.insert(hash_locator(locator), format!("{base}/{locator}"));
                }
            }
            for value in fields.values() {
                collect_relative_into(value, base, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_relative_into(item, base, refs);
            }
        }
        _ => {}
    }
}

/// Rewrite every `image` field whose current value hashes to a key in
/// `updates`, in place.
///
/// The hash is recomputed per node rather than reusing a collection pass:
/// one map entry must update every node sharing that locator.
pub fn rewrite(doc: &mut Value, updates: &HashMap<String, String>) {
    match doc {
        Value::Object(fields) => {
            if let Some(field) = fields.get_mut(IMAGE_FIELD) {
                if let Value::String(current) = field {
                    let key = hash_locator(current.trim());
                    if let Some(next) = updates.get(&key) {
                        *field = Value::String(next.trim().to_string());
                    }
                }
            }
            for value in fields.values_mut() {
                rewrite(value, updates);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite(item, updates);
            }
        }
        _ => {}
    }
}

/// Replace the leading `old_prefix` with `new_prefix` on every `image`
/// value that starts with it; all other values untouched.
pub fn rewrite_prefix(doc: &mut Value, old_prefix: &str, new_prefix: &str) {
    match doc {
        Value::Object(fields) => {
            if let Some(Value::String(current)) = fields.get_mut(IMAGE_FIELD) {
                if let Some(rest) = current.strip_prefix(old_prefix).map(str::to_string) {
                    *current = format!("{new_prefix}{rest}");
                }
            }
            for value in fields.values_mut() {
                rewrite_prefix(value, old_prefix, new_prefix);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_prefix(item, old_prefix, new_prefix);
            }
        }
        _ => {}
    }
}

/// Blank `field` wherever the key exists, regardless of its current value.
pub fn clear_field(doc: &mut Value, field: &str) {
    match doc {
        Value::Object(fields) => {
            if fields.contains_key(field) {
                fields.insert(field.to_string(), Value::String(String::new()));
            }
            for value in fields.values_mut() {
                clear_field(value, field);
            }
        }
        Value::Array(items) => {
            for item in items {
                clear_field(item, field);
            }
        }
        _ => {}
    }
}
