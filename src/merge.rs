//! Combining context sources into the single context used for one evaluation.
use crate::{Context, ContextSet};

/// Context sources available to one evaluation, in no particular precedence.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextSources<'a> {
    /// Set once for the lifetime of the process.
    pub global: Option<&'a ContextSet>,
    /// Delivered by the server together with the snapshot.
    pub server_default: Option<&'a ContextSet>,
    /// Scoped to the current thread or request.
    pub ambient: Option<&'a ContextSet>,
    /// Passed directly to the call.
    pub passed: Option<&'a ContextSet>,
}

/// Merge context sources.
///
/// Precedence, highest first: passed, ambient, global, server default. The first three replace
/// each other a whole context at a time. Server defaults only fill in properties missing from a
/// context of the same name, so caller-supplied identity always wins.
pub fn merge(sources: ContextSources<'_>) -> ContextSet {
    let mut merged = sources.ambient.cloned().unwrap_or_default();
    overlay(&mut merged, sources.passed);
    underlay(&mut merged, sources.global);
    fill_properties(&mut merged, sources.server_default);
    merged
}

/// Replace contexts in `target` with same-named contexts from `source`.
fn overlay(target: &mut ContextSet, source: Option<&ContextSet>) {
    for context in source.into_iter().flat_map(ContextSet::iter) {
        target.insert(context.clone());
    }
}

/// Add contexts from `source` whose names `target` does not have yet.
fn underlay(target: &mut ContextSet, source: Option<&ContextSet>) {
    for context in source.into_iter().flat_map(ContextSet::iter) {
        if target.get(&context.name).is_none() {
            target.insert(context.clone());
        }
    }
}

/// Add properties from `source` that `target` does not have yet, property by property.
fn fill_properties(target: &mut ContextSet, source: Option<&ContextSet>) {
    for default in source.into_iter().flat_map(ContextSet::iter) {
        match target.get_mut(&default.name) {
            Some(existing) => fill_context(existing, default),
            None => {
                target.insert(default.clone());
            }
        }
    }
}

fn fill_context(existing: &mut Context, default: &Context) {
    for (property, value) in &default.properties {
        existing
            .properties
            .entry(property.clone())
            .or_insert_with(|| value.clone());
    }
}
