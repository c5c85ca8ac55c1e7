//! Helpers shared by the mock modules

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mock store, ignoring poisoning from a panicked test thread
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Text of the first `<tag>` element
pub(crate) fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let start = xml.find(&open)?;
    let rest = &xml[start + open.len()..];
    let body_start = rest.find('>')? + 1;
    if rest[..body_start].ends_with("/>") {
        return None;
    }
    let body = &rest[body_start..];
    let end = body.find(&format!("</{tag}>"))?;
    Some(body[..end].trim())
}

/// Value of `attr` on the first `<tag>` element
pub(crate) fn attribute<'a>(xml: &'a str, tag: &str, attr: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let start = xml.find(&open)?;
    let rest = &xml[start + open.len()..];
    let element = &rest[..rest.find('>')?];
    let needle = format!("{attr}=");
    let pos = element.find(&needle)? + needle.len();
    let quoted = &element[pos..];
    let quote = quoted.chars().next()?;
    let value = &quoted[1..];
    Some(&value[..value.find(quote)?])
}
