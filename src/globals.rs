//! Process-wide globals: injection around a running case and `${VAR}` interpolation.
//!
//! Globals live in the process environment, so a case body reads them with
//! [`std::env::var`]. Injection is only sound while a single case runs at a
//! time, which the runner guarantees.

use std::collections::BTreeMap;
use std::ffi::OsString;

/// Globals injected for the lifetime of the guard.
///
/// Dropping the guard puts back each variable's previous value, or removes it
/// if it was previously unset. This also happens when the case panics.
#[derive(Debug)]
#[must_use = "globals are removed as soon as the guard is dropped"]
pub struct InjectedGlobals {
    previous: Vec<(String, Option<OsString>)>,
}

impl InjectedGlobals {
    /// Sets every global, or none of them if any name or value is unusable.
    pub fn inject(globals: &BTreeMap<String, String>) -> Result<Self, String> {
        for (key, value) in globals {
            check_global(key, value)?;
        }

        let mut previous = Vec::with_capacity(globals.len());
        for (key, value) in globals {
            previous.push((key.clone(), std::env::var_os(key)));
            // SAFETY: cases run one at a time on the runner thread, and no other
            // runner thread reads or writes these variables concurrently.
            unsafe {
                std::env::set_var(key, value);
            }
        }
        Ok(Self { previous })
    }
}

impl Drop for InjectedGlobals {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain(..).rev() {
            // SAFETY: see `inject`.
            unsafe {
                match value {
                    Some(v) => std::env::set_var(&key, v),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

/// Rejects names and values the process environment cannot hold.
pub fn check_global(key: &str, value: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("global name must not be empty".to_string());
    }
    if key.contains(['=', '\0']) {
        return Err(format!("global name {key:?} must not contain '=' or NUL"));
    }
    if value.contains('\0') {
        return Err(format!("global {key:?} has a value containing NUL"));
    }
    Ok(())
}

/// Expands `${NAME}` references in `value`.
///
/// Names are looked up in `known` first, then in the host environment.
pub fn interpolate(value: &str, known: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 2..];
        let close = tail
            .find('}')
            .ok_or_else(|| format!("unclosed reference in {value:?}"))?;
        let name = &tail[..close];
        let resolved = known
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .ok_or_else(|| format!("variable '{name}' is not set"))?;
        out.push_str(&resolved);
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Expands and checks every value of a globals map against `known`.
pub fn interpolate_all(
    globals: &BTreeMap<String, String>,
    known: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, String> {
    globals
        .iter()
        .map(|(k, v)| {
            let expanded = interpolate(v, known).map_err(|e| format!("global '{k}': {e}"))?;
            check_global(k, &expanded)?;
            Ok((k.clone(), expanded))
        })
        .collect()
}
