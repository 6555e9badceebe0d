//! Subtree traversal over JSON values
//!
//! A path is an ordered sequence of object keys. Traversal fails on any
//! step that is absent or not an object; assignment requires the parent
//! of the leaf to exist but creates the leaf key itself.

use serde_json::Value;

/// Join a path for error reporting: `["a", "b"]` becomes `"a.b"`.
pub fn join_path(path: &[&str]) -> String {
    path.join(".")
}

/// Walk `path` into `root` and return the leaf, or None if any step is
/// absent or not an object.
pub fn get_path<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for step in path {
        current = current.as_object()?.get(*step)?;
    }
    Some(current)
}

/// Assign `value` at `path` inside `root`.
///
/// Every step but the last must resolve to an existing object; the final
/// key is created or overwritten in that parent. Returns false (root
/// unchanged) when the walk fails. An empty path is the caller's case:
/// it means replacing the whole value and is not handled here.
pub fn set_path(root: &mut Value, path: &[&str], value: Value) -> bool {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return false,
    };

    let mut current = root;
    for step in parents {
        current = match current.as_object_mut().and_then(|m| m.get_mut(*step)) {
            Some(next) => next,
            None => return false,
        };
    }

    match current.as_object_mut() {
        Some(map) => {
            map.insert((*last).to_string(), value);
            true
        }
        None => false,
    }
}
