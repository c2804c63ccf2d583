//! Request path normalization.
//!
//! A requested path is reduced to a cache key: its non-empty segments joined
//! by `/`, without leading or trailing separators. Under
//! [`TraversalPolicy::Safe`] the `.` and `..` segments are dropped as well,
//! so a key can never name anything outside the base path.
//!
//! ```
//! use oxpath_core::{TraversalPolicy, normalize::normalize};
//!
//! assert_eq!(normalize("//a/../b//c", TraversalPolicy::Safe).as_deref(), Some("a/b/c"));
//! assert_eq!(normalize("//a/../b//c", TraversalPolicy::Allow).as_deref(), Some("a/../b/c"));
//! assert_eq!(normalize("/../", TraversalPolicy::Safe), None);
//! ```

use std::path::{Path, PathBuf};

use crate::config::TraversalPolicy;

/// Normalize `raw` into a cache key.
///
/// Returns `None` when nothing addressable remains (empty input, only
/// separators, or only `.`/`..` in safe mode).
pub fn normalize(raw: &str, policy: TraversalPolicy) -> Option<String> {
    let keep = |segment: &&str| match policy {
        TraversalPolicy::Safe => !matches!(*segment, "" | "." | ".."),
        TraversalPolicy::Allow => !segment.is_empty(),
    };

    let mut key = String::with_capacity(raw.len());
    for segment in raw.split('/').filter(keep) {
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(segment);
    }

    (!key.is_empty()).then_some(key)
}

/// Absolute path a key refers to under `base`.
pub fn target_path(base: &Path, key: &str) -> PathBuf {
    base.join(key)
}
