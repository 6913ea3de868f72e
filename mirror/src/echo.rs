//! Echo detection for bidirectional pairs.
//!
//! While one direction of a pair is copying, the other direction sees the
//! copy tool's writes as ordinary changes. A change is an echo when it lands
//! on the same relative path as something the copying side recorded, or when
//! it is the copy tool's partial file for such a path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use syncwatch_directory_watcher::ChangeEvent;

/// Outcome of the echo check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Real change: record it and arm the timer.
    Process,
    /// Side effect of the counterpart's copy run.
    Ignore,
}

/// Classify `change`, observed under `own_root`, against the pending changes
/// of an unsettled counterpart whose root is `counterpart_root`.
pub fn classify<'a>(
    change: &ChangeEvent,
    own_root: &Path,
    counterpart_root: &Path,
    counterpart_pending: impl IntoIterator<Item = &'a ChangeEvent>,
) -> Verdict {
    let own_root = normalize(own_root);
    let counterpart_root = normalize(counterpart_root);

    let echoed = if change.is_directory {
        normalize(&change.path) == own_root
            || counterpart_pending
                .into_iter()
                .filter(|pending| pending.is_directory)
                .any(|pending| {
                    same_relative(
                        &change.path,
                        &own_root,
                        &pending.path,
                        &counterpart_root,
                    )
                })
    } else {
        counterpart_pending
            .into_iter()
            .filter(|pending| !pending.is_directory)
            .any(|pending| {
                same_relative(
                    parent(&change.path),
                    &own_root,
                    parent(&pending.path),
                    &counterpart_root,
                ) && same_file_name(&change.path, &pending.path)
            })
    };

    if echoed {
        Verdict::Ignore
    } else {
        Verdict::Process
    }
}

/// Whether `observed` is `compared` itself or the copy tool's partial file
/// for it (`.name.XXXXXX` in the same directory).
pub fn is_same_or_partial(observed: &OsStr, compared: &OsStr) -> bool {
    if observed == compared {
        return true;
    }
    observed
        .as_encoded_bytes()
        .strip_prefix(b".")
        .and_then(|rest| rest.strip_prefix(compared.as_encoded_bytes()))
        .is_some_and(|rest| rest.starts_with(b"."))
}

fn same_file_name(observed: &Path, compared: &Path) -> bool {
    match (observed.file_name(), compared.file_name()) {
        (Some(observed), Some(compared)) => is_same_or_partial(observed, compared),
        _ => false,
    }
}

/// Both paths lie under their own root at the same relative location.
/// A path outside its root never matches.
fn same_relative(a: &Path, a_root: &Path, b: &Path, b_root: &Path) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    match (a.strip_prefix(a_root), b.strip_prefix(b_root)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn parent(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}
