use std::collections::HashMap;

use crate::clone_os::is_compressed;
use crate::fingerprint::FileMetadata;

/// Why a particular file was picked as the origin, carried alongside the selection so logs
/// and the progress listener can explain the decision the way the original tool's
/// `"using %s as the clone origin (%s)"` diagnostic did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginReason {
    MostHardlinks,
    FirstSeen,
    MostClones,
}

impl OriginReason {
    pub fn as_str(self) -> &'static str {
        match self {
            OriginReason::MostHardlinks => "most hardlinks",
            OriginReason::FirstSeen => "first seen",
            OriginReason::MostClones => "most clones",
        }
    }
}

pub struct OriginSelection {
    pub origin_index: usize,
    pub reason: OriginReason,
}

/// A set where every member already shares one clone id: nothing to replace, the freed bytes
/// are accounted as "already saved" rather than "saved" (§4.6 step 2, first bullet).
pub struct AlreadyUnified;

/// Every member is transparently compressed, so none can serve as a clone origin (§4.6 step
/// 2, second bullet). The whole set is skipped with a diagnostic.
pub struct AllCompressed;

pub enum OriginOutcome {
    Selected(OriginSelection),
    AlreadyUnified(AlreadyUnified),
    AllCompressed(AllCompressed),
}

/// Implements the deterministic priority of §4.6 over a duplicate set with at least two
/// members. A hardlink-count tie keeps whichever member was seen first, matching the set's
/// existing insertion order. A clone-id bucket-count tie instead keeps the smallest clone id,
/// matching `clone_id_tree_max`'s walk of its ascending-ordered tree (ties never overtake an
/// earlier, numerically smaller id).
pub fn select_origin(set: &[FileMetadata]) -> OriginOutcome {
    assert!(set.len() >= 2, "origin selection requires a duplicate set");

    if let Some(index) = most_hardlinked_index(set) {
        return OriginOutcome::Selected(OriginSelection { origin_index: index, reason: OriginReason::MostHardlinks });
    }

    let mut clone_id_counts: HashMap<u64, usize> = HashMap::new();
    for fm in set {
        *clone_id_counts.entry(fm.clone_id).or_insert(0) += 1;
    }

    if clone_id_counts.len() == 1 {
        return OriginOutcome::AlreadyUnified(AlreadyUnified);
    }

    if clone_id_counts.len() == set.len() {
        return match set.iter().position(|fm| !is_compressed(fm.flags)) {
            Some(index) => {
                OriginOutcome::Selected(OriginSelection { origin_index: index, reason: OriginReason::FirstSeen })
            }
            None => OriginOutcome::AllCompressed(AllCompressed),
        };
    }

    let (&largest_id, _) = clone_id_counts
        .iter()
        .max_by_key(|&(&id, &count)| (count, std::cmp::Reverse(id)))
        .expect("set is non-empty");
    let index = set
        .iter()
        .position(|fm| fm.clone_id == largest_id)
        .expect("largest_id came from this set");
    OriginOutcome::Selected(OriginSelection { origin_index: index, reason: OriginReason::MostClones })
}

fn most_hardlinked_index(set: &[FileMetadata]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, fm) in set.iter().enumerate() {
        if fm.nlink > 1 {
            let replace = match best {
                None => true,
                Some(b) => fm.nlink > set[b].nlink,
            };
            if replace {
                best = Some(i);
            }
        }
    }
    best
}
