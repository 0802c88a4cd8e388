use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::clone_os::{is_immutable, ClonePrimitive};
use crate::error::ReplacementError;
use crate::fingerprint::FileMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    Clone,
    Hardlink,
    Symlink,
}

/// What happened to one non-origin member of a duplicate set.
pub enum ReplaceOutcome {
    /// The replacement was performed (or, in dry-run, would have been); `bytes` go to the
    /// `saved` counter.
    Replaced { bytes: u64 },
    /// The member was already equivalent to the origin (already cloned, already hardlinked,
    /// or the symlink already points at it); `bytes` go to `already_saved`.
    AlreadySaved { bytes: u64 },
    /// Skipped outright: hardlinked elsewhere (without `--force`) or immutable. Nothing is
    /// counted.
    Skipped { reason: &'static str },
}

pub struct ReplaceOptions {
    pub mode: ReplaceMode,
    pub dry_run: bool,
    pub force: bool,
}

/// Performs (or simulates, in dry-run) the replacement of `member` with a reference to
/// `origin`, per the skip conditions and protocol of §4.7.
pub fn replace_member(
    origin: &FileMetadata,
    member: &FileMetadata,
    opts: &ReplaceOptions,
    clone_os: &dyn ClonePrimitive,
) -> Result<ReplaceOutcome, ReplacementError> {
    if member.nlink > 1 && !opts.force {
        return Ok(ReplaceOutcome::Skipped { reason: "hardlinked elsewhere" });
    }
    if is_immutable(member.flags) {
        return Ok(ReplaceOutcome::Skipped { reason: "immutable" });
    }

    match opts.mode {
        ReplaceMode::Clone => {
            if member.clone_id == origin.clone_id {
                return Ok(ReplaceOutcome::AlreadySaved { bytes: member.size });
            }
        }
        ReplaceMode::Hardlink => {
            if member.inode == origin.inode && member.device == origin.device {
                return Ok(ReplaceOutcome::AlreadySaved { bytes: member.size });
            }
        }
        ReplaceMode::Symlink => {
            if symlink_already_points_at_origin(&member.path, &origin.path) {
                return Ok(ReplaceOutcome::AlreadySaved { bytes: member.size });
            }
        }
    }

    if opts.dry_run {
        info!(path = %member.path.display(), origin = %origin.path.display(), mode = ?opts.mode, "dry-run: would replace");
        return Ok(ReplaceOutcome::Replaced { bytes: member.size });
    }

    match opts.mode {
        ReplaceMode::Clone => replace_with_clone(origin, member, clone_os),
        ReplaceMode::Hardlink => replace_with_hardlink(origin, member),
        ReplaceMode::Symlink => replace_with_symlink(origin, member),
    }
}

fn staging_path(dst: &Path) -> Result<PathBuf, ReplacementError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let base = dst.file_name().ok_or_else(|| ReplacementError::NameTooLong { path: dst.to_path_buf() })?;

    let mut name = std::ffi::OsString::from(".~.");
    name.push(base);
    let staging = dir.join(name);

    const PATH_MAX: usize = 1024;
    if staging.as_os_str().as_bytes().len() > PATH_MAX {
        return Err(ReplacementError::NameTooLong { path: dst.to_path_buf() });
    }
    Ok(staging)
}

/// §4.7's staging validation: readable, writable, stat succeeds, size > 0. `stat`/size are
/// checked via `fs::metadata`; readable/writable are checked by actually opening the file for
/// both, since permission bits alone don't account for ACLs or the caller's own uid/gid.
fn staging_is_valid(staging: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(staging) else {
        return false;
    };
    if meta.len() == 0 {
        return false;
    }
    std::fs::OpenOptions::new().read(true).write(true).open(staging).is_ok()
}

fn replace_with_clone(
    origin: &FileMetadata,
    member: &FileMetadata,
    clone_os: &dyn ClonePrimitive,
) -> Result<ReplaceOutcome, ReplacementError> {
    let dst = &member.path;
    let staging = staging_path(dst)?;

    if staging.exists() {
        return Err(ReplacementError::StagingExists { path: dst.clone(), staging });
    }

    if let Err(source) = clone_os.clone_file(&origin.path, &staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(ReplacementError::CloneFailed { path: dst.clone(), source });
    }

    if !staging_is_valid(&staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(ReplacementError::InvalidStaging { path: dst.clone() });
    }

    match clone_os.copy_metadata_check(dst, &staging) {
        Ok(true) => {}
        Ok(false) => {
            let _ = std::fs::remove_file(&staging);
            return Err(ReplacementError::MetadataCheckWouldCopyData { path: dst.clone() });
        }
        Err(source) => {
            let _ = std::fs::remove_file(&staging);
            return Err(ReplacementError::MetadataCopyFailed { path: dst.clone(), source });
        }
    }

    if let Err(source) = clone_os.copy_metadata(dst, &staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(ReplacementError::MetadataCopyFailed { path: dst.clone(), source });
    }

    if !staging_is_valid(&staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(ReplacementError::InvalidStaging { path: dst.clone() });
    }

    if let Err(source) = std::fs::rename(&staging, dst) {
        let _ = std::fs::remove_file(&staging);
        return Err(ReplacementError::ReplaceFailed { path: dst.clone(), source });
    }

    // Post-clone validation per §4.7 step 4: a mismatched clone id isn't necessarily wrong —
    // a zero private size still means no bytes of our own are occupied, i.e. the clone
    // "took" even though the filesystem assigned it a fresh id. Anything else is a diagnostic
    // anomaly, not an error (open question (a) in §9: the source counts this as already
    // saved, and so do we).
    match clone_os.clone_id(dst) {
        Ok(new_id) if new_id != origin.clone_id => match clone_os.private_size(dst) {
            Ok(0) => {}
            Ok(private) => warn!(
                path = %dst.display(), private_size = private,
                "clone id diverged from origin and private size is non-zero"
            ),
            Err(e) => warn!(path = %dst.display(), error = %e, "could not re-read private size after clone"),
        },
        Ok(_) => {}
        Err(e) => warn!(path = %dst.display(), error = %e, "could not re-read clone id after clone"),
    }

    Ok(ReplaceOutcome::Replaced { bytes: member.size })
}

fn replace_with_hardlink(origin: &FileMetadata, member: &FileMetadata) -> Result<ReplaceOutcome, ReplacementError> {
    let dst = &member.path;
    std::fs::remove_file(dst).map_err(|source| ReplacementError::HardlinkFailed { path: dst.clone(), source })?;
    std::fs::hard_link(&origin.path, dst)
        .map_err(|source| ReplacementError::HardlinkFailed { path: dst.clone(), source })?;
    Ok(ReplaceOutcome::Replaced { bytes: member.size })
}

fn replace_with_symlink(origin: &FileMetadata, member: &FileMetadata) -> Result<ReplaceOutcome, ReplacementError> {
    let dst = &member.path;
    let relative = relative_symlink_target(dst, &origin.path);
    std::fs::remove_file(dst).map_err(|source| ReplacementError::SymlinkFailed { path: dst.clone(), source })?;
    std::os::unix::fs::symlink(&relative, dst)
        .map_err(|source| ReplacementError::SymlinkFailed { path: dst.clone(), source })?;
    Ok(ReplaceOutcome::Replaced { bytes: member.size })
}

fn symlink_already_points_at_origin(dst: &Path, origin: &Path) -> bool {
    match std::fs::read_link(dst) {
        Ok(target) => {
            let resolved = dst.parent().unwrap_or_else(|| Path::new(".")).join(&target);
            match (resolved.canonicalize(), origin.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        Err(_) => false,
    }
}

/// Computes a relative path from `dirname(dst)` to `src`, per §4.7's symlink protocol: strip
/// the longest common directory prefix, emit one `..` per remaining `dst`-side directory,
/// then append `src`'s tail.
fn relative_symlink_target(dst: &Path, src: &Path) -> PathBuf {
    let dst_dir = dst.parent().unwrap_or_else(|| Path::new("."));
    let dst_components: Vec<_> = dst_dir.components().collect();
    let src_components: Vec<_> = src.components().collect();

    let common = dst_components
        .iter()
        .zip(src_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..dst_components.len() {
        out.push("..");
    }
    for comp in &src_components[common..] {
        out.push(comp.as_os_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone_os::tests::FakeClonePrimitive;
    use std::path::PathBuf;

    fn meta(path: &str, device: u64, inode: u64, nlink: u64, flags: u32, clone_id: u64) -> FileMetadata {
        FileMetadata {
            path: PathBuf::from(path),
            device,
            inode,
            nlink,
            flags,
            size: 4,
            depth: 0,
            clone_id,
            first_byte: b'a',
            last_byte: b'a',
            hash: Some([0u8; 32]),
        }
    }

    #[test]
    fn relative_symlink_strips_common_prefix_and_adds_updirs() {
        let dst = Path::new("/foo/bar/baz/a.txt");
        let src = Path::new("/foo/baz/quz/zzz/a.txt");
        let rel = relative_symlink_target(dst, src);
        assert_eq!(rel, PathBuf::from("../../baz/quz/zzz/a.txt"));
    }

    #[test]
    fn relative_symlink_same_directory_has_no_updirs() {
        let dst = Path::new("/foo/bar/b.txt");
        let src = Path::new("/foo/bar/a.txt");
        assert_eq!(relative_symlink_target(dst, src), PathBuf::from("a.txt"));
    }

    #[test]
    fn hardlinked_member_is_skipped_without_force() {
        let origin = meta("origin", 1, 1, 1, 0, 1);
        let member = meta("member", 1, 2, 2, 0, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Clone, dry_run: true, force: false };
        let fake = FakeClonePrimitive::new();
        match replace_member(&origin, &member, &opts, &fake).unwrap() {
            ReplaceOutcome::Skipped { reason } => assert_eq!(reason, "hardlinked elsewhere"),
            _ => panic!("expected skip"),
        }
    }

    #[test]
    fn immutable_member_is_skipped() {
        let origin = meta("origin", 1, 1, 1, 0, 1);
        let member = meta("member", 1, 2, 1, crate::clone_os::UF_IMMUTABLE, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Clone, dry_run: true, force: false };
        let fake = FakeClonePrimitive::new();
        match replace_member(&origin, &member, &opts, &fake).unwrap() {
            ReplaceOutcome::Skipped { reason } => assert_eq!(reason, "immutable"),
            _ => panic!("expected skip"),
        }
    }

    #[test]
    fn already_cloned_member_counts_as_already_saved() {
        let origin = meta("origin", 1, 1, 1, 0, 42);
        let member = meta("member", 1, 2, 1, 0, 42);
        let opts = ReplaceOptions { mode: ReplaceMode::Clone, dry_run: true, force: false };
        let fake = FakeClonePrimitive::new();
        match replace_member(&origin, &member, &opts, &fake).unwrap() {
            ReplaceOutcome::AlreadySaved { bytes } => assert_eq!(bytes, 4),
            _ => panic!("expected already-saved"),
        }
    }

    #[test]
    fn dry_run_clone_counts_bytes_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let member_path = dir.path().join("member");
        std::fs::write(&origin_path, b"data").unwrap();
        std::fs::write(&member_path, b"data").unwrap();

        let origin = meta(origin_path.to_str().unwrap(), 1, 1, 1, 0, 1);
        let member = meta(member_path.to_str().unwrap(), 1, 2, 1, 0, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Clone, dry_run: true, force: false };
        let fake = FakeClonePrimitive::new();

        match replace_member(&origin, &member, &opts, &fake).unwrap() {
            ReplaceOutcome::Replaced { bytes } => assert_eq!(bytes, 4),
            _ => panic!("expected replaced"),
        }
        assert!(member_path.exists(), "dry run must not touch the filesystem");
    }

    #[test]
    fn real_clone_replaces_member_via_fake_primitive() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let member_path = dir.path().join("member");
        std::fs::write(&origin_path, b"data").unwrap();
        std::fs::write(&member_path, b"data").unwrap();

        let origin = meta(origin_path.to_str().unwrap(), 1, 1, 1, 0, 1);
        let member = meta(member_path.to_str().unwrap(), 1, 2, 1, 0, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Clone, dry_run: false, force: false };
        let fake = FakeClonePrimitive::new();
        fake.set_clone_id(&origin_path, 1);

        match replace_member(&origin, &member, &opts, &fake).unwrap() {
            ReplaceOutcome::Replaced { bytes } => assert_eq!(bytes, 4),
            _ => panic!("expected replaced"),
        }
        assert_eq!(fake.clone_id(&member_path).unwrap(), fake.clone_id(&origin_path).unwrap());
        assert!(!staging_path(&member_path).unwrap().exists());
    }

    #[test]
    fn real_hardlink_replaces_member() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let member_path = dir.path().join("member");
        std::fs::write(&origin_path, b"data").unwrap();
        std::fs::write(&member_path, b"data").unwrap();

        let origin_meta = std::fs::metadata(&origin_path).unwrap();
        use std::os::unix::fs::MetadataExt;
        let origin = meta(origin_path.to_str().unwrap(), origin_meta.dev(), origin_meta.ino(), 1, 0, 1);
        let member = meta(member_path.to_str().unwrap(), 1, 999, 1, 0, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Hardlink, dry_run: false, force: false };
        let fake = FakeClonePrimitive::new();

        replace_member(&origin, &member, &opts, &fake).unwrap();
        let new_meta = std::fs::metadata(&member_path).unwrap();
        assert_eq!(new_meta.ino(), origin_meta.ino());
    }

    #[test]
    fn real_symlink_replaces_member_with_relative_link() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let member_path = dir.path().join("member");
        std::fs::write(&origin_path, b"data").unwrap();
        std::fs::write(&member_path, b"data").unwrap();

        let origin = meta(origin_path.to_str().unwrap(), 1, 1, 1, 0, 1);
        let member = meta(member_path.to_str().unwrap(), 1, 2, 1, 0, 2);
        let opts = ReplaceOptions { mode: ReplaceMode::Symlink, dry_run: false, force: false };
        let fake = FakeClonePrimitive::new();

        replace_member(&origin, &member, &opts, &fake).unwrap();
        let target = std::fs::read_link(&member_path).unwrap();
        assert_eq!(target, PathBuf::from("origin"));
    }

    #[test]
    fn staging_is_valid_rejects_empty_and_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(!staging_is_valid(&empty), "a zero-length staging file must never pass validation");

        let missing = dir.path().join("does-not-exist");
        assert!(!staging_is_valid(&missing));

        let unreadable = dir.path().join("unreadable");
        std::fs::write(&unreadable, b"data").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&unreadable, std::fs::Permissions::from_mode(0o000)).unwrap();
        // root ignores permission bits, so this assertion only holds for an unprivileged run.
        if unsafe { libc::geteuid() } != 0 {
            assert!(!staging_is_valid(&unreadable), "a file with no rw permission bits must fail validation");
        }
        std::fs::set_permissions(&unreadable, std::fs::Permissions::from_mode(0o600)).unwrap();
    }
}
