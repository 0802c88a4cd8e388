//! The OS-specific "clone a file and copy its metadata" primitive (C10) and the
//! volume-capability probe it's paired with. Both are external collaborators per §1: the core
//! never assumes a particular platform, it only calls through [`ClonePrimitive`].

use std::path::Path;

/// User- and system-immutable flag bits, as defined by `chflags(2)` on BSD-derived systems
/// (macOS/APFS). On platforms without `st_flags` these are never set, so the immutability
/// skip condition in the replacer is simply inert rather than wrong.
pub const UF_IMMUTABLE: u32 = 0x0000_0002;
pub const SF_IMMUTABLE: u32 = 0x0002_0000;

/// Marks a file as transparently compressed (its data lives in an extended attribute rather
/// than in data blocks). Such a file cannot be a clone origin (§4.6).
pub const UF_COMPRESSED: u32 = 0x0000_0020;

pub fn is_immutable(flags: u32) -> bool {
    flags & (UF_IMMUTABLE | SF_IMMUTABLE) != 0
}

pub fn is_compressed(flags: u32) -> bool {
    flags & UF_COMPRESSED != 0
}

/// Per the design notes (§9), `may_share_blocks` is computed by real clone-capable
/// filesystems but never consulted by the replacement decision — it's a hook reserved for a
/// future optimization, not part of today's algorithm.
#[allow(dead_code)]
pub fn may_share_blocks(_flags: u32) -> bool {
    false
}

/// Abstracts the filesystem-clone call and its companions so the core's replacer and
/// fingerprint stage never touch a raw syscall directly. Implementors are platform-specific;
/// tests use an in-memory fake.
pub trait ClonePrimitive: Send + Sync {
    /// Opaque filesystem-provided id such that equal ids imply shared data blocks.
    fn clone_id(&self, path: &Path) -> std::io::Result<u64>;

    /// Whether the volume containing `path` supports CoW file clones.
    fn probe_supports_clone(&self, path: &Path) -> std::io::Result<bool>;

    /// Creates `dst` as a CoW clone of `src`. `dst` must not already exist.
    fn clone_file(&self, src: &Path, dst: &Path) -> std::io::Result<()>;

    /// Returns `true` if copying `dst`'s metadata onto `staging` would touch only metadata,
    /// not file content — a dry-run check performed before the real metadata copy.
    fn copy_metadata_check(&self, dst: &Path, staging: &Path) -> std::io::Result<bool>;

    /// Copies mode, owner, flags, ACLs, and extended attributes from `dst` onto `staging`.
    fn copy_metadata(&self, dst: &Path, staging: &Path) -> std::io::Result<()>;

    /// Bytes occupied by `path` that are not shared with any other file (§4.7 step 4).
    fn private_size(&self, path: &Path) -> std::io::Result<u64>;
}

#[cfg(target_os = "macos")]
pub use apple::AppleClonePrimitive as DefaultClonePrimitive;

#[cfg(not(target_os = "macos"))]
pub use generic::GenericClonePrimitive as DefaultClonePrimitive;

#[cfg(target_os = "macos")]
mod apple {
    use super::ClonePrimitive;
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    // `clonefile(2)` and `copyfile(3)` are both exported by the `libc` crate on Apple targets,
    // the same way the pack's own `copy.rs` calls `libc::clonefile` and builds its flags from
    // `libc::COPYFILE_ACL | libc::COPYFILE_STAT | libc::COPYFILE_XATTR | libc::COPYFILE_DATA` —
    // only `getattrlist`'s variable-length attribute-list protocol has no `libc` binding, so
    // that one entry point is still declared by hand, as `clone.c` in the original tool does.
    extern "C" {
        fn getattrlist(
            path: *const libc::c_char,
            attrlist: *mut libc::c_void,
            attrbuf: *mut libc::c_void,
            attrbufsize: libc::size_t,
            options: libc::c_ulong,
        ) -> libc::c_int;
    }

    const FSOPT_ATTR_CMN_EXTENDED: libc::c_ulong = 0x0000_0020;
    const ATTR_CMNEXT_CLONEID: u32 = 0x0000_0001;
    const ATTR_BITMAP_COUNT: u16 = 5;

    #[repr(C)]
    struct AttrList {
        bitmapcount: u16,
        reserved: u16,
        commonattr: u32,
        volattr: u32,
        dirattr: u32,
        fileattr: u32,
        forkattr: u32,
    }

    #[repr(C)]
    struct UInt64Ref {
        length: u32,
        value: u64,
    }

    fn cpath(path: &Path) -> io::Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
    }

    #[derive(Debug, Default)]
    pub struct AppleClonePrimitive;

    impl AppleClonePrimitive {
        pub fn new() -> Self {
            AppleClonePrimitive
        }
    }

    impl ClonePrimitive for AppleClonePrimitive {
        fn clone_id(&self, path: &Path) -> io::Result<u64> {
            let c_path = cpath(path)?;
            let mut attr_list = AttrList {
                bitmapcount: ATTR_BITMAP_COUNT,
                reserved: 0,
                commonattr: 0,
                volattr: 0,
                dirattr: 0,
                fileattr: 0,
                forkattr: ATTR_CMNEXT_CLONEID,
            };
            let mut buf = UInt64Ref { length: 0, value: 0 };
            let rc = unsafe {
                getattrlist(
                    c_path.as_ptr(),
                    &mut attr_list as *mut _ as *mut libc::c_void,
                    &mut buf as *mut _ as *mut libc::c_void,
                    std::mem::size_of::<UInt64Ref>(),
                    FSOPT_ATTR_CMN_EXTENDED,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(buf.value)
        }

        fn probe_supports_clone(&self, path: &Path) -> io::Result<bool> {
            // `statfs(2)`'s `f_fstypename` is the cheapest reliable signal that we're on APFS;
            // a genuinely robust probe would also check `getattrlist` volume capabilities for
            // `VOL_CAP_INT_CLONE`, but the filesystem-name check matches what the original
            // `is_clonefile_supported` does for the common case.
            let c_path = cpath(path)?;
            let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            let fstype = unsafe {
                std::ffi::CStr::from_ptr(stat.f_fstypename.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            };
            Ok(fstype == "apfs")
        }

        fn clone_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
            let c_src = cpath(src)?;
            let c_dst = cpath(dst)?;
            let rc = unsafe { libc::clonefile(c_src.as_ptr(), c_dst.as_ptr(), 0) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn copy_metadata_check(&self, dst: &Path, staging: &Path) -> io::Result<bool> {
            let c_dst = cpath(dst)?;
            let c_staging = cpath(staging)?;
            let flags: libc::copyfile_flags_t = libc::COPYFILE_CHECK | libc::COPYFILE_METADATA;
            let rc = unsafe {
                libc::copyfile(c_dst.as_ptr(), c_staging.as_ptr(), std::ptr::null_mut(), flags)
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(rc as u32 & libc::COPYFILE_DATA == 0)
        }

        fn copy_metadata(&self, dst: &Path, staging: &Path) -> io::Result<()> {
            let c_dst = cpath(dst)?;
            let c_staging = cpath(staging)?;
            let flags: libc::copyfile_flags_t = libc::COPYFILE_METADATA;
            let rc = unsafe {
                libc::copyfile(c_dst.as_ptr(), c_staging.as_ptr(), std::ptr::null_mut(), flags)
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            xattr::list(dst)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
                .try_for_each(|name| -> io::Result<()> {
                    if let Some(value) =
                        xattr::get(dst, &name).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
                    {
                        xattr::set(staging, &name, &value)
                            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    }
                    Ok(())
                })
        }

        fn private_size(&self, path: &Path) -> io::Result<u64> {
            // APFS exposes this as `ATTR_CMNEXT_PRIVATESIZE` via the same `getattrlist` fork
            // attribute bitmap used for `clone_id`; the field layout is identical (a single
            // 64-bit value), so the same request shape is reused with a different selector.
            const ATTR_CMNEXT_PRIVATESIZE: u32 = 0x0000_0008;
            let c_path = cpath(path)?;
            let mut attr_list = AttrList {
                bitmapcount: ATTR_BITMAP_COUNT,
                reserved: 0,
                commonattr: 0,
                volattr: 0,
                dirattr: 0,
                fileattr: 0,
                forkattr: ATTR_CMNEXT_PRIVATESIZE,
            };
            let mut buf = UInt64Ref { length: 0, value: 0 };
            let rc = unsafe {
                getattrlist(
                    c_path.as_ptr(),
                    &mut attr_list as *mut _ as *mut libc::c_void,
                    &mut buf as *mut _ as *mut libc::c_void,
                    std::mem::size_of::<UInt64Ref>(),
                    FSOPT_ATTR_CMN_EXTENDED,
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(buf.value)
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod generic {
    use super::ClonePrimitive;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    /// Stand-in for platforms without a CoW clone call. `probe_supports_clone` always
    /// reports `false`, so clone mode never attempts a replacement here; `clone_id` still
    /// needs to return *something* stable so the visited tree and origin selector behave
    /// sensibly if a caller asks anyway (e.g. from a unit test), so it derives one from
    /// `(device, inode)` — unique per file, never equal across distinct files, which
    /// correctly reports "no two of these are already clones of each other".
    #[derive(Debug, Default)]
    pub struct GenericClonePrimitive;

    impl GenericClonePrimitive {
        pub fn new() -> Self {
            GenericClonePrimitive
        }
    }

    impl ClonePrimitive for GenericClonePrimitive {
        fn clone_id(&self, path: &Path) -> io::Result<u64> {
            let meta = std::fs::symlink_metadata(path)?;
            let mut hasher = DefaultHasher::new();
            meta.dev().hash(&mut hasher);
            meta.ino().hash(&mut hasher);
            Ok(hasher.finish())
        }

        fn probe_supports_clone(&self, _path: &Path) -> io::Result<bool> {
            Ok(false)
        }

        fn clone_file(&self, _src: &Path, _dst: &Path) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "this platform has no CoW clone primitive",
            ))
        }

        fn copy_metadata_check(&self, _dst: &Path, _staging: &Path) -> io::Result<bool> {
            Ok(true)
        }

        fn copy_metadata(&self, dst: &Path, staging: &Path) -> io::Result<()> {
            let meta = std::fs::metadata(dst)?;
            let perm = meta.permissions();
            std::fs::set_permissions(staging, perm)
        }

        fn private_size(&self, path: &Path) -> io::Result<u64> {
            std::fs::metadata(path).map(|m| m.len())
        }
    }
}
