//! Path resolution.
//!
//! Paths resolve component by component, each step dispatching through the
//! current directory's `lookup`. An absolute path starts at the process's
//! root vnode, a relative one at its current working directory. `.` and
//! `..` are ordinary directory entries (every directory carries both), so
//! the walker needs no special cases for them.

use crate::{fs::Vnode, KernelError};

/// Longest accepted name of a single path component.
pub const NAME_MAX: usize = 28;

/// Longest accepted path.
pub const PATH_MAX: usize = 1024;

fn components(path: &str) -> Result<impl Iterator<Item = &str>, KernelError> {
    if path.len() > PATH_MAX {
        return Err(KernelError::NameTooLong);
    }
    if path.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    Ok(path.split('/').filter(|c| !c.is_empty()))
}

fn starting_point<'v>(base: &'v Vnode, root: &'v Vnode, path: &str) -> &'v Vnode {
    if path.starts_with('/') { root } else { base }
}

/// Resolves `path` to a vnode.
///
/// Relative paths start at `base`, absolute ones at `root`.
pub fn lookup_namev(base: &Vnode, root: &Vnode, path: &str) -> Result<Vnode, KernelError> {
    let mut cur = starting_point(base, root, path).clone();
    for name in components(path)? {
        if name.len() > NAME_MAX {
            return Err(KernelError::NameTooLong);
        }
        cur = cur.lookup(name)?;
    }
    Ok(cur)
}

/// Resolves everything but the last component of `path`.
///
/// Returns the parent directory's vnode and the final name. Fails with
/// [`KernelError::InvalidArgument`] when the path names no final component
/// (`"/"` or an empty path) and [`KernelError::NotDirectory`] when the
/// resolved parent is not a directory.
pub fn dir_namev<'a>(
    base: &Vnode,
    root: &Vnode,
    path: &'a str,
) -> Result<(Vnode, &'a str), KernelError> {
    let mut names = components(path)?.peekable();
    let mut cur = starting_point(base, root, path).clone();
    let mut last: Option<&str> = None;

    while let Some(name) = names.next() {
        if name.len() > NAME_MAX {
            return Err(KernelError::NameTooLong);
        }
        if names.peek().is_none() {
            last = Some(name);
            break;
        }
        cur = cur.lookup(name)?;
    }

    let name = last.ok_or(KernelError::InvalidArgument)?;
    if !cur.is_dir() {
        return Err(KernelError::NotDirectory);
    }
    Ok((cur, name))
}

/// Resolves `path` for `open`.
///
/// With `create` set, a missing final component is created as a regular
/// file in its parent directory; all other failures propagate.
pub fn open_namev(
    base: &Vnode,
    root: &Vnode,
    path: &str,
    create: bool,
) -> Result<Vnode, KernelError> {
    match lookup_namev(base, root, path) {
        Ok(vnode) => Ok(vnode),
        Err(KernelError::NoSuchEntry) if create => {
            let (parent, name) = dir_namev(base, root, path)?;
            parent.create(name)
        }
        Err(e) => Err(e),
    }
}
