//-
// Copyright (c) 2023, the Mailstore developers
//
// This file is part of Mailstore.
//
// Mailstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstore is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Mailstore. If not, see <http://www.gnu.org/licenses/>.

//! File helpers for the content store and the notification directory.

use std::fs;
use std::io::{self, Write as _};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

/// Writes a new file at `path` holding `data`, with permissions `mode`.
///
/// The data is staged and synced in `tmp`, which must be on the same file
/// system, and then linked into place, so readers never see a partial file.
/// Fails with `AlreadyExists` if something is already at `path`.
pub fn write_new(
    tmp: &Path,
    path: &Path,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix("staged.")
        .tempfile_in(tmp)?;
    staged.write_all(data)?;
    staged
        .as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path)?;
    Ok(())
}

/// Creates `dir` and any missing parents with permissions `mode`.
///
/// An existing directory is left as it is.
pub fn ensure_dir(dir: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new()
        .mode(mode)
        .recursive(true)
        .create(dir)
        .ignore(io::ErrorKind::AlreadyExists)
}

pub trait IgnoreKind {
    /// Treats a failure of the given kind as success.
    fn ignore(self, kind: io::ErrorKind) -> Self;
}

impl IgnoreKind for io::Result<()> {
    fn ignore(self, kind: io::ErrorKind) -> Self {
        match self {
            Err(e) if kind == e.kind() => Ok(()),
            result => result,
        }
    }
}
