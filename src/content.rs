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

//! Storage of message bodies.
//!
//! The store only manages the lifecycle of content references. What is
//! behind a reference is an opaque blob to everything except
//! `Store::message`, which decodes it as a `MessageBody`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use rand::{rngs::OsRng, Rng};

use crate::model::MessageBody;
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKind as _};

/// Version written at the front of every encoded body.
const BODY_CODEC_VERSION: u8 = 1;

pub trait ContentStore: Send {
    fn write(&self, content_ref: &str, data: &[u8]) -> Result<(), Error>;
    fn read(&self, content_ref: &str) -> Result<Vec<u8>, Error>;
    /// Removes the blob. Removing a blob which does not exist succeeds.
    fn remove(&self, content_ref: &str) -> Result<(), Error>;
}

impl<T: ContentStore + Sync> ContentStore for std::sync::Arc<T> {
    fn write(&self, content_ref: &str, data: &[u8]) -> Result<(), Error> {
        T::write(self, content_ref, data)
    }

    fn read(&self, content_ref: &str) -> Result<Vec<u8>, Error> {
        T::read(self, content_ref)
    }

    fn remove(&self, content_ref: &str) -> Result<(), Error> {
        T::remove(self, content_ref)
    }
}

/// Generates a fresh content reference.
pub fn new_content_ref() -> String {
    format!("{:016x}{:016x}", OsRng.gen::<u64>(), OsRng.gen::<u64>())
}

pub fn encode_body(body: &MessageBody) -> Result<Vec<u8>, Error> {
    let mut data = vec![BODY_CODEC_VERSION];
    serde_cbor::to_writer(&mut data, body)?;
    Ok(data)
}

pub fn decode_body(data: &[u8]) -> Result<MessageBody, Error> {
    match data.split_first() {
        Some((&BODY_CODEC_VERSION, rest)) => {
            serde_cbor::from_slice(rest).map_err(|_| Error::CorruptContent)
        },
        Some((&version, _)) => Err(Error::UnsupportedVersion(version.into())),
        None => Err(Error::CorruptContent),
    }
}

/// Stores each blob as a file within a directory.
pub struct FileContentStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl FileContentStore {
    /// Creates a content store in `root`, staging writes in `tmp`.
    ///
    /// Both directories are created if they do not exist. They must be on
    /// the same file system.
    pub fn new(root: PathBuf, tmp: PathBuf) -> Result<Self, Error> {
        for dir in [&root, &tmp] {
            file_ops::ensure_dir(dir, 0o700)?;
        }

        Ok(Self { root, tmp })
    }

    fn path(&self, content_ref: &str) -> Result<PathBuf, Error> {
        if content_ref.is_empty()
            || !content_ref.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::CorruptContent);
        }

        Ok(self.root.join(content_ref))
    }
}

impl ContentStore for FileContentStore {
    fn write(&self, content_ref: &str, data: &[u8]) -> Result<(), Error> {
        file_ops::write_new(&self.tmp, &self.path(content_ref)?, 0o600, data)
            .map_err(Into::into)
    }

    fn read(&self, content_ref: &str) -> Result<Vec<u8>, Error> {
        match fs::read(self.path(content_ref)?) {
            Ok(data) => Ok(data),
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                Err(Error::CorruptContent)
            },
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, content_ref: &str) -> Result<(), Error> {
        fs::remove_file(self.path(content_ref)?)
            .ignore(io::ErrorKind::NotFound)
            .map_err(Into::into)
    }
}

/// Keeps blobs in memory, for tests and throwaway stores.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }
}

impl ContentStore for MemoryContentStore {
    fn write(&self, content_ref: &str, data: &[u8]) -> Result<(), Error> {
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        if blobs.contains_key(content_ref) {
            return Err(Error::Io(io::ErrorKind::AlreadyExists.into()));
        }
        blobs.insert(content_ref.to_owned(), data.to_vec());
        Ok(())
    }

    fn read(&self, content_ref: &str) -> Result<Vec<u8>, Error> {
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .get(content_ref)
            .cloned()
            .ok_or(Error::CorruptContent)
    }

    fn remove(&self, content_ref: &str) -> Result<(), Error> {
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .remove(content_ref);
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "content store poisoned"))
}
