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

//! The wire format of notifications exchanged between processes.
//!
//! An envelope is a single version byte followed by the CBOR encoding of
//! `Envelope`.

use serde::{Deserialize, Serialize};

use super::{ChangeType, EntityKind};
use crate::support::error::Error;

const ENVELOPE_VERSION: u8 = 1;

/// Identifies the store handle that sent an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub pid: u32,
    /// Distinguishes store handles within one process.
    pub serno: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Origin,
    pub payload: Payload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Change {
        change: ChangeType,
        kind: EntityKind,
        ids: Vec<i64>,
    },
    /// Sent at the end of an explicit flush. Carries no change.
    Barrier,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut data = vec![ENVELOPE_VERSION];
        serde_cbor::to_writer(&mut data, self)?;
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        match data.split_first() {
            Some((&ENVELOPE_VERSION, rest)) => {
                serde_cbor::from_slice(rest).map_err(Into::into)
            },
            Some((&version, _)) => {
                Err(Error::UnsupportedVersion(version.into()))
            },
            None => Err(Error::UnsupportedVersion(0)),
        }
    }
}

/// Splits one change into envelopes carrying at most `max_segment_size` ids
/// each.
pub fn segment(
    origin: Origin,
    change: ChangeType,
    kind: EntityKind,
    ids: &[i64],
    max_segment_size: usize,
) -> impl Iterator<Item = Envelope> + '_ {
    ids.chunks(max_segment_size.max(1)).map(move |chunk| Envelope {
        origin,
        payload: Payload::Change {
            change,
            kind,
            ids: chunk.to_vec(),
        },
    })
}
