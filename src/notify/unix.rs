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

//! Notification between processes via UNIX datagram sockets.
//!
//! Every store handle binds a datagram socket named `$pid.$serno` in the
//! store's `notify` directory. To send an envelope, the sender transmits it
//! to every other socket in the directory. A send which fails because nobody
//! is listening on the socket any more unlinks it. This ensures that sockets
//! left behind by dead processes are cleaned up expediently.
//!
//! Sends never block. An envelope which a peer's full receive queue refuses
//! is kept in a per-peer backlog, and later envelopes for that peer queue up
//! behind it so that the peer sees them in order. Backlogs are retried on
//! every send and by `barrier`, which only succeeds once every backlog is
//! empty or its peer is gone.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;
use nix::poll::{poll, PollFd, PollFlags};

use super::channel::NotificationChannel;
use super::envelope::Origin;
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKind as _};
use crate::support::log_prefix::LogPrefix;

/// Upper bound on the size of one envelope.
const MAX_DATAGRAM: usize = 65536;

/// Pause between passes over the backlogs while `barrier` waits.
const BARRIER_RETRY: Duration = Duration::from_millis(5);

pub struct UnixChannel {
    log_prefix: LogPrefix,
    dir: PathBuf,
    name: String,
    sock_path: PathBuf,
    recv: UnixDatagram,
    send: UnixDatagram,
    barrier_timeout: Duration,
    /// Envelopes not yet accepted by each peer, oldest first. Never holds an
    /// empty queue.
    backlog: BTreeMap<PathBuf, VecDeque<Vec<u8>>>,
}

enum Delivery {
    Sent,
    Refused,
    Gone,
}

impl UnixChannel {
    /// Binds the socket for `origin` in `dir`, creating `dir` if needed.
    ///
    /// `barrier_timeout` bounds how long `barrier` waits for peers to accept
    /// backlogged envelopes.
    pub fn bind(
        log_prefix: LogPrefix,
        dir: PathBuf,
        origin: Origin,
        barrier_timeout: Duration,
    ) -> Result<Self, Error> {
        file_ops::ensure_dir(&dir, 0o770)?;

        let name = format!("{}.{}", origin.pid, origin.serno);
        let sock_path = dir.join(&name);
        // Remove any stray socket left over from a prior process that had the
        // same PID.
        fs::remove_file(&sock_path).ignore(io::ErrorKind::NotFound)?;

        let recv = UnixDatagram::bind(&sock_path)?;
        recv.set_nonblocking(true)?;
        let send = UnixDatagram::unbound()?;
        send.set_nonblocking(true)?;

        Ok(Self {
            log_prefix,
            dir,
            name,
            sock_path,
            recv,
            send,
            barrier_timeout,
            backlog: BTreeMap::new(),
        })
    }

    /// Pushes as much of every backlog as the peers will take.
    fn drain_backlog(&mut self) {
        let mut gone = Vec::new();
        for (path, queue) in &mut self.backlog {
            while let Some(data) = queue.front() {
                match deliver(&self.send, &self.log_prefix, data, path) {
                    Delivery::Sent => {
                        queue.pop_front();
                    },
                    Delivery::Refused => break,
                    Delivery::Gone => {
                        gone.push(path.clone());
                        break;
                    },
                }
            }
        }

        for path in gone {
            self.backlog.remove(&path);
            let _ = fs::remove_file(&path);
        }
        self.backlog.retain(|_, queue| !queue.is_empty());
    }
}

fn deliver(
    sock: &UnixDatagram,
    log_prefix: &LogPrefix,
    data: &[u8],
    path: &Path,
) -> Delivery {
    match sock.send_to(data, path) {
        Ok(_) => Delivery::Sent,
        Err(e)
            if io::ErrorKind::ConnectionRefused == e.kind()
                || io::ErrorKind::NotFound == e.kind() =>
        {
            Delivery::Gone
        },
        Err(e) if io::ErrorKind::WouldBlock == e.kind() => Delivery::Refused,
        Err(e) => {
            warn!(
                "{} Failed to notify {}: {}",
                log_prefix,
                path.display(),
                e,
            );
            Delivery::Refused
        },
    }
}

impl NotificationChannel for UnixChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.drain_backlog();

        let dirit = match fs::read_dir(&self.dir) {
            Ok(d) => d,
            // Directory removed out from under us; nobody's listening
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in dirit {
            let entry = entry?;
            if entry.file_name().to_str() == Some(&self.name) {
                continue;
            }

            let path = entry.path();
            if let Some(queue) = self.backlog.get_mut(&path) {
                queue.push_back(data.to_vec());
                continue;
            }

            match deliver(&self.send, &self.log_prefix, data, &path) {
                Delivery::Sent => (),
                Delivery::Refused => {
                    self.backlog
                        .entry(path)
                        .or_default()
                        .push_back(data.to_vec());
                },
                Delivery::Gone => {
                    let _ = fs::remove_file(&path);
                },
            }
        }

        Ok(())
    }

    fn barrier(&mut self) -> Result<(), Error> {
        let deadline = Instant::now() + self.barrier_timeout;
        loop {
            self.drain_backlog();
            if self.backlog.is_empty() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(
                    "{} {} peers are not accepting notifications",
                    self.log_prefix,
                    self.backlog.len(),
                );
                return Err(Error::UndeliveredNotifications(
                    self.backlog.len(),
                ));
            }

            thread::sleep(BARRIER_RETRY);
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.recv.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            },
            Err(e) if io::ErrorKind::WouldBlock == e.kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool, Error> {
        let mut pollfd = [PollFd::new(
            self.recv.as_raw_fd(),
            PollFlags::POLLIN | PollFlags::POLLERR,
        )];
        let timeout =
            nix::libc::c_int::try_from(timeout.as_millis()).unwrap_or(-1);

        loop {
            match poll(&mut pollfd, timeout) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => continue,
                Err(e) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::Other,
                        e.to_string(),
                    )))
                },
            }
        }
    }
}

impl Drop for UnixChannel {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.sock_path);
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::support::error::FailureKind;

    fn bind(dir: &TempDir, serno: u64) -> UnixChannel {
        bind_with_timeout(dir, serno, Duration::from_secs(30))
    }

    fn bind_with_timeout(
        dir: &TempDir,
        serno: u64,
        barrier_timeout: Duration,
    ) -> UnixChannel {
        UnixChannel::bind(
            LogPrefix::new("unix-test".to_owned()),
            dir.path().join("notify"),
            Origin {
                pid: std::process::id(),
                serno,
            },
            barrier_timeout,
        )
        .unwrap()
    }

    /// Enough 1 kB envelopes to overflow any peer's receive queue.
    fn flood() -> Vec<Vec<u8>> {
        (0..1000u32)
            .map(|i| {
                let mut data = i.to_be_bytes().to_vec();
                data.resize(1024, 0);
                data
            })
            .collect()
    }

    fn drain(channel: &mut UnixChannel, into: &mut Vec<Vec<u8>>) {
        while let Some(data) = channel.try_recv().unwrap() {
            into.push(data);
        }
    }

    #[test]
    fn send_reaches_peers_only() {
        let tmpdir = TempDir::new().unwrap();
        let mut a = bind(&tmpdir, 1);
        let mut b = bind(&tmpdir, 2);

        assert!(!b.wait(Duration::from_millis(1)).unwrap());
        a.send(b"hello").unwrap();
        a.barrier().unwrap();

        assert!(b.wait(Duration::from_secs(5)).unwrap());
        assert_eq!(Some(b"hello".to_vec()), b.try_recv().unwrap());
        assert_eq!(None, b.try_recv().unwrap());
        assert_eq!(None, a.try_recv().unwrap());
    }

    #[test]
    fn dead_sockets_are_cleaned_up() {
        let tmpdir = TempDir::new().unwrap();
        let mut a = bind(&tmpdir, 1);

        // A socket file with nobody bound to it, as left by a crash.
        let stale = tmpdir.path().join("notify").join("1.1");
        drop(UnixDatagram::bind(&stale).unwrap());
        assert!(stale.exists());

        a.send(b"hello").unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn drop_unlinks_socket() {
        let tmpdir = TempDir::new().unwrap();
        let a = bind(&tmpdir, 1);
        let path = a.sock_path.clone();
        assert!(path.exists());
        drop(a);
        assert!(!path.exists());
    }

    #[test]
    fn barrier_waits_for_slow_reader() {
        let tmpdir = TempDir::new().unwrap();
        let mut a = bind(&tmpdir, 1);
        let mut b = bind(&tmpdir, 2);
        let sent = flood();

        let expected = sent.len();
        let reader = thread::spawn(move || {
            let mut received = Vec::new();
            let deadline = Instant::now() + Duration::from_secs(30);
            while received.len() < expected && Instant::now() < deadline {
                b.wait(Duration::from_millis(10)).unwrap();
                thread::sleep(Duration::from_millis(1));
                drain(&mut b, &mut received);
            }
            received
        });

        for data in &sent {
            a.send(data).unwrap();
        }
        a.barrier().unwrap();
        assert!(a.backlog.is_empty());
        assert_eq!(sent, reader.join().unwrap());
    }

    #[test]
    fn barrier_reports_stuck_peer() {
        let tmpdir = TempDir::new().unwrap();
        let mut a = bind_with_timeout(&tmpdir, 1, Duration::from_millis(20));
        let mut b = bind(&tmpdir, 2);
        let sent = flood();
        for data in &sent {
            a.send(data).unwrap();
        }

        let err = a.barrier().unwrap_err();
        assert_matches!(Error::UndeliveredNotifications(1), &err);
        assert_eq!(FailureKind::Transient, err.kind());

        // Nothing was dropped; once b catches up the barrier clears.
        let mut received = Vec::new();
        for _ in 0..10_000 {
            drain(&mut b, &mut received);
            match a.barrier() {
                Ok(()) => break,
                Err(Error::UndeliveredNotifications(1)) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        drain(&mut b, &mut received);
        assert_eq!(sent, received);
    }

    #[test]
    fn vanished_peer_releases_backlog() {
        let tmpdir = TempDir::new().unwrap();
        let mut a = bind(&tmpdir, 1);
        let b = bind(&tmpdir, 2);
        for data in &flood() {
            a.send(data).unwrap();
        }
        assert!(!a.backlog.is_empty());

        drop(b);
        a.barrier().unwrap();
        assert!(a.backlog.is_empty());
    }
}
