//! Replica identity and view (leader epoch) bookkeeping.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::*;

/// The network identity of a single replica: an address and a port.
///
/// Equality, hashing and ordering are all derived structurally, which is
/// what gives the group a deterministic ordering independent of arrival
/// order — required to pick a deterministic initial leader.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Host {
    addr: IpAddr,
    port: u16,
}

impl Host {
    /// Builds a new `Host` from an address and a port.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    /// The replica's address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The replica's port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// An epoch of the protocol: an ordered membership list plus a view
/// number. The leader of a view is a deterministic function of both.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct View {
    members: Vec<Host>,
    view_number: u32,
}

impl View {
    /// Builds the initial view out of an ordered membership list.
    ///
    /// Fails with `ErrorKind::Config` if `members` is too small to
    /// tolerate even a single Byzantine fault (`n >= 3f+1`, `f >= 1`
    /// meaning `n >= 4`).
    pub fn new(members: Vec<Host>, view_number: u32) -> Result<Self> {
        if members.len() < 4 {
            return Err("view must have at least 3f+1 = 4 members")
                .simple_msg(ErrorKind::Config, "view must have at least 3f+1 = 4 members");
        }
        Ok(Self {
            members,
            view_number,
        })
    }

    /// The ordered membership list of this view.
    pub fn members(&self) -> &[Host] {
        &self.members
    }

    /// The number of replicas in this view (`n`).
    pub fn n(&self) -> usize {
        self.members.len()
    }

    /// The maximum number of Byzantine replicas this view tolerates.
    pub fn f(&self) -> usize {
        (self.members.len() - 1) / 3
    }

    /// The quorum size for the prepare phase: `2f+1`.
    pub fn prepare_quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// The quorum size for the commit phase: `f+1`.
    pub fn commit_quorum(&self) -> usize {
        self.f() + 1
    }

    /// The current view number.
    pub fn view_number(&self) -> u32 {
        self.view_number
    }

    /// The deterministic leader of this view.
    pub fn leader(&self) -> Host {
        self.leader_at(self.view_number)
    }

    /// The deterministic leader of a hypothetical view numbered `view_number`,
    /// holding the membership list fixed.
    pub fn leader_at(&self, view_number: u32) -> Host {
        let index = (view_number as usize) % self.members.len();
        self.members[index]
    }

    /// Whether `host` is the leader of the current view.
    pub fn is_leader(&self, host: Host) -> bool {
        self.leader() == host
    }

    /// Whether `host` would be the leader of view `view_number`.
    pub fn is_leader_at(&self, host: Host, view_number: u32) -> bool {
        self.leader_at(view_number) == host
    }

    /// Advances the view number by one, installing a new leader.
    pub fn increment_view_number(&mut self) {
        self.view_number = self.view_number.wrapping_add(1);
    }
}
