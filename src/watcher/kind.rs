//! Event kinds and the per-registration kind filter.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Kind of change reported for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An entry appeared in a watched directory.
    Create,
    /// An entry disappeared from a watched directory.
    Delete,
    /// An entry's content or metadata changed.
    Modify,
    /// The native queue dropped records; the caller may need to rescan.
    Overflow,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Create,
        EventKind::Delete,
        EventKind::Modify,
        EventKind::Overflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Modify => "modify",
            EventKind::Overflow => "overflow",
        }
    }

    fn flag(self) -> KindSet {
        match self {
            EventKind::Create => KindSet::CREATE,
            EventKind::Delete => KindSet::DELETE,
            EventKind::Modify => KindSet::MODIFY,
            EventKind::Overflow => KindSet::OVERFLOW,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(EventKind::Create),
            "delete" => Ok(EventKind::Delete),
            "modify" => Ok(EventKind::Modify),
            "overflow" => Ok(EventKind::Overflow),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

bitflags! {
    /// Set of event kinds a registration (and its whole subtree) cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KindSet: u8 {
        const CREATE = 0b0001;
        const DELETE = 0b0010;
        const MODIFY = 0b0100;
        const OVERFLOW = 0b1000;
    }
}

impl KindSet {
    pub fn from_kinds(kinds: &[EventKind]) -> Self {
        kinds
            .iter()
            .fold(KindSet::empty(), |set, kind| set | kind.flag())
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.contains(kind.flag())
    }

    /// Whether a record of `kind` should reach the sink.
    ///
    /// Overflow is always admitted, like the native primitive does.
    pub fn admits(&self, kind: EventKind) -> bool {
        kind == EventKind::Overflow || self.has(kind)
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.has(*kind))
            .collect()
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds().iter().map(EventKind::as_str).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// A resolved change, as delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}
