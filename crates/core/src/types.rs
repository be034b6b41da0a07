//! Shared identifiers and enumerations
//!
//! - `OperationKind`: what a statement does to its relation
//! - `IsolationProtocol`: the protocol a worker runs under
//! - `ValidationProtocol`: the locking variant used by the lock table
//! - `IsolationLevel`: the native level requested from the backing store
//! - `LockKind`: shared or exclusive validation lock
//! - `TemplateId` / `StatementRef` / `WorkerId`: identifiers

use crate::error::{TailorError, TailorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of operation a statement template performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    /// Point read
    Read,
    /// Insert, update or delete
    Write,
    /// Range read
    Scan,
}

impl OperationKind {
    /// Reads and scans both observe data without modifying it
    pub fn is_read(self) -> bool {
        matches!(self, OperationKind::Read | OperationKind::Scan)
    }

    /// True for writes
    pub fn is_write(self) -> bool {
        matches!(self, OperationKind::Write)
    }

    /// Lock kind taken for this operation at commit time
    pub fn lock_kind(self) -> LockKind {
        if self.is_write() {
            LockKind::Exclusive
        } else {
            LockKind::Shared
        }
    }
}

/// Validation lock kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKind {
    /// Held by readers; compatible with other shared holders
    Shared,
    /// Held by writers
    Exclusive,
}

impl LockKind {
    /// The stronger of two lock kinds
    pub fn max(self, other: LockKind) -> LockKind {
        if self == LockKind::Exclusive || other == LockKind::Exclusive {
            LockKind::Exclusive
        } else {
            LockKind::Shared
        }
    }
}

/// Native isolation level of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Store-native serializable
    Serializable,
    /// Store-native snapshot isolation (repeatable read)
    Snapshot,
    /// Store-native read committed
    ReadCommitted,
}

/// Isolation protocol enforced by the engine
///
/// `Ser` delegates entirely to the store's serializable level. The two
/// tailor protocols run the store at a weaker level and recover
/// serializability through commit-time validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationProtocol {
    /// Plain serializable passthrough, no validation
    Ser,
    /// Snapshot isolation plus validation
    SiTailor,
    /// Read committed plus validation
    RcTailor,
}

impl IsolationProtocol {
    /// Store isolation level this protocol runs the connection at
    pub fn isolation_level(self) -> IsolationLevel {
        match self {
            IsolationProtocol::Ser => IsolationLevel::Serializable,
            IsolationProtocol::SiTailor => IsolationLevel::Snapshot,
            IsolationProtocol::RcTailor => IsolationLevel::ReadCommitted,
        }
    }

    /// Locking variant, or `None` for the passthrough protocol
    pub fn validation(self) -> Option<ValidationProtocol> {
        match self {
            IsolationProtocol::Ser => None,
            IsolationProtocol::SiTailor => Some(ValidationProtocol::SiTailor),
            IsolationProtocol::RcTailor => Some(ValidationProtocol::RcTailor),
        }
    }

    /// True for read-committed based protocols
    pub fn is_rc_family(self) -> bool {
        matches!(self, IsolationProtocol::RcTailor)
    }

    /// True for snapshot-isolation based protocols
    pub fn is_si_family(self) -> bool {
        matches!(self, IsolationProtocol::SiTailor)
    }

    /// Protocol used while switching between `self` and `next`
    ///
    /// RC_TAILOR if either side is RC-family, else SI_TAILOR if either side
    /// is SI-family, else SER.
    pub fn transition_safe(self, next: IsolationProtocol) -> IsolationProtocol {
        if self.is_rc_family() || next.is_rc_family() {
            IsolationProtocol::RcTailor
        } else if self.is_si_family() || next.is_si_family() {
            IsolationProtocol::SiTailor
        } else {
            IsolationProtocol::Ser
        }
    }

    /// Short identifier used in configuration and logs
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationProtocol::Ser => "ser",
            IsolationProtocol::SiTailor => "si",
            IsolationProtocol::RcTailor => "rc",
        }
    }
}

impl fmt::Display for IsolationProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationProtocol {
    type Err = TailorError;

    fn from_str(s: &str) -> TailorResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ser" | "serializable" => Ok(IsolationProtocol::Ser),
            "si" | "si_tailor" => Ok(IsolationProtocol::SiTailor),
            "rc" | "rc_tailor" => Ok(IsolationProtocol::RcTailor),
            other => Err(TailorError::invalid_input(format!(
                "unknown isolation protocol '{}', expected \"ser\", \"si\" or \"rc\"",
                other
            ))),
        }
    }
}

/// Locking discipline applied by the validation lock table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationProtocol {
    /// Snapshot-isolation-safe locking: no concurrent writers
    SiTailor,
    /// Read-committed-safe locking: concurrent blind writers allowed
    RcTailor,
}

/// Identifier of a registered transaction template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u32);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Position of a statement template inside the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementRef {
    /// Owning transaction template
    pub template: TemplateId,
    /// Index of the statement within the template
    pub index: usize,
}

impl StatementRef {
    /// Create a new statement reference
    pub fn new(template: TemplateId, index: usize) -> Self {
        StatementRef { template, index }
    }
}

/// Identifier of an online worker (one per client connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
