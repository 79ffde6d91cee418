//! Interface to the external ledger that anchors published term roots.
//!
//! The cryptographic core never talks to a ledger directly. Callers hand it
//! something implementing [Anchor]; [InMemoryAnchor] is a process-local
//! implementation for tests and demos.

use chrono::Utc;
use log::{debug, info};
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use crate::{completion::TermId, hasher::Hasher, utils::to_hex};

/// Confirmation returned by the ledger for a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx_id: String,
    /// Unix seconds.
    pub confirmed_at: u64,
}

/// The latest root the ledger holds for a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredRoot {
    pub root: H256,
    pub version: u32,
    /// Unix seconds.
    pub published_at: u64,
}

/// A ledger that stores term roots and returns them on query.
pub trait Anchor: Send + Sync {
    fn publish(
        &self,
        root: H256,
        term: &TermId,
        total_students: usize,
    ) -> Result<AnchorReceipt, AnchorError>;

    fn query_latest(&self, term: &TermId) -> Result<AnchoredRoot, AnchorError>;
}

// -------------------------------------------------------------------------------------------------
// In-memory implementation.

/// Keeps every publication per term in memory.
///
/// Can be switched offline to simulate an unreachable ledger.
#[derive(Debug, Default)]
pub struct InMemoryAnchor {
    records: Mutex<HashMap<TermId, Vec<AnchoredRoot>>>,
    offline: AtomicBool,
}

impl InMemoryAnchor {
    pub fn new() -> Self {
        InMemoryAnchor::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All publications for `term`, oldest first.
    pub fn history(&self, term: &TermId) -> Result<Vec<AnchoredRoot>, AnchorError> {
        self.check_online()?;
        let records = self.records.lock().map_err(|_| AnchorError::Unreachable {
            reason: "anchor state lock poisoned".to_owned(),
        })?;
        Ok(records.get(term).cloned().unwrap_or_default())
    }

    fn check_online(&self) -> Result<(), AnchorError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AnchorError::Unreachable {
                reason: "anchor is offline".to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

impl Anchor for InMemoryAnchor {
    fn publish(
        &self,
        root: H256,
        term: &TermId,
        total_students: usize,
    ) -> Result<AnchorReceipt, AnchorError> {
        self.check_online()?;

        let mut records = self.records.lock().map_err(|_| AnchorError::Unreachable {
            reason: "anchor state lock poisoned".to_owned(),
        })?;

        let confirmed_at = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let entries = records.entry(term.clone()).or_default();
        let version = entries.len() as u32 + 1;
        entries.push(AnchoredRoot {
            root,
            version,
            published_at: confirmed_at,
        });

        let mut hasher = Hasher::new();
        hasher.update(term.as_bytes());
        hasher.update(root.as_bytes());
        hasher.update(&version.to_be_bytes());
        let tx_id = to_hex(hasher.finalize().as_bytes());

        info!(
            "Anchored root {:?} for term {} ({} students), version {}, tx {}",
            root, term, total_students, version, tx_id
        );

        Ok(AnchorReceipt {
            tx_id,
            confirmed_at,
        })
    }

    fn query_latest(&self, term: &TermId) -> Result<AnchoredRoot, AnchorError> {
        self.check_online()?;

        let records = self.records.lock().map_err(|_| AnchorError::Unreachable {
            reason: "anchor state lock poisoned".to_owned(),
        })?;

        let latest = records
            .get(term)
            .and_then(|entries| entries.last().copied())
            .ok_or_else(|| AnchorError::NotFound { term: term.clone() })?;

        debug!("Anchor query for term {} gave version {}", term, latest.version);

        Ok(latest)
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Failures of the anchor collaborator.
///
/// These mean the anchored root is unknown, never that a proof is invalid.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("No root anchored for term {term}")]
    NotFound { term: TermId },
    #[error("Anchor unreachable: {reason}")]
    Unreachable { reason: String },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
