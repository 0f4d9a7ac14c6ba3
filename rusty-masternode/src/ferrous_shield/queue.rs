//! Outstanding "accepting entries" announcements of coordinators.

use log::{debug, info};

use rusty_crypto::{CryptoError, MessageAuthenticator, MixingKey};
use rusty_shared_types::{OutPoint, QueueAnnouncement};

use crate::constants::QUEUE_TIMEOUT_SECS;
use crate::error::MixingError;
use crate::ferrous_shield::denomination::DenominationMask;

#[derive(Debug, Default)]
pub struct QueueAnnouncer {
    announcements: Vec<QueueAnnouncement>,
}

impl QueueAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and signs an announcement for the local coordinator.
    pub fn sign(
        vin: OutPoint,
        denomination: DenominationMask,
        key: &MixingKey,
        authenticator: &MessageAuthenticator,
        now_secs: i64,
    ) -> Result<QueueAnnouncement, CryptoError> {
        let mut announcement = QueueAnnouncement { vin, denomination, time: now_secs, signature: Vec::new() };
        announcement.signature = authenticator.sign(&announcement.signing_message(), key)?;
        Ok(announcement)
    }

    pub fn is_expired(announcement: &QueueAnnouncement, now_secs: i64) -> bool {
        now_secs - announcement.time > QUEUE_TIMEOUT_SECS
    }

    /// Stores a received announcement signed by `mixing_pubkey`.
    /// Returns `Ok(false)` for announcements already known or already expired.
    pub fn receive(
        &mut self,
        announcement: QueueAnnouncement,
        mixing_pubkey: &[u8],
        authenticator: &MessageAuthenticator,
        now_secs: i64,
    ) -> Result<bool, MixingError> {
        if !authenticator.verify(mixing_pubkey, &announcement.signature, &announcement.signing_message()) {
            return Err(MixingError::InvalidSignature);
        }
        if Self::is_expired(&announcement, now_secs) {
            debug!("dropping stale queue announcement from {}", announcement.vin);
            return Ok(false);
        }
        if self.announcements.iter().any(|a| a.vin == announcement.vin) {
            return Ok(false);
        }
        info!(
            "queue announcement from {} for denomination {:#06b}",
            announcement.vin, announcement.denomination
        );
        self.announcements.push(announcement);
        Ok(true)
    }

    /// Removes and returns the first live announcement for `mask`.
    pub fn take_compatible(&mut self, mask: DenominationMask, now_secs: i64) -> Option<QueueAnnouncement> {
        let index = self
            .announcements
            .iter()
            .position(|a| a.denomination == mask && !Self::is_expired(a, now_secs))?;
        Some(self.announcements.remove(index))
    }

    /// Drops expired announcements, returning how many were removed.
    pub fn prune(&mut self, now_secs: i64) -> usize {
        let before = self.announcements.len();
        self.announcements.retain(|a| !Self::is_expired(a, now_secs));
        let removed = before - self.announcements.len();
        if removed > 0 {
            debug!("removed {} expired queue announcements", removed);
        }
        removed
    }

    pub fn live(&self) -> &[QueueAnnouncement] {
        &self.announcements
    }

    pub fn len(&self) -> usize {
        self.announcements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.announcements.is_empty()
    }
}
