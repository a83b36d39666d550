use std::collections::BTreeSet;

use bevy::prelude::Resource;

use crate::variables::{TierIndex, SEVERE_TIER};

/// Presentation collaborator notified when a crisis machine enters or leaves a tier.
///
/// The core never reads anything back from the observer.
pub trait TierObserver {
    fn on_tier_enter(&mut self, crisis: &str, tier: TierIndex);
    fn on_tier_exit(&mut self, crisis: &str, tier: TierIndex);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TierObserver for NullObserver {
    fn on_tier_enter(&mut self, _crisis: &str, _tier: TierIndex) {}
    fn on_tier_exit(&mut self, _crisis: &str, _tier: TierIndex) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierNoticeKind {
    Entered,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierNotice {
    pub crisis: String,
    pub tier: TierIndex,
    pub kind: TierNoticeKind,
}

/// Tracks which crises currently show a warning indicator (tier >= 2).
#[derive(Resource, Debug, Clone)]
pub struct WarningBoard {
    visible: BTreeSet<String>,
    recent: Vec<TierNotice>,
    max_entries: usize,
}

impl Default for WarningBoard {
    fn default() -> Self {
        Self::with_history(32)
    }
}

impl WarningBoard {
    pub fn with_history(max_entries: usize) -> Self {
        Self {
            visible: BTreeSet::new(),
            recent: Vec::new(),
            max_entries,
        }
    }

    pub fn is_visible(&self, crisis: &str) -> bool {
        self.visible.contains(crisis)
    }

    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.visible.iter().map(String::as_str)
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn recent(&self) -> &[TierNotice] {
        &self.recent
    }

    pub fn clear(&mut self) {
        self.visible.clear();
        self.recent.clear();
    }

    fn push(&mut self, notice: TierNotice) {
        if self.max_entries == 0 {
            return;
        }
        self.recent.push(notice);
        if self.recent.len() > self.max_entries {
            let overflow = self.recent.len() - self.max_entries;
            self.recent.drain(0..overflow);
        }
    }
}

impl TierObserver for WarningBoard {
    fn on_tier_enter(&mut self, crisis: &str, tier: TierIndex) {
        if tier >= SEVERE_TIER {
            self.visible.insert(crisis.to_string());
        }
        self.push(TierNotice {
            crisis: crisis.to_string(),
            tier,
            kind: TierNoticeKind::Entered,
        });
    }

    fn on_tier_exit(&mut self, crisis: &str, tier: TierIndex) {
        if tier >= SEVERE_TIER {
            self.visible.remove(crisis);
        }
        self.push(TierNotice {
            crisis: crisis.to_string(),
            tier,
            kind: TierNoticeKind::Exited,
        });
    }
}
