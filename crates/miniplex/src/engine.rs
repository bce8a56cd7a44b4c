//! Implements Hub / Trunk / Prune / Switch forwarding on top of the
//! [`Directory`](crate::directory::Directory) and, for Switch mode, the
//! embedded VM. A tagged `Mode` plus a single `dispatch` function, not
//! virtual dispatch over a class hierarchy.

use std::path::PathBuf;

use crate::directory::{Endpoint, ProcessingState};
use crate::vm;

#[derive(Debug, Clone)]
pub enum Mode {
    Hub,
    Trunk { trunk: Endpoint },
    Prune { trunk: Endpoint },
    Switch { byte_code: PathBuf },
}

impl Mode {
    pub fn trunk(&self) -> Option<Endpoint> {
        match self {
            Mode::Trunk { trunk } | Mode::Prune { trunk } => Some(*trunk),
            Mode::Hub | Mode::Switch { .. } => None,
        }
    }
}

/// Decides the forwarding target set for one datagram and refreshes
/// whatever directory state the decision depends on. The caller is
/// responsible for filtering `sender` out of the result defensively and for
/// actually issuing the sends on the socket domain.
pub fn dispatch(mode: &Mode, state: &mut ProcessingState, sender: Endpoint, buf: &[u8]) -> Vec<Endpoint> {
    let targets = match mode {
        Mode::Hub => {
            let branches = state.directory.observe(sender, None);
            let mut targets = branches;
            targets.extend(state.directory.inactive_perma_snapshot());
            targets
        }
        Mode::Trunk { trunk } => {
            let branches = state.directory.observe(sender, Some(*trunk));
            if sender == *trunk {
                let mut targets = branches;
                targets.extend(state.directory.inactive_perma_snapshot());
                targets
            } else {
                vec![*trunk]
            }
        }
        Mode::Prune { trunk } => dispatch_prune(*trunk, state, sender),
        Mode::Switch { .. } => dispatch_switch(state, sender, buf),
    };

    // Defense in depth: no mode's logic above should ever name the sender
    // as a destination, but this is cheap enough to enforce centrally.
    targets.into_iter().filter(|&ep| ep != sender).collect()
}

fn dispatch_prune(trunk: Endpoint, state: &mut ProcessingState, sender: Endpoint) -> Vec<Endpoint> {
    let branches = state.directory.observe(sender, Some(trunk));

    if sender != trunk {
        if let Some(&first) = branches.first() {
            if sender != first {
                tracing::debug!(sender = %sender, "pruned: not the primary branch");
                return Vec::new();
            }
        }
        return vec![trunk];
    }

    if branches.is_empty() {
        state.directory.perma_snapshot()
    } else {
        vec![branches[0]]
    }
}

fn dispatch_switch(state: &mut ProcessingState, sender: Endpoint, buf: &[u8]) -> Vec<Endpoint> {
    let branches = state.directory.observe(sender, None);

    let vm = match state.vm.as_mut() {
        Some(vm) => vm,
        None => {
            tracing::error!("switch mode dispatched with no VM loaded");
            return Vec::new();
        }
    };

    let (src_id, dst_id) = match vm::get_src_dst(vm, buf) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::debug!(error = %e, sender = %sender, "switch VM fault, dropping datagram");
            return Vec::new();
        }
    };

    let src_branches = state.directory.address_branches(sender, src_id, true);
    let dst_branches = state.directory.address_branches(sender, dst_id, false);

    if src_branches.first() != Some(&sender) {
        tracing::debug!(src_id, sender = %sender, "src ownership conflict, dropping datagram");
        return Vec::new();
    }

    if dst_branches.is_empty() {
        let mut targets = branches;
        targets.extend(state.directory.inactive_perma_snapshot());
        targets
    } else {
        vec![dst_branches[0]]
    }
}
