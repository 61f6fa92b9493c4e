//! # Permission Host Module
//!
//! The seam between the permission gate and whatever grants permissions.
//!
//! `PromptPermissionHost` is the desktop host: grants live in memory for the
//! lifetime of the process, every request becomes a `PermissionPrompt` the UI
//! shows as an Allow/Deny dialog, and the user can revoke a grant at any time
//! from the permission panel (the desktop version of revoking in OS settings).

use crate::permission::PermissionKind;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

pub type RequestId = u32;

/// Checks and requests OS permissions.
pub trait PermissionHost {
    /// Whether `kind` is currently granted
    fn check(&self, kind: PermissionKind) -> bool;

    /// Starts an asynchronous request for `kinds`.
    ///
    /// Must not block; the answer comes back later as a `PermissionResult`.
    fn request(&mut self, kinds: &[PermissionKind]) -> RequestId;
}

/// A request waiting for the user's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPrompt {
    pub request_id: RequestId,
    pub kinds: Vec<PermissionKind>,
}

/// Answer to a permission request, one flag per requested kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResult {
    pub request_id: RequestId,
    pub kinds: Vec<PermissionKind>,
    pub granted: Vec<bool>,
}

struct HostState {
    granted: HashSet<PermissionKind>,
    next_request_id: RequestId,
}

/// In-memory permission host driven by UI prompts.
///
/// Cloning shares the same grant set, so the UI and the gate see the same
/// permissions.
#[derive(Clone)]
pub struct PromptPermissionHost {
    state: Arc<Mutex<HostState>>,
    prompt_sender: Sender<PermissionPrompt>,
}

impl PromptPermissionHost {
    /// Creates a host with `pre_granted` already allowed.
    ///
    /// Returns the host and the receiving end of its prompt queue.
    pub fn new(
        pre_granted: impl IntoIterator<Item = PermissionKind>,
    ) -> (Self, Receiver<PermissionPrompt>) {
        let (prompt_sender, prompt_receiver) = unbounded();
        let host = Self {
            state: Arc::new(Mutex::new(HostState {
                granted: pre_granted.into_iter().collect(),
                next_request_id: 1,
            })),
            prompt_sender,
        };
        (host, prompt_receiver)
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the user's answer to `prompt` and builds the result to hand
    /// back to the gate.
    pub fn answer(&self, prompt: &PermissionPrompt, allow: bool) -> PermissionResult {
        let mut state = self.lock();
        for kind in &prompt.kinds {
            if allow {
                state.granted.insert(*kind);
            } else {
                state.granted.remove(kind);
            }
        }

        PermissionResult {
            request_id: prompt.request_id,
            kinds: prompt.kinds.clone(),
            granted: vec![allow; prompt.kinds.len()],
        }
    }

    /// Withdraws a grant, as if the user revoked it in system settings
    pub fn revoke(&self, kind: PermissionKind) {
        if self.lock().granted.remove(&kind) {
            log::info!("{} permission revoked", kind);
        }
    }
}

impl PermissionHost for PromptPermissionHost {
    fn check(&self, kind: PermissionKind) -> bool {
        self.lock().granted.contains(&kind)
    }

    fn request(&mut self, kinds: &[PermissionKind]) -> RequestId {
        let request_id = {
            let mut state = self.lock();
            let id = state.next_request_id;
            state.next_request_id = state.next_request_id.wrapping_add(1);
            id
        };

        let prompt = PermissionPrompt {
            request_id,
            kinds: kinds.to_vec(),
        };
        if let Err(e) = self.prompt_sender.send(prompt) {
            // Nobody is listening: the request stays unanswered
            log::warn!("Permission prompt {} dropped: {}", request_id, e);
        }
        request_id
    }
}
