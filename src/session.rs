//! # Scan Session Module
//!
//! The Idle ⇄ Scanning state machine behind the Start/Stop button.
//!
//! ## Transitions
//! - `Idle → Scanning`: all required permissions granted, radio started
//! - `Scanning → Idle`: same permission check, radio stopped
//!
//! If the permission gate is not satisfied the state does not change and
//! the gate takes care of asking the user. Permission answers never move the
//! state machine; the user toggles again once permissions are in place.
//!
//! The controller is owned by the UI loop, which serializes toggles, so no
//! locking is needed here.

use crate::delivery::DeliveryTarget;
use crate::error::ScanError;
use crate::gate::{GateResult, PermissionGate};
use crate::permission::{required_permissions, PermissionKind, PermissionRequirement, PlatformTier};
use crate::permission_host::{PermissionHost, PermissionResult};
use crate::radio::{Radio, ScanFilter, ScanSettings};
use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
}

impl SessionState {
    /// Text for the toggle button
    pub fn button_label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Start",
            SessionState::Scanning => "Stop",
        }
    }

    /// Text for the status line
    pub fn status_label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Not scanning",
            SessionState::Scanning => "Scanning",
        }
    }
}

/// Result of a single toggle request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Transitioned(SessionState),
    Blocked(ScanError),
}

/// Gets told about every state transition
pub trait StateObserver: Send {
    fn on_state_changed(&self, state: SessionState);
}

impl StateObserver for Sender<SessionState> {
    fn on_state_changed(&self, state: SessionState) {
        if let Err(e) = self.send(state) {
            log::debug!("State observer went away: {}", e);
        }
    }
}

pub struct ScanSessionController<R: Radio, H: PermissionHost> {
    tier: PlatformTier,
    gate: PermissionGate<H>,
    radio: R,
    filters: Vec<ScanFilter>,
    settings: ScanSettings,
    target: DeliveryTarget,
    state: SessionState,
    observers: Vec<Box<dyn StateObserver>>,
}

impl<R: Radio, H: PermissionHost> ScanSessionController<R, H> {
    pub fn new(
        tier: PlatformTier,
        filters: Vec<ScanFilter>,
        settings: ScanSettings,
        radio: R,
        host: H,
        target: DeliveryTarget,
    ) -> Self {
        log::info!(
            "Scan session controller ready ({:?}, requires {:?})",
            tier,
            required_permissions(tier)
        );
        Self {
            tier,
            gate: PermissionGate::new(host),
            radio,
            filters,
            settings,
            target,
            state: SessionState::Idle,
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn required_permissions(&self) -> PermissionRequirement {
        required_permissions(self.tier)
    }

    pub fn gate(&self) -> &PermissionGate<H> {
        &self.gate
    }

    pub fn observe(&mut self, observer: impl StateObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Handles the user's Start/Stop intent
    pub fn toggle_requested(&mut self) -> ToggleOutcome {
        // Stopping is guarded by the same check as starting
        let required = self.required_permissions();
        let gate_result = self.gate.ensure(&required);

        if let GateResult::AwaitingUser(kinds) = &gate_result {
            let error = self.gate.blocking_error(&gate_result).unwrap_or_else(|| {
                // Fine location is part of every requirement
                let kind = kinds.first().copied().unwrap_or(PermissionKind::FineLocation);
                ScanError::PermissionPending(kind)
            });
            log::info!("Toggle blocked while {}: {}", self.state.status_label(), error);
            return ToggleOutcome::Blocked(error);
        }

        match self.state {
            SessionState::Idle => {
                if let Err(e) = self
                    .radio
                    .start_discovery(&self.filters, &self.settings, self.target.clone())
                {
                    log::error!("Could not start scan: {}", e);
                    return ToggleOutcome::Blocked(e);
                }
                self.transition(SessionState::Scanning)
            }
            SessionState::Scanning => {
                self.radio.stop_discovery(&self.target);
                self.transition(SessionState::Idle)
            }
        }
    }

    /// Hands an OS permission answer to the gate.
    ///
    /// May trigger the next permission request, never a state change.
    pub fn on_permission_result(&mut self, result: &PermissionResult) -> GateResult {
        self.gate.on_permission_result(result)
    }

    fn transition(&mut self, state: SessionState) -> ToggleOutcome {
        self.state = state;
        log::info!("Session state: {}", state.status_label());
        for observer in &self.observers {
            observer.on_state_changed(state);
        }
        ToggleOutcome::Transitioned(state)
    }
}
