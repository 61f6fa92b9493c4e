//! # Permission Gate Module
//!
//! Closes the gap between the permissions a scan needs and the permissions
//! the host has granted, one request at a time.
//!
//! ## Request Order
//! Missing permissions are requested in priority order: fine location,
//! background location, then Bluetooth scan/connect as one bundle. Only one
//! request is outstanding at any time so dialogs never overlap.
//!
//! ## Denials
//! A denial is recorded and never retried on its own. The next call to
//! `ensure` (the next user intent) requests the same kind again.

use crate::error::ScanError;
use crate::permission::{PermissionKind, PermissionOutcome, PermissionRequirement};
use crate::permission_host::{PermissionHost, PermissionResult, RequestId};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    /// Every required permission is granted
    Satisfied,
    /// Waiting on the user for these kinds
    AwaitingUser(Vec<PermissionKind>),
}

#[derive(Debug)]
struct InFlightRequest {
    request_id: RequestId,
    kinds: Vec<PermissionKind>,
}

pub struct PermissionGate<H: PermissionHost> {
    host: H,
    requirement: PermissionRequirement,
    in_flight: Option<InFlightRequest>,
    denied: HashSet<PermissionKind>,
}

impl<H: PermissionHost> PermissionGate<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            requirement: PermissionRequirement::new(),
            in_flight: None,
            denied: HashSet::new(),
        }
    }

    /// Checks `requirement` against the host and, if something is missing,
    /// issues at most one request for the next missing kind.
    pub fn ensure(&mut self, requirement: &PermissionRequirement) -> GateResult {
        self.requirement = requirement.clone();

        let missing = self.missing();
        if missing.is_empty() {
            return GateResult::Satisfied;
        }

        if let Some(in_flight) = &self.in_flight {
            log::debug!(
                "Permission request {} still open, not asking again",
                in_flight.request_id
            );
            return GateResult::AwaitingUser(in_flight.kinds.clone());
        }

        let kinds = self.next_request(&missing);
        log::info!("{} permission is required.", describe(&kinds));

        let request_id = self.host.request(&kinds);
        self.in_flight = Some(InFlightRequest {
            request_id,
            kinds: kinds.clone(),
        });
        GateResult::AwaitingUser(kinds)
    }

    /// Handles the host's answer to an earlier request.
    ///
    /// If everything asked for was granted the gate moves straight on to the
    /// next missing kind; a denial leaves the gate waiting for the next intent.
    pub fn on_permission_result(&mut self, result: &PermissionResult) -> GateResult {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.request_id == result.request_id => in_flight,
            other => {
                log::warn!(
                    "Ignoring result for unknown permission request {}",
                    result.request_id
                );
                self.in_flight = other;
                return self.status();
            }
        };

        let mut all_granted = true;
        for kind in &in_flight.kinds {
            // A kind missing from the answer counts as denied
            let granted = result
                .kinds
                .iter()
                .position(|k| k == kind)
                .and_then(|i| result.granted.get(i).copied())
                .unwrap_or(false);

            if granted {
                self.denied.remove(kind);
            } else {
                self.denied.insert(*kind);
                all_granted = false;
            }
        }

        if all_granted {
            log::info!("Applied adding {} permission.", describe(&in_flight.kinds));
            let requirement = self.requirement.clone();
            self.ensure(&requirement)
        } else {
            log::info!("Denied adding {} permission.", describe(&in_flight.kinds));
            self.status()
        }
    }

    /// Current tri-state of a single kind
    pub fn outcome(&self, kind: PermissionKind) -> PermissionOutcome {
        if self.host.check(kind) {
            PermissionOutcome::Granted
        } else if self
            .in_flight
            .as_ref()
            .map_or(false, |request| request.kinds.contains(&kind))
        {
            PermissionOutcome::Pending
        } else if self.denied.contains(&kind) {
            PermissionOutcome::Denied
        } else {
            PermissionOutcome::Pending
        }
    }

    /// The error explaining why `result` blocks a transition, if it does
    pub fn blocking_error(&self, result: &GateResult) -> Option<ScanError> {
        let kinds = match result {
            GateResult::Satisfied => return None,
            GateResult::AwaitingUser(kinds) => kinds,
        };

        let mut first_pending = None;
        for kind in kinds {
            match self.outcome(*kind) {
                PermissionOutcome::Denied => return Some(ScanError::PermissionDenied(*kind)),
                PermissionOutcome::Pending if first_pending.is_none() => first_pending = Some(*kind),
                _ => {}
            }
        }
        first_pending
            .or_else(|| kinds.first().copied())
            .map(ScanError::PermissionPending)
    }

    /// Whether a request is waiting for an answer
    pub fn is_awaiting_answer(&self) -> bool {
        self.in_flight.is_some()
    }

    fn missing(&self) -> Vec<PermissionKind> {
        self.requirement
            .iter()
            .copied()
            .filter(|kind| !self.host.check(*kind))
            .collect()
    }

    fn status(&self) -> GateResult {
        let missing = self.missing();
        if missing.is_empty() {
            GateResult::Satisfied
        } else {
            GateResult::AwaitingUser(missing)
        }
    }

    /// Picks the first missing kind; Bluetooth kinds go out as a pair
    fn next_request(&self, missing: &[PermissionKind]) -> Vec<PermissionKind> {
        match missing.first() {
            Some(kind) if kind.is_bluetooth() => self
                .requirement
                .iter()
                .copied()
                .filter(PermissionKind::is_bluetooth)
                .collect(),
            Some(kind) => vec![*kind],
            None => Vec::new(),
        }
    }
}

fn describe(kinds: &[PermissionKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.label())
        .collect::<Vec<_>>()
        .join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{required_permissions, PlatformTier};
    use crate::permission_host::{PermissionPrompt, PromptPermissionHost};
    use crossbeam_channel::Receiver;

    fn gate_with(
        granted: &[PermissionKind],
    ) -> (
        PermissionGate<PromptPermissionHost>,
        PromptPermissionHost,
        Receiver<PermissionPrompt>,
    ) {
        let (host, prompts) = PromptPermissionHost::new(granted.iter().copied());
        (PermissionGate::new(host.clone()), host, prompts)
    }

    #[test]
    fn test_satisfied_is_idempotent() {
        let (mut gate, _host, prompts) = gate_with(&PermissionKind::all());
        let required = required_permissions(PlatformTier::RuntimeBluetooth);

        assert_eq!(gate.ensure(&required), GateResult::Satisfied);
        assert_eq!(gate.ensure(&required), GateResult::Satisfied);
        assert!(prompts.try_recv().is_err());
    }

    #[test]
    fn test_requests_fine_location_first() {
        let (mut gate, _host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::RuntimeBluetooth);

        let result = gate.ensure(&required);
        assert_eq!(result, GateResult::AwaitingUser(vec![PermissionKind::FineLocation]));
        assert_eq!(prompts.try_iter().count(), 1);
        assert_eq!(
            gate.blocking_error(&result),
            Some(ScanError::PermissionPending(PermissionKind::FineLocation))
        );
    }

    #[test]
    fn test_no_overlapping_requests() {
        let (mut gate, _host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::BackgroundLocation);

        gate.ensure(&required);
        gate.ensure(&required);
        gate.ensure(&required);
        assert_eq!(prompts.try_iter().count(), 1);
        assert!(gate.is_awaiting_answer());
    }

    #[test]
    fn test_grants_chain_to_next_kind() {
        let (mut gate, host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::RuntimeBluetooth);
        gate.ensure(&required);

        let prompt = prompts.try_recv().unwrap();
        let result = gate.on_permission_result(&host.answer(&prompt, true));
        assert_eq!(result, GateResult::AwaitingUser(vec![PermissionKind::BackgroundLocation]));

        let prompt = prompts.try_recv().unwrap();
        let result = gate.on_permission_result(&host.answer(&prompt, true));
        assert_eq!(
            result,
            GateResult::AwaitingUser(vec![PermissionKind::BluetoothScan, PermissionKind::BluetoothConnect])
        );

        let prompt = prompts.try_recv().unwrap();
        assert_eq!(prompt.kinds.len(), 2);
        let result = gate.on_permission_result(&host.answer(&prompt, true));
        assert_eq!(result, GateResult::Satisfied);
        assert!(prompts.try_recv().is_err());
    }

    #[test]
    fn test_denial_is_not_retried_until_next_ensure() {
        let (mut gate, host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::Legacy);
        gate.ensure(&required);

        let prompt = prompts.try_recv().unwrap();
        let result = gate.on_permission_result(&host.answer(&prompt, false));
        assert_eq!(result, GateResult::AwaitingUser(vec![PermissionKind::FineLocation]));
        assert!(prompts.try_recv().is_err());
        assert_eq!(gate.outcome(PermissionKind::FineLocation), PermissionOutcome::Denied);
        assert_eq!(
            gate.blocking_error(&result),
            Some(ScanError::PermissionDenied(PermissionKind::FineLocation))
        );

        // Next intent asks for the same kind again
        gate.ensure(&required);
        let prompt = prompts.try_recv().unwrap();
        assert_eq!(prompt.kinds, vec![PermissionKind::FineLocation]);
        assert_eq!(gate.outcome(PermissionKind::FineLocation), PermissionOutcome::Pending);
    }

    #[test]
    fn test_unknown_request_id_is_ignored() {
        let (mut gate, _host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::Legacy);
        gate.ensure(&required);
        let prompt = prompts.try_recv().unwrap();

        let stale = PermissionResult {
            request_id: prompt.request_id + 100,
            kinds: vec![PermissionKind::FineLocation],
            granted: vec![true],
        };
        gate.on_permission_result(&stale);
        assert!(gate.is_awaiting_answer());
    }

    #[test]
    fn test_missing_flag_counts_as_denied() {
        let (mut gate, _host, prompts) = gate_with(&[]);
        let required = required_permissions(PlatformTier::Legacy);
        gate.ensure(&required);
        let prompt = prompts.try_recv().unwrap();

        let cancelled = PermissionResult {
            request_id: prompt.request_id,
            kinds: Vec::new(),
            granted: Vec::new(),
        };
        gate.on_permission_result(&cancelled);
        assert!(!gate.is_awaiting_answer());
        assert_eq!(gate.outcome(PermissionKind::FineLocation), PermissionOutcome::Denied);
    }

    #[test]
    fn test_bluetooth_not_needed_on_legacy() {
        let (mut gate, _host, prompts) = gate_with(&[PermissionKind::FineLocation]);
        let required = required_permissions(PlatformTier::Legacy);
        assert_eq!(gate.ensure(&required), GateResult::Satisfied);
        assert!(prompts.try_recv().is_err());
    }
}
