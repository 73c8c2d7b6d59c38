//! The requester side: raising a call and following it to acceptance.
//!
//! A call is broadcast to every hospital in the smallest search radius that
//! holds one offering a recommended department. If nobody accepts within the
//! acceptance timeout, the call is re-broadcast once over the expansion
//! radii, skipping hospitals that declined it. [`Dispatcher::sweep`] does the
//! same for calls whose requester went away before its timer fired.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::ai::{classify_symptom, GenerativeModel};
use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::matching::match_hospitals;
use crate::model::{CallStatus, EmergencyCall, NewCall, PatientInfo};
use crate::store::{CallQuery, ChangeKind, Store, Supersede};

/// How a followed call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// A hospital accepted the call.
    Accepted(EmergencyCall),
    /// The call disappeared without being accepted: it was cancelled, or
    /// withdrawn by another process.
    Withdrawn,
}

/// Result of re-broadcasting a pending call.
#[derive(Debug, Clone, PartialEq)]
pub enum Rebroadcast {
    /// The call was replaced by a wider broadcast.
    Replaced(EmergencyCall),
    /// A hospital accepted the call before it could be replaced.
    Accepted(EmergencyCall),
}

/// Counts from one stale-call sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale calls found.
    pub examined: usize,
    /// Calls replaced by a wider broadcast.
    pub rebroadcast: usize,
    /// Calls withdrawn because the wider search found nobody.
    pub withdrawn: usize,
    /// Calls accepted while the sweep ran.
    pub accepted: usize,
    /// Calls that could not be processed.
    pub failed: usize,
}

/// Raises emergency calls and drives them to acceptance.
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    model: Option<Arc<dyn GenerativeModel>>,
    policy: DispatchConfig,
    acceptance_timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store.path())
            .field("has_model", &self.model.is_some())
            .field("policy", &self.policy)
            .field("acceptance_timeout", &self.acceptance_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher with the given matching policy.
    #[must_use]
    pub fn new(store: Store, model: Arc<dyn GenerativeModel>, policy: DispatchConfig) -> Self {
        Self::build(store, Some(model), policy)
    }

    /// Create a dispatcher that follows, cancels and sweeps calls but
    /// cannot raise new ones.
    #[must_use]
    pub fn without_model(store: Store, policy: DispatchConfig) -> Self {
        Self::build(store, None, policy)
    }

    fn build(store: Store, model: Option<Arc<dyn GenerativeModel>>, policy: DispatchConfig) -> Self {
        let acceptance_timeout = Duration::from_secs(policy.acceptance_timeout_secs);
        Self {
            store,
            model,
            policy,
            acceptance_timeout,
        }
    }

    /// Override the acceptance timeout.
    #[must_use]
    pub fn with_acceptance_timeout(mut self, timeout: Duration) -> Self {
        self.acceptance_timeout = timeout;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Raise a call for `patient` at `location`.
    ///
    /// Validates the patient, classifies the symptom, searches the
    /// configured radii and broadcasts a pending call to every hospital
    /// found.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if a required patient field is missing
    /// - [`Error::LocationUnavailable`] if `location` is `None`
    /// - [`Error::ConfigValidation`] if the dispatcher has no model
    /// - [`Error::ClassificationFailed`] if no department could be derived
    /// - [`Error::NoHospitalMatch`] if no radius holds a matching hospital
    pub async fn request(
        &self,
        requester_id: &str,
        patient: PatientInfo,
        location: Option<GeoPoint>,
    ) -> Result<EmergencyCall> {
        patient.validate()?;
        let location = location.ok_or(Error::LocationUnavailable)?;
        let model = self.model.as_deref().ok_or_else(|| Error::ConfigValidation {
            message: "no generative model is configured for symptom classification".to_string(),
        })?;

        let departments = classify_symptom(
            model,
            &patient.symptom,
            self.policy.max_recommended_departments,
        )
        .await?;

        let candidates = self.store.hospitals_offering_any(&departments)?;
        let outcome = match_hospitals(&candidates, &location, &self.policy.search_radii_m, &[])?;
        info!(
            radius_m = outcome.radius_m,
            hospitals = outcome.hospital_ids.len(),
            "Matched hospitals"
        );

        self.store.create_call(&NewCall {
            requester_id: requester_id.to_string(),
            patient_info: patient,
            location,
            targeted_hospital_ids: outcome.hospital_ids,
            recommended_departments: departments,
            rejected_by: Vec::new(),
            broadcast_round: 0,
        })
    }

    /// Re-broadcast a first-round pending call over the expansion radii,
    /// skipping hospitals that declined it.
    ///
    /// If the wider search finds nobody, the call is withdrawn.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call no longer exists and was not
    ///   replaced
    /// - [`Error::InvalidInput`] if the call was already re-broadcast
    /// - [`Error::NoHospitalMatch`] if the wider search found nobody
    pub async fn rebroadcast(&self, call_id: &str) -> Result<Rebroadcast> {
        let Some(call) = self.store.get_call(call_id)? else {
            return self.replaced_elsewhere(call_id);
        };
        if call.status != CallStatus::Pending {
            return Ok(Rebroadcast::Accepted(call));
        }
        if call.broadcast_round > 0 {
            return Err(Error::invalid_input(format!(
                "call {call_id} has already been re-broadcast"
            )));
        }

        let candidates = self
            .store
            .hospitals_offering_any(&call.recommended_departments)?;
        let matched = match_hospitals(
            &candidates,
            &call.location,
            &self.policy.expansion_radii_m,
            &call.rejected_by,
        );

        let (replacement, no_match) = match matched {
            Ok(outcome) => (
                Some(NewCall {
                    requester_id: call.requester_id.clone(),
                    patient_info: call.patient_info.clone(),
                    location: call.location,
                    targeted_hospital_ids: outcome.hospital_ids,
                    recommended_departments: call.recommended_departments.clone(),
                    rejected_by: call.rejected_by.clone(),
                    broadcast_round: call.broadcast_round + 1,
                }),
                None,
            ),
            Err(err @ Error::NoHospitalMatch { .. }) => (None, Some(err)),
            Err(err) => return Err(err),
        };

        match self.store.supersede_call(call_id, replacement.as_ref())? {
            Supersede::Replaced(Some(new)) => Ok(Rebroadcast::Replaced(new)),
            Supersede::Replaced(None) => {
                warn!(call = call_id, "No hospital in expansion radii, call withdrawn");
                Err(no_match.unwrap_or_else(|| Error::NoHospitalMatch {
                    radii_m: self.policy.expansion_radii_m.clone(),
                }))
            }
            Supersede::Accepted(accepted) => Ok(Rebroadcast::Accepted(accepted)),
            Supersede::Gone => self.replaced_elsewhere(call_id),
        }
    }

    /// Resolve a call that disappeared under us: another follower or a sweep
    /// may have re-broadcast it already.
    fn replaced_elsewhere(&self, call_id: &str) -> Result<Rebroadcast> {
        match self.store.replacement_for(call_id)? {
            Some(next) if next.status == CallStatus::Accepted => Ok(Rebroadcast::Accepted(next)),
            Some(next) => Ok(Rebroadcast::Replaced(next)),
            None => Err(Error::CallNotFound(call_id.to_string())),
        }
    }

    /// Follow a call until a hospital accepts it.
    ///
    /// If no hospital accepts within the acceptance timeout the call is
    /// re-broadcast once; after that the wait has no deadline. If the call is
    /// re-broadcast by someone else (a sweep, say), the wait moves on to the
    /// replacement.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call doesn't exist
    /// - [`Error::NoHospitalMatch`] if the re-broadcast found nobody
    pub async fn await_acceptance(&self, call_id: &str) -> Result<CallOutcome> {
        let mut current = self
            .store
            .get_call(call_id)?
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        let mut subscription = self.store.subscribe(CallQuery::Call(current.id.clone()))?;
        let mut expanded = current.broadcast_round > 0;

        let deadline = tokio::time::sleep(self.acceptance_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                change = subscription.next() => {
                    let Some(change) = change else {
                        return Err(Error::internal("call subscription closed unexpectedly"));
                    };
                    match change.kind {
                        ChangeKind::Removed => {
                            let Some(next) = self.store.replacement_for(&current.id)? else {
                                info!(call = %current.id, "Call disappeared before acceptance");
                                return Ok(CallOutcome::Withdrawn);
                            };
                            info!(
                                old = %current.id,
                                new = %next.id,
                                "Call was re-broadcast, following replacement"
                            );
                            if next.status == CallStatus::Accepted {
                                return Ok(CallOutcome::Accepted(next));
                            }
                            expanded = true;
                            subscription = self.store.subscribe(CallQuery::Call(next.id.clone()))?;
                            current = next;
                        }
                        ChangeKind::Added | ChangeKind::Modified => {
                            if change.call.status == CallStatus::Accepted {
                                info!(
                                    call = %change.call.id,
                                    hospital = change.call.accepted_hospital_name.as_deref().unwrap_or_default(),
                                    "Call accepted"
                                );
                                return Ok(CallOutcome::Accepted(change.call));
                            }
                            current = change.call;
                        }
                    }
                }
                () = &mut deadline, if !expanded => {
                    expanded = true;
                    info!(call = %current.id, "No acceptance before timeout, widening search");
                    match self.rebroadcast(&current.id).await? {
                        Rebroadcast::Accepted(call) => return Ok(CallOutcome::Accepted(call)),
                        Rebroadcast::Replaced(call) => {
                            subscription = self.store.subscribe(CallQuery::Call(call.id.clone()))?;
                            current = call;
                        }
                    }
                }
            }
        }
    }

    /// Cancel a pending call on behalf of its requester.
    ///
    /// # Errors
    ///
    /// See [`Store::cancel_call`].
    pub fn cancel(&self, call_id: &str, requester_id: &str) -> Result<()> {
        self.store.cancel_call(call_id, requester_id)
    }

    /// Re-broadcast every first-round pending call older than the
    /// acceptance timeout at `now`.
    ///
    /// Failures on individual calls are logged and counted; they do not stop
    /// the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the stale calls cannot be listed, or
    /// [`Error::ConfigValidation`] if the acceptance timeout reaches past the
    /// earliest representable time.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = chrono::Duration::from_std(self.acceptance_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .ok_or_else(|| Error::ConfigValidation {
                message: format!(
                    "acceptance timeout {:?} is out of range",
                    self.acceptance_timeout
                ),
            })?;
        let stale = self.store.stale_pending_calls(cutoff)?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for call in stale {
            match self.rebroadcast(&call.id).await {
                Ok(Rebroadcast::Replaced(_)) => report.rebroadcast += 1,
                Ok(Rebroadcast::Accepted(_)) => report.accepted += 1,
                Err(Error::NoHospitalMatch { .. }) => report.withdrawn += 1,
                Err(err) => {
                    warn!(call = %call.id, error = %err, "Sweep could not re-broadcast call");
                    report.failed += 1;
                }
            }
        }

        info!(?report, "Sweep finished");
        Ok(report)
    }
}
