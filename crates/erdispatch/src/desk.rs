//! The hospital side: answering calls and keeping the hospital record current.

use tracing::info;

use crate::department::Department;
use crate::error::{Error, Result};
use crate::model::{Beds, CompletedCase, EmergencyCall, Hospital};
use crate::store::{CallQuery, Store, Subscription};

/// Everything a hospital admin does, scoped to one hospital.
#[derive(Debug, Clone)]
pub struct HospitalDesk {
    store: Store,
    hospital: Hospital,
}

impl HospitalDesk {
    /// Open the desk of the hospital `user_id` administers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if the user has no hospital.
    pub fn for_admin(store: Store, user_id: &str) -> Result<Self> {
        let hospital = store
            .hospital_for_admin(user_id)?
            .ok_or_else(|| Error::permission_denied(format!("{user_id} is not a hospital admin")))?;
        Ok(Self { store, hospital })
    }

    /// Open the desk of a hospital by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HospitalNotFound`] if the hospital doesn't exist.
    pub fn open(store: Store, hospital_id: &str) -> Result<Self> {
        let hospital = store
            .get_hospital(hospital_id)?
            .ok_or_else(|| Error::HospitalNotFound(hospital_id.to_string()))?;
        Ok(Self { store, hospital })
    }

    /// The hospital as last loaded or written.
    #[must_use]
    pub fn hospital(&self) -> &Hospital {
        &self.hospital
    }

    fn id(&self) -> &str {
        &self.hospital.id
    }

    /// Distance from the hospital to the patient, in metres.
    #[must_use]
    pub fn distance_to(&self, call: &EmergencyCall) -> f64 {
        self.hospital.location.distance_to(&call.location)
    }

    /// Pending calls offered to this hospital, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending(&self) -> Result<Vec<EmergencyCall>> {
        self.store.pending_calls_for(self.id())
    }

    /// Calls this hospital accepted and has not completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn accepted(&self) -> Result<Vec<EmergencyCall>> {
        self.store.accepted_calls_for(self.id())
    }

    /// Follow the pending view.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial query fails.
    pub fn watch_pending(&self) -> Result<Subscription> {
        self.store
            .subscribe(CallQuery::PendingFor(self.id().to_string()))
    }

    /// Follow the accepted view.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial query fails.
    pub fn watch_accepted(&self) -> Result<Subscription> {
        self.store
            .subscribe(CallQuery::AcceptedBy(self.id().to_string()))
    }

    /// Accept a call.
    ///
    /// # Errors
    ///
    /// See [`Store::accept_call`].
    pub fn accept(&self, call_id: &str) -> Result<EmergencyCall> {
        self.store.accept_call(call_id, self.id())
    }

    /// Decline a call.
    ///
    /// # Errors
    ///
    /// See [`Store::reject_call`].
    pub fn reject(&self, call_id: &str) -> Result<EmergencyCall> {
        self.store.reject_call(call_id, self.id())
    }

    /// Complete and archive a call this hospital accepted.
    ///
    /// # Errors
    ///
    /// See [`Store::complete_call`].
    pub fn complete(&self, call_id: &str) -> Result<CompletedCase> {
        self.store.complete_call(call_id, self.id())
    }

    /// This hospital's archive, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn archive(&self) -> Result<Vec<CompletedCase>> {
        self.store.completed_cases_for_hospital(self.id())
    }

    /// Replace the bed counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `available` exceeds `total`.
    pub fn update_beds(&mut self, total: u32, available: u32) -> Result<&Hospital> {
        let beds = Beds::new(total, available)?;
        self.hospital = self.store.update_beds(self.id(), beds)?;
        info!(hospital = %self.hospital.id, total, available, "Bed counts updated");
        Ok(&self.hospital)
    }

    /// Start offering a department. Returns `false` if it was already offered.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn add_department(&mut self, department: Department) -> Result<bool> {
        let added = self.store.add_department(self.id(), department)?;
        self.reload()?;
        Ok(added)
    }

    /// Stop offering a department. Returns `false` if it wasn't offered.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_department(&mut self, department: Department) -> Result<bool> {
        let removed = self.store.remove_department(self.id(), department)?;
        self.reload()?;
        Ok(removed)
    }

    fn reload(&mut self) -> Result<()> {
        self.hospital = self
            .store
            .get_hospital(self.id())?
            .ok_or_else(|| Error::HospitalNotFound(self.hospital.id.clone()))?;
        Ok(())
    }
}
