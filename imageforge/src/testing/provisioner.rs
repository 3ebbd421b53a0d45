//! In-memory compute provisioner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::core::{ResourceHandle, ResourceState};
use crate::errors::RemoteError;
use crate::ports::{ComputeProvisioner, ProvisionPayload, ResourceStatus};

#[derive(Debug, Default)]
struct State {
    resources: HashMap<ResourceHandle, ResourceStatus>,
    payloads: Vec<(String, ProvisionPayload)>,
    destroyed: Vec<ResourceHandle>,
    create_failures: VecDeque<RemoteError>,
    state_failures: VecDeque<RemoteError>,
    destroy_failures: VecDeque<RemoteError>,
    create_calls: usize,
    state_calls: usize,
    create_delay: Duration,
}

/// A provisioner whose resources live in a table the test controls.
///
/// Created resources start in `running` and keep whatever state the test
/// sets. Handles are `vm-<job id>`.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    state: Mutex<State>,
}

impl FakeProvisioner {
    /// Creates an empty provisioner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle a job's resource gets.
    #[must_use]
    pub fn handle_for(job_id: &str) -> ResourceHandle {
        ResourceHandle::new(format!("vm-{job_id}"))
    }

    /// Makes the next `create` call fail with `error`.
    pub fn fail_next_create(&self, error: RemoteError) {
        self.state.lock().create_failures.push_back(error);
    }

    /// Makes the next `get_state` call fail with `error`.
    pub fn fail_next_get_state(&self, error: RemoteError) {
        self.state.lock().state_failures.push_back(error);
    }

    /// Makes the next `destroy` call fail with `error`.
    pub fn fail_next_destroy(&self, error: RemoteError) {
        self.state.lock().destroy_failures.push_back(error);
    }

    /// Delays every `create` call.
    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = delay;
    }

    /// Sets the state a job's resource reports.
    pub fn set_state(&self, job_id: &str, state: ResourceState) {
        self.state
            .lock()
            .resources
            .insert(Self::handle_for(job_id), ResourceStatus::in_state(state));
    }

    /// Deletes a job's resource behind the orchestrator's back.
    pub fn vanish(&self, job_id: &str) {
        self.state.lock().resources.remove(&Self::handle_for(job_id));
    }

    /// Returns the payload a job was created with.
    #[must_use]
    pub fn payload_for(&self, job_id: &str) -> Option<ProvisionPayload> {
        self.state
            .lock()
            .payloads
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, payload)| payload.clone())
    }

    /// Returns the ids of jobs whose resources were created.
    #[must_use]
    pub fn created_jobs(&self) -> Vec<String> {
        self.state.lock().payloads.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Returns destroyed handles in call order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<ResourceHandle> {
        self.state.lock().destroyed.clone()
    }

    /// Returns true if the job's resource was destroyed.
    #[must_use]
    pub fn was_destroyed(&self, job_id: &str) -> bool {
        self.state.lock().destroyed.contains(&Self::handle_for(job_id))
    }

    /// Number of `create` calls, including failed ones.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    /// Number of `get_state` calls, including failed ones.
    #[must_use]
    pub fn state_calls(&self) -> usize {
        self.state.lock().state_calls
    }
}

#[async_trait]
impl ComputeProvisioner for FakeProvisioner {
    async fn create(&self, job_id: &str, payload: &ProvisionPayload) -> Result<ResourceHandle, RemoteError> {
        let delay = {
            let mut state = self.state.lock();
            state.create_calls += 1;
            if let Some(error) = state.create_failures.pop_front() {
                return Err(error);
            }
            state.create_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let handle = Self::handle_for(job_id);
        let mut state = self.state.lock();
        state.payloads.push((job_id.to_string(), payload.clone()));
        state
            .resources
            .insert(handle.clone(), ResourceStatus::in_state(ResourceState::Running));
        Ok(handle)
    }

    async fn get_state(&self, handle: &ResourceHandle) -> Result<ResourceStatus, RemoteError> {
        let mut state = self.state.lock();
        state.state_calls += 1;
        if let Some(error) = state.state_failures.pop_front() {
            return Err(error);
        }
        Ok(state.resources.get(handle).copied().unwrap_or_else(ResourceStatus::gone))
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(error) = state.destroy_failures.pop_front() {
            return Err(error);
        }
        state.resources.remove(handle);
        state.destroyed.push(handle.clone());
        Ok(())
    }
}
