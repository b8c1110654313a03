// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory driver fake for manager and reconciler tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sbx_core::{RuntimeKind, RuntimeNode};

use crate::spec::ContainerSpec;
use crate::{ContainerHandle, DriverError, RuntimeDriver};

#[derive(Default)]
struct FakeState {
    created: Vec<ContainerSpec>,
    running: HashMap<String, bool>,
    destroyed: Vec<String>,
    fail_create: Option<String>,
    fail_ready: bool,
    fail_install: Option<String>,
    create_seq: u64,
}

/// Scriptable [`RuntimeDriver`] that tracks every call.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next create_container calls fail with the given message.
    pub fn fail_create(&self, message: impl Into<String>) {
        self.state.lock().fail_create = Some(message.into());
    }

    pub fn clear_fail_create(&self) {
        self.state.lock().fail_create = None;
    }

    /// Make wait_ready report a deadline expiry.
    pub fn fail_ready(&self, fail: bool) {
        self.state.lock().fail_ready = fail;
    }

    pub fn fail_install(&self, log: impl Into<String>) {
        self.state.lock().fail_install = Some(log.into());
    }

    /// Simulate a container dying out from under the control plane.
    pub fn kill(&self, handle: &ContainerHandle) {
        self.state.lock().running.insert(handle.as_str().to_string(), false);
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().created.clone()
    }

    pub fn destroy_count(&self, handle: &ContainerHandle) -> usize {
        self.state.lock().destroyed.iter().filter(|h| *h == handle.as_str()).count()
    }

    pub fn live_handles(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .running
            .iter()
            .filter_map(|(h, alive)| alive.then(|| h.clone()))
            .collect()
    }
}

#[async_trait]
impl RuntimeDriver for FakeDriver {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn ensure_image(&self, _image_ref: &str, _node: &RuntimeNode) -> Result<(), DriverError> {
        Ok(())
    }

    async fn create_container(
        &self,
        node: &RuntimeNode,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle, DriverError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.fail_create {
            return Err(DriverError::CreateFailed(message.clone()));
        }
        state.create_seq += 1;
        let handle = format!("fake|{}|{}|{}", node.id, spec.container_name(), state.create_seq);
        state.created.push(spec.clone());
        state.running.insert(handle.clone(), true);
        Ok(ContainerHandle(handle))
    }

    async fn wait_ready(
        &self,
        handle: &ContainerHandle,
        _deadline: Duration,
    ) -> Result<(), DriverError> {
        if self.state.lock().fail_ready {
            return Err(DriverError::ReadyTimeout(handle.to_string()));
        }
        Ok(())
    }

    async fn exec_dependency_install(
        &self,
        _handle: &ContainerHandle,
        _specs: &[String],
    ) -> Result<(), DriverError> {
        if let Some(log) = self.state.lock().fail_install.clone() {
            return Err(DriverError::InstallFailed { log });
        }
        Ok(())
    }

    async fn is_running(&self, handle: &ContainerHandle) -> Result<bool, DriverError> {
        Ok(*self.state.lock().running.get(handle.as_str()).unwrap_or(&false))
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.destroyed.push(handle.as_str().to_string());
        state.running.insert(handle.as_str().to_string(), false);
        Ok(())
    }

    async fn logs(&self, _handle: &ContainerHandle, _tail: u32) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn executor_url(&self, handle: &ContainerHandle) -> Result<String, DriverError> {
        Ok(format!("fake://{}", handle.as_str()))
    }
}
