//! Callback contract between the bridge and the embedding host.

use mb_core::BridgeError;
use mb_core::BridgeResult;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;

/// Named callback channel into the host (the webview's `callHandler`).
pub trait HostBridge: Send + Sync {
    fn call_handler(&self, handler_name: &str, payload: Value) -> BridgeResult<()>;
}

impl<T: HostBridge + ?Sized> HostBridge for Arc<T> {
    fn call_handler(&self, handler_name: &str, payload: Value) -> BridgeResult<()> {
        (**self).call_handler(handler_name, payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostCall {
    pub handler_name: String,
    pub payload: Value,
}

/// Host that keeps every call in memory; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    calls: Arc<Mutex<Vec<HostCall>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_to(&self, handler_name: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|call| call.handler_name == handler_name)
            .map(|call| call.payload)
            .collect()
    }
}

impl HostBridge for RecordingHost {
    fn call_handler(&self, handler_name: &str, payload: Value) -> BridgeResult<()> {
        let mut calls = self.calls.lock().map_err(|_| {
            BridgeError::new("host.lock_poisoned", "recording host lock poisoned")
        })?;
        calls.push(HostCall {
            handler_name: handler_name.to_owned(),
            payload,
        });
        Ok(())
    }
}
