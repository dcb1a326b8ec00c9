//! Recording transport used by the unit tests

use crate::infrastructure::bluetooth::error::{TrackerError, TrackerResult};
use crate::infrastructure::bluetooth::session::TrackerIds;
use crate::infrastructure::bluetooth::transport::{BleTransport, PeripheralId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    StartScan(Uuid),
    StopScan,
    Connect(PeripheralId),
    DiscoverServices(PeripheralId, Uuid),
    DiscoverCharacteristics(PeripheralId, Uuid),
    SetNotify(Uuid, bool),
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect(PeripheralId),
}

/// Cloneable handle; clones share the call log
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    fail_writes: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl BleTransport for RecordingTransport {
    fn start_scan(&mut self, service: Uuid) -> TrackerResult<()> {
        self.record(TransportCall::StartScan(service));
        Ok(())
    }

    fn stop_scan(&mut self) -> TrackerResult<()> {
        self.record(TransportCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()> {
        self.record(TransportCall::Connect(peripheral.clone()));
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &PeripheralId, service: Uuid) -> TrackerResult<()> {
        self.record(TransportCall::DiscoverServices(peripheral.clone(), service));
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> TrackerResult<()> {
        self.record(TransportCall::DiscoverCharacteristics(
            peripheral.clone(),
            service,
        ));
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> TrackerResult<()> {
        self.record(TransportCall::SetNotify(characteristic, enabled));
        Ok(())
    }

    fn read(&mut self, characteristic: Uuid) -> TrackerResult<()> {
        self.record(TransportCall::Read(characteristic));
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> TrackerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Transport("write rejected".into()));
        }
        self.record(TransportCall::Write(characteristic, value.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()> {
        self.record(TransportCall::Disconnect(peripheral.clone()));
        Ok(())
    }
}

pub fn tracker_ids() -> TrackerIds {
    TrackerIds::default()
}
