//! BLE Scanner Module
//!
//! Starts and stops discovery for the tracker service and arms the scan
//! window. Each scan gets a new generation number; the timer posts
//! [`ServiceMessage::ScanTimeout`] tagged with it, so an expiry that
//! outlives its scan is recognized as stale.

use crate::infrastructure::bluetooth::error::TrackerResult;
use crate::infrastructure::bluetooth::service::ServiceMessage;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// BLE Scanner for discovering the tracker
pub struct BleScanner {
    service: Uuid,
    timeout: Duration,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    timer_sender: mpsc::UnboundedSender<ServiceMessage>,
}

impl BleScanner {
    pub fn new(
        service: Uuid,
        timeout: Duration,
        timer_sender: mpsc::UnboundedSender<ServiceMessage>,
    ) -> Self {
        Self {
            service,
            timeout,
            generation: 0,
            timer: None,
            timer_sender,
        }
    }

    /// Start scanning and arm the scan window.
    ///
    /// Must be called from within a tokio runtime. Returns the generation
    /// of the new scan.
    pub fn start(&mut self, transport: &mut dyn BleTransport) -> TrackerResult<u64> {
        self.cancel_timer();

        info!("Starting BLE scan for service UUID: {}", self.service);
        transport.start_scan(self.service)?;

        self.generation += 1;
        let generation = self.generation;
        let timeout = self.timeout;
        let sender = self.timer_sender.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = sender.send(ServiceMessage::ScanTimeout(generation));
        }));

        Ok(generation)
    }

    /// Stop scanning and disarm the window
    pub fn stop(&mut self, transport: &mut dyn BleTransport) -> TrackerResult<()> {
        if self.timer.is_some() {
            info!("Stopping BLE scan...");
            self.cancel_timer();
            transport.stop_scan()?;
        }
        Ok(())
    }

    /// Disarm the window without touching the radio
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!("Cancelling scan timer #{}", self.generation);
            timer.abort();
        }
    }

    /// Whether `generation` names the scan that is still running
    pub fn is_current(&self, generation: u64) -> bool {
        self.timer.is_some() && generation == self.generation
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.timer.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
