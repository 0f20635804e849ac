//! Peripheral driver model
//!
//! Drivers bind to clients by class name, the most specific of the strings
//! reported in the identification data. All callbacks default to no-ops so
//! a driver only implements the events it cares about. Callbacks run on the
//! session task and must not block; anything expensive belongs on a
//! separate task.

use std::sync::Arc;

use crate::error::Result;
use crate::session::ClientHandle;
use protocol::{BatteryLevel, BatteryType};

/// Callback set of a peripheral driver.
pub trait DriverOps: Send + Sync + 'static {
    /// Called once when the driver is bound to a freshly identified client.
    fn probe(&self, client: &ClientHandle) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Called when the client disconnects or the adapter goes away. Never
    /// runs concurrently with another callback.
    fn remove(&self, client: &ClientHandle) {
        let _ = client;
    }

    fn battery(
        &self,
        client: &ClientHandle,
        battery_type: BatteryType,
        level: BatteryLevel,
    ) -> Result<()> {
        let _ = (client, battery_type, level);
        Ok(())
    }

    fn guide_button(&self, client: &ClientHandle, pressed: bool) -> Result<()> {
        let _ = (client, pressed);
        Ok(())
    }

    /// The audio format was accepted and both stream configurations are
    /// available through the client handle.
    fn audio_ready(&self, client: &ClientHandle) -> Result<()> {
        let _ = client;
        Ok(())
    }

    fn audio_volume(&self, client: &ClientHandle, input: u8, output: u8) -> Result<()> {
        let _ = (client, input, output);
        Ok(())
    }

    fn hid_report(&self, client: &ClientHandle, data: &[u8]) -> Result<()> {
        let _ = (client, data);
        Ok(())
    }

    /// Any packet outside the protocol-internal command set.
    fn input(&self, client: &ClientHandle, command: u8, data: &[u8]) -> Result<()> {
        let _ = (client, command, data);
        Ok(())
    }

    fn audio_samples(&self, client: &ClientHandle, data: &[u8]) -> Result<()> {
        let _ = (client, data);
        Ok(())
    }

    /// Whether clients bound to this driver go through the authentication
    /// handshake.
    fn handles_authentication(&self) -> bool {
        false
    }
}

/// One registered driver
#[derive(Clone)]
pub struct Driver {
    pub name: &'static str,
    /// Class string this driver binds to
    pub class: &'static str,
    pub ops: Arc<dyn DriverOps>,
}

/// Registered drivers, matched in registration order.
#[derive(Default, Clone)]
pub struct DriverTable {
    drivers: Vec<Driver>,
}

impl DriverTable {
    pub fn new() -> DriverTable {
        DriverTable::default()
    }

    pub fn register(&mut self, driver: Driver) {
        self.drivers.push(driver);
    }

    /// Find the first driver whose class appears in `classes`.
    pub fn find(&self, classes: &[String]) -> Option<&Driver> {
        self.drivers
            .iter()
            .find(|driver| classes.iter().any(|class| class == driver.class))
    }
}
