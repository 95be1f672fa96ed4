use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::can::CanConfig;
use super::{CanHelper, CanSender};
use crate::error::{J1939Error, Result};
use crate::types::{CanFrame, CanId, Config};

/// One transmission recorded by a [`MockSender`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub interface: String,
    pub frame: CanFrame,
    pub period_ms: u32,
}

/// Shared transmission log, cloned into every sender a [`MockHelper`] allocates
pub type MockBus = Arc<Mutex<Vec<SentFrame>>>;

/// Mock sender for testing
pub struct MockSender {
    interface: Option<String>,
    scheduled: HashMap<CanId, u32>,
    bus: MockBus,
    fail: bool,
}

impl MockSender {
    pub fn new(bus: MockBus) -> Self {
        Self {
            interface: None,
            scheduled: HashMap::new(),
            bus,
            fail: false,
        }
    }

    /// Creates a mock sender whose every transmission fails
    pub fn new_error(bus: MockBus) -> Self {
        Self {
            fail: true,
            ..Self::new(bus)
        }
    }
}

impl CanSender for MockSender {
    fn initialize(&mut self, interface: &str, config: &CanConfig) -> Result<()> {
        config.validate()?;
        self.interface = Some(interface.to_string());
        Ok(())
    }

    fn send_frame(&mut self, frame: &CanFrame, period_ms: u32) -> Result<()> {
        let interface = self
            .interface
            .clone()
            .ok_or_else(|| J1939Error::Backend("sender not initialized".into()))?;
        if self.fail {
            return Err(J1939Error::Backend("transmit failed".into()));
        }
        if period_ms != 0 {
            self.scheduled.insert(frame.id, period_ms);
        }
        self.bus.lock().push(SentFrame {
            interface,
            frame: frame.clone(),
            period_ms,
        });
        Ok(())
    }

    fn unsend_frame(&mut self, id: CanId) {
        self.scheduled.remove(&id);
    }

    fn is_sent(&self, id: CanId) -> bool {
        self.scheduled.contains_key(&id)
    }

    fn finalize(&mut self) -> Result<()> {
        self.scheduled.clear();
        self.interface = None;
        Ok(())
    }
}

/// Mock backend exposing a fixed set of interfaces
pub struct MockHelper {
    interfaces: BTreeSet<String>,
    bus: MockBus,
    fail: bool,
}

impl MockHelper {
    pub fn new(interfaces: &[&str]) -> Self {
        Self {
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            bus: MockBus::default(),
            fail: false,
        }
    }

    /// Creates a helper whose senders fail every transmission
    pub fn new_error(interfaces: &[&str]) -> Self {
        Self {
            fail: true,
            ..Self::new(interfaces)
        }
    }

    /// Log shared by every sender this helper allocates
    pub fn bus(&self) -> MockBus {
        self.bus.clone()
    }
}

impl CanHelper for MockHelper {
    fn backend(&self) -> &str {
        "mock"
    }

    fn interfaces(&self) -> BTreeSet<String> {
        self.interfaces.clone()
    }

    fn allocate_sender(&self) -> Box<dyn CanSender> {
        if self.fail {
            Box::new(MockSender::new_error(self.bus.clone()))
        } else {
            Box::new(MockSender::new(self.bus.clone()))
        }
    }
}
