//! # Training Loop Hooks
//!
//! A plain map from loop phase to the callbacks registered for it. Callbacks
//! take no arguments and run in registration order; the first error aborts
//! the firing (and the loop that fired it).
//!
//! ```rust,ignore
//! use nids_window::hooks::HookEvent;
//!
//! trainer.hooks_mut().register(HookEvent::AfterEpoch, move || {
//!     log::info!("epoch finished");
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;
use crate::FlowResult;

/// Phase boundaries of the training loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeTrain,
    BeforeEpoch,
    BeforeBatch,
    BeforeValidation,
    BeforeTest,
    AfterTrain,
    AfterEpoch,
    AfterBatch,
    AfterValidation,
    AfterTest,
}

impl HookEvent {
    pub const ALL: [HookEvent; 10] = [
        HookEvent::BeforeTrain,
        HookEvent::BeforeEpoch,
        HookEvent::BeforeBatch,
        HookEvent::BeforeValidation,
        HookEvent::BeforeTest,
        HookEvent::AfterTrain,
        HookEvent::AfterEpoch,
        HookEvent::AfterBatch,
        HookEvent::AfterValidation,
        HookEvent::AfterTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeTrain => "before_train",
            HookEvent::BeforeEpoch => "before_epoch",
            HookEvent::BeforeBatch => "before_batch",
            HookEvent::BeforeValidation => "before_validation",
            HookEvent::BeforeTest => "before_test",
            HookEvent::AfterTrain => "after_train",
            HookEvent::AfterEpoch => "after_epoch",
            HookEvent::AfterBatch => "after_batch",
            HookEvent::AfterValidation => "after_validation",
            HookEvent::AfterTest => "after_test",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| FlowError::UnknownHook(s.to_string()))
    }
}

type Callback = Box<dyn FnMut() -> FlowResult<()>>;

/// Ordered callbacks per loop phase
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookEvent, Vec<Callback>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to `event`
    pub fn register<F>(&mut self, event: HookEvent, callback: F)
    where
        F: FnMut() -> FlowResult<()> + 'static,
    {
        self.hooks.entry(event).or_default().push(Box::new(callback));
    }

    /// Append a callback to the event called `name` (e.g. `"after_epoch"`)
    pub fn register_named<F>(&mut self, name: &str, callback: F) -> FlowResult<()>
    where
        F: FnMut() -> FlowResult<()> + 'static,
    {
        let event = name.parse()?;
        self.register(event, callback);
        Ok(())
    }

    /// Run every callback of `event` in registration order
    pub fn fire(&mut self, event: HookEvent) -> FlowResult<()> {
        if let Some(callbacks) = self.hooks.get_mut(&event) {
            log::trace!("Firing {} callback(s) for {}", callbacks.len(), event);
            for callback in callbacks.iter_mut() {
                callback()?;
            }
        }
        Ok(())
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.hooks.get(&event).map_or(0, Vec::len)
    }

    pub fn clear(&mut self, event: HookEvent) {
        self.hooks.remove(&event);
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for event in HookEvent::ALL {
            let n = self.count(event);
            if n > 0 {
                map.entry(&event.as_str(), &n);
            }
        }
        map.finish()
    }
}
