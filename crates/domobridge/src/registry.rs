use strum::Display;
use tracing::debug;

use crate::device::DeviceId;
use crate::device::DeviceRecord;

/// Event categories a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    /// A decoded device-state message
    DeviceUpdate,
    /// The bus session became active
    Connected,
    /// The bus session was lost
    Disconnected,
}

/// Who a registration is for.
///
/// Broadcast registrations are kept apart from device ids so that no id value
/// doubles as a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Device(DeviceId),
    Broadcast,
}

/// Callback invoked for every matching event.
///
/// Connection events carry [`DeviceRecord::default()`].
pub trait Listener: Send {
    fn notify(&mut self, category: Category, record: &DeviceRecord);
}

impl<F> Listener for F
where
    F: FnMut(Category, &DeviceRecord) + Send,
{
    fn notify(&mut self, category: Category, record: &DeviceRecord) {
        self(category, record)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("listener capacity of {0} exhausted")]
    CapacityExceeded(usize),

    #[error("device id {0} is not a valid Domoticz idx")]
    InvalidDevice(DeviceId),

    #[error("device update listeners must name a device")]
    BroadcastDeviceUpdate,
}

struct Registration {
    target: Target,
    category: Category,
    listener: Box<dyn Listener>,
}

/// Ordered, append-only table of listeners.
///
/// Dispatch walks the table in registration order. Listeners cannot register
/// further listeners from inside a callback since dispatch holds `&mut self`.
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: Vec<Registration>,
    capacity: Option<usize>,
}

impl ListenerRegistry {
    /// Create a registry with no capacity limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that refuses registrations beyond `capacity`
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            registrations: Vec::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Append a registration.
    pub fn register(
        &mut self,
        target: Target,
        category: Category,
        listener: impl Listener + 'static,
    ) -> Result<(), RegistryError> {
        match (target, category) {
            (Target::Device(0), _) => return Err(RegistryError::InvalidDevice(0)),
            (Target::Broadcast, Category::DeviceUpdate) => {
                return Err(RegistryError::BroadcastDeviceUpdate);
            }
            _ => {}
        }

        if let Some(capacity) = self.capacity {
            if self.registrations.len() >= capacity {
                return Err(RegistryError::CapacityExceeded(capacity));
            }
        }

        debug!("registered {} listener for {:?}", category, target);
        self.registrations.push(Registration {
            target,
            category,
            listener: Box::new(listener),
        });
        Ok(())
    }

    /// Invoke every matching listener and return how many ran.
    ///
    /// Device updates match on the exact device target; connection events
    /// match on category alone.
    pub fn dispatch(&mut self, category: Category, target: Target, record: &DeviceRecord) -> usize {
        let mut invoked = 0;
        for registration in &mut self.registrations {
            if registration.category != category {
                continue;
            }
            let matches = match category {
                Category::DeviceUpdate => registration.target == target,
                Category::Connected | Category::Disconnected => true,
            };
            if matches {
                registration.listener.notify(category, record);
                invoked += 1;
            }
        }
        invoked
    }

    /// Dispatch a decoded record to the listeners of its device
    pub fn dispatch_device(&mut self, record: &DeviceRecord) -> usize {
        self.dispatch(
            Category::DeviceUpdate,
            Target::Device(record.idx),
            record,
        )
    }

    /// Dispatch a connection event to every listener of that category
    pub fn broadcast(&mut self, category: Category) -> usize {
        self.dispatch(category, Target::Broadcast, &DeviceRecord::default())
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.registrations.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<(&'static str, Category, DeviceId)>>>;

    fn recorder(log: &Log, name: &'static str) -> impl Listener + 'static {
        let log = log.clone();
        move |category: Category, record: &DeviceRecord| {
            log.lock().unwrap().push((name, category, record.idx));
        }
    }

    fn record(idx: DeviceId) -> DeviceRecord {
        DeviceRecord {
            idx,
            ..Default::default()
        }
    }

    #[test]
    fn test_device_dispatch_matches_exact_id_in_order() {
        let log = Log::default();
        let mut registry = ListenerRegistry::new();
        registry
            .register(Target::Device(7), Category::DeviceUpdate, recorder(&log, "a"))
            .unwrap();
        registry
            .register(Target::Device(8), Category::DeviceUpdate, recorder(&log, "b"))
            .unwrap();
        registry
            .register(Target::Device(7), Category::DeviceUpdate, recorder(&log, "c"))
            .unwrap();

        assert_eq!(registry.dispatch_device(&record(7)), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a", Category::DeviceUpdate, 7),
                ("c", Category::DeviceUpdate, 7)
            ]
        );
    }

    #[test]
    fn test_device_dispatch_with_no_listener() {
        let log = Log::default();
        let mut registry = ListenerRegistry::new();
        registry
            .register(Target::Device(1), Category::DeviceUpdate, recorder(&log, "a"))
            .unwrap();

        assert_eq!(registry.dispatch_device(&record(2)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_ignores_target_and_carries_default_record() {
        let log = Log::default();
        let mut registry = ListenerRegistry::new();
        registry
            .register(Target::Broadcast, Category::Connected, recorder(&log, "a"))
            .unwrap();
        registry
            .register(Target::Device(3), Category::Connected, recorder(&log, "b"))
            .unwrap();
        registry
            .register(Target::Broadcast, Category::Disconnected, recorder(&log, "c"))
            .unwrap();
        registry
            .register(Target::Device(3), Category::DeviceUpdate, recorder(&log, "d"))
            .unwrap();

        assert_eq!(registry.broadcast(Category::Connected), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", Category::Connected, 0), ("b", Category::Connected, 0)]
        );
    }

    #[test]
    fn test_capacity_limit() {
        let log = Log::default();
        let mut registry = ListenerRegistry::with_capacity_limit(2);
        registry
            .register(Target::Broadcast, Category::Connected, recorder(&log, "a"))
            .unwrap();
        registry
            .register(Target::Broadcast, Category::Disconnected, recorder(&log, "b"))
            .unwrap();

        let err = registry
            .register(Target::Device(1), Category::DeviceUpdate, recorder(&log, "c"))
            .unwrap_err();
        assert_eq!(err, RegistryError::CapacityExceeded(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rejects_ambiguous_registrations() {
        let mut registry = ListenerRegistry::new();
        let noop = |_: Category, _: &DeviceRecord| {};

        assert_eq!(
            registry.register(Target::Device(0), Category::DeviceUpdate, noop),
            Err(RegistryError::InvalidDevice(0))
        );
        assert_eq!(
            registry.register(Target::Broadcast, Category::DeviceUpdate, noop),
            Err(RegistryError::BroadcastDeviceUpdate)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listener_keeps_its_own_context() {
        let mut registry = ListenerRegistry::new();
        let total = Arc::new(Mutex::new(0.0));
        let sink = total.clone();
        registry
            .register(
                Target::Device(4),
                Category::DeviceUpdate,
                move |_: Category, record: &DeviceRecord| {
                    *sink.lock().unwrap() += record.svalue1;
                },
            )
            .unwrap();

        let mut update = record(4);
        update.svalue1 = 1.5;
        registry.dispatch_device(&update);
        registry.dispatch_device(&update);

        assert_eq!(*total.lock().unwrap(), 3.0);
    }
}
