use crate::{HeapCreateInfo, UpcallError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Default, Clone, Copy)]
pub struct UpcallCreateInfo {
    // must be a power of two
    pub queue_capacity: Option<usize>,
}

/// Validated upcall settings. Only [`UpcallSettings::new`] and `Default`
/// build one outside the crate, so the capacity is always a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpcallSettings {
    pub(crate) queue_capacity: usize,
}

impl Default for UpcallSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl UpcallSettings {
    pub fn new(info: UpcallCreateInfo) -> Result<Self, UpcallError> {
        let mut settings = Self::default();
        info.queue_capacity
            .inspect(|&val| settings.queue_capacity = val);

        if !settings.queue_capacity.is_power_of_two() {
            return Err(UpcallError::InvalidCapacity(settings.queue_capacity));
        }
        Ok(settings)
    }

    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerCreateInfo {
    pub capabilities: Option<usize>,
    // turns between root scans of a capability's upcall queue, 0 disables
    pub scan_interval: Option<usize>,
    pub upcall: UpcallCreateInfo,
    pub heap: HeapCreateInfo,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub capabilities: usize,
    pub scan_interval: usize,
    pub upcall: UpcallSettings,
    pub heap: HeapCreateInfo,
}

impl SchedulerSettings {
    pub fn new(info: SchedulerCreateInfo) -> Result<Self, UpcallError> {
        let capabilities = info.capabilities.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        });
        if capabilities == 0 {
            return Err(UpcallError::NoCapabilities);
        }
        Ok(Self {
            capabilities,
            scan_interval: info.scan_interval.unwrap_or(64),
            upcall: UpcallSettings::new(info.upcall)?,
            heap: info.heap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let settings = UpcallSettings::new(UpcallCreateInfo::default()).unwrap();
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        let sched = SchedulerSettings::new(SchedulerCreateInfo {
            capabilities: Some(3),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sched.capabilities, 3);
        assert_eq!(sched.scan_interval, 64);
        assert_eq!(sched.upcall, UpcallSettings::default());
    }

    #[test]
    fn capacity_must_be_a_power_of_two() {
        for bad in [0, 3, 100, 4095] {
            assert_eq!(
                UpcallSettings::new(UpcallCreateInfo {
                    queue_capacity: Some(bad)
                }),
                Err(UpcallError::InvalidCapacity(bad))
            );
        }
        assert!(
            UpcallSettings::new(UpcallCreateInfo {
                queue_capacity: Some(1)
            })
            .is_ok()
        );
    }

    #[test]
    fn zero_capabilities_is_rejected() {
        let err = SchedulerSettings::new(SchedulerCreateInfo {
            capabilities: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, UpcallError::NoCapabilities);
    }
}
