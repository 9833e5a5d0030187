use vvsched::resources::{ResourceIndices, ResourcePool};
use vvsched::scheduler::ResourceQuery;
use vvsched::testset::TestSize;

use crate::config::PlatformConfig;

/// Processors and devices reserved for one running test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHandle {
    pub procs: ResourceIndices,
    pub devices: ResourceIndices,
}

impl ResourceHandle {
    /// Environment variables that tell a test which resources it owns.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![("VVTEST_PROC_IDS", join_indices(&self.procs))];
        if !self.devices.is_empty() {
            env.push(("VVTEST_DEVICE_IDS", join_indices(&self.devices)));
        }
        env
    }
}

fn join_indices(indices: &ResourceIndices) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Resources of the machine on which tests are executed.
pub struct Platform {
    procs: ResourcePool,
    devices: Option<ResourcePool>,
}

impl Platform {
    pub fn new(num_procs: u32, max_procs: u32, devices: Option<(u32, u32)>) -> Self {
        Platform {
            procs: ResourcePool::new(num_procs, max_procs),
            devices: devices.map(|(num, max)| ResourcePool::new(num, max)),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        let num_procs = config.resolved_num_procs();
        let max_procs = config.max_procs.unwrap_or(num_procs);
        let devices = config
            .num_devices
            .map(|num| (num, config.max_devices.unwrap_or(num)));
        Self::new(num_procs, max_procs, devices)
    }

    pub fn num_procs(&self) -> u32 {
        self.procs.capacity()
    }

    pub fn num_devices(&self) -> u32 {
        self.devices.as_ref().map(|d| d.capacity()).unwrap_or(0)
    }

    pub fn obtain(&mut self, size: &TestSize) -> ResourceHandle {
        let procs = self.procs.acquire(size.np);
        let devices = match &mut self.devices {
            Some(pool) => pool.acquire(size.devices()),
            None => ResourceIndices::new(),
        };
        ResourceHandle { procs, devices }
    }

    pub fn release(&mut self, handle: &ResourceHandle) {
        self.procs.release(&handle.procs);
        if let Some(pool) = &mut self.devices {
            pool.release(&handle.devices);
        }
    }
}

impl ResourceQuery for Platform {
    fn query_procs(&self, count: u32) -> bool {
        count.max(1) <= self.procs.available()
    }

    fn query_devices(&self, count: u32) -> bool {
        match &self.devices {
            Some(pool) => count <= pool.available(),
            None => count == 0,
        }
    }
}
