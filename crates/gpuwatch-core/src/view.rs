use crate::model::{Device, Service, Snapshot};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub device: Device,
    pub owning_service: Option<Service>,
}

impl DeviceView {
    pub fn is_active(&self) -> bool {
        self.owning_service.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimConflict {
    pub device_index: u32,
    pub kept_port: u16,
    pub ignored_port: u16,
}

/// First service in list order to claim a device index owns it.
fn owners(services: &[Service]) -> HashMap<u32, &Service> {
    let mut owners = HashMap::new();
    for service in services {
        for &index in &service.device_indices {
            owners.entry(index).or_insert(service);
        }
    }
    owners
}

pub fn build_device_views(snapshot: &Snapshot) -> Vec<DeviceView> {
    let owners = owners(&snapshot.services);
    snapshot
        .devices
        .iter()
        .map(|device| DeviceView {
            device: device.clone(),
            owning_service: owners.get(&device.index).map(|service| (*service).clone()),
        })
        .collect()
}

/// Claims dropped by [`build_device_views`], in encounter order.
pub fn claim_conflicts(snapshot: &Snapshot) -> Vec<ClaimConflict> {
    let mut kept: HashMap<u32, u16> = HashMap::new();
    let mut conflicts = Vec::new();
    for service in &snapshot.services {
        for &index in &service.device_indices {
            match kept.get(&index) {
                // a service listing the same device twice is not a conflict
                Some(&kept_port) if kept_port != service.port => conflicts.push(ClaimConflict {
                    device_index: index,
                    kept_port,
                    ignored_port: service.port,
                }),
                Some(_) => {}
                None => {
                    kept.insert(index, service.port);
                }
            }
        }
    }
    conflicts
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetSummary {
    pub active: usize,
    pub total: usize,
}

impl FleetSummary {
    pub fn from_views(views: &[DeviceView]) -> Self {
        Self {
            active: views.iter().filter(|view| view.is_active()).count(),
            total: views.len(),
        }
    }

    pub fn idle(&self) -> usize {
        self.total - self.active
    }
}

impl fmt::Display for FleetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} GPUs active", self.active, self.total)
    }
}
