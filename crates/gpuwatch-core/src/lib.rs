pub mod backoff;
pub mod error;
pub mod metrics;
pub mod model;
pub mod view;
pub mod wire;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use error::DecodeError;
pub use metrics::TemperatureBand;
pub use model::{ConnectionStatus, Device, Service, ServiceStatus, ServiceType, Snapshot};
pub use view::{build_device_views, claim_conflicts, ClaimConflict, DeviceView, FleetSummary};
pub use wire::{decode_frame, Frame};
