//! Nightscout Client Library
//!
//! Fetches glucose readings, treatments, device status and insulin profiles
//! from a Nightscout server, and answers point-in-time questions about the
//! profile history such as "which basal rate applied at this instant".

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod profile;
pub mod raw;
pub mod resolve;
pub mod schedule;
pub mod traits;

// Re-export commonly used types
pub use api::{Auth, NightscoutClient};
pub use config::{AppConfig, BeforeFirstPolicy, ResolutionConfig};
pub use error::ProfileError;
pub use models::{DeviceStatus, ServerStatus, Sgv, Treatment, latest_device_status};
pub use profile::{Profile, ProfileDefinition, ProfileDefinitionSet, parse_time_zone};
pub use schedule::{AbsoluteScheduleEntry, ScheduleEntry, ScheduleKind, TimeSchedule};
pub use traits::{Clock, MockClock, SystemClock};
