//! Point-in-time queries over a profile history.
//!
//! Thin free-function surface over [`ProfileDefinitionSet`],
//! [`ProfileDefinition`] and [`Profile`] for callers that prefer it to the
//! methods.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::profile::{Profile, ProfileDefinition, ProfileDefinitionSet};

pub fn active_definition_at(
    set: &ProfileDefinitionSet,
    instant: DateTime<Utc>,
) -> Result<&ProfileDefinition> {
    set.active_definition_at(instant)
}

pub fn default_profile(definition: &ProfileDefinition) -> Result<&Profile> {
    definition.default_profile()
}

pub fn basal_rate_at(profile: &Profile, instant: DateTime<Utc>) -> Result<f64> {
    profile.basal_at(instant)
}

pub fn sensitivity_at(profile: &Profile, instant: DateTime<Utc>) -> Result<f64> {
    profile.sensitivity_at(instant)
}

pub fn carb_ratio_at(profile: &Profile, instant: DateTime<Utc>) -> Result<f64> {
    profile.carb_ratio_at(instant)
}

pub fn time_zone_of(profile: &Profile) -> Tz {
    profile.time_zone()
}
