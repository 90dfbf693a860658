//! Insulin therapy profiles and their dated history.
//!
//! A [`ProfileDefinitionSet`] is the full history of a user's settings. Each
//! [`ProfileDefinition`] takes effect at its start date and stays in effect
//! until the next one starts. Within a definition, named [`Profile`]s hold
//! daily schedules whose offsets are measured from local midnight in the
//! profile's time zone.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::{BeforeFirstPolicy, ResolutionConfig};
use crate::error::{ProfileError, Result};
use crate::raw::{RawProfile, RawProfileDefinition, RawScheduleEntry, parse_timestamp};
use crate::schedule::{AbsoluteScheduleEntry, ScheduleKind, TimeSchedule};
use crate::traits::Clock;

/// Resolve an IANA identifier such as `"America/New_York"`.
pub fn parse_time_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ProfileError::UnknownTimeZone(name.to_string()))
}

fn parse_schedule(raw: Option<&Vec<RawScheduleEntry>>) -> Result<Option<TimeSchedule>> {
    raw.map(|entries| TimeSchedule::from_raw(entries)).transpose()
}

// ==================== Profile ====================

/// One complete dosing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    dia_hours: f64,
    timezone: Tz,
    basal: Option<TimeSchedule>,
    carb_ratio: Option<TimeSchedule>,
    sensitivity: Option<TimeSchedule>,
    target_low: Option<TimeSchedule>,
    target_high: Option<TimeSchedule>,
    carbs_hr: Option<f64>,
    delay: Option<f64>,
    units: Option<String>,
}

impl Profile {
    /// A profile with no schedules; attach them with [`Profile::with_schedule`].
    pub fn new(timezone: Tz, dia_hours: f64) -> Self {
        Self {
            dia_hours,
            timezone,
            basal: None,
            carb_ratio: None,
            sensitivity: None,
            target_low: None,
            target_high: None,
            carbs_hr: None,
            delay: None,
            units: None,
        }
    }

    pub fn with_schedule(mut self, kind: ScheduleKind, schedule: TimeSchedule) -> Self {
        *self.slot_mut(kind) = Some(schedule);
        self
    }

    pub fn from_raw(raw: &RawProfile, config: &ResolutionConfig) -> Result<Self> {
        let zone_name = raw
            .timezone
            .as_deref()
            .or(config.default_timezone.as_deref())
            .ok_or(ProfileError::MissingField {
                record: "profile",
                field: "timezone",
            })?;
        let timezone = parse_time_zone(zone_name)?;

        let dia_hours = match &raw.dia {
            Some(dia) => dia.to_f64("dia")?,
            None => config.default_dia_hours,
        };
        if dia_hours < 0.0 {
            return Err(ProfileError::invalid(
                "dia",
                dia_hours.to_string(),
                "duration of insulin action cannot be negative",
            ));
        }

        Ok(Self {
            dia_hours,
            timezone,
            basal: parse_schedule(raw.basal.as_ref())?,
            carb_ratio: parse_schedule(raw.carbratio.as_ref())?,
            sensitivity: parse_schedule(raw.sens.as_ref())?,
            target_low: parse_schedule(raw.target_low.as_ref())?,
            target_high: parse_schedule(raw.target_high.as_ref())?,
            carbs_hr: raw.carbs_hr.as_ref().map(|n| n.to_f64("carbs_hr")).transpose()?,
            delay: raw.delay.as_ref().map(|n| n.to_f64("delay")).transpose()?,
            units: raw.units.clone(),
        })
    }

    /// Duration of insulin action, in hours.
    pub fn dia_hours(&self) -> f64 {
        self.dia_hours
    }

    pub fn time_zone(&self) -> Tz {
        self.timezone
    }

    pub fn time_zone_name(&self) -> &'static str {
        self.timezone.name()
    }

    /// Carbohydrate absorption rate, in grams per hour.
    pub fn carbs_hr(&self) -> Option<f64> {
        self.carbs_hr
    }

    pub fn delay(&self) -> Option<f64> {
        self.delay
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    fn slot(&self, kind: ScheduleKind) -> &Option<TimeSchedule> {
        match kind {
            ScheduleKind::Basal => &self.basal,
            ScheduleKind::CarbRatio => &self.carb_ratio,
            ScheduleKind::Sensitivity => &self.sensitivity,
            ScheduleKind::TargetLow => &self.target_low,
            ScheduleKind::TargetHigh => &self.target_high,
        }
    }

    fn slot_mut(&mut self, kind: ScheduleKind) -> &mut Option<TimeSchedule> {
        match kind {
            ScheduleKind::Basal => &mut self.basal,
            ScheduleKind::CarbRatio => &mut self.carb_ratio,
            ScheduleKind::Sensitivity => &mut self.sensitivity,
            ScheduleKind::TargetLow => &mut self.target_low,
            ScheduleKind::TargetHigh => &mut self.target_high,
        }
    }

    pub fn schedule(&self, kind: ScheduleKind) -> Result<&TimeSchedule> {
        self.slot(kind)
            .as_ref()
            .ok_or(ProfileError::NoSuchSchedule(kind))
    }

    pub fn has_schedule(&self, kind: ScheduleKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Seconds since local midnight of `instant` in this profile's zone.
    ///
    /// Uses the zone's UTC offset at `instant` itself, so daylight saving is
    /// honored for the queried date. The result is wall-clock time: on a
    /// transition day it can differ from the true elapsed seconds.
    pub fn local_offset_of(&self, instant: DateTime<Utc>) -> u32 {
        instant
            .with_timezone(&self.timezone)
            .time()
            .num_seconds_from_midnight()
    }

    pub fn value_at(&self, kind: ScheduleKind, instant: DateTime<Utc>) -> Result<f64> {
        let schedule = self.schedule(kind)?;
        schedule.value_at(self.local_offset_of(instant))
    }

    /// Basal rate in U/hr.
    pub fn basal_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.value_at(ScheduleKind::Basal, instant)
    }

    /// Insulin sensitivity in glucose units per U.
    pub fn sensitivity_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.value_at(ScheduleKind::Sensitivity, instant)
    }

    /// Carb ratio in grams per U.
    pub fn carb_ratio_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.value_at(ScheduleKind::CarbRatio, instant)
    }

    /// Target range `(low, high)`.
    pub fn target_range_at(&self, instant: DateTime<Utc>) -> Result<(f64, f64)> {
        Ok((
            self.value_at(ScheduleKind::TargetLow, instant)?,
            self.value_at(ScheduleKind::TargetHigh, instant)?,
        ))
    }

    /// The `kind` schedule placed on absolute time between two instants.
    pub fn schedule_between(
        &self,
        kind: ScheduleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AbsoluteScheduleEntry>> {
        Ok(self.schedule(kind)?.between(self.timezone, start, end))
    }
}

// ==================== ProfileDefinition ====================

/// One dated version of the user's settings: a store of named profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDefinition {
    start_date: DateTime<Utc>,
    default_profile_name: String,
    store: BTreeMap<String, Profile>,
    units: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl ProfileDefinition {
    pub fn new(
        start_date: DateTime<Utc>,
        default_profile_name: impl Into<String>,
        store: BTreeMap<String, Profile>,
    ) -> Self {
        Self {
            start_date,
            default_profile_name: default_profile_name.into(),
            store,
            units: None,
            created_at: None,
        }
    }

    pub fn from_raw(raw: &RawProfileDefinition, config: &ResolutionConfig) -> Result<Self> {
        let start_date = raw.start_date.as_deref().ok_or(ProfileError::MissingField {
            record: "profile definition",
            field: "startDate",
        })?;
        let start_date = parse_timestamp(start_date, "startDate")?;

        let default_profile_name =
            raw.default_profile
                .clone()
                .ok_or(ProfileError::MissingField {
                    record: "profile definition",
                    field: "defaultProfile",
                })?;

        let raw_store = raw.store.as_ref().ok_or(ProfileError::MissingField {
            record: "profile definition",
            field: "store",
        })?;
        let store = raw_store
            .iter()
            .map(|(name, profile)| Ok((name.clone(), Profile::from_raw(profile, config)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        if !store.contains_key(&default_profile_name) {
            tracing::warn!(
                "Profile definition starting {} names missing default profile '{}'",
                start_date,
                default_profile_name
            );
        }

        let created_at = raw
            .created_at
            .as_deref()
            .map(|s| parse_timestamp(s, "created_at"))
            .transpose()?;

        Ok(Self {
            start_date,
            default_profile_name,
            store,
            units: raw.units.clone(),
            created_at,
        })
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn default_profile_name(&self) -> &str {
        &self.default_profile_name
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.store.keys().map(String::as_str)
    }

    /// The profile the definition marks as default.
    ///
    /// A dangling default name is an upstream data error and is reported,
    /// never substituted.
    pub fn default_profile(&self) -> Result<&Profile> {
        self.store
            .get(&self.default_profile_name)
            .ok_or_else(|| ProfileError::MissingDefaultProfile(self.default_profile_name.clone()))
    }

    pub fn profile_named(&self, name: &str) -> Result<&Profile> {
        self.store
            .get(name)
            .ok_or_else(|| ProfileError::UnknownProfileName(name.to_string()))
    }
}

// ==================== ProfileDefinitionSet ====================

/// The ordered history of profile definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDefinitionSet {
    definitions: Vec<ProfileDefinition>,
    before_first: BeforeFirstPolicy,
}

impl ProfileDefinitionSet {
    /// Order definitions by start date. Definitions sharing a start date keep
    /// their input order, so the later one is the one selected.
    pub fn new(
        mut definitions: Vec<ProfileDefinition>,
        before_first: BeforeFirstPolicy,
    ) -> Result<Self> {
        if definitions.is_empty() {
            return Err(ProfileError::EmptyDefinitionSet);
        }
        definitions.sort_by_key(|d| d.start_date);

        for pair in definitions.windows(2) {
            if pair[0].start_date == pair[1].start_date {
                tracing::warn!(
                    "Duplicate profile start date {}, the later record takes precedence",
                    pair[0].start_date
                );
            }
        }

        Ok(Self {
            definitions,
            before_first,
        })
    }

    pub fn from_records(
        records: &[RawProfileDefinition],
        config: &ResolutionConfig,
    ) -> Result<Self> {
        let definitions = records
            .iter()
            .map(|raw| {
                let definition = ProfileDefinition::from_raw(raw, config)?;
                tracing::debug!(
                    "Built profile definition starting {} with {} profile(s)",
                    definition.start_date,
                    definition.store.len()
                );
                Ok(definition)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(definitions, config.before_first)
    }

    /// Build from the JSON array served by `/api/v1/profile.json`.
    pub fn from_json(json: &str, config: &ResolutionConfig) -> anyhow::Result<Self> {
        let records: Vec<RawProfileDefinition> =
            serde_json::from_str(json).context("Failed to parse profile records")?;
        Ok(Self::from_records(&records, config)?)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Always false; construction rejects empty sets.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileDefinition> {
        self.definitions.iter()
    }

    pub fn before_first_policy(&self) -> BeforeFirstPolicy {
        self.before_first
    }

    /// The definition in effect at `instant`: the last one whose start date
    /// is at or before it.
    ///
    /// Instants earlier than every start date follow the configured
    /// [`BeforeFirstPolicy`].
    pub fn active_definition_at(&self, instant: DateTime<Utc>) -> Result<&ProfileDefinition> {
        let idx = self
            .definitions
            .partition_point(|d| d.start_date <= instant);
        match idx {
            0 => match self.before_first {
                BeforeFirstPolicy::ClampToFirst => self
                    .definitions
                    .first()
                    .ok_or(ProfileError::EmptyDefinitionSet),
                BeforeFirstPolicy::Fail => Err(ProfileError::NoActiveProfile(instant)),
            },
            n => Ok(&self.definitions[n - 1]),
        }
    }

    pub fn active_definition_now(&self, clock: &dyn Clock) -> Result<&ProfileDefinition> {
        self.active_definition_at(clock.now_utc())
    }

    /// Default profile of the definition active at `instant`.
    pub fn active_profile_at(&self, instant: DateTime<Utc>) -> Result<&Profile> {
        self.active_definition_at(instant)?.default_profile()
    }

    pub fn basal_rate_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.active_profile_at(instant)?.basal_at(instant)
    }

    pub fn sensitivity_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.active_profile_at(instant)?.sensitivity_at(instant)
    }

    pub fn carb_ratio_at(&self, instant: DateTime<Utc>) -> Result<f64> {
        self.active_profile_at(instant)?.carb_ratio_at(instant)
    }
}
