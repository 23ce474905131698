//! The periodic enqueue descriptor registered at process startup, and its derived state.

use crate::error::{JobError, JobResult};
use crate::job::Priority;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Validates a schedule id against `[A-Za-z0-9_-]+`.
pub fn validate_schedule_id(id: &str) -> JobResult<()> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(JobError::InvalidScheduleId(format!(
            "schedule id '{id}' must be non-empty and match [A-Za-z0-9_-]+"
        )));
    }
    Ok(())
}

/// Parses a 5-field minute/hour/dom/month/dow cron expression. The `cron` crate this repo
/// depends on parses 6-field expressions with a leading seconds field, so a literal `"0 "`
/// is prepended before handing the expression off — schedules still fire on minute
/// boundaries exactly as a 5-field expression implies.
pub fn parse_cron(expr: &str) -> JobResult<cron::Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(JobError::InvalidCron(format!(
            "expected a 5-field minute/hour/dom/month/dow expression, got '{expr}' ({} fields)",
            fields.len()
        )));
    }
    let six_field = format!("0 {expr}");
    cron::Schedule::from_str(&six_field).map_err(|e| JobError::InvalidCron(e.to_string()))
}

/// Resolves an IANA timezone name, defaulting to UTC when unset.
pub fn parse_timezone(name: Option<&str>) -> JobResult<Tz> {
    match name {
        None | Some("") => Ok(chrono_tz::UTC),
        Some(name) => Tz::from_str(name)
            .map_err(|_| JobError::InvalidTimezone(format!("unknown IANA timezone '{name}'"))),
    }
}

/// A registered periodic enqueue descriptor. Registration happens once at process startup;
/// a schedule's `cron`/`timezone` are validated up front so a bad registration fails loudly
/// rather than silently never firing.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub id: String,
    pub cron: String,
    pub job: String,
    pub payload: crate::job::Payload,
    pub priority: Priority,
    pub timezone: String,
    pub enabled: bool,
    pub description: Option<String>,
}

impl Schedule {
    /// Builds and validates a schedule. Fails with `InvalidScheduleId`, `InvalidCron`, or
    /// `InvalidTimezone` rather than registering something that can never fire.
    pub fn new(
        id: impl Into<String>,
        cron: impl Into<String>,
        job: impl Into<String>,
        payload: crate::job::Payload,
    ) -> JobResult<Self> {
        let id = id.into();
        let cron = cron.into();
        validate_schedule_id(&id)?;
        parse_cron(&cron)?;
        Ok(Self {
            id,
            cron,
            job: job.into(),
            payload,
            priority: Priority::Normal,
            timezone: "UTC".to_string(),
            enabled: true,
            description: None,
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> JobResult<Self> {
        let timezone = timezone.into();
        parse_timezone(Some(&timezone))?;
        self.timezone = timezone;
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Computes the next eligible fire time strictly after `from`, evaluated in the
    /// schedule's own timezone.
    pub fn next_run_after(&self, from: DateTime<Utc>) -> JobResult<Option<DateTime<Utc>>> {
        let schedule = parse_cron(&self.cron)?;
        let tz = parse_timezone(Some(&self.timezone))?;
        let from_local = from.with_timezone(&tz);
        Ok(schedule.after(&from_local).next().map(|dt| dt.with_timezone(&Utc)))
    }
}

/// Derived state held separately from the `Schedule` registration, per §3.
#[derive(Debug, Clone, Default)]
pub struct ScheduleState {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
}
