// src/store/record.rs

//! The event record and the parsing/validation of its fields.

use crate::core::errors::CommandError;
use crate::core::protocol::Value;
use chrono::NaiveDate;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// Number of positional arguments that describe an event.
pub const EVENT_FIELD_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EventType {
    Concert,
    Football,
    Baseball,
    Opera,
    TheatrePerformance,
}

/// The user-supplied part of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub name: String,
    pub date: Option<NaiveDate>,
    pub min_age: i64,
    pub tickets_count: i64,
    pub event_type: EventType,
}

impl EventFields {
    /// Parses `name date min_age tickets_count event_type`. An empty date
    /// means "not scheduled yet".
    pub fn parse(command: &str, args: &[String]) -> Result<Self, CommandError> {
        if args.len() != EVENT_FIELD_COUNT {
            return Err(CommandError::validation(format!(
                "'{command}' expects {EVENT_FIELD_COUNT} event fields (name, date, min_age, tickets_count, event_type), got {}",
                args.len()
            )));
        }

        let name = args[0].trim();
        if name.is_empty() {
            return Err(CommandError::validation("Event name cannot be empty"));
        }

        let date = match args[1].trim() {
            "" => None,
            raw => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                CommandError::validation(format!("Invalid date '{raw}', expected YYYY-MM-DD"))
            })?),
        };

        let min_age = parse_int("min_age", &args[2])?;
        if min_age < 0 {
            return Err(CommandError::validation("min_age cannot be negative"));
        }

        let tickets_count = parse_int("tickets_count", &args[3])?;
        if tickets_count <= 0 {
            return Err(CommandError::validation("tickets_count must be greater than 0"));
        }

        let event_type = EventType::from_str(args[4].trim()).map_err(|_| {
            CommandError::validation(format!("Unknown event type '{}'", args[4].trim()))
        })?;

        Ok(Self {
            name: name.to_string(),
            date,
            min_age,
            tickets_count,
            event_type,
        })
    }
}

/// Parses a record id argument.
pub fn parse_id(raw: &str) -> Result<u64, CommandError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(CommandError::validation(format!(
            "Invalid id '{raw}', expected a positive integer"
        ))),
    }
}

fn parse_int(field: &str, raw: &str) -> Result<i64, CommandError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| CommandError::validation(format!("{field} must be an integer, got '{raw}'")))
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub fields: EventFields,
    /// The auth token of the client that created it.
    pub owner: String,
}

impl Event {
    pub fn to_value(&self) -> Value {
        let date = self
            .fields
            .date
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
        Value::Map(vec![
            ("id".into(), Value::Int(self.id as i64)),
            ("name".into(), Value::text(&self.fields.name)),
            ("date".into(), date),
            ("min_age".into(), Value::Int(self.fields.min_age)),
            ("tickets_count".into(), Value::Int(self.fields.tickets_count)),
            ("event_type".into(), Value::Text(self.fields.event_type.to_string())),
            ("owner".into(), Value::text(&self.owner)),
        ])
    }
}
