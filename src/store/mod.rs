// src/store/mod.rs

//! An in-memory `CommandExecutor` for event records.
//!
//! Mutating commands need an auth token; the token identifies the owner of
//! the records it creates. `lock` reserves a record for the calling
//! connection until it is updated, unlocked, or the connection goes away.

mod locks;
mod record;

pub use locks::EditLocks;
pub use record::{EVENT_FIELD_COUNT, Event, EventFields, EventType, parse_id};

use crate::connection::ConnectionId;
use crate::core::errors::CommandError;
use crate::core::executor::{CommandExecutor, DisconnectHook, ExecutionContext};
use crate::core::protocol::{CommandCatalog, CommandSpec, Request, Response, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use strum::IntoEnumIterator;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct RecordStore {
    records: RwLock<BTreeMap<u64, Event>>,
    last_id: AtomicU64,
    locks: EditLocks,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, id: u64) -> Option<Event> {
        self.records.read().get(&id).cloned()
    }

    pub fn locks(&self) -> &EditLocks {
        &self.locks
    }

    /// The command catalog served by this store.
    pub fn command_catalog() -> CommandCatalog {
        let event_args = [
            "name",
            "date:YYYY-MM-DD|empty",
            "min_age:int",
            "tickets_count:int>0",
            "event_type",
        ];
        let mut update_args = vec!["id"];
        update_args.extend(event_args);
        let types = EventType::iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        CommandCatalog::new(vec![
            CommandSpec::new("help", &[], "List the available commands"),
            CommandSpec::new("info", &[], "Show collection statistics"),
            CommandSpec::new("show", &[], "List every record"),
            CommandSpec::new(
                "add-record",
                &event_args,
                &format!("Create a record and return its id. Event types: {types}"),
            ),
            CommandSpec::new("update", &update_args, "Replace the fields of a record you own"),
            CommandSpec::new("remove-by-id", &["id"], "Delete a record you own"),
            CommandSpec::new("clear", &[], "Delete every record you own"),
            CommandSpec::new("lock", &["id"], "Reserve a record for editing"),
            CommandSpec::new("unlock", &["id"], "Release a record reserved with 'lock'"),
        ])
    }

    fn help(&self) -> Value {
        let lines = Self::command_catalog()
            .commands
            .into_iter()
            .map(|c| {
                let args = c
                    .args
                    .iter()
                    .map(|a| format!(" <{a}>"))
                    .collect::<String>();
                Value::Text(format!("{}{}: {}", c.name, args, c.description))
            })
            .collect();
        Value::List(lines)
    }

    fn info(&self) -> Value {
        Value::Map(vec![
            ("records".into(), Value::Int(self.len() as i64)),
            (
                "last_id".into(),
                Value::Int(self.last_id.load(Ordering::Relaxed) as i64),
            ),
            ("locked".into(), Value::Int(self.locks.len() as i64)),
        ])
    }

    fn show(&self) -> Value {
        Value::List(self.records.read().values().map(Event::to_value).collect())
    }

    fn add(&self, owner: &str, args: &[String]) -> Result<Value, CommandError> {
        let fields = EventFields::parse("add-record", args)?;
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            id,
            fields,
            owner: owner.to_string(),
        };
        self.records.write().insert(id, event);
        debug!("Record #{} added by '{}'", id, owner);
        Ok(Value::Int(id as i64))
    }

    fn update(
        &self,
        ctx: &ExecutionContext,
        owner: &str,
        args: &[String],
    ) -> Result<Value, CommandError> {
        let Some((raw_id, rest)) = args.split_first() else {
            return Err(CommandError::validation("'update' expects an id followed by the event fields"));
        };
        let id = parse_id(raw_id)?;
        let fields = EventFields::parse("update", rest)?;

        let mut records = self.records.write();
        let event = records
            .get_mut(&id)
            .ok_or_else(|| CommandError::validation(format!("No record with id {id}")))?;
        check_owner(event, owner)?;
        self.locks
            .check_free_for(id, ctx.connection_id)
            .map_err(|_| locked(id))?;

        event.fields = fields;
        self.locks.release(id, ctx.connection_id);
        Ok(Value::Int(id as i64))
    }

    fn remove(
        &self,
        ctx: &ExecutionContext,
        owner: &str,
        args: &[String],
    ) -> Result<Value, CommandError> {
        let id = parse_id(single_arg("remove-by-id", args)?)?;
        let mut records = self.records.write();
        let event = records
            .get(&id)
            .ok_or_else(|| CommandError::validation(format!("No record with id {id}")))?;
        check_owner(event, owner)?;
        self.locks
            .check_free_for(id, ctx.connection_id)
            .map_err(|_| locked(id))?;

        records.remove(&id);
        self.locks.forget(id);
        Ok(Value::Int(id as i64))
    }

    fn clear(&self, ctx: &ExecutionContext, owner: &str) -> Value {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|id, event| {
            event.owner != owner || self.locks.check_free_for(*id, ctx.connection_id).is_err()
        });
        let removed = before - records.len();
        self.locks.release_all(ctx.connection_id);
        Value::Int(removed as i64)
    }

    fn lock(
        &self,
        ctx: &ExecutionContext,
        owner: &str,
        args: &[String],
    ) -> Result<Value, CommandError> {
        let id = parse_id(single_arg("lock", args)?)?;
        // Hold the read guard so the record cannot vanish between the checks.
        let records = self.records.read();
        let event = records
            .get(&id)
            .ok_or_else(|| CommandError::validation(format!("No record with id {id}")))?;
        check_owner(event, owner)?;
        self.locks
            .acquire(id, ctx.connection_id)
            .map_err(|_| locked(id))?;
        Ok(Value::Int(id as i64))
    }

    fn unlock(&self, ctx: &ExecutionContext, args: &[String]) -> Result<Value, CommandError> {
        let id = parse_id(single_arg("unlock", args)?)?;
        if self.locks.release(id, ctx.connection_id) {
            Ok(Value::Bool(true))
        } else {
            Err(CommandError::validation(format!(
                "Record {id} is not locked by this connection"
            )))
        }
    }
}

fn require_token(request: &Request) -> Result<&str, CommandError> {
    match request.auth_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(CommandError::auth(format!(
            "'{}' requires an auth token",
            request.command
        ))),
    }
}

fn check_owner(event: &Event, owner: &str) -> Result<(), CommandError> {
    if event.owner == owner {
        Ok(())
    } else {
        Err(CommandError::auth(format!(
            "Record {} belongs to another user",
            event.id
        )))
    }
}

fn single_arg<'a>(command: &str, args: &'a [String]) -> Result<&'a str, CommandError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(CommandError::validation(format!(
            "'{command}' expects exactly 1 argument, got {}",
            args.len()
        ))),
    }
}

fn locked(id: u64) -> CommandError {
    CommandError::validation(format!("Record {id} is being edited by another client"))
}

impl DisconnectHook for RecordStore {
    fn on_disconnect(&self, connection_id: ConnectionId) {
        let released = self.locks.release_all(connection_id);
        if released > 0 {
            info!(
                "Released {} edit lock(s) held by disconnected client {}",
                released, connection_id
            );
        }
    }
}

impl CommandExecutor for RecordStore {
    fn catalog(&self) -> CommandCatalog {
        Self::command_catalog()
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &Request,
    ) -> Result<Response, CommandError> {
        let args = request.args.as_slice();
        let payload = match request.command.as_str() {
            "help" => self.help(),
            "info" => self.info(),
            "show" => self.show(),
            "add-record" => self.add(require_token(request)?, args)?,
            "update" => self.update(ctx, require_token(request)?, args)?,
            "remove-by-id" => self.remove(ctx, require_token(request)?, args)?,
            "clear" => self.clear(ctx, require_token(request)?),
            "lock" => self.lock(ctx, require_token(request)?, args)?,
            "unlock" => self.unlock(ctx, args)?,
            other => {
                return Err(CommandError::validation(format!("Unknown command '{other}'")));
            }
        };
        Ok(Response::ok(payload))
    }
}
