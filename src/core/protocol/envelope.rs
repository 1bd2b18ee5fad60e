// src/core/protocol/envelope.rs

//! The in-memory envelopes exchanged between clients and the server,
//! independent of their wire encoding.

use crate::core::errors::CommandError;
use bincode::de::Decoder;
use bincode::error::{AllowedEnumVariants, DecodeError};
use bincode::{Decode, Encode};
use strum_macros::{AsRefStr, Display};

/// How deeply `Value::List` and `Value::Map` may nest on the wire. Decoding
/// recurses once per level, so untrusted input must not choose the depth.
pub const MAX_VALUE_DEPTH: usize = 64;

/// The outcome class of a response. The set is closed; clients switch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    ValidationError,
    AuthError,
    ServerError,
}

/// A command-specific structured result.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a field of a `Value::Map` by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl<Context> Decode<Context> for Value {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_value(decoder, 0)
    }
}
bincode::impl_borrow_decode!(Value);

// Mirrors the layout produced by the derived `Encode`: a u32 variant index
// followed by the fields, with a u64 length before list and map entries.
fn decode_value<D: Decoder>(decoder: &mut D, depth: usize) -> Result<Value, DecodeError> {
    let variant = u32::decode(decoder)?;
    match variant {
        0 => Ok(Value::Null),
        1 => Ok(Value::Bool(bool::decode(decoder)?)),
        2 => Ok(Value::Int(i64::decode(decoder)?)),
        3 => Ok(Value::Text(String::decode(decoder)?)),
        4 => {
            let len = nested_len(decoder, depth)?;
            // Every entry takes at least one byte, so a bogus length runs
            // out of input instead of allocating.
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(decode_value(decoder, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        5 => {
            let len = nested_len(decoder, depth)?;
            let mut fields = Vec::new();
            for _ in 0..len {
                let key = String::decode(decoder)?;
                fields.push((key, decode_value(decoder, depth + 1)?));
            }
            Ok(Value::Map(fields))
        }
        found => Err(DecodeError::UnexpectedVariant {
            type_name: "Value",
            allowed: &AllowedEnumVariants::Range { min: 0, max: 5 },
            found,
        }),
    }
}

fn nested_len<D: Decoder>(decoder: &mut D, depth: usize) -> Result<u64, DecodeError> {
    if depth >= MAX_VALUE_DEPTH {
        return Err(DecodeError::OtherString(format!(
            "value nesting exceeds {MAX_VALUE_DEPTH} levels"
        )));
    }
    u64::decode(decoder)
}

/// A client command. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Request {
    pub command: String,
    pub args: Vec<String>,
    pub auth_token: Option<String>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            auth_token: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// The server's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Response {
    pub status: Status,
    pub payload: Value,
}

impl Response {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn empty() -> Self {
        Self::ok(Value::Null)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

impl From<CommandError> for Response {
    fn from(e: CommandError) -> Self {
        Self {
            status: e.status(),
            payload: Value::Text(e.to_string()),
        }
    }
}

/// One entry of the command catalog advertised to new clients.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CommandSpec {
    pub name: String,
    /// Human-readable argument shape, one entry per positional argument.
    pub args: Vec<String>,
    pub description: String,
}

impl CommandSpec {
    pub fn new(name: &str, args: &[&str], description: &str) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            description: description.to_string(),
        }
    }
}

/// The static list of supported commands, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct CommandCatalog {
    pub commands: Vec<CommandSpec>,
}

impl CommandCatalog {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self { commands }
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The single object carried by one read or one write on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Message {
    Request(Request),
    Response(Response),
    Catalog(CommandCatalog),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Catalog(_) => "catalog",
        }
    }

    /// The kind named by a wire variant index, in declaration order.
    pub fn kind_of(variant: u32) -> Option<&'static str> {
        match variant {
            0 => Some("request"),
            1 => Some("response"),
            2 => Some("catalog"),
            _ => None,
        }
    }
}
