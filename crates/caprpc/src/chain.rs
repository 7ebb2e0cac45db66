//! # Chains
//!
//! A chain is a remote expression: a list of property reads and calls,
//! applied left to right to a resolution root.
//!
//! On the wire each step is a plain object, `{type: "get", property}` or
//! `{type: "apply", arguments}`, and a request is `{chain, targetHeapId}`.
//! A call argument that is itself a chain travels as an `UnresolvedChain`.

use capwire::Array;
use capwire::Opaque;
use capwire::Value;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum ChainOp {
    Get(String),
    Apply(Vec<Argument>),
}

#[derive(Debug, Clone)]
pub enum Argument {
    Literal(Value),
    /// Resolved on the callee before the call proceeds.
    Chain(ChainRef),
}

/// A chain together with the heap id it starts from. Without an id the chain
/// starts from the root of the call it appears in.
#[derive(Debug, Clone, Default)]
pub struct ChainRef {
    pub chain: Vec<ChainOp>,
    pub target: Option<String>,
}

impl ChainOp {
    pub fn to_value(&self) -> Value {
        match self {
            ChainOp::Get(property) => {
                Value::object([("type", Value::from("get")), ("property", Value::from(property.as_str()))])
            }
            ChainOp::Apply(arguments) => Value::object([
                ("type", Value::from("apply")),
                ("arguments", Value::array(arguments.iter().map(Argument::to_value))),
            ]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let op = value.as_object().ok_or_else(|| protocol("chain step", value))?;
        match op.get("type").as_ref().and_then(Value::as_str) {
            Some("get") => match op.get("property") {
                Some(Value::String(property)) => Ok(ChainOp::Get(property)),
                Some(Value::Number(n)) => Ok(ChainOp::Get(capwire::format_number(n))),
                other => Err(protocol("property name", &other.unwrap_or_default())),
            },
            Some("apply") => {
                let arguments = match op.get("arguments") {
                    Some(Value::Array(items)) => items.to_vec().into_iter().map(Argument::from_value).collect(),
                    None | Some(Value::Undefined) => Vec::new(),
                    Some(other) => return Err(protocol("argument list", &other)),
                };
                Ok(ChainOp::Apply(arguments))
            }
            _ => Err(Error::Protocol("chain step has no valid type".into())),
        }
    }
}

impl Argument {
    pub fn to_value(&self) -> Value {
        match self {
            Argument::Literal(value) => value.clone(),
            Argument::Chain(chain) => chain.clone().into_value(),
        }
    }

    /// Revived chain references become `Chain`; everything else is a literal.
    pub fn from_value(value: Value) -> Self {
        match ChainRef::from_opaque(&value) {
            Some(chain) => Argument::Chain(chain),
            None => Argument::Literal(value),
        }
    }
}

impl ChainRef {
    pub fn new(chain: Vec<ChainOp>, target: Option<String>) -> Self {
        Self { chain, target }
    }

    /// A reference to a heap entry itself.
    pub fn heap(id: impl Into<String>) -> Self {
        Self { chain: Vec::new(), target: Some(id.into()) }
    }

    /// `{chain, targetHeapId}`.
    pub fn to_value(&self) -> Value {
        let chain = Value::Array(Array::from_values(self.chain.iter().map(ChainOp::to_value)));
        let target = self.target.as_deref().map(Value::from).unwrap_or_default();
        Value::object([("chain", chain), ("targetHeapId", target)])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| protocol("chain reference", value))?;
        let chain = match object.get("chain") {
            Some(Value::Array(steps)) => {
                steps.to_vec().iter().map(ChainOp::from_value).collect::<Result<Vec<_>>>()?
            }
            other => return Err(protocol("chain", &other.unwrap_or_default())),
        };
        let target = match object.get("targetHeapId") {
            None | Some(Value::Undefined) | Some(Value::Null) => None,
            Some(Value::String(id)) if id.is_empty() => None,
            Some(Value::String(id)) => Some(id),
            Some(other) => return Err(protocol("targetHeapId", &other)),
        };
        Ok(Self { chain, target })
    }

    /// Wraps the reference so the `UnresolvedChain` handler picks it up.
    pub fn into_value(self) -> Value {
        Value::Opaque(Opaque::new(self))
    }

    pub fn from_opaque(value: &Value) -> Option<Self> {
        match value {
            Value::Opaque(opaque) => opaque.downcast_ref::<ChainRef>().cloned(),
            _ => None,
        }
    }
}

fn protocol(what: &str, found: &Value) -> Error {
    Error::Protocol(format!("malformed {}: found {}", what, found.type_name()))
}
