//! Backend configuration.
//!
//! A flat key/value object read by the concrete backends. The solver trait
//! never interprets it. Each backend picks the keys it understands through
//! the typed getters below and ignores the rest, so one configuration can
//! be handed to whatever backend the factory selects.
//!
//! ```json
//! { "Ordering": "rcm", "MaxIterations": 500, "Tolerance": 1e-10 }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::{InterchangeError, create_parent_dir};

pub const ORDERING: &str = "Ordering";
pub const VERBOSITY: &str = "Verbosity";
pub const DROP_TOLERANCE: &str = "DropTolerance";
pub const MAX_ITERATIONS: &str = "MaxIterations";
pub const TOLERANCE: &str = "Tolerance";
pub const CONDITION_LIMIT: &str = "ConditionLimit";
pub const DAMPING: &str = "Damping";
pub const RADIUS: &str = "Radius";
pub const PRECONDITIONER: &str = "Preconditioner";

/// Fill-reducing ordering for direct factorizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ordering {
    #[default]
    Natural,
    ReverseCuthillMcKee,
}

impl Ordering {
    pub fn name(&self) -> &'static str {
        match self {
            Ordering::Natural => "natural",
            Ordering::ReverseCuthillMcKee => "rcm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "natural" | "none" => Some(Ordering::Natural),
            "rcm" | "reverse-cuthill-mckee" => Some(Ordering::ReverseCuthillMcKee),
            _ => None,
        }
    }
}

/// Right preconditioner for the iterative backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreconditionerKind {
    None,
    #[default]
    ColumnScaling,
    Jacobi,
}

impl PreconditionerKind {
    pub fn name(&self) -> &'static str {
        match self {
            PreconditionerKind::None => "none",
            PreconditionerKind::ColumnScaling => "column-scaling",
            PreconditionerKind::Jacobi => "jacobi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "identity" => Some(PreconditionerKind::None),
            "column-scaling" | "columnscaling" => Some(PreconditionerKind::ColumnScaling),
            "jacobi" | "diagonal" => Some(PreconditionerKind::Jacobi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolverConfig {
    entries: BTreeMap<String, Value>,
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn ordering(&self) -> Option<Ordering> {
        parse_named(self.get(ORDERING), ORDERING, Ordering::parse)
    }

    pub fn preconditioner(&self) -> Option<PreconditionerKind> {
        parse_named(self.get(PRECONDITIONER), PRECONDITIONER, PreconditionerKind::parse)
    }

    pub fn verbosity(&self) -> Option<u32> {
        parse_count(self.get(VERBOSITY), VERBOSITY).and_then(|v| u32::try_from(v).ok())
    }

    pub fn max_iterations(&self) -> Option<usize> {
        parse_count(self.get(MAX_ITERATIONS), MAX_ITERATIONS)
    }

    pub fn drop_tolerance(&self) -> Option<f64> {
        parse_real(self.get(DROP_TOLERANCE), DROP_TOLERANCE)
    }

    pub fn tolerance(&self) -> Option<f64> {
        parse_real(self.get(TOLERANCE), TOLERANCE)
    }

    pub fn condition_limit(&self) -> Option<f64> {
        parse_real(self.get(CONDITION_LIMIT), CONDITION_LIMIT)
    }

    pub fn damping(&self) -> Option<f64> {
        parse_real(self.get(DAMPING), DAMPING)
    }

    pub fn radius(&self) -> Option<f64> {
        parse_real(self.get(RADIUS), RADIUS)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), InterchangeError> {
        let path = path.as_ref();
        create_parent_dir(path)?;
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, InterchangeError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Display for SolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Non-negative real from a number or a numeric string.
pub fn parse_real(value: Option<&Value>, key: &str) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => {
            log::warn!("ignoring {key} = {}: expected a non-negative number", value?);
            None
        }
    }
}

/// Non-negative integer from a number or a numeric string.
pub fn parse_count(value: Option<&Value>, key: &str) -> Option<usize> {
    let parsed = match value? {
        Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() {
        log::warn!("ignoring {key} = {}: expected a non-negative integer", value?);
    }
    parsed
}

/// Enumerated option from a string.
pub fn parse_named<E>(value: Option<&Value>, key: &str, parse: fn(&str) -> Option<E>) -> Option<E> {
    let parsed = value?.as_str().and_then(parse);
    if parsed.is_none() {
        log::warn!("ignoring {key} = {}: unrecognized value", value?);
    }
    parsed
}
