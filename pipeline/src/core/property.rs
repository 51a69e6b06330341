//! Global data invariants ("properties") over scanned items.
//!
//! Recognized shapes:
//! - `Field(x) >= N` (also `>`, `<`, `<=`, `≥`, `≤`): every item's field is numeric
//!   and satisfies the comparison.
//! - `mono(Field, EnumRef)`: every item's field is one of the enum's values.
//!
//! Anything else is unsupported and holds vacuously.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::core::expr::stringify;

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s*\(\s*x\s*\)\s*(>=|<=|≥|≤|>|<)\s*(-?\d+(?:\.\d+)?)\s*$")
        .expect("valid numeric property regex")
});
static MONO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*mono\s*\(\s*(\w+)\s*,\s*(\w+)\s*\)\s*$").expect("valid mono regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(Comparison::Gt),
            ">=" | "≥" => Some(Comparison::Ge),
            "<" => Some(Comparison::Lt),
            "<=" | "≤" => Some(Comparison::Le),
            _ => None,
        }
    }

    fn holds(self, value: f64, bound: f64) -> bool {
        match self {
            Comparison::Gt => value > bound,
            Comparison::Ge => value >= bound,
            Comparison::Lt => value < bound,
            Comparison::Le => value <= bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyShape {
    Numeric {
        field: String,
        cmp: Comparison,
        bound: f64,
    },
    EnumMembership {
        field: String,
        enum_ref: String,
        values: BTreeSet<String>,
    },
    Unsupported,
}

impl PropertyShape {
    /// Recognize a property declaration. `enums` resolves `mono` references.
    pub fn parse(raw: &str, enums: &HashMap<String, Vec<String>>) -> Self {
        if let Some(caps) = NUMERIC_RE.captures(raw) {
            let cmp = Comparison::parse(&caps[2]);
            let bound = caps[3].parse::<f64>().ok();
            if let (Some(cmp), Some(bound)) = (cmp, bound) {
                return PropertyShape::Numeric {
                    field: caps[1].to_string(),
                    cmp,
                    bound,
                };
            }
        }
        if let Some(caps) = MONO_RE.captures(raw) {
            let enum_ref = caps[2].to_string();
            let Some(values) = enums.get(&enum_ref) else {
                warn!(property = raw, enum_ref = %enum_ref, "unknown enum; property treated as unsupported");
                return PropertyShape::Unsupported;
            };
            return PropertyShape::EnumMembership {
                field: caps[1].to_string(),
                enum_ref,
                values: values.iter().cloned().collect(),
            };
        }
        PropertyShape::Unsupported
    }

    /// True if every item satisfies this shape.
    pub fn holds_for(&self, items: &[Value]) -> bool {
        match self {
            PropertyShape::Numeric { field, cmp, bound } => items.iter().all(|item| {
                numeric_field(item, field).is_some_and(|value| cmp.holds(value, *bound))
            }),
            PropertyShape::EnumMembership { field, values, .. } => items
                .iter()
                .all(|item| values.contains(&stringify(item.get(field)))),
            PropertyShape::Unsupported => true,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, PropertyShape::Unsupported)
    }
}

/// Numbers and numeric strings count; everything else is non-numeric.
fn numeric_field(item: &Value, field: &str) -> Option<f64> {
    match item.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A recognized property plus the key prefix its snapshot is scanned from.
#[derive(Debug, Clone)]
pub struct Property {
    pub id: String,
    pub raw: String,
    pub shape: PropertyShape,
    pub scan_prefix: String,
}

/// Evaluates all declared properties against per-prefix snapshots.
#[derive(Debug, Clone, Default)]
pub struct PropertyChecker {
    properties: Vec<Property>,
}

impl PropertyChecker {
    /// Build the checker.
    ///
    /// Each property scans `scopes[id]` when declared, otherwise `default_prefix`.
    pub fn new<'a, I>(
        declarations: I,
        enums: &HashMap<String, Vec<String>>,
        scopes: &BTreeMap<String, String>,
        default_prefix: &str,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let properties = declarations
            .into_iter()
            .map(|(id, raw)| Property {
                id: id.to_string(),
                raw: raw.to_string(),
                shape: PropertyShape::parse(raw, enums),
                scan_prefix: scopes
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| default_prefix.to_string()),
            })
            .collect();
        Self { properties }
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Distinct prefixes that must be scanned for supported properties.
    pub fn scan_prefixes(&self) -> BTreeSet<&str> {
        self.properties
            .iter()
            .filter(|p| p.shape.is_supported())
            .map(|p| p.scan_prefix.as_str())
            .collect()
    }

    /// Single aggregate verdict over every supported property and item.
    ///
    /// A prefix missing from `snapshots` is evaluated as an empty snapshot.
    pub fn evaluate(&self, snapshots: &HashMap<String, Vec<Value>>) -> bool {
        self.properties.iter().all(|property| {
            let items = snapshots
                .get(&property.scan_prefix)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            property.shape.holds_for(items)
        })
    }
}
