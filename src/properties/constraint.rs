//! Write-time property constraints.
//!
//! A constraint maps a candidate value to an adjusted one. Adjustment is
//! normal control flow, never an error.

use std::fmt;
use std::sync::Arc;

use super::PropertyModel;
use crate::model::Value;

type ConstraintFn = dyn Fn(&Value, &str, &PropertyModel) -> Value + Send + Sync;

#[derive(Clone)]
pub enum Constraint {
    /// Clamp numerics into `[min, max]`; non-numerics pass through.
    Range { min: f64, max: f64 },
    /// Push the value into the nearest ancestor model flagged as a reference
    /// root. Applied by the [`ModelStore`](super::ModelStore), which owns the
    /// ancestor models.
    Reference,
    Custom(CustomConstraint),
}

/// Named closure `(candidate, key, model) -> adjusted`.
#[derive(Clone)]
pub struct CustomConstraint {
    name: String,
    func: Arc<ConstraintFn>,
}

impl Constraint {
    pub fn range(min: f64, max: f64) -> Self {
        Constraint::Range { min, max }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value, &str, &PropertyModel) -> Value + Send + Sync + 'static,
    {
        Constraint::Custom(CustomConstraint { name: name.into(), func: Arc::new(func) })
    }

    pub fn name(&self) -> &str {
        match self {
            Constraint::Range { .. } => "range",
            Constraint::Reference => "reference",
            Constraint::Custom(c) => &c.name,
        }
    }

    /// The pure part of the constraint. `Reference` returns the candidate
    /// unchanged; its side effect is applied by the store.
    pub fn adjust(&self, candidate: Value, key: &str, model: &PropertyModel) -> Value {
        match self {
            Constraint::Range { min, max } => clamp(candidate, *min, *max),
            Constraint::Reference => candidate,
            Constraint::Custom(c) => (c.func)(&candidate, key, model),
        }
    }
}

fn clamp(candidate: Value, min: f64, max: f64) -> Value {
    match candidate {
        Value::Int(i) => {
            let f = i as f64;
            if f < min {
                Value::Int(min.ceil() as i64)
            } else if f > max {
                Value::Int(max.floor() as i64)
            } else {
                Value::Int(i)
            }
        }
        Value::Float(f) if f.is_nan() => Value::Float(min),
        Value::Float(f) => Value::Float(f.clamp(min, max)),
        other => other,
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Range { min, max } => write!(f, "Range({min}..={max})"),
            Constraint::Reference => write!(f, "Reference"),
            Constraint::Custom(c) => write!(f, "Custom({})", c.name),
        }
    }
}

impl fmt::Debug for CustomConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomConstraint({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;
    use crate::properties::PropertySchema;

    fn model() -> PropertyModel {
        PropertyModel::new(NodeId(1), Arc::new(PropertySchema::builder("t").value("x", 0).build()))
    }

    #[test]
    fn test_range_clamps_numerics() {
        let c = Constraint::range(0.0, 1.0);
        let m = model();
        assert_eq!(c.adjust(Value::Float(1.5), "x", &m), Value::Float(1.0));
        assert_eq!(c.adjust(Value::Float(-0.5), "x", &m), Value::Float(0.0));
        assert_eq!(c.adjust(Value::Float(0.25), "x", &m), Value::Float(0.25));
        assert_eq!(c.adjust(Value::Int(7), "x", &m), Value::Int(1));
        assert_eq!(c.adjust(Value::from("7"), "x", &m), Value::from("7"));
    }

    #[test]
    fn test_range_with_fractional_bounds_on_ints() {
        let c = Constraint::range(0.5, 2.5);
        let m = model();
        assert_eq!(c.adjust(Value::Int(0), "x", &m), Value::Int(1));
        assert_eq!(c.adjust(Value::Int(9), "x", &m), Value::Int(2));
    }

    #[test]
    fn test_custom_constraint_sees_key_and_model() {
        let c = Constraint::custom("upper", |v, key, model| {
            assert_eq!(key, "label");
            assert_eq!(model.id(), NodeId(1));
            v.as_str().map(|s| Value::from(s.to_uppercase())).unwrap_or_else(|| v.clone())
        });
        assert_eq!(c.adjust(Value::from("door"), "label", &model()), Value::from("DOOR"));
        assert_eq!(c.name(), "upper");
        assert_eq!(format!("{c:?}"), "Custom(upper)");
    }
}
