use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Int(v) => *v as f64,
            ParamValue::Float(v) => *v,
        }
    }

    /// Integral, non-negative values only; `3.0` is accepted, `3.5` is not.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{:e}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

/// One point of the hyperparameter grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, ParamValue>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.0.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable, filesystem-safe identifier, e.g. `dropout_rate-2.5e-1_units-64`.
    pub fn model_id(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{}-{}", name, value))
            .collect::<Vec<_>>()
            .join("_")
            .replace(['/', '\\', ' '], "")
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Named candidate values per hyperparameter, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    dimensions: Vec<(String, Vec<ParamValue>)>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a dimension.
    pub fn with<V: Into<ParamValue>>(mut self, name: impl Into<String>, values: Vec<V>) -> Self {
        self.set(name, values);
        self
    }

    pub fn set<V: Into<ParamValue>>(&mut self, name: impl Into<String>, values: Vec<V>) {
        let name = name.into();
        let values: Vec<ParamValue> = values.into_iter().map(Into::into).collect();
        match self.dimensions.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.dimensions.push((name, values)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Number of grid points.
    pub fn size(&self) -> usize {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions.iter().map(|(_, values)| values.len()).product()
    }
}

/// Cartesian product of every dimension; the last dimension varies fastest.
pub fn cartesian(space: &SearchSpace) -> Vec<ParamSet> {
    let total = space.size();
    let mut out = Vec::with_capacity(total);
    for index in 0..total {
        let mut remainder = index;
        let mut params = ParamSet::new();
        for (name, values) in space.dimensions.iter().rev() {
            let choice = remainder % values.len();
            remainder /= values.len();
            params.insert(name.clone(), values[choice]);
        }
        out.push(params);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_size_and_order() {
        let space = SearchSpace::new()
            .with("lam", vec![1e-6, 1e-7, 1e-8])
            .with("dropout_rate", vec![0.25, 0.5])
            .with("units", vec![64usize, 128, 256, 320]);
        let grid = cartesian(&space);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid[0].get("units"), Some(ParamValue::Int(64)));
        assert_eq!(grid[1].get("units"), Some(ParamValue::Int(128)));
        assert_eq!(grid[4].get("dropout_rate"), Some(ParamValue::Float(0.5)));
        assert_eq!(grid[23].get("lam"), Some(ParamValue::Float(1e-8)));

        let ids: std::collections::HashSet<String> = grid.iter().map(|p| p.model_id()).collect();
        assert_eq!(ids.len(), 24);
    }

    #[test]
    fn test_empty_dimension_yields_nothing() {
        let space = SearchSpace::new()
            .with("units", vec![64usize])
            .with("lam", Vec::<f64>::new());
        assert!(cartesian(&space).is_empty());
        assert!(cartesian(&SearchSpace::new()).is_empty());
    }

    #[test]
    fn test_set_replaces_dimension() {
        let mut space = SearchSpace::new().with("units", vec![64usize]);
        space.set("units", vec![8usize, 16]);
        assert_eq!(space.len(), 1);
        assert_eq!(space.size(), 2);
    }

    #[test]
    fn test_param_value_conversions() {
        assert_eq!(ParamValue::Float(3.0).as_usize(), Some(3));
        assert_eq!(ParamValue::Float(3.5).as_usize(), None);
        assert_eq!(ParamValue::Int(-1).as_usize(), None);

        let params = ParamSet::new().with("units", 64usize).with("lam", 1e-6);
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains(r#""units":64"#));
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
