use serde::{Deserialize, Serialize};

use crate::{Field, Key, KeyValue, Schema};

/// A range over one row-key field.
///
/// The minimum is inclusive. The maximum is exclusive, and `None` means the
/// range is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub field: String,
    pub min: KeyValue,
    pub max: Option<KeyValue>,
}

impl Range {
    pub fn new(field: impl Into<String>, min: KeyValue, max: Option<KeyValue>) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    /// The range covering every value of the field.
    pub fn full(field: &Field) -> Self {
        Self {
            field: field.name.clone(),
            min: field.key_type.min_value(),
            max: None,
        }
    }

    pub fn contains(&self, value: &KeyValue) -> bool {
        if value < &self.min {
            return false;
        }
        match &self.max {
            Some(max) => value < max,
            None => true,
        }
    }

    /// Whether `value` lies strictly inside the range, so splitting on it
    /// yields two non-empty ranges.
    pub fn strictly_contains(&self, value: &KeyValue) -> bool {
        value > &self.min && self.contains(value)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.max {
            Some(max) => write!(f, "{}: [{}, {})", self.field, self.min, max),
            None => write!(f, "{}: [{}, MAX)", self.field, self.min),
        }
    }
}

/// The key space of a partition: one range per row-key field, in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    ranges: Vec<Range>,
}

impl Region {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    /// The region covering the whole key space of the schema.
    pub fn full(schema: &Schema) -> Self {
        Self {
            ranges: schema.row_keys().iter().map(Range::full).collect(),
        }
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn range(&self, dimension: usize) -> Option<&Range> {
        self.ranges.get(dimension)
    }

    /// Return a copy of this region with the range for `dimension` replaced.
    pub fn with_range(&self, dimension: usize, range: Range) -> Self {
        let mut ranges = self.ranges.clone();
        ranges[dimension] = range;
        Self { ranges }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.ranges
            .iter()
            .enumerate()
            .all(|(dimension, range)| match key.get(dimension) {
                Some(value) => range.contains(value),
                // Missing trailing dimensions are treated as the minimum value.
                None => range.min == range.min.key_type().min_value(),
            })
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for range in &self.ranges {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{range}")?;
        }
        Ok(())
    }
}
