use crate::{Error, KeyValue, Partition, Range, Region, Schema};

/// Build the initial partition tree for a table from split points on the
/// first row-key field.
///
/// With no split points this is a single root leaf covering the key space.
/// Otherwise the leaves are the ranges between consecutive split points, and
/// internal partitions are added by merging adjacent pairs until a single
/// root remains.
pub fn partitions_from_split_points(
    schema: &Schema,
    split_points: &[KeyValue],
) -> error_stack::Result<Vec<Partition>, Error> {
    let field = schema.row_key(0)?;
    for split_point in split_points {
        error_stack::ensure!(
            split_point.key_type() == field.key_type,
            Error::KeyTypeMismatch {
                expected: field.key_type,
                actual: split_point.key_type(),
            }
        );
    }
    error_stack::ensure!(
        split_points.windows(2).all(|w| w[0] < w[1]),
        Error::UnsortedSplitPoints
    );

    let full = Region::full(schema);
    let mut partitions = Vec::new();

    let mut lower = field.key_type.min_value();
    let mut level: Vec<usize> = Vec::with_capacity(split_points.len() + 1);
    for upper in split_points.iter().cloned().map(Some).chain(std::iter::once(None)) {
        let range = Range::new(&field.name, lower.clone(), upper.clone());
        level.push(partitions.len());
        partitions.push(Partition::leaf(
            uuid::Uuid::new_v4().to_string(),
            full.with_range(0, range),
            None,
        ));
        if let Some(upper) = upper {
            lower = upper;
        }
    }

    while level.len() > 1 {
        let mut next_level = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            if let &[left, right] = pair {
                let min = partitions[left].region.ranges()[0].min.clone();
                let max = partitions[right].region.ranges()[0].max.clone();
                let parent_id = uuid::Uuid::new_v4().to_string();
                partitions[left].parent_id = Some(parent_id.clone());
                partitions[right].parent_id = Some(parent_id.clone());

                let child_ids = vec![partitions[left].id.clone(), partitions[right].id.clone()];
                let parent = Partition::leaf(
                    parent_id,
                    full.with_range(0, Range::new(&field.name, min, max)),
                    None,
                )
                .into_split(child_ids, 0);

                next_level.push(partitions.len());
                partitions.push(parent);
            } else {
                // An odd partition out moves up a level unchanged.
                next_level.push(pair[0]);
            }
        }
        level = next_level;
    }

    Ok(partitions)
}
