use std::collections::HashMap;

/// Last committed offset per partition.
///
/// Only ever moves forward; an offset at or behind the stored one is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitCursor {
    positions: HashMap<String, u64>,
}

impl CommitCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, partition: &str) -> Option<u64> {
        self.positions.get(partition).copied()
    }

    /// Returns whether the cursor moved.
    pub fn advance(&mut self, partition: &str, offset: u64) -> bool {
        match self.positions.get_mut(partition) {
            Some(current) if *current >= offset => false,
            Some(current) => {
                *current = offset;
                true
            }
            None => {
                self.positions.insert(partition.to_string(), offset);
                true
            }
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&str, u64)> {
        self.positions
            .iter()
            .map(|(partition, offset)| (partition.as_str(), *offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advances_per_partition() {
        let mut cursor = CommitCursor::new();

        assert!(cursor.advance("credits.a", 3));
        assert!(cursor.advance("credits.b", 1));
        assert!(cursor.advance("credits.a", 7));

        assert_eq!(cursor.position("credits.a"), Some(7));
        assert_eq!(cursor.position("credits.b"), Some(1));
        assert_eq!(cursor.position("credits.c"), None);
        assert_eq!(cursor.partitions().count(), 2);
    }

    #[test]
    fn test_never_moves_backwards() {
        let mut cursor = CommitCursor::new();
        cursor.advance("credits.a", 5);

        assert!(!cursor.advance("credits.a", 5));
        assert!(!cursor.advance("credits.a", 2));
        assert_eq!(cursor.position("credits.a"), Some(5));
    }
}
