use crate::error::{UploadError, UploadResult};

const MEGABYTE: u64 = 1024 * 1024; // 1MB
pub const CHUNK_SIZE_BYTES: u64 = 5 * MEGABYTE;
pub const MAX_PARTS_COUNT: u64 = 10000;

/// Byte range of the source file carried by one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    file_size: u64,
    chunk_size: u64,
    part_count: u32,
}

impl PartPlan {
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Ranges in part-number order. Every range is `chunk_size` long except
    /// the last one, which holds the remainder (and is empty for an empty file).
    pub fn ranges(&self) -> impl Iterator<Item = PartRange> + '_ {
        (1..=self.part_count).map(move |part_number| {
            let offset = (part_number as u64 - 1) * self.chunk_size;
            let len = self.chunk_size.min(self.file_size - offset);
            PartRange {
                part_number,
                offset,
                len,
            }
        })
    }
}

/// Splits `file_size` bytes into `ceil(file_size / chunk_size)` parts, with a
/// minimum of one part so an empty file still uploads as a single empty part.
pub fn compute_part_plan(file_size: u64, chunk_size: u64) -> UploadResult<PartPlan> {
    if chunk_size == 0 {
        return Err(UploadError::InvalidPlan(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let part_count = file_size.div_ceil(chunk_size).max(1);

    if part_count > MAX_PARTS_COUNT {
        return Err(UploadError::InvalidPlan(format!(
            "File size ({} bytes) needs {} parts of {} bytes, the maximum is {} parts",
            file_size, part_count, chunk_size, MAX_PARTS_COUNT
        )));
    }

    Ok(PartPlan {
        file_size,
        chunk_size,
        part_count: part_count as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(plan: &PartPlan) -> Vec<u64> {
        plan.ranges().map(|range| range.len).collect()
    }

    #[test]
    fn test_exact_multiple_does_not_over_count() {
        let plan = compute_part_plan(2 * CHUNK_SIZE_BYTES, CHUNK_SIZE_BYTES).unwrap();
        assert_eq!(plan.part_count(), 2);
        assert_eq!(lens(&plan), vec![CHUNK_SIZE_BYTES, CHUNK_SIZE_BYTES]);
    }

    #[test]
    fn test_one_byte_over_adds_small_last_part() {
        let plan = compute_part_plan(CHUNK_SIZE_BYTES + 1, CHUNK_SIZE_BYTES).unwrap();
        assert_eq!(plan.part_count(), 2);
        assert_eq!(lens(&plan), vec![CHUNK_SIZE_BYTES, 1]);
    }

    #[test]
    fn test_empty_file_is_one_empty_part() {
        let plan = compute_part_plan(0, CHUNK_SIZE_BYTES).unwrap();
        assert_eq!(plan.part_count(), 1);
        assert_eq!(
            plan.ranges().collect::<Vec<_>>(),
            vec![PartRange {
                part_number: 1,
                offset: 0,
                len: 0
            }]
        );
    }

    #[test]
    fn test_part_count_is_ceiling() {
        for (file_size, expected) in [(1, 1), (9, 3), (10, 4), (11, 4), (12, 4), (13, 5)] {
            let plan = compute_part_plan(file_size, 3).unwrap();
            assert_eq!(plan.part_count(), expected, "file size {}", file_size);
        }
    }

    #[test]
    fn test_ranges_cover_file_in_order() {
        let plan = compute_part_plan(1000, 64).unwrap();
        let mut next_offset = 0;
        for (index, range) in plan.ranges().enumerate() {
            assert_eq!(range.part_number as usize, index + 1);
            assert_eq!(range.offset, next_offset);
            next_offset += range.len;
        }
        assert_eq!(next_offset, 1000);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(matches!(
            compute_part_plan(10, 0),
            Err(UploadError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_too_many_parts_is_rejected() {
        assert!(compute_part_plan(MAX_PARTS_COUNT * 2, 2).is_ok());
        assert!(matches!(
            compute_part_plan(MAX_PARTS_COUNT * 2 + 1, 2),
            Err(UploadError::InvalidPlan(_))
        ));
    }
}
