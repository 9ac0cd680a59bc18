use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

const NOT_SET: i32 = -1;

/// A location inside a source file. Any coordinate may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePosition {
    line: i32,
    column: i32,
    offset: i32,
}

impl FilePosition {
    pub fn new(line: i32, column: i32, offset: i32) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    pub fn not_set() -> Self {
        Self::new(NOT_SET, NOT_SET, NOT_SET)
    }

    /// Position known only by its line; used when only the line of a call is available.
    pub fn at_line(line: i32) -> Self {
        Self::new(line, NOT_SET, NOT_SET)
    }

    pub fn line(&self) -> i32 {
        self.line
    }

    pub fn column(&self) -> i32 {
        self.column
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn is_not_set(&self) -> bool {
        self.line == NOT_SET && self.column == NOT_SET && self.offset == NOT_SET
    }
}

impl Default for FilePosition {
    fn default() -> Self {
        Self::not_set()
    }
}

// unset coordinates sort after every set one
fn compare_coordinate(a: i32, b: i32) -> Ordering {
    match (a == NOT_SET, b == NOT_SET) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(&b),
    }
}

impl Ord for FilePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_coordinate(self.offset, other.offset)
            .then_with(|| compare_coordinate(self.line, other.line))
            .then_with(|| compare_coordinate(self.column, other.column))
    }
}

impl PartialOrd for FilePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileRegion {
    pub start: FilePosition,
    pub end: FilePosition,
}

impl FileRegion {
    pub fn new(start: FilePosition, end: FilePosition) -> Self {
        Self { start, end }
    }

    pub fn at_line(line: i32) -> Self {
        Self::new(FilePosition::at_line(line), FilePosition::at_line(line))
    }

    /// Start line of the region, if it is known.
    pub fn line(&self) -> Option<usize> {
        usize::try_from(self.start.line()).ok()
    }

    pub fn contains(&self, offset: i32) -> bool {
        if self.start.offset() == NOT_SET || self.end.offset() == NOT_SET {
            return false;
        }
        self.start.offset() <= offset && offset <= self.end.offset()
    }
}
