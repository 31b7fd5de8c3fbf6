//! Byte counts with human-readable formatting.

use std::fmt;

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// A byte count.
///
/// Displays as `"<N>B"` below 1024 bytes, otherwise as a rounded value with a
/// unit suffix at each 1024-power boundary.
///
/// ```rust
/// use sluice::size::Size;
///
/// assert_eq!(Size::new(0).to_string(), "0B");
/// assert_eq!(Size::new(2048).to_string(), "2KB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Size(u64);

impl Size {
    /// Wrap a raw byte count.
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    /// The raw byte count.
    pub const fn bytes(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Size {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl From<Size> for u64 {
    fn from(size: Size) -> Self {
        size.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 1024 {
            return write!(f, "{}B", self.0);
        }

        let mut value = self.0 as f64 / 1024.0;
        let mut unit = 0;
        while value.round() >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        write!(f, "{}{}", value.round() as u64, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_one_kilobyte() {
        assert_eq!(Size::new(0).to_string(), "0B");
        assert_eq!(Size::new(1).to_string(), "1B");
        assert_eq!(Size::new(1023).to_string(), "1023B");
    }

    #[test]
    fn unit_boundaries() {
        assert_eq!(Size::new(1024).to_string(), "1KB");
        assert_eq!(Size::new(2048).to_string(), "2KB");
        assert_eq!(Size::new(1024 * 1024).to_string(), "1MB");
        assert_eq!(Size::new(3 * 1024 * 1024 * 1024).to_string(), "3GB");
        assert_eq!(Size::new(1024u64.pow(4)).to_string(), "1TB");
        assert_eq!(Size::new(1024u64.pow(5)).to_string(), "1PB");
    }

    #[test]
    fn rounds_to_nearest() {
        assert_eq!(Size::new(1536).to_string(), "2KB");
        assert_eq!(Size::new(1300).to_string(), "1KB");
        // 1023.9KB rounds up into the next unit instead of printing "1024KB".
        assert_eq!(Size::new(1024 * 1024 - 100).to_string(), "1MB");
    }

    #[test]
    fn petabytes_do_not_overflow_units() {
        assert_eq!(Size::new(2048 * 1024u64.pow(5)).to_string(), "2048PB");
    }
}
