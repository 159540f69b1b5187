//! Inclusive range of local TCP ports the tunnel may bind or forward.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error type for port range construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortRangeError {
    /// `first` is greater than `last`.
    #[error("invalid port range {first}:{last} (first must not exceed last)")]
    Inverted { first: u16, last: u16 },

    /// The text is not `port` or `first:last`.
    #[error("invalid port range '{0}' (expected PORT or FIRST:LAST)")]
    Syntax(String),
}

/// An inclusive `first..=last` port range with `first <= last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    first: u16,
    last: u16,
}

impl PortRange {
    /// Default range used by the tunnel when nothing is configured.
    pub const DEFAULT: PortRange = PortRange {
        first: 27183,
        last: 27199,
    };

    /// Creates a range, rejecting `first > last`.
    ///
    /// # Errors
    ///
    /// Returns [`PortRangeError::Inverted`] if `first > last`.
    pub fn new(first: u16, last: u16) -> Result<Self, PortRangeError> {
        if first > last {
            return Err(PortRangeError::Inverted { first, last });
        }
        Ok(Self { first, last })
    }

    /// A range containing a single port.
    pub fn single(port: u16) -> Self {
        Self {
            first: port,
            last: port,
        }
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn last(&self) -> u16 {
        self.last
    }

    /// Number of ports in the range (at least 1).
    pub fn len(&self) -> usize {
        usize::from(self.last - self.first) + 1
    }

    /// Always `false`; a range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates the ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.first..=self.last
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "[{}, {}]", self.first, self.last)
        }
    }
}

impl FromStr for PortRange {
    type Err = PortRangeError;

    /// Parses `"27183"` or `"27183:27199"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_port = |text: &str| {
            text.trim()
                .parse::<u16>()
                .map_err(|_| PortRangeError::Syntax(s.to_string()))
        };
        match s.split_once(':') {
            Some((first, last)) => PortRange::new(parse_port(first)?, parse_port(last)?),
            None => Ok(PortRange::single(parse_port(s)?)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
