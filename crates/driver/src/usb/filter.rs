//! VID:PID device filters
//!
//! Filters are written as `"0xVID:0xPID"`, with `*` matching any value on
//! either side (`"0x28bd:*"`).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid filter format '{0}', expected VID:PID (e.g., '0x28bd:0x0075' or '0x28bd:*')")]
    Format(String),

    #[error("Invalid {name} '{value}', must start with '0x' (e.g., '0x28bd')")]
    MissingPrefix { name: &'static str, value: String },

    #[error("Invalid {name} '{value}', hex part must be 1-4 digits")]
    Length { name: &'static str, value: String },

    #[error("Invalid {name} '{value}', not a valid hex number")]
    NotHex { name: &'static str, value: String },
}

/// One parsed VID:PID pattern; `None` matches anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub const fn exact(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }
}

/// Whether any filter matches; an empty list matches nothing
pub fn matches_any(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.iter().any(|f| f.matches(vendor_id, product_id))
}

fn parse_id(value: &str, name: &'static str) -> Result<Option<u16>, FilterError> {
    if value == "*" {
        return Ok(None);
    }

    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| FilterError::MissingPrefix {
            name,
            value: value.to_string(),
        })?;

    if hex.is_empty() || hex.len() > 4 {
        return Err(FilterError::Length {
            name,
            value: value.to_string(),
        });
    }

    u16::from_str_radix(hex, 16)
        .map(Some)
        .map_err(|_| FilterError::NotHex {
            name,
            value: value.to_string(),
        })
}

impl FromStr for DeviceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(vid), Some(pid), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FilterError::Format(s.to_string()));
        };

        Ok(Self {
            vendor_id: parse_id(vid, "VID")?,
            product_id: parse_id(pid, "PID")?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "{:#06x}", v)?,
            None => write!(f, "*")?,
        }
        match self.product_id {
            Some(p) => write!(f, ":{:#06x}", p),
            None => write!(f, ":*"),
        }
    }
}
