use crate::error::{Result, RoleworkError};

/// Legal `[minimum, maximum]` range for a pool's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBounds {
    minimum: usize,
    maximum: usize,
}

impl InstanceBounds {
    pub fn new(minimum: usize, maximum: usize) -> Result<Self> {
        if minimum > maximum {
            return Err(RoleworkError::InvalidBounds { minimum, maximum });
        }
        Ok(Self { minimum, maximum })
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn maximum(&self) -> usize {
        self.maximum
    }
}

impl Default for InstanceBounds {
    fn default() -> Self {
        Self { minimum: 1, maximum: 2 }
    }
}
