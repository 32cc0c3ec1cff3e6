use crate::error::ConfigError;
use std::fmt;

/// GEMM problem extent: `M x N x K` with batch count `L`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProblemShape {
    m: usize,
    n: usize,
    k: usize,
    l: usize,
}

impl ProblemShape {
    pub fn new(m: usize, n: usize, k: usize, l: usize) -> Result<Self, ConfigError> {
        if l == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(Self { m, n, k, l })
    }

    /// Non-batched problem, treated as `L = 1`.
    pub const fn mnk(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k, l: 1 }
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn l(&self) -> usize {
        self.l
    }
}

impl From<[usize; 3]> for ProblemShape {
    fn from([m, n, k]: [usize; 3]) -> Self {
        Self::mnk(m, n, k)
    }
}

impl TryFrom<[usize; 4]> for ProblemShape {
    type Error = ConfigError;

    fn try_from([m, n, k, l]: [usize; 4]) -> Result<Self, Self::Error> {
        Self::new(m, n, k, l)
    }
}

impl fmt::Display for ProblemShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.m, self.n, self.k, self.l)
    }
}
