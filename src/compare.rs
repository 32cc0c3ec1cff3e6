use crate::{error::ConfigError, tensor::HostTensor};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// Default tolerance of [`CheckEquality::Relative`].
pub const DEFAULT_EPSILON: f64 = 0.1;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckEquality {
    /// Bit-for-bit equality of the stored encodings.
    #[default]
    Exact,
    /// Relative difference bounded by an epsilon. Complex elements still
    /// compare exactly.
    Relative,
}

/// How computed outputs are compared with the reference.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EqualityPolicy {
    pub mode: CheckEquality,
    pub epsilon: f64,
}

impl Default for EqualityPolicy {
    fn default() -> Self {
        Self::exact()
    }
}

impl EqualityPolicy {
    pub fn exact() -> Self {
        Self {
            mode: CheckEquality::Exact,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn relative(epsilon: f64) -> Result<Self, ConfigError> {
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(ConfigError::InvalidEpsilon(epsilon));
        }
        Ok(Self {
            mode: CheckEquality::Relative,
            epsilon,
        })
    }

    /// Whether two tensors hold equal values at every logical coordinate.
    pub fn tensors_equal(&self, expected: &HostTensor, actual: &HostTensor) -> bool {
        self.mismatches(expected, actual).count == 0
    }

    /// Counts the coordinates at which `actual` differs from `expected`.
    ///
    /// Tensors with different element types or extents are unequal at every
    /// coordinate.
    pub fn mismatches(&self, expected: &HostTensor, actual: &HostTensor) -> Mismatches {
        if expected.data_type() != actual.data_type()
            || expected.layout().extent() != actual.layout().extent()
        {
            return Mismatches {
                count: expected.num_elements().max(actual.num_elements()).max(1),
                first: None,
            };
        }

        let data_type = expected.data_type();
        let relative = self.mode == CheckEquality::Relative && !data_type.is_complex();
        let floor = data_type.min_positive_normal();

        let mut result = Mismatches::default();
        for (i, j, l) in expected.layout().coords() {
            let lhs = expected.layout().offset(i, j, l);
            let rhs = actual.layout().offset(i, j, l);
            let equal = expected.data().bits_equal(lhs, actual.data(), rhs)
                || (relative
                    && relatively_equal(
                        expected.data().get(lhs).re,
                        actual.data().get(rhs).re,
                        self.epsilon,
                        floor,
                    ));
            if !equal {
                result.count += 1;
                result.first.get_or_insert([i, j, l]);
            }
        }
        result
    }
}

/// Relative equality in the sense of
/// `|a - b| <= epsilon * max(|a|, |b|, floor)`.
///
/// Equal values always compare equal, non-finite values are only equal to
/// themselves. `floor` keeps the bound meaningful near zero.
pub fn relatively_equal(a: f64, b: f64, epsilon: f64, floor: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let scale = a.abs().max(b.abs()).max(floor);
    (a - b).abs() <= epsilon * scale
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Mismatches {
    pub count: usize,
    /// First mismatching `(row, col, batch)` coordinate, in batch-major order.
    pub first: Option<[usize; 3]>,
}

/// Output channel checked against the reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    D,
    AbsMaxD,
    DBias,
    Aux,
    AbsMaxAux,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::D => "D",
            Channel::AbsMaxD => "abs_max_D",
            Channel::DBias => "dBias",
            Channel::Aux => "Aux",
            Channel::AbsMaxAux => "abs_max_Aux",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub mismatches: Mismatches,
}

impl ChannelOutcome {
    pub fn passed(&self) -> bool {
        self.mismatches.count == 0
    }
}

/// A tensor that must be non-zero for the comparison to be meaningful
/// turned out to have a zero (or non-finite) norm.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SanityViolation {
    pub tensor: &'static str,
    pub norm: f64,
}

/// Result of comparing every active output channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComparisonReport {
    channels: Vec<ChannelOutcome>,
    violations: Vec<SanityViolation>,
    dump_path: Option<PathBuf>,
}

impl ComparisonReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `actual` with `expected` and records the outcome.
    pub fn check(
        &mut self,
        channel: Channel,
        policy: &EqualityPolicy,
        expected: &HostTensor,
        actual: &HostTensor,
    ) {
        let mismatches = policy.mismatches(expected, actual);
        if mismatches.count > 0 {
            tracing::warn!(
                %channel,
                mismatches = mismatches.count,
                first = ?mismatches.first,
                "channel does not match the reference"
            );
        }
        self.channels.push(ChannelOutcome {
            channel,
            mismatches,
        });
    }

    /// Records a violation unless `tensor` has a positive norm.
    pub fn expect_nonzero(&mut self, tensor: &HostTensor) {
        let norm = tensor.norm();
        if norm > 0.0 {
            return;
        }
        tracing::warn!(tensor = tensor.name(), norm, "tensor norm is not positive");
        self.violations.push(SanityViolation {
            tensor: tensor.name(),
            norm,
        });
    }

    /// Whether every checked channel matched and no sanity check failed.
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.channels.iter().all(ChannelOutcome::passed)
    }

    pub fn channels(&self) -> &[ChannelOutcome] {
        &self.channels
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.channels.iter().find(|outcome| outcome.channel == channel)
    }

    pub fn failed_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels
            .iter()
            .filter(|outcome| !outcome.passed())
            .map(|outcome| outcome.channel)
    }

    pub fn violations(&self) -> &[SanityViolation] {
        &self.violations
    }

    /// Diagnostic file written for this comparison, if any.
    pub fn dump_path(&self) -> Option<&PathBuf> {
        self.dump_path.as_ref()
    }

    pub(crate) fn set_dump_path(&mut self, path: PathBuf) {
        self.dump_path = Some(path);
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.channels {
            if outcome.passed() {
                writeln!(f, "{}: ok", outcome.channel)?;
            } else {
                writeln!(
                    f,
                    "{}: {} mismatches, first at {:?}",
                    outcome.channel, outcome.mismatches.count, outcome.mismatches.first
                )?;
            }
        }
        for violation in &self.violations {
            writeln!(f, "norm of {} is {}", violation.tensor, violation.norm)?;
        }
        Ok(())
    }
}
