use crate::{activation::Activation, data_type::DataType};
use serde::{Deserialize, Serialize};

/// Feature set declared by a fused epilogue operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionOperation {
    pub per_row_bias: bool,
    pub de_per_row_bias: bool,
    pub per_row_scale: bool,
    pub scale_factor: bool,
    pub aux_in: bool,
    pub aux_out: bool,
    pub abs_max: bool,
    pub activation: Activation,
}

impl FusionOperation {
    /// `D = alpha * acc + beta * C` with no optional features.
    pub fn linear_combination() -> Self {
        Self::default()
    }

    pub fn with_per_row_bias(mut self) -> Self {
        self.per_row_bias = true;
        self
    }

    pub fn with_de_per_row_bias(mut self) -> Self {
        self.de_per_row_bias = true;
        self
    }

    pub fn with_per_row_scale(mut self) -> Self {
        self.per_row_scale = true;
        self
    }

    pub fn with_scale_factor(mut self) -> Self {
        self.scale_factor = true;
        self
    }

    pub fn with_aux_in(mut self) -> Self {
        self.aux_in = true;
        self
    }

    pub fn with_aux_out(mut self) -> Self {
        self.aux_out = true;
        self
    }

    pub fn with_abs_max(mut self) -> Self {
        self.abs_max = true;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Whether any feature beyond a linear combination is declared.
    pub fn has_features(&self) -> bool {
        self.per_row_bias
            || self.de_per_row_bias
            || self.per_row_scale
            || self.scale_factor
            || self.aux_in
            || self.aux_out
            || self.abs_max
            || self.activation != Activation::Identity
    }
}

/// Epilogue features that are active for one configuration.
///
/// Abs-max tracking is only enabled for outputs stored in one of the narrow
/// 8-bit float formats, which saturate easily and are rescaled from the
/// tracked maximum. `abs_max_aux` implies `aux_out`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CapabilityFlags {
    pub row_bias: bool,
    pub de_bias: bool,
    pub per_row_scale: bool,
    pub scale_factor: bool,
    pub aux_in: bool,
    pub aux_out: bool,
    pub abs_max_d: bool,
    pub abs_max_aux: bool,
}

impl CapabilityFlags {
    pub fn from_fusion(fusion: &FusionOperation, element_d: DataType, element_aux: DataType) -> Self {
        Self {
            row_bias: fusion.per_row_bias,
            de_bias: fusion.de_per_row_bias,
            per_row_scale: fusion.per_row_scale,
            scale_factor: fusion.scale_factor,
            aux_in: fusion.aux_in,
            aux_out: fusion.aux_out,
            abs_max_d: fusion.abs_max && element_d.is_narrow_float(),
            abs_max_aux: fusion.aux_out && fusion.abs_max && element_aux.is_narrow_float(),
        }
    }

    /// Whether a bias vector (input or gradient) is materialized.
    pub fn uses_bias(&self) -> bool {
        self.row_bias || self.de_bias
    }

    /// Whether the aux tensor (input or output) is materialized.
    pub fn uses_aux(&self) -> bool {
        self.aux_in || self.aux_out
    }
}
