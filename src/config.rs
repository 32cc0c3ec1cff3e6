use crate::{
    Result,
    activation::Activation,
    capability::{CapabilityFlags, FusionOperation},
    compare::{CheckEquality, DEFAULT_EPSILON, EqualityPolicy},
    data_type::DataType,
    distribution::{DEFAULT_SEED, Distribution},
    error::ConfigError,
    layout::LayoutTag,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where alpha and beta (and scale factors) live when the kernel reads them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarLocation {
    /// Passed by value in the kernel arguments.
    #[default]
    Host,
    /// Read through a device pointer, one value per batch.
    Device,
}

/// Whether per-row scaling reads a full `M x L` vector of alpha/beta values.
/// Only meaningful when the fusion declares per-row scale support.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorScale {
    #[default]
    Disabled,
    Enabled,
}

/// Everything that stays fixed across the problem shapes of one kernel.
///
/// Configurations are validated once, by [`TestbedConfigBuilder::build`] or
/// [`TestbedConfig::from_json`]; nothing is allocated before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbedConfig {
    pub element_a: DataType,
    pub element_b: DataType,
    pub element_c: DataType,
    pub element_d: DataType,
    pub element_accumulator: DataType,
    pub element_scalar: DataType,
    pub element_bias: DataType,
    pub element_aux: DataType,
    pub element_amax: DataType,

    pub layout_a: LayoutTag,
    pub layout_b: LayoutTag,
    pub layout_c: LayoutTag,
    pub layout_d: LayoutTag,
    pub layout_aux: LayoutTag,

    pub fusion: FusionOperation,
    pub check_equality: CheckEquality,
    /// Tolerance used by [`CheckEquality::Relative`].
    pub epsilon: f64,
    pub scalar_location: ScalarLocation,
    pub vector_scale: VectorScale,

    pub init_a: Distribution,
    pub init_b: Distribution,
    pub init_c: Distribution,
    pub init_scale: Distribution,
    pub init_bias: Distribution,
    pub seed: u64,

    /// CTA tile shape of the kernel under test. Only used to name dump files.
    pub tile_shape: [usize; 3],
    /// Directory receiving a diagnostic dump for every failed comparison.
    pub dump_dir: Option<PathBuf>,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            element_a: DataType::F32,
            element_b: DataType::F32,
            element_c: DataType::F32,
            element_d: DataType::F32,
            element_accumulator: DataType::F32,
            element_scalar: DataType::F32,
            element_bias: DataType::F32,
            element_aux: DataType::F32,
            element_amax: DataType::F32,
            layout_a: LayoutTag::RowMajor,
            layout_b: LayoutTag::ColumnMajor,
            layout_c: LayoutTag::RowMajor,
            layout_d: LayoutTag::RowMajor,
            layout_aux: LayoutTag::RowMajor,
            fusion: FusionOperation::default(),
            check_equality: CheckEquality::Exact,
            epsilon: DEFAULT_EPSILON,
            scalar_location: ScalarLocation::Host,
            vector_scale: VectorScale::Disabled,
            init_a: Distribution::Uniform,
            init_b: Distribution::Uniform,
            init_c: Distribution::Uniform,
            init_scale: Distribution::Uniform,
            init_bias: Distribution::Uniform,
            seed: DEFAULT_SEED,
            tile_shape: [128, 128, 64],
            dump_dir: None,
        }
    }
}

impl TestbedConfig {
    pub fn builder() -> TestbedConfigBuilder {
        TestbedConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration. Missing fields take their
    /// default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fusion = &self.fusion;
        if fusion.per_row_bias && fusion.de_per_row_bias {
            return Err(ConfigError::RowBiasWithDeBias);
        }
        if fusion.aux_in && fusion.aux_out {
            return Err(ConfigError::AuxInWithAuxOut);
        }
        if fusion.has_features() {
            let complex = [
                self.element_c,
                self.element_d,
                self.element_accumulator,
                self.element_scalar,
            ]
            .into_iter()
            .find(|data_type| data_type.is_complex());
            if let Some(data_type) = complex {
                return Err(ConfigError::ComplexEpilogue(data_type));
            }
        }
        self.equality_policy()?;
        Ok(())
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags::from_fusion(&self.fusion, self.element_d, self.element_aux)
    }

    pub fn equality_policy(&self) -> Result<EqualityPolicy, ConfigError> {
        match self.check_equality {
            CheckEquality::Exact => Ok(EqualityPolicy::exact()),
            CheckEquality::Relative => EqualityPolicy::relative(self.epsilon),
        }
    }

    /// Seed of the tensor stream at `offset` from the base seed.
    pub fn seed_for(&self, offset: u64) -> u64 {
        self.seed.wrapping_add(offset)
    }

    pub fn activation(&self) -> Activation {
        self.fusion.activation
    }
}

/// Builder for [`TestbedConfig`].
///
/// Operand layouts can be given either as tags or as the raw rank-3 strides a
/// kernel declares; raw strides are classified when the configuration is built.
#[derive(Clone, Debug, Default)]
pub struct TestbedConfigBuilder {
    config: TestbedConfig,
    strides: Vec<(&'static str, [usize; 3])>,
}

impl TestbedConfigBuilder {
    /// Sets the element type of every operand, output and accumulator.
    pub fn element(mut self, data_type: DataType) -> Self {
        let config = &mut self.config;
        config.element_a = data_type;
        config.element_b = data_type;
        config.element_c = data_type;
        config.element_d = data_type;
        config.element_accumulator = data_type;
        config.element_scalar = data_type;
        config.element_bias = data_type;
        config.element_aux = data_type;
        self
    }

    pub fn element_inputs(mut self, a: DataType, b: DataType) -> Self {
        self.config.element_a = a;
        self.config.element_b = b;
        self
    }

    pub fn element_c(mut self, data_type: DataType) -> Self {
        self.config.element_c = data_type;
        self
    }

    pub fn element_d(mut self, data_type: DataType) -> Self {
        self.config.element_d = data_type;
        self
    }

    pub fn element_accumulator(mut self, data_type: DataType) -> Self {
        self.config.element_accumulator = data_type;
        self
    }

    pub fn element_scalar(mut self, data_type: DataType) -> Self {
        self.config.element_scalar = data_type;
        self
    }

    pub fn element_bias(mut self, data_type: DataType) -> Self {
        self.config.element_bias = data_type;
        self
    }

    pub fn element_aux(mut self, data_type: DataType) -> Self {
        self.config.element_aux = data_type;
        self
    }

    pub fn element_amax(mut self, data_type: DataType) -> Self {
        self.config.element_amax = data_type;
        self
    }

    pub fn layouts(mut self, a: LayoutTag, b: LayoutTag, c: LayoutTag, d: LayoutTag) -> Self {
        let config = &mut self.config;
        config.layout_a = a;
        config.layout_b = b;
        config.layout_c = c;
        config.layout_d = d;
        self
    }

    pub fn layout_aux(mut self, layout: LayoutTag) -> Self {
        self.config.layout_aux = layout;
        self
    }

    /// Declares the `(row, col, batch)` stride of operand `"A"`, `"B"`, `"C"`,
    /// `"D"` or `"Aux"`.
    pub fn stride(mut self, operand: &'static str, stride: [usize; 3]) -> Self {
        self.strides.push((operand, stride));
        self
    }

    pub fn fusion(mut self, fusion: FusionOperation) -> Self {
        self.config.fusion = fusion;
        self
    }

    pub fn check_equality(mut self, mode: CheckEquality) -> Self {
        self.config.check_equality = mode;
        self
    }

    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    pub fn scalar_location(mut self, location: ScalarLocation) -> Self {
        self.config.scalar_location = location;
        self
    }

    pub fn vector_scale(mut self, mode: VectorScale) -> Self {
        self.config.vector_scale = mode;
        self
    }

    pub fn init_inputs(mut self, a: Distribution, b: Distribution, c: Distribution) -> Self {
        self.config.init_a = a;
        self.config.init_b = b;
        self.config.init_c = c;
        self
    }

    pub fn init_scale(mut self, distribution: Distribution) -> Self {
        self.config.init_scale = distribution;
        self
    }

    pub fn init_bias(mut self, distribution: Distribution) -> Self {
        self.config.init_bias = distribution;
        self
    }

    /// Fills every tensor from `distribution`.
    pub fn init_all(self, distribution: Distribution) -> Self {
        self.init_inputs(distribution, distribution, distribution)
            .init_scale(distribution)
            .init_bias(distribution)
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn tile_shape(mut self, tile_shape: [usize; 3]) -> Self {
        self.config.tile_shape = tile_shape;
        self
    }

    pub fn dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dump_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<TestbedConfig, ConfigError> {
        let mut config = self.config;
        for (operand, stride) in self.strides {
            let slot = match operand {
                "A" => &mut config.layout_a,
                "B" => &mut config.layout_b,
                "C" => &mut config.layout_c,
                "D" => &mut config.layout_d,
                "Aux" => &mut config.layout_aux,
                _ => return Err(ConfigError::UnknownOperand(operand)),
            };
            *slot = LayoutTag::from_stride(operand, stride)?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn defaults_are_valid() {
        let config = TestbedConfig::builder().build().unwrap();
        assert_eq!(config.seed, 4096);
        assert_eq!(config.capabilities(), CapabilityFlags::default());
        assert_eq!(config.equality_policy().unwrap(), EqualityPolicy::exact());
    }

    #[test]
    fn raw_strides_are_classified() {
        let config = TestbedConfig::builder()
            .stride("A", [1, 64, 4096])
            .stride("B", [64, 1, 4096])
            .build()
            .unwrap();
        assert_eq!(config.layout_a, LayoutTag::ColumnMajor);
        assert_eq!(config.layout_b, LayoutTag::RowMajor);
    }

    #[test]
    fn aux_stride_and_unknown_operand() {
        let config = TestbedConfig::builder()
            .stride("Aux", [1, 32, 1024])
            .build()
            .unwrap();
        assert_eq!(config.layout_aux, LayoutTag::ColumnMajor);
        assert_eq!(config.layout_a, LayoutTag::RowMajor);

        let result = TestbedConfig::builder().stride("a", [64, 1, 4096]).build();
        assert_eq!(result, Err(ConfigError::UnknownOperand("a")));
    }

    #[test]
    fn unsupported_stride_fails_before_allocation() {
        let result = TestbedConfig::builder().stride("C", [2, 2, 16]).build();
        assert_eq!(
            result,
            Err(ConfigError::UnsupportedStride {
                operand: "C",
                stride: [2, 2, 16],
            })
        );
    }

    #[test]
    fn conflicting_features() {
        let bias = FusionOperation::default()
            .with_per_row_bias()
            .with_de_per_row_bias();
        assert_eq!(
            TestbedConfig::builder().fusion(bias).build(),
            Err(ConfigError::RowBiasWithDeBias)
        );

        let aux = FusionOperation::default().with_aux_in().with_aux_out();
        assert_eq!(
            TestbedConfig::builder().fusion(aux).build(),
            Err(ConfigError::AuxInWithAuxOut)
        );
    }

    #[test]
    fn complex_epilogue_rejected() {
        let result = TestbedConfig::builder()
            .element(DataType::C32)
            .fusion(FusionOperation::default().with_activation(Activation::Relu))
            .build();
        assert_eq!(result, Err(ConfigError::ComplexEpilogue(DataType::C32)));

        assert!(TestbedConfig::builder().element(DataType::C32).build().is_ok());
    }

    #[test]
    fn relative_epsilon_is_checked() {
        let result = TestbedConfig::builder()
            .check_equality(CheckEquality::Relative)
            .epsilon(-0.5)
            .build();
        assert_eq!(result, Err(ConfigError::InvalidEpsilon(-0.5)));
    }

    #[test]
    fn json_round_trip() {
        let config = TestbedConfig::builder()
            .element_d(DataType::F8E4M3)
            .fusion(FusionOperation::default().with_abs_max().with_scale_factor())
            .check_equality(CheckEquality::Relative)
            .epsilon(0.05)
            .build()
            .unwrap();
        let json = config.to_json().unwrap();
        assert_eq!(TestbedConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn json_defaults_and_validation() {
        let config = TestbedConfig::from_json(r#"{ "seed": 7, "element_d": "F16" }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.element_d, DataType::F16);
        assert_eq!(config.layout_b, LayoutTag::ColumnMajor);

        let conflict = r#"{ "fusion": { "aux_in": true, "aux_out": true } }"#;
        assert!(matches!(
            TestbedConfig::from_json(conflict),
            Err(Error::Config(ConfigError::AuxInWithAuxOut))
        ));
        assert!(matches!(
            TestbedConfig::from_json("{ seed: }"),
            Err(Error::Json(_))
        ));
    }
}
