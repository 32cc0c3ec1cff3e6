use crate::{
    Result,
    compare::ComparisonReport,
    config::TestbedConfig,
    device::{Device, DeviceBuffer, DeviceError},
    dump,
    epilogue::HostEpilogue,
    kernel::{GemmArguments, GemmKernel, KernelStatus},
    mainloop::HostMainloop,
    reference,
    shape::ProblemShape,
};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Drives a [`GemmKernel`] through the verification protocol for one
/// configuration.
pub struct Testbed {
    config: TestbedConfig,
    device: Arc<dyn Device>,
}

impl Testbed {
    pub fn new(config: TestbedConfig, device: Arc<dyn Device>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    pub fn config(&self) -> &TestbedConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Materializes every tensor the configuration needs for `problem` and
    /// pushes them to the device.
    pub fn initialize(&self, problem: ProblemShape, alpha: f64, beta: f64) -> Result<TestCase> {
        let mainloop = HostMainloop::initialize(&self.config, &self.device, problem)?;
        let epilogue = HostEpilogue::initialize(&self.config, &self.device, problem, alpha, beta)?;
        Ok(TestCase {
            problem,
            alpha,
            beta,
            mainloop,
            epilogue,
            tile_shape: self.config.tile_shape,
            dump_dir: self.config.dump_dir.clone(),
        })
    }

    /// Runs `kernel` on `problem` and checks its outputs.
    ///
    /// Configurations the kernel cannot implement are reported as skipped.
    /// Device faults are returned as errors, every other failure is part of
    /// the outcome.
    pub fn run(
        &self,
        kernel: &mut dyn GemmKernel,
        problem: ProblemShape,
        alpha: f64,
        beta: f64,
    ) -> Result<RunOutcome> {
        let mut case = self.initialize(problem, alpha, beta)?;
        let args = case.arguments();

        let status = kernel.can_implement(&args);
        if !status.is_success() {
            tracing::warn!(%problem, %status, "kernel cannot implement problem, skipping");
            return Ok(RunOutcome::Skipped(status));
        }

        let workspace = DeviceBuffer::new(&self.device, kernel.workspace_size(&args))?;

        let status = kernel.initialize(&args, workspace.ptr());
        if !status.is_success() {
            return Ok(RunOutcome::KernelFailed {
                stage: Stage::Initialize,
                status,
            });
        }
        let status = kernel.run();
        if !status.is_success() {
            return Ok(RunOutcome::KernelFailed {
                stage: Stage::Run,
                status,
            });
        }

        if let Err(error) = self
            .device
            .synchronize()
            .and_then(|()| case.sync_outputs())
        {
            if error.is_fatal() {
                return Err(error.into());
            }
            tracing::warn!(%problem, %error, "device failed after kernel launch");
            return Ok(RunOutcome::DeviceFailed(error));
        }

        let report = case.verify();
        if report.passed() {
            Ok(RunOutcome::Passed(report))
        } else {
            Ok(RunOutcome::Mismatch(report))
        }
    }
}

/// Tensors of one initialized problem.
pub struct TestCase {
    problem: ProblemShape,
    alpha: f64,
    beta: f64,
    mainloop: HostMainloop,
    epilogue: HostEpilogue,
    tile_shape: [usize; 3],
    dump_dir: Option<PathBuf>,
}

impl TestCase {
    pub fn problem(&self) -> ProblemShape {
        self.problem
    }

    pub fn mainloop(&self) -> &HostMainloop {
        &self.mainloop
    }

    pub fn epilogue(&self) -> &HostEpilogue {
        &self.epilogue
    }

    pub fn epilogue_mut(&mut self) -> &mut HostEpilogue {
        &mut self.epilogue
    }

    /// Device-side launch arguments.
    pub fn arguments(&self) -> GemmArguments {
        GemmArguments {
            problem_shape: self.problem,
            mainloop: self.mainloop.to_args(),
            epilogue: self.epilogue.to_args(),
        }
    }

    /// Copies the kernel outputs back to the host.
    pub fn sync_outputs(&mut self) -> Result<(), DeviceError> {
        self.epilogue.sync_outputs()
    }

    /// Runs the host reference into the reference tensors.
    ///
    /// Reductions (bias gradient, abs-max) accumulate into the reference
    /// tensors, so this runs once per initialized case.
    pub fn compute_reference(&mut self) {
        let mainloop = self.mainloop.to_host_args();
        reference::gemm(&mainloop, &mut self.epilogue.to_host_args());
    }

    /// Compares the host copies of the kernel outputs with the reference.
    pub fn compare_reference(&self) -> ComparisonReport {
        let report = self.epilogue.compare_reference();
        if !report.passed() {
            tracing::warn!(
                problem = %self.problem,
                alpha = self.alpha,
                beta = self.beta,
                "comparison failed\n{report}"
            );
        }
        report
    }

    /// Computes the reference, compares, and writes a diagnostic dump on
    /// failure when a dump directory is configured.
    ///
    /// Expects the outputs to have been synchronized to the host.
    pub fn verify(&mut self) -> ComparisonReport {
        self.compute_reference();
        let mut report = self.compare_reference();
        if !report.passed() {
            if let Some(dir) = &self.dump_dir {
                match self.dump(dir) {
                    Ok(path) => report.set_dump_path(path),
                    Err(error) => tracing::warn!(%error, "failed to write diagnostic dump"),
                }
            }
        }
        report
    }

    pub fn dump(&self, dir: &Path) -> io::Result<PathBuf> {
        dump::write(
            dir,
            self.tile_shape,
            self.problem,
            self.alpha,
            self.beta,
            &self.mainloop,
            &self.epilogue,
        )
    }
}

/// Launch stage that reported a non-success status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    Run,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Passed(ComparisonReport),
    Mismatch(ComparisonReport),
    /// `can_implement` rejected the configuration.
    Skipped(KernelStatus),
    KernelFailed { stage: Stage, status: KernelStatus },
    DeviceFailed(DeviceError),
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, RunOutcome::Passed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped(_))
    }

    pub fn report(&self) -> Option<&ComparisonReport> {
        match self {
            RunOutcome::Passed(report) | RunOutcome::Mismatch(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Passed(_) => f.write_str("passed"),
            RunOutcome::Mismatch(report) => {
                let channels: Vec<_> = report.failed_channels().map(|c| c.to_string()).collect();
                write!(f, "mismatch in {}", channels.join(", "))
            }
            RunOutcome::Skipped(status) => write!(f, "skipped: {status}"),
            RunOutcome::KernelFailed { stage, status } => {
                write!(f, "kernel failed during {stage:?}: {status}")
            }
            RunOutcome::DeviceFailed(error) => write!(f, "device failure: {error}"),
        }
    }
}
