//! Diagnostic dump of a failed comparison.

use crate::{epilogue::HostEpilogue, mainloop::HostMainloop, shape::ProblemShape};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

/// `error_Gemm_device_{M}x{N}x{K}x{L}_{TM}_{TN}_{TK}.txt`
pub fn file_name(problem: ProblemShape, tile_shape: [usize; 3]) -> String {
    let [tm, tn, tk] = tile_shape;
    format!("error_Gemm_device_{problem}_{tm}_{tn}_{tk}.txt")
}

/// Writes every tensor of a test case to `dir` and returns the file path.
pub fn write(
    dir: &Path,
    tile_shape: [usize; 3],
    problem: ProblemShape,
    alpha: f64,
    beta: f64,
    mainloop: &HostMainloop,
    epilogue: &HostEpilogue,
) -> io::Result<PathBuf> {
    let path = dir.join(file_name(problem, tile_shape));
    let mut out = BufWriter::new(File::create(&path)?);
    writeln!(
        out,
        "problem: {}x{}x{}, batch count: {}, alpha: {alpha}, beta: {beta}\n",
        problem.m(),
        problem.n(),
        problem.k(),
        problem.l(),
    )?;
    mainloop.write_tensors(&mut out)?;
    epilogue.write_tensors(&mut out)?;
    out.flush()?;
    tracing::info!(path = %path.display(), "wrote diagnostic dump");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_includes_problem_and_tile() {
        let problem = ProblemShape::new(16, 8, 32, 2).unwrap();
        assert_eq!(
            file_name(problem, [128, 64, 32]),
            "error_Gemm_device_16x8x32x2_128_64_32.txt"
        );
    }
}
