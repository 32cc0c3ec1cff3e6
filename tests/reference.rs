use approx::relative_eq;
use epilogue_testbed::{
    Activation, DataType, Distribution, HostTensor, LayoutTag,
    reference::{self, EpilogueParams, MainloopParams, ScalarView},
};
use faer::Mat;
use rstest::rstest;

fn random_tensor(name: &'static str, tag: LayoutTag, extent: [usize; 3], seed: u64) -> HostTensor {
    let mut tensor = HostTensor::packed(name, DataType::F32, tag, extent).unwrap();
    Distribution::Gaussian.fill(&mut tensor, seed);
    tensor
}

fn batch_matrix(tensor: &HostTensor, l: usize) -> Mat<f64> {
    let layout = tensor.layout();
    Mat::from_fn(layout.rows(), layout.cols(), |i, j| tensor.real_at(i, j, l))
}

#[rstest]
fn matches_faer(
    #[values(LayoutTag::RowMajor, LayoutTag::ColumnMajor)] layout_a: LayoutTag,
    #[values(LayoutTag::RowMajor, LayoutTag::ColumnMajor)] layout_b: LayoutTag,
    #[values((16, 16, 32, 1), (7, 13, 5, 3))] shape: (usize, usize, usize, usize),
) {
    let (m, n, k, l) = shape;
    let a = random_tensor("A", layout_a, [m, k, l], 1);
    let b = random_tensor("B", layout_b, [k, n, l], 2);
    let c = random_tensor("C", LayoutTag::RowMajor, [m, n, l], 3);
    let mut d = HostTensor::packed("D", DataType::F32, LayoutTag::ColumnMajor, [m, n, l]).unwrap();

    let (alpha, beta) = (1.5, -0.5);
    reference::gemm(
        &MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        },
        &mut EpilogueParams {
            c: &c,
            d: &mut d,
            alpha: ScalarView::Value(alpha),
            beta: ScalarView::Value(beta),
            scale: None,
            bias: None,
            dbias: None,
            aux_in: None,
            aux_out: None,
            abs_max_d: None,
            abs_max_aux: None,
            activation: Activation::Identity,
        },
    );

    for batch in 0..l {
        let product = &batch_matrix(&a, batch) * &batch_matrix(&b, batch);
        for i in 0..m {
            for j in 0..n {
                let expected = alpha * *product.get(i, j) + beta * c.real_at(i, j, batch);
                let actual = d.real_at(i, j, batch);
                if !relative_eq!(expected, actual, epsilon = 1e-4, max_relative = 1e-4) {
                    panic!("failed at ({i}, {j}, {batch}): expected = {expected}, actual = {actual}");
                }
            }
        }
    }
}

#[test]
fn integer_accumulation_is_exact() {
    let (m, n, k) = (9, 6, 40);
    let mut a = HostTensor::packed("A", DataType::I8, LayoutTag::RowMajor, [m, k, 1]).unwrap();
    let mut b = HostTensor::packed("B", DataType::I8, LayoutTag::ColumnMajor, [k, n, 1]).unwrap();
    Distribution::Sequential.fill(&mut a, 0);
    Distribution::Sequential.fill(&mut b, 0);
    let c = HostTensor::packed("C", DataType::I32, LayoutTag::RowMajor, [m, n, 1]).unwrap();
    let mut d = HostTensor::packed("D", DataType::I32, LayoutTag::RowMajor, [m, n, 1]).unwrap();

    reference::gemm(
        &MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::I32,
        },
        &mut EpilogueParams {
            c: &c,
            d: &mut d,
            alpha: ScalarView::Value(1.0),
            beta: ScalarView::Value(0.0),
            scale: None,
            bias: None,
            dbias: None,
            aux_in: None,
            aux_out: None,
            abs_max_d: None,
            abs_max_aux: None,
            activation: Activation::Identity,
        },
    );

    let product = &batch_matrix(&a, 0) * &batch_matrix(&b, 0);
    for i in 0..m {
        for j in 0..n {
            assert_eq!(d.real_at(i, j, 0), *product.get(i, j));
        }
    }
}
