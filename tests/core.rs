use gradmap::backprop::*;
use gradmap::tensors::*;

#[test]
fn test_tensor_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0]);
    });
    assert!(result.is_err());
}

#[test]
fn test_tensor_macro() {
    let t = gradmap::tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_select_and_stack() {
    let t = gradmap::tensor!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);

    let row = t.select(0, 1);
    assert_eq!(row.shape, vec![2]);
    assert_eq!(row.data, vec![3.0, 4.0]);

    let col = t.select(1, 0);
    assert_eq!(col.shape, vec![3]);
    assert_eq!(col.data, vec![1.0, 3.0, 5.0]);

    let restacked = Tensor::stack(&[t.select(0, 0), t.select(0, 1), t.select(0, 2)]);
    assert_eq!(restacked, t);
}

#[test]
fn test_unsqueeze() {
    let t = gradmap::tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let t = t.unsqueeze(0);
    assert_eq!(t.shape, vec![1, 2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_matmul_values_and_backprop() {
    let a = WithGrad::<Ten64>::new(gradmap::tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    let b = WithGrad::<Ten64>::new(gradmap::tensor!([
        [7.0, 8.0],
        [9.0, 10.0],
        [11.0, 12.0]
    ]));

    let (out, back) = matmul(&a, &b);
    assert_eq!(out.shape, vec![2, 2]);
    assert_eq!(out.data, vec![58.0, 64.0, 139.0, 154.0]);

    let grad_output = Tensor::new(vec![2, 2], vec![1.0; 4]);
    let (grad_a, grad_b) = back(&grad_output);
    assert_eq!(grad_a.shape, vec![2, 3]);
    assert_eq!(grad_a.data, vec![15.0, 19.0, 23.0, 15.0, 19.0, 23.0]);
    assert_eq!(grad_b.shape, vec![3, 2]);
    assert_eq!(grad_b.data, vec![5.0, 5.0, 7.0, 7.0, 9.0, 9.0]);
}

#[test]
fn test_add_row_backprop() {
    let x = WithGrad::<Ten64>::new(gradmap::tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
    let bias = WithGrad::<Ten64>::new(gradmap::tensor!([10.0, 20.0, 30.0]));

    let (out, back) = add_row(&x, &bias);
    assert_eq!(out.data, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);

    let grad_output = Tensor::new(vec![2, 3], vec![1.0; 6]);
    let (grad_x, grad_b) = back(&grad_output);
    assert_eq!(grad_x.data, vec![1.0; 6]);
    assert_eq!(grad_b.data, vec![2.0, 2.0, 2.0]);
}

#[test]
fn test_relu_backprop() {
    let input = WithGrad::<Ten64>::new(Tensor::new(vec![3], vec![-1.0, 0.0, 2.0]));
    let (out, back) = relu(&input);
    assert_eq!(out.data, vec![0.0, 0.0, 2.0]);

    let grad_in = back(&Tensor::new(vec![3], vec![1.0, 1.0, 1.0]));
    assert_eq!(grad_in.data, vec![0.0, 0.0, 1.0]);
}

#[test]
fn test_conv2d_values_and_backprop() {
    let input = WithGrad::<Ten64>::new(Tensor::new(
        vec![1, 1, 3, 3],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    ));
    // identity-diagonal 2x2 kernel
    let kernel = WithGrad::<Ten64>::new(Tensor::new(vec![1, 1, 2, 2], vec![1.0, 0.0, 0.0, 1.0]));
    let bias = WithGrad::<Ten64>::new(Tensor::new(vec![1], vec![0.5]));

    let (out, back) = conv2d(&input, &kernel, &bias);
    assert_eq!(out.shape, vec![1, 1, 2, 2]);
    assert_eq!(out.data, vec![6.5, 8.5, 12.5, 14.5]);

    let grad_output = Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4]);
    let (grad_in, grad_k, grad_b) = back(&grad_output);
    assert_eq!(grad_b.data, vec![4.0]);
    assert_eq!(grad_k.shape, vec![1, 1, 2, 2]);
    assert_eq!(grad_k.data, vec![12.0, 16.0, 24.0, 28.0]);
    assert_eq!(grad_in.shape, vec![1, 1, 3, 3]);
    assert_eq!(
        grad_in.data,
        vec![1.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 1.0]
    );
}

#[test]
fn test_max_pool2d_backprop() {
    let input = WithGrad::<Ten64>::new(Tensor::new(
        vec![1, 1, 4, 4],
        (1..=16).map(f64::from).collect(),
    ));

    let (out, back) = max_pool2d(&input, 2);
    assert_eq!(out.shape, vec![1, 1, 2, 2]);
    assert_eq!(out.data, vec![6.0, 8.0, 14.0, 16.0]);

    let grad_output = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let grad_in = back(&grad_output);
    let mut expected = vec![0.0; 16];
    expected[5] = 1.0;
    expected[7] = 2.0;
    expected[13] = 3.0;
    expected[15] = 4.0;
    assert_eq!(grad_in.data, expected);
}

#[test]
fn test_log_softmax() {
    let input = WithGrad::<Ten64>::new(Tensor::new(vec![1, 2], vec![0.0, 3.0f64.ln()]));
    let (out, back) = log_softmax(&input);

    assert!((out.data[0] - (-4.0f64.ln())).abs() < 1e-12);
    assert!((out.data[1] - 0.75f64.ln()).abs() < 1e-12);

    // rows exponentiate to a probability distribution
    let total: f64 = out.data.iter().map(|&x| x.exp()).sum();
    assert!((total - 1.0).abs() < 1e-12);

    let grad_in = back(&Tensor::new(vec![1, 2], vec![1.0, 0.0]));
    assert!((grad_in.data[0] - 0.75).abs() < 1e-12);
    assert!((grad_in.data[1] + 0.75).abs() < 1e-12);
}

#[test]
fn test_cross_entropy_logits() {
    let logits = WithGrad::<Ten64>::new(Tensor::new(vec![1, 2], vec![0.0, 0.0]));
    let targets = Tensor::new(vec![1], vec![0.0]);

    let (loss, back) = cross_entropy_logits(&logits, &targets);
    assert!((loss - 2.0f64.ln()).abs() < 1e-12);

    let grad = back(1.0);
    assert!((grad.data[0] + 0.5).abs() < 1e-12);
    assert!((grad.data[1] - 0.5).abs() < 1e-12);
}

#[test]
fn test_cross_entropy_logits_batch_mean() {
    let logits = WithGrad::<Ten64>::new(Tensor::new(vec![2, 2], vec![0.0; 4]));
    let targets = Tensor::new(vec![2], vec![0.0, 1.0]);

    let (loss, back) = cross_entropy_logits(&logits, &targets);
    assert!((loss - 2.0f64.ln()).abs() < 1e-12);

    // each sample's gradient carries the 1/n batch-mean factor
    let grad = back(1.0);
    assert!((grad.data[0] + 0.25).abs() < 1e-12);
    assert!((grad.data[1] - 0.25).abs() < 1e-12);
    assert!((grad.data[2] - 0.25).abs() < 1e-12);
    assert!((grad.data[3] + 0.25).abs() < 1e-12);
}

#[test]
fn test_cross_entropy_empty_batch_panics() {
    let result = std::panic::catch_unwind(|| {
        let logits = WithGrad::<Ten64>::new(Tensor::new(vec![0, 2], Vec::new()));
        let targets = Tensor::new(vec![0], Vec::new());
        cross_entropy_logits(&logits, &targets)
    });
    assert!(result.is_err());
}

#[test]
fn test_finite_difference_matmul_cross_entropy() {
    // matmul → cross-entropy is smooth everywhere, so central differences
    // are a reliable oracle for the chained backward closures
    let x = Tensor::new(vec![1, 2], vec![0.3, -0.7]);
    let w_data = vec![0.1, 0.2, -0.3, 0.5, -0.4, 0.05];
    let targets = Tensor::new(vec![1], vec![1.0]);

    let loss_for = |w_data: &[f64]| {
        let x = WithGrad::<Ten64>::new(x.clone());
        let w = WithGrad::<Ten64>::new(Tensor::new(vec![2, 3], w_data.to_vec()));
        let (z, _back) = matmul(&x, &w);
        let z = WithGrad::<Ten64>::new(z);
        let (loss, _back) = cross_entropy_logits(&z, &targets);
        loss
    };

    let x_wg = WithGrad::<Ten64>::new(x.clone());
    let w_wg = WithGrad::<Ten64>::new(Tensor::new(vec![2, 3], w_data.clone()));
    let (z, back_mm) = matmul(&x_wg, &w_wg);
    let z = WithGrad::<Ten64>::new(z);
    let (_loss, back_ce) = cross_entropy_logits(&z, &targets);
    let (_grad_x, grad_w) = back_mm(&back_ce(1.0));

    let eps = 1e-6;
    for i in 0..w_data.len() {
        let mut bumped = w_data.clone();
        bumped[i] += eps;
        let up = loss_for(&bumped);
        bumped[i] -= 2.0 * eps;
        let down = loss_for(&bumped);

        let numeric = (up - down) / (2.0 * eps);
        assert!(
            (numeric - grad_w.data[i]).abs() < 1e-7,
            "entry {i}: numeric {numeric} vs analytic {}",
            grad_w.data[i]
        );
    }
}

#[test]
fn test_sgd() {
    let mut w = WithGrad {
        value: Tensor::new(vec![2], vec![1.0, 2.0]),
        grad: Tensor::new(vec![2], vec![0.1, 0.2]),
    };
    sgd(&mut w, 0.5);
    assert_eq!(w.value.data, vec![0.95, 1.9]);
    assert_eq!(w.grad.data, vec![0.0, 0.0]);
}

#[test]
fn test_snapshot_save_and_load() {
    use gradmap::modelio::{load_params, save_params};

    let a = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let b = Tensor::new(vec![1, 4], vec![7.0, 8.0, 9.0, 10.0]);
    let original = vec![a.clone(), b.clone()];

    let path = std::env::temp_dir().join("gradmap_test_snapshot.gmap");
    let path = path.to_str().unwrap();

    save_params(path, &original).unwrap();
    let loaded = load_params(path).unwrap();

    assert_eq!(original, loaded);
}

#[test]
fn test_all_close_tolerances() {
    use gradmap::approx::{all_close, max_abs_diff};

    let a = gradmap::tensor!([1.0, 2.0, 3.0]);
    let mut b = a.clone();
    b.data[1] += 1e-6;

    assert!(all_close(&a, &b, 1e-5, 0.0));
    assert!(!all_close(&a, &b, 1e-8, 0.0));
    // relative term scales with the reference magnitude
    assert!(all_close(&a, &b, 0.0, 1e-5));

    assert!((max_abs_diff(&a, &b) - 1e-6).abs() < 1e-15);

    // shape mismatch is unequal, not a panic
    let c = gradmap::tensor!([[1.0, 2.0, 3.0]]);
    assert!(!all_close(&a, &c, 1.0, 1.0));
}

#[test]
fn test_approx_eq_grades() {
    use gradmap::approx::{ApproxEquality, RelativeEq, approx_eq};

    assert!(approx_eq(&1.0f64, &1.0f64));
    assert!(!approx_eq(&1.0f64, &1.1f64));
    assert_eq!(1.0f64.approx_eq(&1.0001), ApproxEquality::Relative);
    assert_eq!(1.0f64.approx_eq(&2.0), ApproxEquality::Scarce);
}
