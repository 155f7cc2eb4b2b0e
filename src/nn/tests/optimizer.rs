use crate::nn::optimizer::{apply_l2_regularization, Sgdm, Solver, SolverError};
use crate::nn::param::LearnableParameter;
use crate::tensor::Tensor;
use crate::utils::assert_err;
use approx::assert_abs_diff_eq;

#[test]
fn test_sgdm_accumulates_velocity() -> Result<(), SolverError> {
    let mut solver = Sgdm::new(0.9);
    let g = vec![Some(Tensor::new(&[2.0], &[1]))];

    let first = solver.calculate_update(&g, &[1.0], 0.1)?;
    assert_abs_diff_eq!(first[0].as_ref().unwrap()[[0]], -0.2, epsilon = 1e-6);
    let second = solver.calculate_update(&g, &[1.0], 0.1)?;
    assert_abs_diff_eq!(second[0].as_ref().unwrap()[[0]], -0.38, epsilon = 1e-6);
    assert_eq!(solver.velocity()[0], second[0]);

    solver.reset();
    assert!(solver.velocity().is_empty());
    let again = solver.calculate_update(&g, &[1.0], 0.1)?;
    assert_abs_diff_eq!(again[0].as_ref().unwrap()[[0]], -0.2, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_sgdm_skips_frozen_and_missing() -> Result<(), SolverError> {
    let mut solver = Sgdm::new(0.5);
    let g = vec![Some(Tensor::ones(&[2])), None, Some(Tensor::ones(&[3]))];
    let deltas = solver.calculate_update(&g, &[0.0, 1.0, 2.0], 0.1)?;
    assert!(deltas[0].is_none());
    assert!(deltas[1].is_none());
    assert_eq!(deltas[2], Some(Tensor::filled(-0.2, &[3])));
    Ok(())
}

#[test]
fn test_sgdm_rejects_inconsistent_input() {
    let mut solver = Sgdm::new(0.9);
    assert_err!(
        solver.calculate_update(&[None], &[1.0, 1.0], 0.1),
        SolverError::LengthMismatch { gradients: 1, factors: 2 }
    );
    assert!(solver
        .calculate_update(&[Some(Tensor::ones(&[2]))], &[1.0], 0.1)
        .is_ok());
    assert_err!(
        solver.calculate_update(&[Some(Tensor::ones(&[3]))], &[1.0], 0.1),
        SolverError::ShapeMismatch { index: 0, .. }
    );
}

#[test]
fn test_l2_regularization() -> Result<(), SolverError> {
    let mut weights = LearnableParameter::new("Weights");
    weights.set_value(Tensor::new(&[2.0, -4.0], &[2])).unwrap();
    let mut bias = LearnableParameter::new("Bias");
    bias.set_value(Tensor::new(&[10.0], &[1])).unwrap();
    bias.l2_factor = 0.0;

    let mut gradients = vec![Some(Tensor::new(&[1.0, 1.0], &[2])), Some(Tensor::ones(&[1]))];
    apply_l2_regularization(&mut gradients, &[&weights, &bias], 0.1)?;
    assert_eq!(gradients[0], Some(Tensor::new(&[1.2, 0.6], &[2])));
    assert_eq!(gradients[1], Some(Tensor::ones(&[1])));

    assert_err!(
        apply_l2_regularization(&mut gradients, &[&weights], 0.1),
        SolverError::LengthMismatch { .. }
    );
    Ok(())
}
