use crate::error::{PrismError, Result};

/// Default guard against division by zero.
pub const EPS: f64 = 1e-10;

/// `max(pred / true, true / pred)` with `eps` added to both values; 1.0 is a
/// perfect prediction.
pub fn fold_error(ic50_true: f64, ic50_pred: f64, eps: f64) -> Result<f64> {
    if ic50_true < 0.0 || ic50_pred < 0.0 {
        return Err(PrismError::InvalidArguments {
            tool: "fold_error".to_string(),
            reason: format!("IC50 values must be non-negative, got true={ic50_true} pred={ic50_pred}"),
        });
    }
    let (t, p) = (ic50_true + eps, ic50_pred + eps);
    Ok((p / t).max(t / p))
}

pub fn absolute_error(ic50_true: f64, ic50_pred: f64) -> f64 {
    (ic50_pred - ic50_true).abs()
}

fn check_lengths(truth: &[f64], preds: &[f64]) -> Result<()> {
    if truth.len() != preds.len() {
        return Err(PrismError::InvalidArguments {
            tool: "metrics".to_string(),
            reason: format!("length mismatch: {} true vs {} predicted", truth.len(), preds.len()),
        });
    }
    Ok(())
}

pub fn fold_errors(truth: &[f64], preds: &[f64], eps: f64) -> Result<Vec<f64>> {
    check_lengths(truth, preds)?;
    truth
        .iter()
        .zip(preds)
        .map(|(&t, &p)| fold_error(t, p, eps))
        .collect()
}

pub fn absolute_errors(truth: &[f64], preds: &[f64]) -> Result<Vec<f64>> {
    check_lengths(truth, preds)?;
    Ok(truth
        .iter()
        .zip(preds)
        .map(|(&t, &p)| absolute_error(t, p))
        .collect())
}

/// Geometric mean of fold errors, the usual summary for log-scale potency.
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| *v <= 0.0) {
        return None;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    Some((log_sum / values.len() as f64).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, 1.0, 1.0)]
    #[case(2.0, 8.0, 4.0)]
    #[case(8.0, 2.0, 4.0)]
    #[case(0.0, 0.0, 1.0)]
    fn fold_error_is_symmetric(#[case] truth: f64, #[case] pred: f64, #[case] expected: f64) {
        let got = fold_error(truth, pred, EPS).unwrap();
        assert!((got - expected).abs() < 1e-6, "{got}");
    }

    #[test]
    fn fold_error_rejects_negatives() {
        assert!(fold_error(-1.0, 1.0, EPS).is_err());
        assert!(fold_error(1.0, -1.0, EPS).is_err());
    }

    #[test]
    fn zero_truth_is_finite_with_eps() {
        let fold = fold_error(0.0, 1.0, EPS).unwrap();
        assert!(fold.is_finite());
        assert!(fold >= 1.0);
    }

    #[test]
    fn perfect_zero_prediction_keeps_run_summary() {
        let folds = [fold_error(0.0, 0.0, EPS).unwrap(), 4.0];
        let gm = geometric_mean(&folds).unwrap();
        assert!((gm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn slices_require_equal_length() {
        assert!(fold_errors(&[1.0], &[1.0, 2.0], EPS).is_err());
        assert_eq!(absolute_errors(&[1.0, 3.0], &[2.0, 1.0]).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn geometric_mean_of_folds() {
        let gm = geometric_mean(&[2.0, 8.0]).unwrap();
        assert!((gm - 4.0).abs() < 1e-9);
        assert_eq!(geometric_mean(&[]), None);
    }
}
