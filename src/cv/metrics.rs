use std::collections::BTreeSet;

/// Fraction of exact matches; 0 for empty input
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Unweighted mean of per-class recall.
///
/// Classes are the union of true and predicted labels; a class that only
/// appears among the predictions contributes a recall of 0.
pub fn recall_macro(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let labels: BTreeSet<usize> = y_true.iter().chain(y_pred).copied().collect();
    if labels.is_empty() {
        return 0.0;
    }

    let total: f64 = labels
        .iter()
        .map(|&label| {
            let support = y_true.iter().filter(|&&t| t == label).count();
            if support == 0 {
                return 0.0;
            }
            let hits = y_true
                .iter()
                .zip(y_pred)
                .filter(|(&t, &p)| t == label && p == label)
                .count();
            hits as f64 / support as f64
        })
        .sum();

    total / labels.len() as f64
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
