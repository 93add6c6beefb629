//! Model weights as an ordered sequence of shaped arrays.

use std::borrow::Cow;

use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// One numeric array per model layer, in layer order.
pub type Weights = Vec<ArrayD<f32>>;

/// The shape vector of each layer, in layer order.
pub type Shapes = Vec<Vec<usize>>;

/// Builds zero-valued weight arrays matching `shapes`.
pub fn weights_from_shapes(shapes: &Shapes) -> Weights {
    shapes
        .iter()
        .map(|shape| ArrayD::zeros(IxDyn(shape)))
        .collect()
}

/// Extracts the per-layer shape vectors from `weights`.
pub fn shapes_from_weights(weights: &Weights) -> Shapes {
    weights.iter().map(|w| w.shape().to_vec()).collect()
}

/// Resets every array of `weights` to zero, keeping the shapes.
pub fn zero(weights: &mut Weights) {
    for w in weights.iter_mut() {
        w.fill(0.0);
    }
}

/// A contiguous view of one array's elements in standard layout order.
pub fn flat(array: &ArrayD<f32>) -> Cow<'_, [f32]> {
    match array.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(array.iter().copied().collect()),
    }
}

pub(crate) fn check_same_shape(
    what: &'static str,
    a: &Weights,
    b: &Weights,
) -> Result<()> {
    if a.len() != b.len() {
        return Err(MlErr::LayerCountMismatch {
            got: b.len(),
            expected: a.len(),
        });
    }
    for (x, y) in a.iter().zip(b) {
        if x.shape() != y.shape() {
            return Err(MlErr::ShapeMismatch {
                what,
                got: y.shape().to_vec(),
                expected: x.shape().to_vec(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn shapes_round_trip() {
        let shapes: Shapes = vec![vec![2, 3], vec![3]];
        let weights = weights_from_shapes(&shapes);
        assert_eq!(shapes_from_weights(&weights), shapes);
        assert!(weights.iter().all(|w| w.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn same_shape_check_rejects_mismatches() {
        let a = vec![arr1(&[1.0, 2.0]).into_dyn()];
        let b = vec![arr1(&[1.0, 2.0, 3.0]).into_dyn()];
        assert!(matches!(
            check_same_shape("test arrays", &a, &b),
            Err(MlErr::ShapeMismatch { .. })
        ));

        let short = vec![];
        assert!(matches!(
            check_same_shape("test arrays", &a, &short),
            Err(MlErr::LayerCountMismatch { .. })
        ));
    }

    #[test]
    fn zero_keeps_shapes() {
        let mut weights = vec![arr1(&[1.0, 2.0]).into_dyn()];
        zero(&mut weights);
        assert_eq!(weights[0], arr1(&[0.0, 0.0]).into_dyn());
    }
}
