use faer::{unzip, zip, Col, ColRef};

use crate::E;

pub(crate) fn cwise_clamp<'a>(x: ColRef<'a, E>, lower: ColRef<'a, E>, upper: ColRef<'a, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, lower, upper, out.as_mut())
        .for_each(|unzip!(x, lower, upper, out)| *out = (*x).max(*lower).min(*upper));

    out
}

pub(crate) fn cwise_positive_part<'a>(x: ColRef<'a, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, out.as_mut()).for_each(|unzip!(x, out)| *out = (*x).max(0.));

    out
}

pub(crate) fn cwise_negative_part<'a>(x: ColRef<'a, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, out.as_mut()).for_each(|unzip!(x, out)| *out = (-*x).max(0.));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cwise_clamp() {
        let x = Col::from_fn(3, |_| 0.0);
        let lower = Col::from_fn(3, |i| [1.0, -2.0, -1.0][i]);
        let upper = Col::from_fn(3, |i| [3.0, -1.0, 1.0][i]);
        let result = cwise_clamp(x.as_ref(), lower.as_ref(), upper.as_ref());
        let expected = Col::from_fn(3, |i| [1.0, -1.0, 0.0][i]);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_cwise_parts() {
        let x = Col::from_fn(3, |i| [2.0, -3.0, 0.0][i]);
        assert_eq!(
            cwise_positive_part(x.as_ref()),
            Col::from_fn(3, |i| [2.0, 0.0, 0.0][i])
        );
        assert_eq!(
            cwise_negative_part(x.as_ref()),
            Col::from_fn(3, |i| [0.0, 3.0, 0.0][i])
        );
    }
}
