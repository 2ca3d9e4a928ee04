//! Missing-value handling for daily view series

/// Index of the first present value, `None` if every value is missing
pub fn first_present(data: &[Option<f64>]) -> Option<usize> {
    data.iter().position(|v| v.map_or(false, f64::is_finite))
}

/// Propagate the last seen value forward, then fill any leading gap backward
///
/// Returns `None` when the series holds no finite value at all.
pub fn forward_backward_fill(data: &[Option<f64>]) -> Option<Vec<f64>> {
    let start = first_present(data)?;
    let mut out = Vec::with_capacity(data.len());
    let mut last = data[start].unwrap_or(0.0);

    for value in data {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            last = v;
        }
        out.push(last);
    }

    // Leading gap takes the first present value
    for slot in out.iter_mut().take(start) {
        *slot = data[start].unwrap_or(0.0);
    }
    Some(out)
}

/// Drop the leading run of missing values, then forward/backward fill the rest
///
/// Returns the offset of the first kept value and the filled series.
pub fn trim_and_fill(data: &[Option<f64>]) -> Option<(usize, Vec<f64>)> {
    let start = first_present(data)?;
    let filled = forward_backward_fill(&data[start..])?;
    Some((start, filled))
}

/// Replace every missing value with zero
pub fn zero_fill(data: &[Option<f64>]) -> Vec<f64> {
    data.iter()
        .map(|v| v.filter(|v| v.is_finite()).unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_backward_fill() {
        let data = [None, Some(2.0), None, Some(5.0), None];
        assert_eq!(
            forward_backward_fill(&data).unwrap(),
            vec![2.0, 2.0, 2.0, 5.0, 5.0]
        );
        assert!(forward_backward_fill(&[None, None]).is_none());
    }

    #[test]
    fn test_trim_and_fill_drops_leading_gap() {
        let data = [None, None, Some(1.0), None, Some(3.0)];
        let (offset, filled) = trim_and_fill(&data).unwrap();
        assert_eq!(offset, 2);
        assert_eq!(filled, vec![1.0, 1.0, 3.0]);
    }

    #[test]
    fn test_zero_fill_replaces_gaps_and_nan() {
        let data = [Some(1.0), None, Some(f64::NAN), Some(4.0)];
        assert_eq!(zero_fill(&data), vec![1.0, 0.0, 0.0, 4.0]);
    }
}
