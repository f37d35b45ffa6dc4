//! Descending-energy view of a spectrum.

use ndarray::{s, Array1};

/// Copy of a spectrum in descending x order, remembering whether it was reversed.
pub(crate) struct Oriented {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    reversed: bool,
}

impl Oriented {
    pub fn descending(x: &Array1<f64>, y: &Array1<f64>) -> Self {
        let reversed = x.len() > 1 && x[0] < x[x.len() - 1];
        if reversed {
            Self {
                x: x.slice(s![..;-1]).to_owned(),
                y: y.slice(s![..;-1]).to_owned(),
                reversed,
            }
        } else {
            Self {
                x: x.clone(),
                y: y.clone(),
                reversed,
            }
        }
    }

    /// Map an array computed in descending order back onto the caller's order
    pub fn restore(&self, values: Array1<f64>) -> Array1<f64> {
        if self.reversed {
            values.slice(s![..;-1]).to_owned()
        } else {
            values
        }
    }
}
