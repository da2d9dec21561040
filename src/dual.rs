//! Forward-mode automatic differentiation with dynamically sized derivative vectors.
use nalgebra::DVector;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// A value together with its derivatives with respect to a set of independent variables.
///
/// For Dirac kernels the independent variables are the local degrees of freedom of the
/// current element. A dual number with an empty derivative vector is a constant: it
/// combines with dual numbers of any length.
#[derive(Debug, Clone, PartialEq)]
pub struct DualNumber {
    value: f64,
    derivatives: DVector<f64>,
}

impl DualNumber {
    pub fn new(value: f64, derivatives: DVector<f64>) -> Self {
        Self { value, derivatives }
    }

    /// A constant, with no derivatives.
    pub fn constant(value: f64) -> Self {
        Self::new(value, DVector::zeros(0))
    }

    /// The `index`-th of `num_derivatives` independent variables, with value `value`.
    pub fn variable(value: f64, num_derivatives: usize, index: usize) -> Self {
        let mut derivatives = DVector::zeros(num_derivatives);
        derivatives[index] = 1.0;
        Self::new(value, derivatives)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn derivatives(&self) -> &DVector<f64> {
        &self.derivatives
    }

    /// Derivative with respect to the `index`-th independent variable.
    ///
    /// Constants have zero derivatives with respect to everything.
    pub fn derivative(&self, index: usize) -> f64 {
        self.derivatives.get(index).copied().unwrap_or(0.0)
    }

    /// Applies a scalar function with known derivative: `f(self)` where `df` is `f'(self.value)`.
    fn chain(&self, value: f64, df: f64) -> Self {
        Self::new(value, &self.derivatives * df)
    }

    pub fn powi(&self, n: i32) -> Self {
        let df = if n == 0 { 0.0 } else { f64::from(n) * self.value.powi(n - 1) };
        self.chain(self.value.powi(n), df)
    }

    pub fn powf(&self, p: f64) -> Self {
        self.chain(self.value.powf(p), p * self.value.powf(p - 1.0))
    }

    pub fn sqrt(&self) -> Self {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s)
    }

    pub fn exp(&self) -> Self {
        let e = self.value.exp();
        self.chain(e, e)
    }

    pub fn ln(&self) -> Self {
        self.chain(self.value.ln(), 1.0 / self.value)
    }

    pub fn sin(&self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }

    pub fn cos(&self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }

    pub fn abs(&self) -> Self {
        self.chain(self.value.abs(), self.value.signum())
    }
}

impl From<f64> for DualNumber {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

/// Computes `a * x + b * y`, treating empty vectors as zero.
///
/// # Panics
///
/// Panics if both vectors are non-empty and of different lengths.
fn linear_combination(a: f64, x: &DVector<f64>, b: f64, y: &DVector<f64>) -> DVector<f64> {
    match (x.is_empty(), y.is_empty()) {
        (true, true) => DVector::zeros(0),
        (false, true) => x * a,
        (true, false) => y * b,
        (false, false) => {
            assert_eq!(
                x.len(),
                y.len(),
                "Dual numbers must have the same number of derivatives to be combined"
            );
            x * a + y * b
        }
    }
}

impl<'a, 'b> Add<&'b DualNumber> for &'a DualNumber {
    type Output = DualNumber;

    fn add(self, rhs: &'b DualNumber) -> DualNumber {
        DualNumber::new(
            self.value + rhs.value,
            linear_combination(1.0, &self.derivatives, 1.0, &rhs.derivatives),
        )
    }
}

impl<'a, 'b> Sub<&'b DualNumber> for &'a DualNumber {
    type Output = DualNumber;

    fn sub(self, rhs: &'b DualNumber) -> DualNumber {
        DualNumber::new(
            self.value - rhs.value,
            linear_combination(1.0, &self.derivatives, -1.0, &rhs.derivatives),
        )
    }
}

impl<'a, 'b> Mul<&'b DualNumber> for &'a DualNumber {
    type Output = DualNumber;

    fn mul(self, rhs: &'b DualNumber) -> DualNumber {
        // (ab)' = b a' + a b'
        DualNumber::new(
            self.value * rhs.value,
            linear_combination(rhs.value, &self.derivatives, self.value, &rhs.derivatives),
        )
    }
}

impl<'a, 'b> Div<&'b DualNumber> for &'a DualNumber {
    type Output = DualNumber;

    fn div(self, rhs: &'b DualNumber) -> DualNumber {
        // (a/b)' = a'/b - a b' / b^2
        let inv = 1.0 / rhs.value;
        DualNumber::new(
            self.value * inv,
            linear_combination(inv, &self.derivatives, -self.value * inv * inv, &rhs.derivatives),
        )
    }
}

macro_rules! forward_binary_op {
    ($trait:ident, $method:ident) => {
        impl $trait<DualNumber> for DualNumber {
            type Output = DualNumber;

            fn $method(self, rhs: DualNumber) -> DualNumber {
                (&self).$method(&rhs)
            }
        }

        impl<'b> $trait<&'b DualNumber> for DualNumber {
            type Output = DualNumber;

            fn $method(self, rhs: &'b DualNumber) -> DualNumber {
                (&self).$method(rhs)
            }
        }

        impl<'a> $trait<DualNumber> for &'a DualNumber {
            type Output = DualNumber;

            fn $method(self, rhs: DualNumber) -> DualNumber {
                self.$method(&rhs)
            }
        }

        impl $trait<f64> for DualNumber {
            type Output = DualNumber;

            fn $method(self, rhs: f64) -> DualNumber {
                (&self).$method(&DualNumber::constant(rhs))
            }
        }

        impl<'a> $trait<f64> for &'a DualNumber {
            type Output = DualNumber;

            fn $method(self, rhs: f64) -> DualNumber {
                self.$method(&DualNumber::constant(rhs))
            }
        }

        impl $trait<DualNumber> for f64 {
            type Output = DualNumber;

            fn $method(self, rhs: DualNumber) -> DualNumber {
                (&DualNumber::constant(self)).$method(&rhs)
            }
        }

        impl<'b> $trait<&'b DualNumber> for f64 {
            type Output = DualNumber;

            fn $method(self, rhs: &'b DualNumber) -> DualNumber {
                (&DualNumber::constant(self)).$method(rhs)
            }
        }
    };
}

forward_binary_op!(Add, add);
forward_binary_op!(Sub, sub);
forward_binary_op!(Mul, mul);
forward_binary_op!(Div, div);

impl Neg for DualNumber {
    type Output = DualNumber;

    fn neg(self) -> DualNumber {
        DualNumber::new(-self.value, -self.derivatives)
    }
}

impl<'a> Neg for &'a DualNumber {
    type Output = DualNumber;

    fn neg(self) -> DualNumber {
        DualNumber::new(-self.value, -&self.derivatives)
    }
}

impl<'b> AddAssign<&'b DualNumber> for DualNumber {
    fn add_assign(&mut self, rhs: &'b DualNumber) {
        *self = &*self + rhs;
    }
}

impl AddAssign<DualNumber> for DualNumber {
    fn add_assign(&mut self, rhs: DualNumber) {
        *self += &rhs;
    }
}

impl<'b> SubAssign<&'b DualNumber> for DualNumber {
    fn sub_assign(&mut self, rhs: &'b DualNumber) {
        *self = &*self - rhs;
    }
}

impl SubAssign<DualNumber> for DualNumber {
    fn sub_assign(&mut self, rhs: DualNumber) {
        *self -= &rhs;
    }
}

impl MulAssign<f64> for DualNumber {
    fn mul_assign(&mut self, rhs: f64) {
        self.value *= rhs;
        self.derivatives *= rhs;
    }
}
