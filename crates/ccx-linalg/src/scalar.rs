//! Element kinds and the scalar trait shared by storage and solvers.
//!
//! Every value type stored in a [`SparseMatrix`](crate::SparseMatrix) carries
//! an [`ElementKind`] tag. The tag is written into every interchange format
//! so that a reader can refuse data of the wrong kind instead of silently
//! reinterpreting the bytes.

use std::fmt;

use bytemuck::Pod;
use nalgebra::ComplexField;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Element kind codes used by the interchange formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum ElementKind {
    /// Unsigned 64-bit index data
    U64 = 1,
    /// Single precision real
    F32 = 2,
    /// Double precision real
    F64 = 3,
    /// Single precision complex
    C32 = 4,
    /// Double precision complex
    C64 = 5,
}

impl ElementKind {
    /// Numeric tag written by the binary format.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ElementKind::U64),
            2 => Some(ElementKind::F32),
            3 => Some(ElementKind::F64),
            4 => Some(ElementKind::C32),
            5 => Some(ElementKind::C64),
            _ => None,
        }
    }

    /// Short name used in document attributes.
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::C32 => "c32",
            ElementKind::C64 => "c64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u64" => Some(ElementKind::U64),
            "f32" => Some(ElementKind::F32),
            "f64" => Some(ElementKind::F64),
            "c32" => Some(ElementKind::C32),
            "c64" => Some(ElementKind::C64),
            _ => None,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementKind::U64 => 8,
            ElementKind::F32 => 4,
            ElementKind::F64 => 8,
            ElementKind::C32 => 8,
            ElementKind::C64 => 16,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Floating-point element type usable in sparse matrices and solvers.
///
/// Values decompose into at most two `f64` lanes (real and imaginary part).
/// The lane view backs atomic accumulation and precision conversion.
pub trait Scalar:
    ComplexField + Pod + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Interchange tag for this element type.
    const KIND: ElementKind;
    /// Number of meaningful lanes (1 for real, 2 for complex).
    const PARTS: usize;

    fn to_lanes(self) -> [f64; 2];
    fn from_lanes(lanes: [f64; 2]) -> Self;

    /// Modulus evaluated in double precision.
    #[inline]
    fn modulus_f64(self) -> f64 {
        let l = self.to_lanes();
        l[0].hypot(l[1])
    }

    #[inline]
    fn from_real_f64(value: f64) -> Self {
        Self::from_lanes([value, 0.0])
    }
}

impl Scalar for f32 {
    const KIND: ElementKind = ElementKind::F32;
    const PARTS: usize = 1;

    #[inline]
    fn to_lanes(self) -> [f64; 2] {
        [self as f64, 0.0]
    }

    #[inline]
    fn from_lanes(lanes: [f64; 2]) -> Self {
        lanes[0] as f32
    }
}

impl Scalar for f64 {
    const KIND: ElementKind = ElementKind::F64;
    const PARTS: usize = 1;

    #[inline]
    fn to_lanes(self) -> [f64; 2] {
        [self, 0.0]
    }

    #[inline]
    fn from_lanes(lanes: [f64; 2]) -> Self {
        lanes[0]
    }
}

impl Scalar for Complex<f32> {
    const KIND: ElementKind = ElementKind::C32;
    const PARTS: usize = 2;

    #[inline]
    fn to_lanes(self) -> [f64; 2] {
        [self.re as f64, self.im as f64]
    }

    #[inline]
    fn from_lanes(lanes: [f64; 2]) -> Self {
        Complex::new(lanes[0] as f32, lanes[1] as f32)
    }
}

impl Scalar for Complex<f64> {
    const KIND: ElementKind = ElementKind::C64;
    const PARTS: usize = 2;

    #[inline]
    fn to_lanes(self) -> [f64; 2] {
        [self.re, self.im]
    }

    #[inline]
    fn from_lanes(lanes: [f64; 2]) -> Self {
        Complex::new(lanes[0], lanes[1])
    }
}

/// Precision conversion between element types of the same value domain.
///
/// Real converts to real and complex to complex, never across domains.
pub trait Cast<S: Scalar>: Scalar {
    fn cast(self) -> S;
}

macro_rules! impl_cast {
    ($($from:ty => $to:ty),* $(,)?) => {
        $(
            impl Cast<$to> for $from {
                #[inline]
                fn cast(self) -> $to {
                    <$to as Scalar>::from_lanes(self.to_lanes())
                }
            }
        )*
    };
}

impl_cast!(
    f32 => f32,
    f32 => f64,
    f64 => f32,
    f64 => f64,
    Complex<f32> => Complex<f32>,
    Complex<f32> => Complex<f64>,
    Complex<f64> => Complex<f32>,
    Complex<f64> => Complex<f64>,
);
