//! Packed matrix type descriptor.
//!
//! A [`MatrixTypeFlag`] holds four independent nibble fields in one `u32`:
//!
//! ```text
//! bits 12..16  shape         (square, rectangular)
//! bits  8..12  definiteness  (indefinite, +definite, -definite, +semidefinite)
//! bits  4..8   value domain  (real, complex)
//! bits  0..4   symmetry      (unsymmetric, symmetric, hermitian, structural)
//! ```
//!
//! Each field holds exactly one bit. The all-zero value is the "unknown"
//! descriptor, accepted only by backends that infer what they need from the
//! matrix data itself.

use std::fmt;

use serde::{Deserialize, Serialize};

const SYMMETRY_SHIFT: u32 = 0;
const DOMAIN_SHIFT: u32 = 4;
const DEFINITENESS_SHIFT: u32 = 8;
const SHAPE_SHIFT: u32 = 12;
const FIELD_MASK: u32 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Symmetry {
    Unsymmetric = 0x1,
    Symmetric = 0x2,
    Hermitian = 0x4,
    /// Symmetric pattern, unsymmetric values
    StructurallySymmetric = 0x8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ValueDomain {
    Real = 0x1,
    Complex = 0x2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Definiteness {
    Indefinite = 0x1,
    PositiveDefinite = 0x2,
    NegativeDefinite = 0x4,
    PositiveSemidefinite = 0x8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Shape {
    Square = 0x1,
    Rectangular = 0x2,
}

/// Symmetry class, value domain, definiteness and shape packed in one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatrixTypeFlag(u32);

impl MatrixTypeFlag {
    pub const UNKNOWN: Self = Self(0);

    pub const REAL_SPD: Self = Self::new(
        Symmetry::Symmetric,
        ValueDomain::Real,
        Definiteness::PositiveDefinite,
        Shape::Square,
    );
    pub const REAL_SYMMETRIC: Self = Self::new(
        Symmetry::Symmetric,
        ValueDomain::Real,
        Definiteness::Indefinite,
        Shape::Square,
    );
    pub const REAL_UNSYMMETRIC: Self = Self::new(
        Symmetry::Unsymmetric,
        ValueDomain::Real,
        Definiteness::Indefinite,
        Shape::Square,
    );
    pub const REAL_RECTANGULAR: Self = Self::new(
        Symmetry::Unsymmetric,
        ValueDomain::Real,
        Definiteness::Indefinite,
        Shape::Rectangular,
    );
    pub const COMPLEX_HPD: Self = Self::new(
        Symmetry::Hermitian,
        ValueDomain::Complex,
        Definiteness::PositiveDefinite,
        Shape::Square,
    );
    pub const COMPLEX_SYMMETRIC: Self = Self::new(
        Symmetry::Symmetric,
        ValueDomain::Complex,
        Definiteness::Indefinite,
        Shape::Square,
    );
    pub const COMPLEX_UNSYMMETRIC: Self = Self::new(
        Symmetry::Unsymmetric,
        ValueDomain::Complex,
        Definiteness::Indefinite,
        Shape::Square,
    );

    pub const fn new(
        symmetry: Symmetry,
        domain: ValueDomain,
        definiteness: Definiteness,
        shape: Shape,
    ) -> Self {
        Self(
            ((symmetry as u32) << SYMMETRY_SHIFT)
                | ((domain as u32) << DOMAIN_SHIFT)
                | ((definiteness as u32) << DEFINITENESS_SHIFT)
                | ((shape as u32) << SHAPE_SHIFT),
        )
    }

    /// Rebuild a flag from its packed form.
    ///
    /// Returns `None` unless the word is either zero (unknown) or carries
    /// exactly one bit in each of the four fields.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits == 0 {
            return Some(Self::UNKNOWN);
        }
        if bits >> 16 != 0 {
            return None;
        }
        let single = |shift: u32| ((bits >> shift) & FIELD_MASK).count_ones() == 1;
        if single(SYMMETRY_SHIFT)
            && single(DOMAIN_SHIFT)
            && single(DEFINITENESS_SHIFT)
            && single(SHAPE_SHIFT)
        {
            Some(Self(bits))
        } else {
            None
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    const fn field(self, shift: u32) -> u32 {
        (self.0 >> shift) & FIELD_MASK
    }

    pub fn symmetry(self) -> Option<Symmetry> {
        match self.field(SYMMETRY_SHIFT) {
            0x1 => Some(Symmetry::Unsymmetric),
            0x2 => Some(Symmetry::Symmetric),
            0x4 => Some(Symmetry::Hermitian),
            0x8 => Some(Symmetry::StructurallySymmetric),
            _ => None,
        }
    }

    pub fn domain(self) -> Option<ValueDomain> {
        match self.field(DOMAIN_SHIFT) {
            0x1 => Some(ValueDomain::Real),
            0x2 => Some(ValueDomain::Complex),
            _ => None,
        }
    }

    pub fn definiteness(self) -> Option<Definiteness> {
        match self.field(DEFINITENESS_SHIFT) {
            0x1 => Some(Definiteness::Indefinite),
            0x2 => Some(Definiteness::PositiveDefinite),
            0x4 => Some(Definiteness::NegativeDefinite),
            0x8 => Some(Definiteness::PositiveSemidefinite),
            _ => None,
        }
    }

    pub fn shape(self) -> Option<Shape> {
        match self.field(SHAPE_SHIFT) {
            0x1 => Some(Shape::Square),
            0x2 => Some(Shape::Rectangular),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// Symmetric or Hermitian values.
    #[inline]
    pub const fn is_symmetric(self) -> bool {
        self.field(SYMMETRY_SHIFT) & (Symmetry::Symmetric as u32 | Symmetry::Hermitian as u32) != 0
    }

    #[inline]
    pub const fn is_hermitian(self) -> bool {
        self.field(SYMMETRY_SHIFT) & Symmetry::Hermitian as u32 != 0
    }

    #[inline]
    pub const fn is_real(self) -> bool {
        self.field(DOMAIN_SHIFT) & ValueDomain::Real as u32 != 0
    }

    #[inline]
    pub const fn is_complex(self) -> bool {
        self.field(DOMAIN_SHIFT) & ValueDomain::Complex as u32 != 0
    }

    /// Positive or negative definite. Semidefinite does not count.
    #[inline]
    pub const fn is_definite(self) -> bool {
        self.field(DEFINITENESS_SHIFT)
            & (Definiteness::PositiveDefinite as u32 | Definiteness::NegativeDefinite as u32)
            != 0
    }

    #[inline]
    pub const fn is_positive_definite(self) -> bool {
        self.field(DEFINITENESS_SHIFT) & Definiteness::PositiveDefinite as u32 != 0
    }

    #[inline]
    pub const fn is_square(self) -> bool {
        self.field(SHAPE_SHIFT) & Shape::Square as u32 != 0
    }

    /// Symmetric (or Hermitian) positive definite square matrix.
    #[inline]
    pub const fn is_spd(self) -> bool {
        self.is_symmetric() && self.is_positive_definite() && self.is_square()
    }
}

impl fmt::Display for MatrixTypeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "unknown");
        }
        let domain = match self.domain() {
            Some(ValueDomain::Real) => "real",
            Some(ValueDomain::Complex) => "complex",
            None => "?",
        };
        let symmetry = match self.symmetry() {
            Some(Symmetry::Unsymmetric) => "unsymmetric",
            Some(Symmetry::Symmetric) => "symmetric",
            Some(Symmetry::Hermitian) => "hermitian",
            Some(Symmetry::StructurallySymmetric) => "structurally-symmetric",
            None => "?",
        };
        let definiteness = match self.definiteness() {
            Some(Definiteness::Indefinite) => "indefinite",
            Some(Definiteness::PositiveDefinite) => "positive-definite",
            Some(Definiteness::NegativeDefinite) => "negative-definite",
            Some(Definiteness::PositiveSemidefinite) => "positive-semidefinite",
            None => "?",
        };
        let shape = match self.shape() {
            Some(Shape::Square) => "square",
            Some(Shape::Rectangular) => "rectangular",
            None => "?",
        };
        write!(f, "{domain} {symmetry} {definiteness} {shape}")
    }
}
