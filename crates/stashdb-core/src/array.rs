//! Numeric arrays
//!
//! An [`NdArray`] is a homogeneous buffer with a fixed element type and a
//! shape. Elements are held as little-endian bytes so the codec can write
//! them out without conversion.

use std::fmt;

use crate::codec::CodecError;

/// Element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DType {
    pub const ALL: [DType; 11] = [
        DType::Bool,
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::U32,
        DType::I32,
        DType::U64,
        DType::I64,
        DType::F32,
        DType::F64,
    ];

    /// Size of one element in bytes
    pub fn itemsize(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Canonical name used in encoded payloads
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::U16 => "u16",
            DType::I16 => "i16",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::U64 => "u64",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Parse a canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that map onto a [`DType`]
pub trait Element: Copy + sealed::Sealed {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `DTYPE.itemsize()` long
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = $dtype;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_element!(
    u8 => DType::U8,
    i8 => DType::I8,
    u16 => DType::U16,
    i16 => DType::I16,
    u32 => DType::U32,
    i32 => DType::I32,
    u64 => DType::U64,
    i64 => DType::I64,
    f32 => DType::F32,
    f64 => DType::F64,
);

/// A shaped, typed numeric buffer
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl NdArray {
    /// Build an array from raw little-endian element bytes
    ///
    /// Fails when `data` does not hold exactly `product(shape)` elements.
    /// An empty shape describes a single scalar element.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, CodecError> {
        let count = element_count(&shape)?;
        let expected = count
            .checked_mul(dtype.itemsize())
            .ok_or_else(|| CodecError::ShapeOverflow {
                shape: shape.clone(),
            })?;

        if data.len() != expected {
            return Err(CodecError::SizeMismatch {
                dtype,
                shape,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { dtype, shape, data })
    }

    /// One-dimensional array from a vector of elements
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        Self {
            dtype: T::DTYPE,
            shape,
            data: to_bytes(&values),
        }
    }

    /// Array of the given shape from row-major elements
    pub fn from_shape_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self, CodecError> {
        Self::from_raw(T::DTYPE, shape, to_bytes(&values))
    }

    /// Boolean array (one byte per element, 0 or 1)
    pub fn from_bools(values: &[bool]) -> Self {
        Self {
            dtype: DType::Bool,
            shape: vec![values.len()],
            data: values.iter().map(|&b| u8::from(b)).collect(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.itemsize()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw little-endian element bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size of the element data in bytes
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Elements as `T`, or `None` when `T` does not match the dtype
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(
            self.data
                .chunks_exact(self.dtype.itemsize())
                .map(T::read_le)
                .collect(),
        )
    }

    /// Same elements under a new shape
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, CodecError> {
        Self::from_raw(self.dtype, shape, self.data)
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array<{}>{:?}", self.dtype, self.shape)
    }
}

fn element_count(shape: &[usize]) -> Result<usize, CodecError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| CodecError::ShapeOverflow {
            shape: shape.to_vec(),
        })
}

fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DTYPE.itemsize());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_is_one_dimensional() {
        let arr = NdArray::from_vec(vec![1.0f64, 2.0, 3.0]);
        assert_eq!(arr.dtype(), DType::F64);
        assert_eq!(arr.shape(), &[3]);
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.nbytes(), 24);
        assert_eq!(arr.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_to_vec_wrong_type() {
        let arr = NdArray::from_vec(vec![1i32, 2]);
        assert!(arr.to_vec::<f64>().is_none());
        assert_eq!(arr.to_vec::<i32>().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_from_shape_vec_checks_size() {
        let ok = NdArray::from_shape_vec(vec![2, 3], vec![0u8; 6]).unwrap();
        assert_eq!(ok.ndim(), 2);

        let err = NdArray::from_shape_vec(vec![2, 3], vec![0u8; 5]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SizeMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_scalar_shape_holds_one_element() {
        let arr = NdArray::from_shape_vec(Vec::new(), vec![7i64]).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.ndim(), 0);
    }

    #[test]
    fn test_shape_overflow() {
        let err = NdArray::from_raw(DType::F64, vec![usize::MAX, 2], Vec::new()).unwrap_err();
        assert!(matches!(err, CodecError::ShapeOverflow { .. }));
    }

    #[test]
    fn test_reshape() {
        let arr = NdArray::from_vec(vec![1u16, 2, 3, 4]).reshape(vec![2, 2]).unwrap();
        assert_eq!(arr.shape(), &[2, 2]);
        assert!(NdArray::from_vec(vec![1u16, 2, 3]).reshape(vec![2, 2]).is_err());
    }

    #[test]
    fn test_bools() {
        let arr = NdArray::from_bools(&[true, false, true]);
        assert_eq!(arr.dtype(), DType::Bool);
        assert_eq!(arr.as_bytes(), &[1, 0, 1]);
    }

    #[test]
    fn test_dtype_names() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_name(dtype.name()), Some(dtype));
        }
        assert_eq!(DType::from_name("complex128"), None);
    }

    #[test]
    fn test_display() {
        let arr = NdArray::from_vec(vec![0.5f32; 4]);
        assert_eq!(arr.to_string(), "array<f32>[4]");
    }
}
