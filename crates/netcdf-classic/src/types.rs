//! External data types and typed value arrays.

use netcdf3::{DataType, DataVector};

use crate::error::{NetCdfError, NetCdfResult};

/// NetCDF-3 external types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NcType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
}

impl NcType {
    pub fn from_code(code: u32) -> NetCdfResult<Self> {
        match code {
            1 => Ok(NcType::Byte),
            2 => Ok(NcType::Char),
            3 => Ok(NcType::Short),
            4 => Ok(NcType::Int),
            5 => Ok(NcType::Float),
            6 => Ok(NcType::Double),
            other => Err(NetCdfError::InvalidFormat(format!(
                "unknown nc_type {}",
                other
            ))),
        }
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            NcType::Byte | NcType::Char => 1,
            NcType::Short => 2,
            NcType::Int | NcType::Float => 4,
            NcType::Double => 8,
        }
    }
}

impl From<NcType> for DataType {
    fn from(nc_type: NcType) -> Self {
        match nc_type {
            NcType::Byte => DataType::I8,
            NcType::Char => DataType::U8,
            NcType::Short => DataType::I16,
            NcType::Int => DataType::I32,
            NcType::Float => DataType::F32,
            NcType::Double => DataType::F64,
        }
    }
}

impl From<DataType> for NcType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::I8 => NcType::Byte,
            DataType::U8 => NcType::Char,
            DataType::I16 => NcType::Short,
            DataType::I32 => NcType::Int,
            DataType::F32 => NcType::Float,
            DataType::F64 => NcType::Double,
        }
    }
}

/// A homogeneous array of values, used for both attributes and variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Values {
    /// Text attribute value.
    pub fn text(s: impl AsRef<str>) -> Self {
        Values::Char(s.as_ref().as_bytes().to_vec())
    }

    pub fn nc_type(&self) -> NcType {
        match self {
            Values::Byte(_) => NcType::Byte,
            Values::Char(_) => NcType::Char,
            Values::Short(_) => NcType::Short,
            Values::Int(_) => NcType::Int,
            Values::Float(_) => NcType::Float,
            Values::Double(_) => NcType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Byte(v) => v.len(),
            Values::Char(v) => v.len(),
            Values::Short(v) => v.len(),
            Values::Int(v) => v.len(),
            Values::Float(v) => v.len(),
            Values::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Character data as a string, with trailing NUL padding removed.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Values::Char(v) => {
                let end = v.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Some(String::from_utf8_lossy(&v[..end]).into_owned())
            }
            _ => None,
        }
    }

    /// Numeric values widened to f64. Character data is rejected.
    pub fn to_f64_vec(&self) -> NetCdfResult<Vec<f64>> {
        Ok(match self {
            Values::Byte(v) => v.iter().map(|&x| x as f64).collect(),
            Values::Short(v) => v.iter().map(|&x| x as f64).collect(),
            Values::Int(v) => v.iter().map(|&x| x as f64).collect(),
            Values::Float(v) => v.iter().map(|&x| x as f64).collect(),
            Values::Double(v) => v.clone(),
            Values::Char(_) => {
                return Err(NetCdfError::InvalidFormat(
                    "character data is not numeric".to_string(),
                ))
            }
        })
    }

    /// Integer values widened to i64. Floating point data is truncated.
    pub fn to_i64_vec(&self) -> NetCdfResult<Vec<i64>> {
        Ok(match self {
            Values::Byte(v) => v.iter().map(|&x| x as i64).collect(),
            Values::Short(v) => v.iter().map(|&x| x as i64).collect(),
            Values::Int(v) => v.iter().map(|&x| x as i64).collect(),
            Values::Float(v) => v.iter().map(|&x| x as i64).collect(),
            Values::Double(v) => v.iter().map(|&x| x as i64).collect(),
            Values::Char(_) => {
                return Err(NetCdfError::InvalidFormat(
                    "character data is not numeric".to_string(),
                ))
            }
        })
    }

    /// First value as f64, for scalar attributes.
    pub fn first_f64(&self) -> Option<f64> {
        self.to_f64_vec().ok()?.first().copied()
    }
}

impl From<DataVector> for Values {
    fn from(data: DataVector) -> Self {
        match data {
            DataVector::I8(v) => Values::Byte(v),
            DataVector::U8(v) => Values::Char(v),
            DataVector::I16(v) => Values::Short(v),
            DataVector::I32(v) => Values::Int(v),
            DataVector::F32(v) => Values::Float(v),
            DataVector::F64(v) => Values::Double(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_strips_nul_padding() {
        let v = Values::Char(b"abc\0\0".to_vec());
        assert_eq!(v.as_text().as_deref(), Some("abc"));
    }

    #[test]
    fn test_char_maps_to_unsigned_bytes() {
        assert_eq!(DataType::from(NcType::Char), DataType::U8);
        assert_eq!(NcType::from(DataType::I8), NcType::Byte);
        assert_eq!(
            Values::from(DataVector::U8(b"ok".to_vec())).as_text().as_deref(),
            Some("ok")
        );
    }

    #[test]
    fn test_numeric_widening() {
        let v = Values::Short(vec![-2, 7]);
        assert_eq!(v.to_f64_vec().unwrap(), vec![-2.0, 7.0]);
        assert_eq!(v.to_i64_vec().unwrap(), vec![-2, 7]);
        assert!(Values::text("x").to_f64_vec().is_err());
    }
}
