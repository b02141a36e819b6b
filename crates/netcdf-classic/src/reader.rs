//! Dataset reader backed by the `netcdf3` decoder.

use std::path::Path;

use bytes::Bytes;
use netcdf3::{DataType, FileReader};
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::header;
use crate::types::{NcType, Values};

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    /// Current length; the record dimension reports the number of records
    pub len: usize,
    pub unlimited: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Values,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dim_ids: Vec<usize>,
    pub attributes: Vec<Attribute>,
    pub nc_type: NcType,
}

impl Variable {
    pub fn attribute(&self, name: &str) -> Option<&Values> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.values)
    }
}

/// A decoded dataset held in memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    version: u8,
    num_records: usize,
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
    variables: Vec<Variable>,
    /// Values of `variables[i]`
    data: Vec<Values>,
}

impl Dataset {
    pub fn open(path: impl AsRef<Path>) -> NetCdfResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), "Reading NetCDF file");
        let version = header::check(&data)?;
        Self::decode(path, version)
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> NetCdfResult<Self> {
        let data: Bytes = data.into();
        let version = header::check(&data)?;

        // The decoder reads from a path.
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dataset.nc");
        std::fs::write(&path, &data)?;
        Self::decode(&path, version)
    }

    fn decode(path: &Path, version: u8) -> NetCdfResult<Self> {
        let mut reader = FileReader::open(path).map_err(read_error)?;
        let data_set = reader.data_set();

        let dimensions: Vec<Dimension> = data_set
            .get_dims()
            .iter()
            .map(|d| Dimension {
                name: d.name().to_string(),
                len: d.size(),
                unlimited: d.is_unlimited(),
            })
            .collect();
        let num_records = dimensions
            .iter()
            .find(|d| d.unlimited)
            .map_or(0, |d| d.len);

        let attributes: Vec<Attribute> = data_set
            .get_global_attrs()
            .into_iter()
            .map(attribute)
            .collect();

        let mut variables = Vec::new();
        for var in data_set.get_vars() {
            let dim_ids = var
                .dim_names()
                .iter()
                .map(|dim| {
                    dimensions
                        .iter()
                        .position(|d| &d.name == dim)
                        .ok_or_else(|| {
                            NetCdfError::InvalidFormat(format!(
                                "variable '{}' references unknown dimension '{}'",
                                var.name(),
                                dim
                            ))
                        })
                })
                .collect::<NetCdfResult<Vec<_>>>()?;
            variables.push(Variable {
                name: var.name().to_string(),
                dim_ids,
                attributes: var.get_attrs().into_iter().map(attribute).collect(),
                nc_type: var.data_type().into(),
            });
        }

        let mut data = Vec::with_capacity(variables.len());
        for var in &variables {
            data.push(Values::from(reader.read_var(&var.name).map_err(read_error)?));
        }

        Ok(Self {
            version,
            num_records,
            dimensions,
            attributes,
            variables,
            data,
        })
    }

    /// 1 for CDF-1, 2 for the 64-bit offset variant.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimension(name).map(|d| d.len)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Values> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.values)
    }

    pub fn text_attribute(&self, name: &str) -> Option<String> {
        self.attribute(name).and_then(Values::as_text)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn shape(&self, name: &str) -> NetCdfResult<Vec<usize>> {
        let index = self.index(name)?;
        Ok(self.variables[index]
            .dim_ids
            .iter()
            .map(|&id| self.dimensions[id].len)
            .collect())
    }

    /// All values of a variable in row-major order.
    pub fn values(&self, name: &str) -> NetCdfResult<Values> {
        let index = self.index(name)?;
        Ok(self.data[index].clone())
    }

    fn index(&self, name: &str) -> NetCdfResult<usize> {
        self.variables
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| NetCdfError::MissingData(format!("variable '{}'", name)))
    }
}

fn attribute(attr: &netcdf3::Attribute) -> Attribute {
    let values = match attr.data_type() {
        DataType::I8 => Values::Byte(attr.get_i8().unwrap_or_default().to_vec()),
        DataType::U8 => Values::Char(attr.get_u8().unwrap_or_default().to_vec()),
        DataType::I16 => Values::Short(attr.get_i16().unwrap_or_default().to_vec()),
        DataType::I32 => Values::Int(attr.get_i32().unwrap_or_default().to_vec()),
        DataType::F32 => Values::Float(attr.get_f32().unwrap_or_default().to_vec()),
        DataType::F64 => Values::Double(attr.get_f64().unwrap_or_default().to_vec()),
    };
    Attribute {
        name: attr.name().to_string(),
        values,
    }
}

fn read_error<E: std::fmt::Debug>(e: E) -> NetCdfError {
    NetCdfError::InvalidFormat(format!("Failed to read NetCDF: {:?}", e))
}
