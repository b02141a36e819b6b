//! Dataset definition and deterministic encoding.
//!
//! The builder validates names and shapes up front, then hands the whole
//! definition to the `netcdf3` writer in one pass. Fixed variables and
//! records are written in definition order with zero padding, so the same
//! definition always encodes to the same bytes.

use netcdf3::{DataSet, FileWriter, Version};
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::types::Values;

#[derive(Debug, Clone)]
struct DimensionDef {
    name: String,
    /// None marks the unlimited (record) dimension
    len: Option<usize>,
}

#[derive(Debug, Clone)]
struct VariableDef {
    name: String,
    dims: Vec<usize>,
    attributes: Vec<(String, Values)>,
    values: Values,
}

/// Builds a NetCDF dataset in memory and encodes it.
#[derive(Debug, Clone, Default)]
pub struct DatasetBuilder {
    dims: Vec<DimensionDef>,
    attributes: Vec<(String, Values)>,
    variables: Vec<VariableDef>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed-length dimension.
    pub fn add_dimension(&mut self, name: &str, len: usize) -> NetCdfResult<&mut Self> {
        if len == 0 {
            return Err(NetCdfError::InvalidDefinition(format!(
                "dimension '{}' must have a positive length",
                name
            )));
        }
        self.push_dimension(name, Some(len))
    }

    /// Add the record dimension. At most one is allowed.
    pub fn add_unlimited_dimension(&mut self, name: &str) -> NetCdfResult<&mut Self> {
        if self.dims.iter().any(|d| d.len.is_none()) {
            return Err(NetCdfError::InvalidDefinition(
                "only one unlimited dimension is allowed".to_string(),
            ));
        }
        self.push_dimension(name, None)
    }

    fn push_dimension(&mut self, name: &str, len: Option<usize>) -> NetCdfResult<&mut Self> {
        if self.dims.iter().any(|d| d.name == name) {
            return Err(NetCdfError::InvalidDefinition(format!(
                "duplicate dimension '{}'",
                name
            )));
        }
        self.dims.push(DimensionDef {
            name: name.to_string(),
            len,
        });
        Ok(self)
    }

    /// Add a global attribute. A later attribute with the same name replaces the earlier one.
    pub fn add_attribute(&mut self, name: &str, values: Values) -> &mut Self {
        upsert(&mut self.attributes, name, values);
        self
    }

    /// Add a variable over the named dimensions (empty for a scalar).
    pub fn add_variable(
        &mut self,
        name: &str,
        dims: &[&str],
        values: Values,
    ) -> NetCdfResult<&mut Self> {
        if self.variables.iter().any(|v| v.name == name) {
            return Err(NetCdfError::InvalidDefinition(format!(
                "duplicate variable '{}'",
                name
            )));
        }

        let mut dim_ids = Vec::with_capacity(dims.len());
        for (position, dim_name) in dims.iter().enumerate() {
            let id = self
                .dims
                .iter()
                .position(|d| d.name == *dim_name)
                .ok_or_else(|| NetCdfError::MissingData(format!("dimension '{}'", dim_name)))?;
            if self.dims[id].len.is_none() && position != 0 {
                return Err(NetCdfError::InvalidDefinition(format!(
                    "record dimension must come first in variable '{}'",
                    name
                )));
            }
            dim_ids.push(id);
        }

        self.variables.push(VariableDef {
            name: name.to_string(),
            dims: dim_ids,
            attributes: Vec::new(),
            values,
        });
        Ok(self)
    }

    pub fn add_variable_attribute(
        &mut self,
        variable: &str,
        name: &str,
        values: Values,
    ) -> NetCdfResult<&mut Self> {
        let var = self
            .variables
            .iter_mut()
            .find(|v| v.name == variable)
            .ok_or_else(|| NetCdfError::MissingData(format!("variable '{}'", variable)))?;
        upsert(&mut var.attributes, name, values);
        Ok(self)
    }

    /// Encode the dataset.
    pub fn encode(&self) -> NetCdfResult<Vec<u8>> {
        let (numrecs, data_bytes) = self.validate()?;

        let mut data_set = DataSet::new();
        for dim in &self.dims {
            match dim.len {
                Some(len) => data_set.add_fixed_dim(&dim.name, len),
                None => data_set.set_unlimited_dim(&dim.name, numrecs),
            }
            .map_err(definition_error)?;
        }
        for (name, values) in &self.attributes {
            add_global_attribute(&mut data_set, name, values)?;
        }
        for var in &self.variables {
            let dims: Vec<&str> = var
                .dims
                .iter()
                .map(|&id| self.dims[id].name.as_str())
                .collect();
            add_variable(&mut data_set, &var.name, &dims, &var.values)?;
            for (name, values) in &var.attributes {
                add_variable_attribute(&mut data_set, &var.name, name, values)?;
            }
        }

        let version = if data_bytes > i32::MAX as u64 {
            Version::Offset64Bit
        } else {
            Version::Classic
        };

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dataset.nc");
        let mut writer = FileWriter::open(&path).map_err(write_error)?;
        writer.set_def(&data_set, version, 0).map_err(write_error)?;
        for var in &self.variables {
            write_values(&mut writer, &var.name, &var.values)?;
        }
        writer.close().map_err(write_error)?;

        let out = std::fs::read(&path)?;
        debug!(
            records = numrecs,
            bytes = out.len(),
            "Encoded NetCDF dataset"
        );
        Ok(out)
    }

    /// Check every variable against its dimensions. Returns the number of
    /// records and the size of the data section.
    fn validate(&self) -> NetCdfResult<(usize, u64)> {
        let mut numrecs: Option<usize> = None;
        let mut data_bytes = 0u64;

        for var in &self.variables {
            let is_record = var
                .dims
                .first()
                .map_or(false, |&id| self.dims[id].len.is_none());
            let fixed_dims = if is_record { &var.dims[1..] } else { &var.dims[..] };
            let elements: usize = fixed_dims
                .iter()
                .map(|&id| self.dims[id].len.unwrap_or(0))
                .product();
            let actual = var.values.len();

            if is_record {
                if elements == 0 || actual % elements != 0 {
                    return Err(NetCdfError::ShapeMismatch {
                        name: var.name.clone(),
                        expected: elements * numrecs.unwrap_or(1),
                        actual,
                    });
                }
                let records = actual / elements;
                match numrecs {
                    Some(n) if n != records => {
                        return Err(NetCdfError::ShapeMismatch {
                            name: var.name.clone(),
                            expected: n * elements,
                            actual,
                        })
                    }
                    _ => numrecs = Some(records),
                }
            } else if actual != elements {
                return Err(NetCdfError::ShapeMismatch {
                    name: var.name.clone(),
                    expected: elements,
                    actual,
                });
            }

            data_bytes += (actual * var.values.nc_type().size()) as u64;
        }

        Ok((numrecs.unwrap_or(0), data_bytes))
    }
}

fn upsert(list: &mut Vec<(String, Values)>, name: &str, values: Values) {
    match list.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = values,
        None => list.push((name.to_string(), values)),
    }
}

fn add_variable(
    data_set: &mut DataSet,
    name: &str,
    dims: &[&str],
    values: &Values,
) -> NetCdfResult<()> {
    match values {
        Values::Byte(_) => data_set.add_var_i8(name, dims),
        Values::Char(_) => data_set.add_var_u8(name, dims),
        Values::Short(_) => data_set.add_var_i16(name, dims),
        Values::Int(_) => data_set.add_var_i32(name, dims),
        Values::Float(_) => data_set.add_var_f32(name, dims),
        Values::Double(_) => data_set.add_var_f64(name, dims),
    }
    .map_err(definition_error)
}

fn add_global_attribute(data_set: &mut DataSet, name: &str, values: &Values) -> NetCdfResult<()> {
    match values.clone() {
        Values::Byte(v) => data_set.add_global_attr_i8(name, v),
        Values::Char(v) => data_set.add_global_attr_u8(name, v),
        Values::Short(v) => data_set.add_global_attr_i16(name, v),
        Values::Int(v) => data_set.add_global_attr_i32(name, v),
        Values::Float(v) => data_set.add_global_attr_f32(name, v),
        Values::Double(v) => data_set.add_global_attr_f64(name, v),
    }
    .map_err(definition_error)
}

fn add_variable_attribute(
    data_set: &mut DataSet,
    variable: &str,
    name: &str,
    values: &Values,
) -> NetCdfResult<()> {
    match values.clone() {
        Values::Byte(v) => data_set.add_var_attr_i8(variable, name, v),
        Values::Char(v) => data_set.add_var_attr_u8(variable, name, v),
        Values::Short(v) => data_set.add_var_attr_i16(variable, name, v),
        Values::Int(v) => data_set.add_var_attr_i32(variable, name, v),
        Values::Float(v) => data_set.add_var_attr_f32(variable, name, v),
        Values::Double(v) => data_set.add_var_attr_f64(variable, name, v),
    }
    .map_err(definition_error)
}

fn write_values(writer: &mut FileWriter, name: &str, values: &Values) -> NetCdfResult<()> {
    match values {
        Values::Byte(v) => writer.write_var_i8(name, v),
        Values::Char(v) => writer.write_var_u8(name, v),
        Values::Short(v) => writer.write_var_i16(name, v),
        Values::Int(v) => writer.write_var_i32(name, v),
        Values::Float(v) => writer.write_var_f32(name, v),
        Values::Double(v) => writer.write_var_f64(name, v),
    }
    .map_err(write_error)
}

fn definition_error<E: std::fmt::Debug>(e: E) -> NetCdfError {
    NetCdfError::InvalidDefinition(format!("{:?}", e))
}

fn write_error<E: std::fmt::Debug>(e: E) -> NetCdfError {
    NetCdfError::InvalidFormat(format!("Failed to write NetCDF: {:?}", e))
}
