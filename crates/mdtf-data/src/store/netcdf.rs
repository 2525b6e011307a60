//! NetCDF backend.
//!
//! Numeric variables are read and written as `f64`; character and string
//! variables keep their attributes but carry no values. Every dimension is
//! written as fixed-length, including time.

use std::path::Path;

use indexmap::IndexMap;
use netcdf::AttributeValue;
use tracing::debug;

use super::{DatasetStore, Result, StoreError};
use crate::dataset::{AttrValue, Dataset, IntWidth, Variable};

#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfStore;

impl NetcdfStore {
    fn load(&self, path: &Path, with_data: bool) -> Result<Dataset> {
        if !path.exists() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let file = netcdf::open(path).map_err(|e| StoreError::format(path, e))?;

        let mut ds = Dataset::new();
        for dim in file.dimensions() {
            ds.dims.insert(dim.name(), dim.len());
        }
        for attr in file.attributes() {
            if let Some(value) = convert_attr(attr.value().ok()) {
                ds.attrs.insert(attr.name().to_string(), value);
            }
        }

        for var in file.variables() {
            let name = var.name();
            let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
            let mut attrs = IndexMap::new();
            for attr in var.attributes() {
                if let Some(value) = convert_attr(attr.value().ok()) {
                    attrs.insert(attr.name().to_string(), value);
                }
            }
            let mut variable = Variable {
                name: name.clone(),
                dims,
                attrs,
                data: None,
            };
            let is_coordinate = is_coordinate_name(&name, &variable.dims);
            if with_data || is_coordinate {
                match var.get_values::<f64, _>(..) {
                    Ok(values) => variable.data = Some(values),
                    Err(e) => debug!(path = %path.display(), var = %name, "skipping values: {e}"),
                }
            }
            ds.variables.insert(name, variable);
        }
        Ok(ds)
    }
}

fn is_coordinate_name(name: &str, dims: &[String]) -> bool {
    mdtf_foundation::COORDINATE_VARIABLES.contains(&name) || dims.iter().any(|d| d == name)
}

fn convert_attr(value: Option<AttributeValue>) -> Option<AttrValue> {
    use IntWidth::*;

    let signed = |width, v: Vec<i64>| AttrValue::Signed(width, v);
    let unsigned = |width, v: Vec<u64>| AttrValue::Unsigned(width, v);
    let converted = match value? {
        AttributeValue::Str(s) => AttrValue::Text(s),
        AttributeValue::Strs(v) => AttrValue::Texts(v),
        AttributeValue::Double(x) => AttrValue::Number(x),
        AttributeValue::Doubles(v) => AttrValue::Numbers(v),
        AttributeValue::Float(x) => AttrValue::Floats(vec![x]),
        AttributeValue::Floats(v) => AttrValue::Floats(v),
        AttributeValue::Schar(x) => signed(W8, vec![x.into()]),
        AttributeValue::Schars(v) => signed(W8, v.into_iter().map(i64::from).collect()),
        AttributeValue::Short(x) => signed(W16, vec![x.into()]),
        AttributeValue::Shorts(v) => signed(W16, v.into_iter().map(i64::from).collect()),
        AttributeValue::Int(x) => signed(W32, vec![x.into()]),
        AttributeValue::Ints(v) => signed(W32, v.into_iter().map(i64::from).collect()),
        AttributeValue::Longlong(x) => signed(W64, vec![x]),
        AttributeValue::Longlongs(v) => signed(W64, v),
        AttributeValue::Uchar(x) => unsigned(W8, vec![x.into()]),
        AttributeValue::Uchars(v) => unsigned(W8, v.into_iter().map(u64::from).collect()),
        AttributeValue::Ushort(x) => unsigned(W16, vec![x.into()]),
        AttributeValue::Ushorts(v) => unsigned(W16, v.into_iter().map(u64::from).collect()),
        AttributeValue::Uint(x) => unsigned(W32, vec![x.into()]),
        AttributeValue::Uints(v) => unsigned(W32, v.into_iter().map(u64::from).collect()),
        AttributeValue::Ulonglong(x) => unsigned(W64, vec![x]),
        AttributeValue::Ulonglongs(v) => unsigned(W64, v),
    };
    Some(converted)
}

fn narrow<T: TryFrom<i64>>(values: &[i64]) -> std::result::Result<Vec<T>, String> {
    values
        .iter()
        .map(|v| T::try_from(*v).map_err(|_| format!("{v} does not fit the attribute type")))
        .collect()
}

fn narrow_unsigned<T: TryFrom<u64>>(values: &[u64]) -> std::result::Result<Vec<T>, String> {
    values
        .iter()
        .map(|v| T::try_from(*v).map_err(|_| format!("{v} does not fit the attribute type")))
        .collect()
}

/// Inverse of [`convert_attr`].
fn to_netcdf(value: &AttrValue) -> std::result::Result<AttributeValue, String> {
    use IntWidth::*;

    Ok(match value {
        AttrValue::Text(s) => AttributeValue::Str(s.clone()),
        AttrValue::Texts(v) => AttributeValue::Strs(v.clone()),
        AttrValue::Number(x) => AttributeValue::Double(*x),
        AttrValue::Numbers(v) => AttributeValue::Doubles(v.clone()),
        AttrValue::Floats(v) => AttributeValue::Floats(v.clone()),
        AttrValue::Signed(W8, v) => AttributeValue::Schars(narrow(v)?),
        AttrValue::Signed(W16, v) => AttributeValue::Shorts(narrow(v)?),
        AttrValue::Signed(W32, v) => AttributeValue::Ints(narrow(v)?),
        AttrValue::Signed(W64, v) => AttributeValue::Longlongs(v.clone()),
        AttrValue::Unsigned(W8, v) => AttributeValue::Uchars(narrow_unsigned(v)?),
        AttrValue::Unsigned(W16, v) => AttributeValue::Ushorts(narrow_unsigned(v)?),
        AttrValue::Unsigned(W32, v) => AttributeValue::Uints(narrow_unsigned(v)?),
        AttrValue::Unsigned(W64, v) => AttributeValue::Ulonglongs(v.clone()),
    })
}

impl DatasetStore for NetcdfStore {
    fn read_header(&self, path: &Path) -> Result<Dataset> {
        self.load(path, false)
    }

    fn read(&self, path: &Path) -> Result<Dataset> {
        self.load(path, true)
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let err = |e: netcdf::Error| StoreError::format(path, e);
        let mut file = netcdf::create(path).map_err(err)?;

        for (name, value) in &dataset.attrs {
            let value = to_netcdf(value).map_err(|m| StoreError::format(path, format!("{name}: {m}")))?;
            file.add_attribute(name, value).map_err(err)?;
        }
        for (name, len) in &dataset.dims {
            file.add_dimension(name, *len).map_err(err)?;
        }

        for variable in dataset.variables.values() {
            let dims: Vec<&str> = variable.dims.iter().map(String::as_str).collect();
            let mut var = file
                .add_variable::<f64>(&variable.name, &dims)
                .map_err(err)?;
            for (key, value) in &variable.attrs {
                let value = to_netcdf(value)
                    .map_err(|m| StoreError::format(path, format!("{}:{key}: {m}", variable.name)))?;
                var.put_attribute(key, value).map_err(err)?;
            }
            if let Some(values) = &variable.data {
                var.put_values(values, ..).map_err(err)?;
            }
        }
        Ok(())
    }
}
