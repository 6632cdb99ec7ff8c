//! Small helpers for moving variables and attributes between netCDF files.
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    AttributeValue, Extents, NcTypeDescriptor,
};

/// Wrapper around unsigned bytes to represent a netCDF character type
///
/// In netCDF v0.11, i8 and u8 are not considered equivalent to an NC_CHAR type,
/// so grid-mapping variables stored as characters need this to be read.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NcChar(u8);

unsafe impl NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

/// The flattened values of a netCDF variable, in the variable's own type.
/// It is best created by reading from a netCDF variable with its `get_from`
/// method, and written back out (possibly to another file) with `put_to`.
#[derive(Debug, Clone, PartialEq)]
pub enum NcArray {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Char(Vec<NcChar>),
}

impl NcArray {
    /// Retrieve data from a netCDF variable and construct the appropriate variant.
    ///
    /// Compound, opaque, enum, variable length, and string types are rejected
    /// with an error; none of them occur in topo or collection files.
    pub fn get_from(var: &netcdf::Variable) -> netcdf::Result<Self> {
        let arr = match var.vartype() {
            NcVariableType::Int(IntType::I8) => Self::I8(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::I16) => Self::I16(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::I32) => Self::I32(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::I64) => Self::I64(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::U8) => Self::U8(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::U16) => Self::U16(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::U32) => Self::U32(var.get_values(Extents::All)?),
            NcVariableType::Int(IntType::U64) => Self::U64(var.get_values(Extents::All)?),
            NcVariableType::Float(FloatType::F32) => Self::F32(var.get_values(Extents::All)?),
            NcVariableType::Float(FloatType::F64) => Self::F64(var.get_values(Extents::All)?),
            NcVariableType::Char => Self::Char(var.get_values(Extents::All)?),
            other => {
                return Err(netcdf::Error::Str(format!(
                    "cannot copy variable '{}' with type {other:?}",
                    var.name()
                )))
            }
        };
        Ok(arr)
    }

    /// Create a variable in `file` and write this data to it. Attributes from
    /// `attrs` are written before the data so that `_FillValue` can be included.
    pub fn put_to(
        &self,
        file: &mut netcdf::FileMut,
        name: &str,
        dims: &[&str],
        attrs: &[(String, AttributeValue)],
    ) -> netcdf::Result<()> {
        macro_rules! put {
            ($t:ty, $values:expr) => {{
                let mut var = file.add_variable::<$t>(name, dims)?;
                for (attr_name, value) in attrs {
                    var.put_attribute(attr_name, value.clone())?;
                }
                if !$values.is_empty() {
                    var.put_values($values.as_slice(), Extents::All)?;
                }
            }};
        }

        match self {
            NcArray::I8(v) => put!(i8, v),
            NcArray::I16(v) => put!(i16, v),
            NcArray::I32(v) => put!(i32, v),
            NcArray::I64(v) => put!(i64, v),
            NcArray::U8(v) => put!(u8, v),
            NcArray::U16(v) => put!(u16, v),
            NcArray::U32(v) => put!(u32, v),
            NcArray::U64(v) => put!(u64, v),
            NcArray::F32(v) => put!(f32, v),
            NcArray::F64(v) => put!(f64, v),
            NcArray::Char(v) => put!(NcChar, v),
        }
        Ok(())
    }
}

/// Read all attributes of a variable as name/value pairs, in file order.
pub fn variable_attributes(
    var: &netcdf::Variable,
) -> netcdf::Result<Vec<(String, AttributeValue)>> {
    var.attributes()
        .map(|attr| Ok((attr.name().to_string(), attr.value()?)))
        .collect()
}

/// Copy the variable `name` (data, dimensions, and attributes) from `src` to `dst`.
///
/// Any of the variable's dimensions missing in `dst` are created with the same
/// length as in `src`.
pub fn copy_variable(
    src: &netcdf::File,
    dst: &mut netcdf::FileMut,
    name: &str,
) -> netcdf::Result<()> {
    let var = src
        .variable(name)
        .ok_or_else(|| netcdf::Error::NotFound(format!("variable '{name}'")))?;

    let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    for dim in var.dimensions() {
        if dst.dimension(&dim.name()).is_none() {
            dst.add_dimension(&dim.name(), dim.len())?;
        }
    }

    let data = NcArray::get_from(&var)?;
    let attrs = variable_attributes(&var)?;
    let dims: Vec<&str> = dim_names.iter().map(|s| s.as_str()).collect();
    data.put_to(dst, name, &dims, &attrs)
}

/// Copy every global attribute of `src` onto `dst`.
pub fn copy_global_attributes(src: &netcdf::File, dst: &mut netcdf::FileMut) -> netcdf::Result<()> {
    for attr in src.attributes() {
        dst.add_attribute(attr.name(), attr.value()?)?;
    }
    Ok(())
}

/// Interpret an attribute value as a single string, if it is one.
pub fn attr_as_string(value: &AttributeValue) -> Option<&str> {
    match value {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(items) if items.len() == 1 => Some(&items[0]),
        _ => None,
    }
}

/// Interpret an attribute value as a single number, if it is one.
pub fn attr_as_f64(value: &AttributeValue) -> Option<f64> {
    let v = match value {
        AttributeValue::Uchar(v) => *v as f64,
        AttributeValue::Schar(v) => *v as f64,
        AttributeValue::Ushort(v) => *v as f64,
        AttributeValue::Short(v) => *v as f64,
        AttributeValue::Uint(v) => *v as f64,
        AttributeValue::Int(v) => *v as f64,
        AttributeValue::Ulonglong(v) => *v as f64,
        AttributeValue::Longlong(v) => *v as f64,
        AttributeValue::Float(v) => *v as f64,
        AttributeValue::Double(v) => *v,
        AttributeValue::Floats(v) if v.len() == 1 => v[0] as f64,
        AttributeValue::Doubles(v) if v.len() == 1 => v[0],
        _ => return None,
    };
    Some(v)
}

/// Get a string attribute from a variable, `None` if it is absent or not a string.
pub fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    let value = var.attribute(name)?.value().ok()?;
    attr_as_string(&value).map(|s| s.to_string())
}

/// Get a string global attribute, `None` if it is absent or not a string.
pub fn global_string_attribute(file: &netcdf::File, name: &str) -> Option<String> {
    let value = file.attribute(name)?.value().ok()?;
    attr_as_string(&value).map(|s| s.to_string())
}

/// The `history` global attribute recorded in every file this crate creates.
pub fn history_attribute() -> String {
    format!("Created using Basin Setup v{}", env!("CARGO_PKG_VERSION"))
}

/// Read a whole variable as 64-bit floats, converting from its stored type.
pub fn read_f64_values(file: &netcdf::File, name: &str) -> netcdf::Result<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| netcdf::Error::NotFound(format!("variable '{name}'")))?;
    var.get_values::<f64, _>(Extents::All)
}
