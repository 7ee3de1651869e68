use std::fmt;

use crate::errors::Error;

/// Maximum number of fields a metric can declare.
pub const MAX_FIELDS: usize = 7;

/// Type of the values a field accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// String values.
    String,
    /// Integer values. Booleans are accepted and stored as `0` or `1`.
    Int,
    /// Boolean values.
    Bool,
}

impl FieldType {
    fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "integer",
            FieldType::Bool => "boolean",
        }
    }
}

/// A typed, named dimension of a metric.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    name: String,
    ty: FieldType,
}

impl Field {
    /// Creates a string field.
    pub fn string<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), ty: FieldType::String }
    }

    /// Creates an integer field.
    pub fn int<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), ty: FieldType::Int }
    }

    /// Creates a boolean field.
    pub fn bool<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), ty: FieldType::Bool }
    }

    /// Name of the field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the field.
    pub fn field_type(&self) -> FieldType {
        self.ty
    }

    /// Checks that `value` is acceptable for this field, returning its normalized form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFieldType`] if the value does not have the field's type.
    pub fn validate_value(&self, metric: &str, value: FieldValue) -> Result<FieldValue, Error> {
        match (self.ty, value) {
            (FieldType::String, value @ FieldValue::Str(_)) => Ok(value),
            (FieldType::Int, value @ FieldValue::Int(_)) => Ok(value),
            (FieldType::Int, FieldValue::Bool(b)) => Ok(FieldValue::Int(i64::from(b))),
            (FieldType::Bool, value @ FieldValue::Bool(_)) => Ok(value),
            (ty, value) => Err(Error::InvalidFieldType {
                metric: metric.to_string(),
                field: self.name.clone(),
                expected: ty.as_str(),
                value,
            }),
        }
    }
}

/// Returns `true` if `name` is a valid field name.
///
/// Field names are non-empty, made of ASCII letters, digits and underscores, and are not purely numeric.
pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().all(|c| c.is_ascii_digit())
}

/// A field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldValue {
    /// A string value.
    Str(String),
    /// An integer value.
    Int(i64),
    /// A boolean value.
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{s:?}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

/// Field values in the order their fields were declared.
///
/// Together with a metric name this identifies one time series.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldTuple(Vec<FieldValue>);

impl FieldTuple {
    /// Creates a `FieldTuple` from values that are already in declaration order.
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    /// The tuple of a metric without fields.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Field values, in declaration order.
    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The ordered, validated list of fields of a metric.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSpec {
    fields: Vec<Field>,
}

impl FieldSpec {
    /// Creates a `FieldSpec` for `metric`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TooManyFields`] if more than [`MAX_FIELDS`] fields are given, and with
    /// [`Error::MetricDefinition`] if a field name is invalid or appears twice.
    pub fn new(metric: &str, fields: Vec<Field>) -> Result<Self, Error> {
        if fields.len() > MAX_FIELDS {
            return Err(Error::TooManyFields {
                metric: metric.to_string(),
                fields: fields.into_iter().map(|f| f.name).collect(),
                limit: MAX_FIELDS,
            });
        }

        for (i, field) in fields.iter().enumerate() {
            if !is_valid_field_name(&field.name) {
                return Err(Error::definition(metric, format!("invalid field name '{}'", field.name)));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::definition(metric, format!("duplicate field name '{}'", field.name)));
            }
        }

        Ok(Self { fields })
    }

    /// Fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Names of the fields, in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the metric has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates `values` and puts them into declaration order.
    ///
    /// The order of `values` does not matter: the same set of pairs always produces the same tuple.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::WrongFields`] if the names do not match the spec exactly, and with
    /// [`Error::InvalidFieldType`] if a value has the wrong type.
    pub fn normalize(&self, metric: &str, values: Vec<(String, FieldValue)>) -> Result<FieldTuple, Error> {
        let wrong_fields = |values: &[(String, FieldValue)]| Error::WrongFields {
            metric: metric.to_string(),
            expected: self.names(),
            got: values.iter().map(|(name, _)| name.clone()).collect(),
        };

        if values.len() != self.fields.len() {
            return Err(wrong_fields(&values));
        }

        let mut slots: Vec<Option<FieldValue>> = vec![None; self.fields.len()];
        for (name, value) in &values {
            let Some(index) = self.fields.iter().position(|f| f.name == *name) else {
                return Err(wrong_fields(&values));
            };
            if slots[index].is_some() {
                return Err(wrong_fields(&values));
            }
            slots[index] = Some(value.clone());
        }

        self.fields
            .iter()
            .zip(slots)
            .map(|(field, value)| match value {
                Some(value) => field.validate_value(metric, value),
                None => Err(wrong_fields(&values)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldTuple)
    }

    /// Pairs each value of `tuple` with the field it belongs to.
    pub fn zip<'a>(&'a self, tuple: &'a FieldTuple) -> impl Iterator<Item = (&'a Field, &'a FieldValue)> + 'a {
        self.fields.iter().zip(tuple.values())
    }
}

/// A value which can be converted into a list of named field values.
pub trait IntoFields {
    /// Consumes this value, turning it into `(name, value)` pairs.
    fn into_fields(self) -> Vec<(String, FieldValue)>;
}

impl IntoFields for () {
    fn into_fields(self) -> Vec<(String, FieldValue)> {
        Vec::new()
    }
}

impl<K, V> IntoFields for Vec<(K, V)>
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn into_fields(self) -> Vec<(String, FieldValue)> {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl<K, V, const N: usize> IntoFields for [(K, V); N]
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn into_fields(self) -> Vec<(String, FieldValue)> {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

impl<K, V> IntoFields for &[(K, V)]
where
    K: Clone + Into<String>,
    V: Clone + Into<FieldValue>,
{
    fn into_fields(self) -> Vec<(String, FieldValue)> {
        self.iter().map(|(k, v)| (k.clone().into(), v.clone().into())).collect()
    }
}
