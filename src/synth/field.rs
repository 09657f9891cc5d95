/// A tagged trigger-parameter value carried by synth events.
///
/// Sequence files store fields as either bare floats or double-quoted
/// strings; the variant chosen at construction is fixed for the lifetime
/// of the value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParameterField {
    Float(f32),
    Str(String),
}

/// Discriminant of a [`ParameterField`], used for schema checks and
/// error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Str,
}

impl ParameterField {
    pub fn kind(&self) -> FieldKind {
        match self {
            ParameterField::Float(_) => FieldKind::Float,
            ParameterField::Str(_) => FieldKind::Str,
        }
    }

    /// Read the float variant, failing if this field holds a string.
    pub fn as_float(&self) -> Result<f32, FieldError> {
        match self {
            ParameterField::Float(v) => Ok(*v),
            ParameterField::Str(_) => Err(FieldError::TypeMismatch {
                expected: FieldKind::Float,
                found: FieldKind::Str,
            }),
        }
    }

    /// Read the string variant, failing if this field holds a float.
    pub fn as_str(&self) -> Result<&str, FieldError> {
        match self {
            ParameterField::Str(s) => Ok(s),
            ParameterField::Float(_) => Err(FieldError::TypeMismatch {
                expected: FieldKind::Str,
                found: FieldKind::Float,
            }),
        }
    }
}

impl From<f32> for ParameterField {
    fn from(v: f32) -> Self {
        ParameterField::Float(v)
    }
}

impl From<&str> for ParameterField {
    fn from(s: &str) -> Self {
        ParameterField::Str(s.to_owned())
    }
}

impl From<String> for ParameterField {
    fn from(s: String) -> Self {
        ParameterField::Str(s)
    }
}

/// Errors from reading a [`ParameterField`] as the wrong variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    TypeMismatch { expected: FieldKind, found: FieldKind },
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::TypeMismatch { expected, found } => {
                write!(
                    f,
                    "parameter field type mismatch: expected {:?}, found {:?}",
                    expected, found
                )
            }
        }
    }
}

impl std::error::Error for FieldError {}
