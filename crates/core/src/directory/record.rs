//! Raw directory records as returned by a lookup backend.

/// A field value: directories hand back either a scalar or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    /// The first value, `None` for an empty list.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(v) => Some(v.as_str()),
            Self::Many(vs) => vs.first().map(String::as_str),
        }
    }

    /// All values; a scalar counts as a one-element list.
    pub fn values(&self) -> &[String] {
        match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::One(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::One(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(mut vs: Vec<String>) -> Self {
        if vs.len() == 1 {
            Self::One(vs.remove(0))
        } else {
            Self::Many(vs)
        }
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(vs: Vec<&str>) -> Self {
        vs.into_iter().map(str::to_string).collect::<Vec<_>>().into()
    }
}

/// One directory entry: field name to value(s), in backend order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Distinguished name or other backend-specific key, if any.
    pub id: Option<String>,
    fields: Vec<(String, FieldValue)>,
}

impl DirectoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty record carrying a backend key such as an LDAP DN.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            fields: Vec::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set `field`. Replacing an existing field keeps its position.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// First value of `field`.
    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::first)
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
