//! View keys and logical table references.
//!
//! A [`ViewKey`] is the identity of a managed view: a schema followed by one
//! or more name parts. Nested name parts are flattened with
//! [`NAME_SEPARATOR`] when the key is turned into a table reference, so
//! `("core", "sales", "orders")` is stored as `core.sales__orders`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used to flatten nested name parts into a single table name
pub const NAME_SEPARATOR: &str = "__";

/// Hierarchical identifier of a view: `[schema, name, ...]`
///
/// Serialized as its canonical dotted string and validated on the way back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewKey(Vec<String>);

impl ViewKey {
    /// Build a key from its parts
    ///
    /// # Errors
    ///
    /// Returns error if there are fewer than two parts or a part is not an
    /// identifier
    pub fn new<I, S>(parts: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.len() < 2 {
            return Err(CoreError::InvalidKey {
                reason: format!("expected a schema and a name, got {:?}", parts),
            });
        }
        for part in &parts {
            check_identifier(part)?;
        }
        Ok(Self(parts))
    }

    /// Parse the canonical dotted form, e.g. `core.sales.orders`
    ///
    /// # Errors
    ///
    /// Returns error if the string is not a valid key
    pub fn parse(canonical: &str) -> CoreResult<Self> {
        Self::new(canonical.split('.'))
    }

    /// Parse a logical table reference, e.g. `core.sales__orders`
    ///
    /// Every dotted segment after the first is unflattened on
    /// [`NAME_SEPARATOR`]. References with extra qualifiers (such as
    /// `project.dataset.table`) still produce a key; such keys are simply
    /// never managed by a graph.
    ///
    /// # Errors
    ///
    /// Returns error if the reference is unqualified or has an empty or
    /// non-identifier segment
    pub fn from_table_reference(reference: &str) -> CoreResult<Self> {
        let mut segments = reference.split('.');
        let schema = segments.next().unwrap_or_default();
        let mut parts = vec![schema.to_string()];
        for segment in segments {
            check_identifier(segment)?;
            parts.extend(segment.split(NAME_SEPARATOR).map(str::to_string));
        }
        Self::new(parts).map_err(|err| CoreError::InvalidKey {
            reason: format!("bad table reference {:?}: {}", reference, err),
        })
    }

    /// The schema (first part)
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.0[0]
    }

    /// The name parts after the schema
    #[must_use]
    pub fn name_parts(&self) -> &[String] {
        &self.0[1..]
    }

    /// The flattened table name, e.g. `sales__orders`
    #[must_use]
    pub fn name(&self) -> String {
        self.name_parts().join(NAME_SEPARATOR)
    }

    /// The logical table reference, e.g. `core.sales__orders`
    #[must_use]
    pub fn table_reference(&self) -> String {
        format!("{}.{}", self.schema(), self.name())
    }

    /// All parts, schema first
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for ViewKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ViewKey {
    type Error = CoreError;

    fn try_from(canonical: String) -> Result<Self, Self::Error> {
        Self::parse(&canonical)
    }
}

impl From<ViewKey> for String {
    fn from(key: ViewKey) -> Self {
        key.to_string()
    }
}

fn check_identifier(part: &str) -> CoreResult<()> {
    let valid = !part.is_empty()
        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidKey {
            reason: format!("{:?} is not an identifier", part),
        })
    }
}
