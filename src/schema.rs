//! Table identity, declared field schema, and key conditions

use std::collections::BTreeSet;
use std::sync::Arc;

/// Identity and schema of one logical table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TableInfo {
    pub name: String,
    /// The primary-key field name. Writes always stamp it with the row key.
    pub primary_key: String,
    /// Declared value fields. A write carrying any other field is rejected.
    pub fields: Vec<String>,
    /// Whether this table's content participates in the consensus hash.
    /// Non-participating tables report the zero hash.
    pub enable_consensus: bool,
    /// Subset of fields that feed the row hash; `None` means every declared
    /// field plus the primary key. Lets administrative fields stay out of
    /// the commitment.
    pub hash_fields: Option<BTreeSet<String>>,
}

impl TableInfo {
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        fields: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            primary_key: primary_key.into(),
            fields,
            enable_consensus: true,
            hash_fields: None,
        })
    }

    pub fn with_consensus(mut self, enable: bool) -> Self {
        self.enable_consensus = enable;
        self
    }

    /// True for the primary-key field and every declared value field.
    pub fn is_valid_field(&self, name: &str) -> bool {
        name == self.primary_key || self.fields.iter().any(|f| f == name)
    }

    /// Whether a field contributes to the row hash span.
    pub fn is_hash_field(&self, name: &str) -> bool {
        match &self.hash_fields {
            Some(set) => set.contains(name),
            None => true,
        }
    }
}

/// One comparison against a literal key string.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeyOp {
    Eq(String),
    Ne(String),
    Gt(String),
    Ge(String),
    Lt(String),
    Le(String),
}

impl KeyOp {
    fn matches(&self, key: &str) -> bool {
        match self {
            KeyOp::Eq(v) => key == v,
            KeyOp::Ne(v) => key != v,
            KeyOp::Gt(v) => key > v.as_str(),
            KeyOp::Ge(v) => key >= v.as_str(),
            KeyOp::Lt(v) => key < v.as_str(),
            KeyOp::Le(v) => key <= v.as_str(),
        }
    }
}

/// A conjunction of key comparisons used by primary-key enumeration.
/// The empty condition matches every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Condition {
    ops: Vec<KeyOp>,
}

impl Condition {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn push(mut self, op: KeyOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn matches(&self, key: &str) -> bool {
        self.ops.iter().all(|op| op.matches(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_info() -> Arc<TableInfo> {
        TableInfo::new("accounts", "id", vec!["balance".to_string(), "nonce".to_string()])
    }

    #[test]
    fn test_field_validation() {
        let info = account_info();
        assert!(info.is_valid_field("id"));
        assert!(info.is_valid_field("balance"));
        assert!(info.is_valid_field("nonce"));
        assert!(!info.is_valid_field("owner"));
    }

    #[test]
    fn test_hash_field_subset() {
        let mut info = (*account_info()).clone();
        assert!(info.is_hash_field("balance"));

        info.hash_fields = Some(["balance".to_string()].into_iter().collect());
        assert!(info.is_hash_field("balance"));
        assert!(!info.is_hash_field("nonce"));
    }

    #[test]
    fn test_condition_matching() {
        assert!(Condition::all().matches("anything"));

        let range = Condition::all()
            .push(KeyOp::Ge("b".to_string()))
            .push(KeyOp::Lt("d".to_string()));
        assert!(!range.matches("a"));
        assert!(range.matches("b"));
        assert!(range.matches("c"));
        assert!(!range.matches("d"));

        let ne = Condition::all().push(KeyOp::Ne("x".to_string()));
        assert!(ne.matches("y"));
        assert!(!ne.matches("x"));
    }
}
