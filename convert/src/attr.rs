//! Typed attribute extraction.
//!
//! Every converter declares the attributes it reads as a fixed schema. The
//! whole schema is checked against the node in one pass before any parameter
//! is built, so a converter never sees an absent required attribute or a value
//! of the wrong type.

use std::collections::HashMap;
use std::fmt;

use crate::StrataResult;
use crate::errors::ConvertError;
use crate::pb::attribute_proto::AttributeType;
use crate::pb::{AttributeProto, NodeProto, TensorProto};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttrType {
    Float,
    Int,
    String,
    Tensor,
    Floats,
    Ints,
    Strings,
}

impl AttrType {
    pub fn of(attr: &AttributeProto) -> Option<AttrType> {
        match attr.attribute_type() {
            AttributeType::Float => Some(AttrType::Float),
            AttributeType::Int => Some(AttrType::Int),
            AttributeType::String => Some(AttrType::String),
            AttributeType::Tensor => Some(AttrType::Tensor),
            AttributeType::Floats => Some(AttrType::Floats),
            AttributeType::Ints => Some(AttrType::Ints),
            AttributeType::Strings => Some(AttrType::Strings),
            _ => None,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AttrType::Float => "float",
            AttrType::Int => "int",
            AttrType::String => "string",
            AttrType::Tensor => "tensor",
            AttrType::Floats => "list of floats",
            AttrType::Ints => "list of ints",
            AttrType::Strings => "list of strings",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub ty: AttrType,
    pub required: bool,
}

impl AttrSpec {
    pub const fn required(name: &'static str, ty: AttrType) -> AttrSpec {
        AttrSpec { name, ty, required: true }
    }

    pub const fn optional(name: &'static str, ty: AttrType) -> AttrSpec {
        AttrSpec { name, ty, required: false }
    }
}

/// The validated attributes of one node, looked up by name.
#[derive(Clone, Debug)]
pub struct AttributeTable<'a> {
    node: &'a NodeProto,
    schema: &'static [AttrSpec],
    values: HashMap<&'static str, &'a AttributeProto>,
}

impl<'a> AttributeTable<'a> {
    pub fn extract(node: &'a NodeProto, schema: &'static [AttrSpec]) -> StrataResult<Self> {
        let mut values = HashMap::new();
        for spec in schema {
            let Some(attr) = node.attribute.iter().find(|a| a.name == spec.name) else {
                if spec.required {
                    return Err(ConvertError::MissingAttribute {
                        node: node.display_name().into_owned(),
                        op_type: node.op_type.clone(),
                        attribute: spec.name.to_string(),
                    }
                    .into());
                }
                continue;
            };
            if AttrType::of(attr) != Some(spec.ty) {
                return Err(ConvertError::AttributeTypeMismatch {
                    node: node.display_name().into_owned(),
                    op_type: node.op_type.clone(),
                    attribute: spec.name.to_string(),
                    expected: spec.ty,
                    found: attr.attribute_type().to_string(),
                }
                .into());
            }
            trace!("  {}.{} = {:?}", node.display_name(), spec.name, attr);
            values.insert(spec.name, attr);
        }
        for attr in &node.attribute {
            if !schema.iter().any(|s| s.name == attr.name) {
                trace!("  {}: ignoring undeclared attribute {}", node.display_name(), attr.name);
            }
        }
        Ok(AttributeTable { node, schema, values })
    }

    /// Names of the node attributes the schema does not declare.
    pub fn undeclared(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.node
            .attribute
            .iter()
            .filter(|a| !self.schema.iter().any(|s| s.name == a.name))
            .map(|a| a.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn get(&self, name: &str, ty: AttrType) -> StrataResult<Option<&'a AttributeProto>> {
        let Some(spec) = self.schema.iter().find(|s| s.name == name) else {
            anyhow::bail!(
                "{} converter reads attribute '{}' which its schema does not declare",
                self.node.op_type,
                name
            )
        };
        anyhow::ensure!(
            spec.ty == ty,
            "{} converter reads attribute '{}' as {}, schema declares {}",
            self.node.op_type,
            name,
            ty,
            spec.ty
        );
        Ok(self.values.get(name).copied())
    }

    fn required(&self, name: &str, ty: AttrType) -> StrataResult<&'a AttributeProto> {
        self.get(name, ty)?.ok_or_else(|| {
            ConvertError::MissingAttribute {
                node: self.node.display_name().into_owned(),
                op_type: self.node.op_type.clone(),
                attribute: name.to_string(),
            }
            .into()
        })
    }

    pub fn opt_float(&self, name: &str) -> StrataResult<Option<f32>> {
        Ok(self.get(name, AttrType::Float)?.map(|a| a.f))
    }

    pub fn float(&self, name: &str) -> StrataResult<f32> {
        Ok(self.required(name, AttrType::Float)?.f)
    }

    pub fn opt_int(&self, name: &str) -> StrataResult<Option<i64>> {
        Ok(self.get(name, AttrType::Int)?.map(|a| a.i))
    }

    pub fn int(&self, name: &str) -> StrataResult<i64> {
        Ok(self.required(name, AttrType::Int)?.i)
    }

    pub fn usize(&self, name: &str) -> StrataResult<usize> {
        let i = self.int(name)?;
        self.check_non_negative(name, i)
    }

    pub fn opt_bool(&self, name: &str) -> StrataResult<Option<bool>> {
        let Some(i) = self.opt_int(name)? else { return Ok(None) };
        self.node.expect(i == 0 || i == 1, || {
            format!("attribute '{name}' to be a boolean (0 or 1), got {i}")
        })?;
        Ok(Some(i == 1))
    }

    pub fn opt_string(&self, name: &str) -> StrataResult<Option<&'a str>> {
        let Some(attr) = self.get(name, AttrType::String)? else { return Ok(None) };
        Ok(Some(self.utf8(name, attr)?))
    }

    pub fn string(&self, name: &str) -> StrataResult<&'a str> {
        let attr = self.required(name, AttrType::String)?;
        self.utf8(name, attr)
    }

    fn utf8(&self, name: &str, attr: &'a AttributeProto) -> StrataResult<&'a str> {
        std::str::from_utf8(&attr.s).map_err(|e| {
            self.node.schema_mismatch(|| format!("attribute '{name}' is not UTF-8: {e}")).into()
        })
    }

    pub fn tensor(&self, name: &str) -> StrataResult<&'a TensorProto> {
        let attr = self.required(name, AttrType::Tensor)?;
        attr.t.as_ref().ok_or_else(|| {
            self.node.schema_mismatch(|| format!("tensor attribute '{name}' holds no tensor")).into()
        })
    }

    pub fn floats(&self, name: &str) -> StrataResult<&'a [f32]> {
        Ok(&self.required(name, AttrType::Floats)?.floats)
    }

    pub fn ints(&self, name: &str) -> StrataResult<&'a [i64]> {
        Ok(&self.required(name, AttrType::Ints)?.ints)
    }

    pub fn opt_ints(&self, name: &str) -> StrataResult<Option<&'a [i64]>> {
        Ok(self.get(name, AttrType::Ints)?.map(|a| &*a.ints))
    }

    pub fn usizes(&self, name: &str) -> StrataResult<Vec<usize>> {
        self.ints(name)?.iter().map(|&i| self.check_non_negative(name, i)).collect()
    }

    fn check_non_negative(&self, name: &str, i: i64) -> StrataResult<usize> {
        self.node.expect(i >= 0, || format!("attribute '{name}' to be non-negative, got {i}"))?;
        Ok(i as usize)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SCHEMA: &[AttrSpec] = &[
        AttrSpec::required("ratio", AttrType::Float),
        AttrSpec::optional("seed", AttrType::Int),
    ];

    fn dropout() -> NodeProto {
        NodeProto::new("Dropout", &["x"], &["y"]).named("drop")
    }

    #[test]
    fn missing_required() {
        let node = dropout();
        let err = AttributeTable::extract(&node, SCHEMA).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::MissingAttribute { attribute, .. }) if attribute == "ratio"
        ));
    }

    #[test]
    fn wrong_type() {
        let node = dropout().with_attribute(AttributeProto::int("ratio", 1));
        let err = AttributeTable::extract(&node, SCHEMA).unwrap_err();
        match err.downcast_ref::<ConvertError>() {
            Some(ConvertError::AttributeTypeMismatch { expected, found, .. }) => {
                assert_eq!(*expected, AttrType::Float);
                assert_eq!(found, "int");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn untyped_attribute_is_a_mismatch() {
        let mut attr = AttributeProto::float("ratio", 0.5);
        attr.r#type = 0;
        let node = dropout().with_attribute(attr);
        let err = AttributeTable::extract(&node, SCHEMA).unwrap_err();
        assert_eq!(err.downcast_ref::<ConvertError>().unwrap().kind(), "AttributeTypeMismatch");
    }

    #[test]
    fn optional_absent_and_undeclared_ignored() {
        let node = dropout()
            .with_attribute(AttributeProto::float("ratio", 0.25))
            .with_attribute(AttributeProto::string("training_mode", "no"));
        let table = AttributeTable::extract(&node, SCHEMA).unwrap();
        assert_eq!(table.float("ratio").unwrap(), 0.25);
        assert_eq!(table.opt_int("seed").unwrap(), None);
        assert!(table.int("seed").is_err());
        assert!(!table.contains("training_mode"));
    }

    #[test]
    fn reading_undeclared_is_an_internal_error() {
        let node = dropout().with_attribute(AttributeProto::float("ratio", 0.25));
        let table = AttributeTable::extract(&node, SCHEMA).unwrap();
        let err = table.float("scale").unwrap_err();
        assert!(err.downcast_ref::<ConvertError>().is_none());
        assert!(table.int("ratio").is_err());
    }
}
