use std::collections::HashMap;
use std::sync::Arc;

use crate::StrataResult;
use crate::errors::ConvertError;
use crate::layer::{Converter, LayerDescriptor, NodeContext};
use crate::shape::BlobShapeTable;

/// Operator type to converter. Unknown operator types are a hard error.
#[derive(Clone, Debug)]
pub struct ConverterRegistry(pub HashMap<String, Arc<dyn Converter>>);

impl Default for ConverterRegistry {
    fn default() -> ConverterRegistry {
        let mut reg = ConverterRegistry::empty();
        crate::ops::register_all_ops(&mut reg);
        reg
    }
}

impl ConverterRegistry {
    pub fn empty() -> ConverterRegistry {
        ConverterRegistry(HashMap::new())
    }

    pub fn register(&mut self, op_type: impl Into<String>, converter: impl Converter + 'static) {
        self.0.insert(op_type.into(), Arc::new(converter));
    }

    pub fn get(&self, op_type: &str) -> Option<&Arc<dyn Converter>> {
        self.0.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.0.contains_key(op_type)
    }

    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn convert(
        &self,
        ctx: &NodeContext,
        shapes: &mut BlobShapeTable,
    ) -> StrataResult<LayerDescriptor> {
        let Some(converter) = self.get(&ctx.node.op_type) else {
            return Err(ConvertError::UnsupportedOperator {
                node: ctx.node.display_name().into_owned(),
                op_type: ctx.node.op_type.clone(),
            }
            .into());
        };
        converter.convert(ctx, shapes)
    }
}
