//! Static blob shapes, known for every blob of the network being built.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::errors::ConvertError;
use crate::{StrataResult, TVec};

pub type Shape = TVec<usize>;

pub fn display_shape(shape: &[usize]) -> String {
    format!("[{}]", shape.iter().join(","))
}

/// Blob name to shape, in insertion order.
///
/// A blob is produced exactly once: inserting an already known name is an
/// error, so a translation can never silently rewrite a shape it has handed
/// out before.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BlobShapeTable {
    entries: Vec<(String, Shape)>,
    index: HashMap<String, usize>,
}

impl BlobShapeTable {
    pub fn insert(&mut self, blob: impl Into<String>, shape: Shape) -> StrataResult<()> {
        let blob = blob.into();
        if let Some(&ix) = self.index.get(&blob) {
            return Err(ConvertError::shape_inference(
                blob,
                format!("already defined with shape {}", display_shape(&self.entries[ix].1)),
            )
            .into());
        }
        trace!("  blob {} {}", blob, display_shape(&shape));
        self.index.insert(blob.clone(), self.entries.len());
        self.entries.push((blob, shape));
        Ok(())
    }

    pub fn get(&self, blob: &str) -> StrataResult<&Shape> {
        self.index.get(blob).map(|&ix| &self.entries[ix].1).ok_or_else(|| {
            ConvertError::shape_inference(blob, "no shape known for this blob").into()
        })
    }

    pub fn contains(&self, blob: &str) -> bool {
        self.index.contains_key(blob)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Shape)> {
        self.entries.iter().map(|(name, shape)| (name.as_str(), shape))
    }
}

impl fmt::Debug for BlobShapeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter().map(|(n, s)| (n, display_shape(s)))).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use smallvec::smallvec as tvec;

    #[test]
    fn insert_then_get() {
        let mut table = BlobShapeTable::default();
        table.insert("data", tvec!(1, 3, 224, 224)).unwrap();
        table.insert("conv1", tvec!(1, 64, 112, 112)).unwrap();
        assert_eq!(&**table.get("data").unwrap(), &[1, 3, 224, 224]);
        assert_eq!(table.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["data", "conv1"]);
    }

    #[test]
    fn refuses_overwrite() {
        let mut table = BlobShapeTable::default();
        table.insert("x", tvec!(2, 2)).unwrap();
        let err = table.insert("x", tvec!(4)).unwrap_err();
        assert_eq!(err.downcast_ref::<ConvertError>().unwrap().kind(), "ShapeInferenceError");
        assert_eq!(&**table.get("x").unwrap(), &[2, 2]);
    }

    #[test]
    fn missing_blob() {
        let table = BlobShapeTable::default();
        let err = table.get("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::ShapeInference { blob, .. }) if blob == "nope"
        ));
    }
}
