use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use crate::error::Result;

/// Container name to image digest for one workload. Keys scan results and
/// detects image changes since the last scan.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerImages(BTreeMap<String, String>);

impl ContainerImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(raw)?))
    }
}

impl Deref for ContainerImages {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ContainerImages {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K, V> FromIterator<(K, V)> for ContainerImages
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, digest)| (name.into(), digest.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_object() {
        let images: ContainerImages =
            [("web", "aaa"), ("sidecar", "bbb")].into_iter().collect();
        let json = images.to_json().unwrap();
        assert_eq!(json, r#"{"sidecar":"bbb","web":"aaa"}"#);
        assert_eq!(ContainerImages::from_json(&json).unwrap(), images);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(ContainerImages::from_json("[\"web\"]").is_err());
        assert!(ContainerImages::from_json("not json").is_err());
    }
}
