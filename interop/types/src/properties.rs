/*!
    Extensible property bag carried by output samples.
*/

use std::collections::BTreeMap;

/**
    Well-known sample property keys.

    `Custom` leaves room for side metadata the pipeline does not know about.
*/
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    Interlaced,
    BottomFieldFirst,
    RepeatFirstField,
    Custom(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/**
    Key/value side metadata attached to a sample.
*/
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<PropertyKey, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, key: PropertyKey, value: PropertyValue) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &PropertyKey) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /**
        Returns the property as a bool, or `None` if absent or not a bool.
    */
    pub fn get_bool(&self, key: &PropertyKey) -> Option<bool> {
        match self.entries.get(key) {
            Some(PropertyValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyKey, &PropertyValue)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_bool_ignores_other_types() {
        let mut props = Properties::new();
        props.insert(PropertyKey::Interlaced, PropertyValue::Bool(true));
        props.insert(
            PropertyKey::Custom("codec".into()),
            PropertyValue::Text("h264".into()),
        );

        assert_eq!(props.get_bool(&PropertyKey::Interlaced), Some(true));
        assert_eq!(props.get_bool(&PropertyKey::Custom("codec".into())), None);
        assert_eq!(props.get_bool(&PropertyKey::BottomFieldFirst), None);
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn insert_replaces_existing_value() {
        let mut props = Properties::new();
        props.insert(PropertyKey::RepeatFirstField, PropertyValue::Bool(true));
        props.insert(PropertyKey::RepeatFirstField, PropertyValue::Bool(false));
        assert_eq!(props.get_bool(&PropertyKey::RepeatFirstField), Some(false));
        assert_eq!(props.len(), 1);
    }
}
